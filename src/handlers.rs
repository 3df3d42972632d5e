//! Handler registry and the consumer side of the inbound queue.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info, warn};

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::sync::ExitCallback;
use crate::types::{ContentKind, IdentityKind, Message};

type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, ClientResult<()>> + Send + Sync>;

/// Handle returned by [`HandlerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    content_kinds: Vec<ContentKind>,
    conversation_kinds: Vec<IdentityKind>,
    handler: Handler,
}

impl Registration {
    fn accepts(&self, message: &Message) -> bool {
        (self.content_kinds.is_empty() || self.content_kinds.contains(&message.content_kind()))
            && (self.conversation_kinds.is_empty()
                || self.conversation_kinds.contains(&message.conversation_kind()))
    }
}

/// Handlers invoked for each dequeued message, in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: u64,
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler. An empty kind list matches every kind.
    pub fn register<F, Fut>(
        &mut self,
        content_kinds: &[ContentKind],
        conversation_kinds: &[IdentityKind],
        handler: F,
    ) -> HandlerId
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<()>> + Send + 'static,
    {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.registrations.push(Registration {
            id,
            content_kinds: content_kinds.to_vec(),
            conversation_kinds: conversation_kinds.to_vec(),
            handler: Arc::new(move |message| handler(message).boxed()),
        });
        id
    }

    /// Unregister a handler. Returns false if it was already gone.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.registrations.len() != before
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Run every matching handler in turn. Errors and panics are logged and
    /// never interrupt dispatch. Returns how many handlers ran.
    pub async fn dispatch(&self, message: &Message) -> usize {
        let mut invoked = 0;
        for registration in self.registrations.iter().filter(|r| r.accepts(message)) {
            invoked += 1;
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                (registration.handler)(message.clone())
            })) {
                Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => ClientError::UserCallback(e.to_string()),
                Err(_) => ClientError::UserCallback("handler panicked".into()),
            };
            warn!(
                target: "Client/Handlers",
                "Handler {:?} failed on message {}: {}", registration.id, message.message_id, failure
            );
        }
        invoked
    }
}

impl Client {
    /// Receive and dispatch until the session ends. The producer and the
    /// consumer run concurrently; handlers run one message at a time.
    pub async fn run(&self, registry: HandlerRegistry, exit_callback: Option<ExitCallback>) -> ClientResult<()> {
        self.require_login().await?;
        self.alive.send_replace(true);
        info!(target: "Client/Handlers", "Start auto replying with {} handlers", registry.len());
        tokio::join!(self.consume(&registry), self.receive_loop(exit_callback));
        Ok(())
    }

    /// Drain the inbound queue into `registry` while the session is alive,
    /// then dispatch whatever is still queued.
    async fn consume(&self, registry: &HandlerRegistry) {
        let mut alive = self.alive.subscribe();
        let mut inbound = self.inbound_rx.lock().await;
        loop {
            if !*alive.borrow_and_update() {
                break;
            }
            tokio::select! {
                biased;
                message = inbound.recv() => match message {
                    Some(message) => {
                        registry.dispatch(&message).await;
                    }
                    None => break,
                },
                changed = alive.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        while let Ok(message) = inbound.try_recv() {
            registry.dispatch(&message).await;
        }
        debug!(target: "Client/Handlers", "Consumer stopped");
    }
}
