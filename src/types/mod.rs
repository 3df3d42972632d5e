//! Types module for identities, messages and login events.
//!
//! This module contains the data model shared by the decoder, the contact
//! store and caller-registered handlers.

mod contact;
mod content;
mod events;
mod message;

pub use contact::*;
pub use content::*;
pub use events::*;
pub use message::*;
