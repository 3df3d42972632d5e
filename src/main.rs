use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use vchat_rust::protocol::qr::render_qr_ascii;
use vchat_rust::types::{QrEvent, ScanCode};
use vchat_rust::{
    Client, ClientConfig, ClientResult, ContentKind, ExitCallback, HandlerRegistry, HttpTransport,
    LoginCallback, QrCallback,
};

/// Echo bot demonstrating the vchat-rust client.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the hot-reload snapshot.
    #[arg(long, default_value = "./data/vchat.json")]
    snapshot: PathBuf,

    /// Always scan a fresh QR code instead of resuming the snapshot.
    #[arg(long)]
    no_hot_reload: bool,

    /// Override the user agent advertised by the client.
    #[arg(long)]
    user_agent: Option<String>,

    /// Only echo messages that mention this account in group chats.
    #[arg(long)]
    mentions_only: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = ClientConfig::default().with_snapshot_path(cli.snapshot.clone());
    if let Some(agent) = cli.user_agent {
        config = config.with_user_agent(agent);
    }
    if let Some(dir) = cli.snapshot.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let transport = Arc::new(HttpTransport::new(config.clone()));
    let client = Arc::new(Client::new(config, transport));

    let on_qr: QrCallback = Box::new(print_qr);
    let on_login: LoginCallback = Box::new(|name| {
        println!("Logged in as {name}");
        Ok(())
    });
    client
        .auto_login(
            !cli.no_hot_reload,
            Some(cli.snapshot.as_path()),
            Some(&on_qr),
            Some(&on_login),
        )
        .await?;

    let mut registry = HandlerRegistry::new();
    let replier = client.clone();
    let mentions_only = cli.mentions_only;
    registry.register(&[ContentKind::Text], &[], move |message| {
        let client = replier.clone();
        async move {
            if mentions_only && message.is_at_me == Some(false) {
                return Ok(());
            }
            let me = client.me().await.map(|p| p.username).unwrap_or_default();
            if message.from.username() == me {
                return Ok(());
            }
            let reply = format!("echo: {}", message.content);
            client.send_text(&reply, message.reply_target(&me)).await?;
            Ok(())
        }
    });

    let on_exit: ExitCallback = Box::new(|| {
        println!("Session ended");
        Ok(())
    });
    client.run(registry, Some(on_exit)).await?;
    Ok(())
}

fn print_qr(event: &QrEvent) -> ClientResult<()> {
    match event.status {
        ScanCode::Issued => {
            println!("{}", render_qr_ascii(&event.login_url)?);
            println!("Scan the code above, or open {}", event.login_url);
        }
        ScanCode::Waiting => println!("Scanned. Confirm the login on your phone."),
        other => println!("Login status: {}", other.as_code()),
    }
    Ok(())
}
