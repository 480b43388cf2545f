//! Chat demo: a server and a client in one process.
//!
//! ```text
//! RUST_LOG=seamless_rpc=debug cargo run --example chat
//! ```

mod chat_server;

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use chat_server::Message;
use seamless_rpc::client::{RpcClient, RpcStream, Subscription};
use seamless_rpc::config::ClientConfig;
use seamless_rpc::RpcServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let server = RpcServer::builder().root_dir("demos").build()?;
    for id in server.registry().ids() {
        tracing::info!(id, "Serving procedure");
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}{}", listener.local_addr()?, server.base_path());
    tokio::spawn(server.serve(listener));

    let client = RpcClient::new(ClientConfig::new().url(url).sse(true))?;
    client.shutdown_on_ctrl_c();

    let greeting: String = client
        .procedure("chat_server.rs", "login")
        .invoke(vec![json!("ada")])
        .await?;
    println!("{greeting}");

    let listener = Subscription::new(|message: Message| {
        println!("<{}> {}", message.from, message.text);
    })
    .on_close(|| println!("-- disconnected --"));

    listener
        .subscribe(
            client
                .procedure("chat_server.rs", "messages")
                .invoke::<RpcStream<Message>>(vec![]),
        )
        .await?;

    for text in ["hello", "is anyone here?", "bye"] {
        client
            .procedure("chat_server.rs", "send")
            .invoke::<()>(vec![json!(text)])
            .await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    listener.unsubscribe().await;
    Ok(())
}
