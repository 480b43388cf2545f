//! Procedures of the chat demo.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use seamless_rpc::server::use_context;
use seamless_rpc::stream::{event_stream, EventStream};
use seamless_rpc::{procedure, RpcError};

const SESSION_COOKIE: &str = "chat_user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub text: String,
}

static ROOM: LazyLock<broadcast::Sender<Message>> = LazyLock::new(|| broadcast::channel(64).0);

fn current_user() -> Result<String, RpcError> {
    let ctx = use_context().map_err(|err| RpcError::new(err.to_string()))?;
    ctx.cookie(SESSION_COOKIE).ok_or(RpcError::Unauthorized)
}

pub async fn login(username: String) -> Result<String, RpcError> {
    let username = username.trim().to_string();
    if username.is_empty() {
        return Err(RpcError::validation(
            serde_json::json!({ "username": { "_errors": ["required"] } }),
        ));
    }

    let ctx = use_context().map_err(|err| RpcError::new(err.to_string()))?;
    ctx.set_cookie(SESSION_COOKIE, &username)
        .map_err(|_| RpcError::validation("username must be a valid cookie value"))?;
    Ok(format!("Welcome, {username}"))
}

pub async fn send(text: String) -> Result<(), RpcError> {
    let from = current_user()?;
    // No receivers just means nobody is listening yet.
    let _ = ROOM.send(Message { from, text });
    Ok(())
}

pub async fn messages() -> Result<EventStream<Message>, RpcError> {
    current_user()?;
    let mut room = ROOM.subscribe();

    Ok(event_stream(|controller| {
        let forward = tokio::spawn(async move {
            loop {
                match room.recv().await {
                    Ok(message) => {
                        if controller.enqueue(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Chat listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        controller.close();
                        break;
                    }
                }
            }
        });
        move || forward.abort()
    }))
}

procedure!(login, send, messages);
