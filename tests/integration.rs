//! Integration tests for seamless-rpc.
//!
//! Each test starts a server on a loopback port and talks to it with the
//! real client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use seamless_rpc::client::{RpcStream, Subscription, ABORTED};
use seamless_rpc::config::ClientConfig;
use seamless_rpc::server::use_context;
use seamless_rpc::stream::{event_stream, EventStream};
use seamless_rpc::{Error, Json, Registry, RpcClient, RpcError, RpcServer};

const PATH: &str = "demo_server.rs";

static ENDLESS_CLEANUPS: AtomicUsize = AtomicUsize::new(0);
static SHUTDOWN_CLEANUPS: AtomicUsize = AtomicUsize::new(0);
static CANCEL_CLEANUPS: AtomicUsize = AtomicUsize::new(0);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn echo(text: String, times: u32) -> Json<Value> {
    Json(json!({ "text": text.repeat(times as usize), "times": times }))
}

async fn pair(a: Value, b: Value) -> Json<Value> {
    Json(json!({ "arg0": a, "arg1": b }))
}

async fn nothing() {}

async fn forbidden() -> Result<(), RpcError> {
    Err(RpcError::Forbidden)
}

async fn register(username: String) -> Result<String, RpcError> {
    if username.len() < 3 {
        return Err(RpcError::validation(
            json!({ "username": { "_errors": ["too short"] } }),
        ));
    }
    Ok(username)
}

async fn boom() -> anyhow::Result<u32> {
    Err(anyhow::anyhow!("database down"))
}

async fn login(username: String) -> Result<(), RpcError> {
    let ctx = use_context().map_err(|err| RpcError::new(err.to_string()))?;
    ctx.set_cookie("session", &username)
        .map_err(|err| RpcError::new(err.to_string()))?;
    Ok(())
}

async fn whoami() -> Result<Option<String>, RpcError> {
    let ctx = use_context().map_err(|err| RpcError::new(err.to_string()))?;
    Ok(ctx.cookie("session"))
}

async fn hello_world() -> EventStream<String> {
    event_stream(|controller| {
        tokio::spawn(async move {
            controller.enqueue("hello".to_string()).await.ok();
            controller.enqueue("world".to_string()).await.ok();
            controller.close();
        });
        || {}
    })
}

async fn broken() -> EventStream<u32> {
    event_stream(|controller| {
        tokio::spawn(async move {
            controller.enqueue(1).await.ok();
            controller.error("stream broke");
        });
        || {}
    })
}

fn ticker(cleanups: &'static AtomicUsize) -> EventStream<u64> {
    event_stream(move |controller| {
        let task = tokio::spawn(async move {
            let mut tick = 0u64;
            loop {
                if controller.enqueue(tick).await.is_err() {
                    break;
                }
                tick += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        move || {
            task.abort();
            cleanups.fetch_add(1, Ordering::SeqCst);
        }
    })
}

async fn endless() -> EventStream<u64> {
    ticker(&ENDLESS_CLEANUPS)
}

async fn endless_until_shutdown() -> EventStream<u64> {
    ticker(&SHUTDOWN_CLEANUPS)
}

async fn endless_until_cancel() -> EventStream<u64> {
    ticker(&CANCEL_CLEANUPS)
}

fn registry() -> Registry {
    Registry::builder()
        .procedure(PATH, "echo", echo)
        .procedure(PATH, "pair", pair)
        .procedure(PATH, "nothing", nothing)
        .procedure(PATH, "forbidden", forbidden)
        .procedure(PATH, "register", register)
        .procedure(PATH, "boom", boom)
        .procedure(PATH, "login", login)
        .procedure(PATH, "whoami", whoami)
        .procedure(PATH, "hello_world", hello_world)
        .procedure(PATH, "broken", broken)
        .procedure(PATH, "endless", endless)
        .procedure(PATH, "endless_until_shutdown", endless_until_shutdown)
        .procedure(PATH, "endless_until_cancel", endless_until_cancel)
        .build()
        .unwrap()
}

async fn start_server() -> String {
    init_tracing();
    let server = RpcServer::builder().registry(registry()).build().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    format!("http://{addr}/rpc")
}

async fn client(sse: bool) -> RpcClient {
    let url = start_server().await;
    RpcClient::new(ClientConfig::new().url(url).sse(sse).hash_paths(false)).unwrap()
}

async fn wait_for(counter: &AtomicUsize, at_least: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counter.load(Ordering::SeqCst) < at_least {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cleanup did not run");
}

seamless_rpc::rpc_client! {
    struct Demo from "demo_server.rs" {
        async fn echo(text: String, times: u32) -> Json<Value>;
        async fn nothing() -> ();
        async fn hello_world() -> RpcStream<String>;
    }
}

#[tokio::test]
async fn test_value_reply() {
    let client = client(false).await;

    let reply: Value = client
        .rpc("demo_server/echo")
        .invoke(vec![json!("ab"), json!(2)])
        .await
        .unwrap();

    assert_eq!(reply, json!({ "text": "abab", "times": 2 }));
}

#[tokio::test]
async fn test_arguments_round_trip() {
    let client = client(false).await;
    let a = json!({ "nested": [1, 2.5, null, true], "text": "héllo" });
    let b = json!(-42);

    let reply: Value = client
        .rpc("demo_server/pair")
        .invoke(vec![a.clone(), b.clone()])
        .await
        .unwrap();

    assert_eq!(reply, json!({ "arg0": a, "arg1": b }));
}

#[tokio::test]
async fn test_hashed_id_reaches_same_procedure() {
    let url = start_server().await;
    let client = RpcClient::new(ClientConfig::new().url(url).hash_paths(true)).unwrap();

    let procedure = client.procedure(PATH, "echo");
    assert_ne!(procedure.procedure_id(), "demo_server/echo");

    let reply: Json<Value> = procedure.invoke(vec![json!("x"), json!(1)]).await.unwrap();
    assert_eq!(reply["text"], "x");
}

#[tokio::test]
async fn test_empty_reply() {
    let client = client(false).await;

    let reply = client.rpc("demo_server/nothing").call(vec![]).await.unwrap();
    assert!(matches!(reply, seamless_rpc::client::Reply::Empty));
}

#[tokio::test]
async fn test_error_statuses() {
    let client = client(false).await;

    let Err(Error::Status(err)) = client.rpc("demo_server/forbidden").call(vec![]).await else {
        panic!("expected a status error");
    };
    assert_eq!(err.status.as_u16(), 403);
    assert_eq!(err.rpc_error(), Some(RpcError::Forbidden));

    let Err(Error::Status(err)) = client.rpc("demo_server/missing").call(vec![]).await else {
        panic!("expected a status error");
    };
    assert_eq!(err.status.as_u16(), 404);
    assert_eq!(err.rpc_error(), Some(RpcError::ProcedureNotFound));

    let Err(Error::Status(err)) = client.rpc("demo_server/boom").call(vec![]).await else {
        panic!("expected a status error");
    };
    assert_eq!(err.status.as_u16(), 500);
    assert!(err.body.is_empty());
    assert_eq!(err.rpc_error(), None);
}

#[tokio::test]
async fn test_validation_payload() {
    let client = client(false).await;

    let Err(Error::Status(err)) = client
        .rpc("demo_server/register")
        .call(vec![json!("ab")])
        .await
    else {
        panic!("expected a status error");
    };

    assert_eq!(err.status.as_u16(), 400);
    assert_eq!(
        err.payload(),
        Some(json!({ "username": { "_errors": ["too short"] } }))
    );
}

#[tokio::test]
async fn test_wrong_argument_type_is_validation_error() {
    let client = client(false).await;

    let Err(Error::Status(err)) = client
        .rpc("demo_server/echo")
        .call(vec![json!("ab"), json!("two")])
        .await
    else {
        panic!("expected a status error");
    };
    assert_eq!(err.status.as_u16(), 400);
}

#[tokio::test]
async fn test_cookies_round_trip() {
    let client = client(false).await;

    let before: Option<String> = client.rpc("demo_server/whoami").invoke(vec![]).await.unwrap();
    assert_eq!(before, None);

    client
        .rpc("demo_server/login")
        .invoke::<()>(vec![json!("ada")])
        .await
        .unwrap();

    let after: Option<String> = client.rpc("demo_server/whoami").invoke(vec![]).await.unwrap();
    assert_eq!(after.as_deref(), Some("ada"));
}

#[tokio::test]
async fn test_stream_values_in_order() {
    let client = client(true).await;

    let stream: RpcStream<String> = client
        .rpc("demo_server/hello_world")
        .invoke(vec![])
        .await
        .unwrap();
    let values: Vec<_> = stream.collect().await;

    assert_eq!(
        values,
        vec![Ok("hello".to_string()), Ok("world".to_string())]
    );
    assert_eq!(client.open_streams(), 0);
}

#[tokio::test]
async fn test_stream_error_after_values() {
    let client = client(true).await;

    let mut stream: RpcStream<u32> = client.rpc("demo_server/broken").invoke(vec![]).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), 1);
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.message(), "stream broke");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stream_rejected_when_sse_disabled() {
    let client = client(false).await;

    let result = client.rpc("demo_server/hello_world").call(vec![]).await;
    assert!(matches!(result, Err(Error::SseDisabled)));
}

#[tokio::test]
async fn test_dropping_stream_cancels_producer_once() {
    let client = client(true).await;

    let mut stream: RpcStream<u64> = client
        .rpc("demo_server/endless_until_cancel")
        .invoke(vec![])
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), 0);
    assert_eq!(stream.next().await.unwrap().unwrap(), 1);
    assert_eq!(client.open_streams(), 1);

    drop(stream);

    assert_eq!(client.open_streams(), 0);
    wait_for(&CANCEL_CLEANUPS, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(CANCEL_CLEANUPS.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_raw_stream_starts_with_connected() {
    let url = start_server().await;

    let response = reqwest::Client::new()
        .post(format!("{url}/demo_server/hello_world"))
        .header("content-type", "application/json")
        .body("[]")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.text().await.unwrap(),
        "event: connected\ndata:\n\ndata: \"hello\"\n\ndata: \"world\"\n\n"
    );
}

#[tokio::test]
async fn test_malformed_body_never_reaches_procedure() {
    let url = start_server().await;
    let http = reqwest::Client::new();

    for body in ["{\"text\": \"a\"}", "[1,", ""] {
        let response = http
            .post(format!("{url}/demo_server/nothing"))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        assert_eq!(response.text().await.unwrap(), "\"Invalid request body\"");
    }
}

#[tokio::test]
async fn test_shutdown_aborts_open_streams() {
    let client = client(true).await;

    let mut stream: RpcStream<u64> = client
        .rpc("demo_server/endless_until_shutdown")
        .invoke(vec![])
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), 0);

    assert_eq!(client.shutdown(), 1);
    assert_eq!(client.open_streams(), 0);

    let err = loop {
        match stream.next().await {
            Some(Ok(_)) => continue,
            Some(Err(err)) => break err,
            None => panic!("stream ended without an abort error"),
        }
    };
    assert_eq!(err.message(), ABORTED);
    assert!(stream.is_aborted());

    wait_for(&SHUTDOWN_CLEANUPS, 1).await;
}

#[tokio::test]
async fn test_generated_client() {
    let client = client(true).await;
    let demo = Demo::new(client);

    let reply = demo.echo("z".to_string(), 3).await.unwrap();
    assert_eq!(reply["text"], "zzz");

    demo.nothing().await.unwrap();

    let values: Vec<_> = demo.hello_world().await.unwrap().collect().await;
    assert_eq!(values.len(), 2);
}

#[tokio::test]
async fn test_subscription_delivers_then_closes() {
    let client = client(true).await;
    let received = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Notify::new());

    let sink = received.clone();
    let notify = closed.clone();
    let subscription = Subscription::new(move |value: String| sink.lock().push(value))
        .on_close(move || notify.notify_one());

    subscription
        .subscribe(client.rpc("demo_server/hello_world").invoke(vec![]))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), closed.notified())
        .await
        .unwrap();
    subscription.unsubscribe().await;

    assert_eq!(*received.lock(), vec!["hello".to_string(), "world".to_string()]);
    assert!(!subscription.is_subscribed());
}

#[tokio::test]
async fn test_subscription_reports_errors() {
    let client = client(true).await;
    let failure = Arc::new(Mutex::new(None));

    let sink = failure.clone();
    let subscription = Subscription::new(|_: u32| {}).on_error(move |err| {
        *sink.lock() = Some(err.to_string());
    });

    subscription
        .subscribe(client.rpc("demo_server/broken").invoke(vec![]))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while failure.lock().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(failure.lock().as_deref(), Some("stream broke"));
}

#[tokio::test]
async fn test_subscription_rejects_second_subscribe() {
    let client = client(true).await;
    let closes = Arc::new(AtomicUsize::new(0));

    let counter = closes.clone();
    let subscription = Subscription::new(|_: u64| {}).on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    subscription
        .subscribe(client.rpc("demo_server/endless").invoke(vec![]))
        .await
        .unwrap();
    assert!(subscription.is_subscribed());

    let second = subscription
        .subscribe(client.rpc("demo_server/endless").invoke(vec![]))
        .await;
    assert!(matches!(second, Err(Error::AlreadySubscribed)));

    subscription.unsubscribe().await;
    assert!(!subscription.is_subscribed());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(client.open_streams(), 0);
}
