mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{MockServer, SHUTDOWN, WINDOW};
use serde_json::json;
use tilewire::{AsyncConnection, AsyncHandler, Event, IpcError, MessageType};
use tokio::time::timeout;

const SAFETY_TIMEOUT: Duration = Duration::from_secs(5);

fn window_event(change: &str, id: u64) -> serde_json::Value {
    json!({
        "change": change,
        "container": {"id": id, "type": "con", "nodes": [], "floating_nodes": []}
    })
}

/// Poll without blocking the runtime, so the reader task keeps running
async fn until(mut condition: impl FnMut() -> bool) {
    timeout(SAFETY_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_get_version() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let version = conn.get_version().await.unwrap();
    assert_eq!(version.major, Some(4));
    assert_eq!(version.loaded_config_file_name.as_deref(), Some("/etc/conf"));
}

#[tokio::test]
async fn test_requests_and_tree() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    assert_eq!(conn.command("nop; nop; nop").await.unwrap().len(), 3);
    assert_eq!(conn.get_workspaces().await.unwrap().len(), 2);

    let tree = conn.get_tree().await.unwrap();
    let editor = tree.find_by_id(5).unwrap();
    editor.command_async(&conn, "fullscreen").await.unwrap();

    assert_eq!(
        server.requests_of(MessageType::RunCommand).last().map(String::as_str),
        Some(r#"[con_id="5"] fullscreen"#)
    );
}

#[tokio::test]
async fn test_window_handler_matches_change() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let created = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&created);
    let on_new = AsyncHandler::new(move |conn, event| {
        let seen = Arc::clone(&seen);
        async move {
            if let Event::Window(window) = &*event {
                seen.lock().unwrap().push(window.container.id);
            }
            conn.main_quit();
            Ok(())
        }
    });

    let count = Arc::clone(&closed);
    let on_close = AsyncHandler::new(move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    conn.on("window::new", on_new).await.unwrap();
    conn.on("window::close", on_close).await.unwrap();
    until(|| server.subscriber_count() == 1).await;

    server.emit(WINDOW, window_event("focus", 3));
    server.emit(WINDOW, window_event("new", 7));

    timeout(SAFETY_TIMEOUT, conn.main()).await.unwrap().unwrap();

    assert_eq!(*created.lock().unwrap(), vec![7]);
    assert_eq!(closed.load(Ordering::SeqCst), 0);
    // the second registration found the kind already subscribed
    assert_eq!(server.requests_of(MessageType::Subscribe).len(), 1);
}

#[tokio::test]
async fn test_handler_error_ends_main() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let failing = AsyncHandler::new(|_, _| async { Err(anyhow::anyhow!("boom")) });
    conn.on("window", failing).await.unwrap();
    until(|| server.subscriber_count() == 1).await;

    server.emit(WINDOW, window_event("new", 1));

    let result = timeout(SAFETY_TIMEOUT, conn.main()).await.unwrap();
    match result {
        Err(IpcError::Handler(e)) => assert_eq!(e.to_string(), "boom"),
        other => panic!("expected handler error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failure_before_main_is_kept() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let failing = AsyncHandler::new(|_, _| async { Err(anyhow::anyhow!("early")) });
    conn.on("window", failing).await.unwrap();
    until(|| server.subscriber_count() == 1).await;

    server.emit(WINDOW, window_event("new", 1));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = timeout(SAFETY_TIMEOUT, conn.main()).await.unwrap();
    assert!(matches!(result, Err(IpcError::Handler(_))));
}

#[tokio::test]
async fn test_main_twice_is_rejected() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let running = tokio::spawn({
        let conn = conn.clone();
        async move { conn.main().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(conn.main().await, Err(IpcError::AlreadyRunning)));

    conn.main_quit();
    timeout(SAFETY_TIMEOUT, running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_subscribe_skips_known_kinds() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let reply = conn.subscribe(&["window", "tick"], false).await.unwrap();
    assert!(reply.unwrap().is_success());

    assert!(conn.subscribe(&["window"], false).await.unwrap().is_none());
    assert!(conn.subscribe(&["window"], true).await.unwrap().is_some());

    let err = conn.subscribe(&["window::new"], false).await.unwrap_err();
    assert!(matches!(err, IpcError::DetailedSubscription(_)));

    assert_eq!(
        server.requests_of(MessageType::Subscribe),
        vec![r#"["window","tick"]"#.to_string(), r#"["window"]"#.to_string()]
    );
}

#[tokio::test]
async fn test_tick_reaches_handler() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&payloads);
    let on_tick = AsyncHandler::new(move |conn, event| {
        let seen = Arc::clone(&seen);
        async move {
            if let Event::Tick(tick) = &*event {
                seen.lock().unwrap().push(tick.payload.clone());
            }
            conn.main_quit();
            Ok(())
        }
    });
    conn.on("tick", on_tick).await.unwrap();
    until(|| server.subscriber_count() == 1).await;

    // main() must be waiting before the handler quits it
    let (result, tick) = timeout(SAFETY_TIMEOUT, async {
        tokio::join!(conn.main(), conn.send_tick("hello"))
    })
    .await
    .unwrap();
    result.unwrap();
    tick.unwrap();

    assert_eq!(*payloads.lock().unwrap(), vec![Some("hello".to_string())]);
}

#[tokio::test]
async fn test_off_removes_handler() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&calls);
    let handler = AsyncHandler::new(move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    conn.on("tick", handler.clone()).await.unwrap();
    until(|| server.subscriber_count() == 1).await;

    conn.send_tick("one").await.unwrap();
    until(|| calls.load(Ordering::SeqCst) == 1).await;

    conn.off(&handler);
    conn.send_tick("two").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_closed_socket_ends_main_without_reconnect() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options()).await.unwrap();

    let shutdowns = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&shutdowns);
    conn.subscribe(&["window"], false).await.unwrap();
    conn.on(
        "ipc_shutdown",
        AsyncHandler::new(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }),
    )
    .await
    .unwrap();
    until(|| server.subscriber_count() == 1).await;

    server.disconnect_all();

    let result = timeout(SAFETY_TIMEOUT, conn.main()).await.unwrap();
    assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    until(|| shutdowns.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_restart_reconnects() {
    let server = MockServer::start();
    let conn = AsyncConnection::connect(server.options().auto_reconnect(true))
        .await
        .unwrap();

    conn.subscribe(&["window", "shutdown"], false).await.unwrap();
    until(|| server.subscriber_count() == 1).await;

    server.restart();

    let replies = timeout(SAFETY_TIMEOUT, conn.command("nop"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replies.len(), 1);

    // the full subscription set is sent again on the new event socket
    until(|| server.requests_of(MessageType::Subscribe).len() == 2).await;
    assert_eq!(
        server.requests_of(MessageType::Subscribe)[1],
        r#"["window","shutdown"]"#
    );
    assert!(conn.get_version().await.is_ok());
}

#[tokio::test]
async fn test_restart_waits_for_socket_to_reappear() {
    let server = MockServer::start();
    let options = server
        .options()
        .auto_reconnect(true)
        .reconnect(400, Duration::from_millis(5));
    let conn = AsyncConnection::connect(options).await.unwrap();

    let created = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&created);
    let on_new = AsyncHandler::new(move |conn, event| {
        let seen = Arc::clone(&seen);
        async move {
            if let Event::Window(window) = &*event {
                seen.lock().unwrap().push(window.container.id);
            }
            conn.main_quit();
            Ok(())
        }
    });
    conn.on("window::new", on_new).await.unwrap();
    until(|| server.subscriber_count() == 1).await;

    server.emit(SHUTDOWN, json!({"change": "restart"}));
    server.vanish();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server.path().exists());
    server.reappear();

    until(|| server.subscriber_count() == 1).await;
    server.emit(WINDOW, window_event("new", 9));
    timeout(SAFETY_TIMEOUT, conn.main()).await.unwrap().unwrap();

    assert_eq!(*created.lock().unwrap(), vec![9]);
    assert_eq!(
        server.requests_of(MessageType::Subscribe),
        vec![r#"["window"]"#.to_string(), r#"["window"]"#.to_string()]
    );
    assert!(conn.get_version().await.is_ok());
}

#[tokio::test]
async fn test_reconnect_gives_up_when_socket_stays_gone() {
    let server = MockServer::start();
    let options = server
        .options()
        .auto_reconnect(true)
        .reconnect(3, Duration::from_millis(5));
    let conn = AsyncConnection::connect(options).await.unwrap();

    conn.subscribe(&["window"], false).await.unwrap();
    until(|| server.subscriber_count() == 1).await;

    server.vanish();

    // the failure that started the reconnect ends main()
    let result = timeout(SAFETY_TIMEOUT, conn.main()).await.unwrap();
    assert!(matches!(result, Err(IpcError::ConnectionClosed)));

    let err = conn.get_version().await.unwrap_err();
    assert!(err.is_transport());
}
