//! Integration tests for the status WebSocket + REST surface.
//!
//! Each test serves the status router on a random port and talks to it over
//! a real socket with tokio-tungstenite.

mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use inbox_engine::api::status_routes;
use inbox_engine::config::InboxConfig;

use common::{Harness, ScriptedIntelligence};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve the status routes for `h` on a random port.
async fn start_server(h: &Harness) -> u16 {
    let app = status_routes(h.inbox.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

fn settled(stats: &Value) -> u64 {
    ["completed", "errors", "bypassed"]
        .iter()
        .filter_map(|key| stats[key].as_u64())
        .sum()
}

#[tokio::test]
async fn ws_connect_receives_current_stats() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new(InboxConfig::default(), ScriptedIntelligence::default());
        let port = start_server(&h).await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .expect("WS connect failed");

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "stats_updated");
        assert_eq!(json["stats"]["active"], 0);
        assert_eq!(json["stats"]["total"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_streams_events_until_drained() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new(InboxConfig::default(), ScriptedIntelligence::default());
        let port = start_server(&h).await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();
        let _ = ws.next().await.unwrap().unwrap();

        h.enqueue("a.md", "Enough text to process").await;
        h.enqueue("b.md", "abc").await;

        let mut last_stats = Value::Null;
        let mut bypassed = 0;
        loop {
            let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
            match json["type"].as_str() {
                Some("stats_updated") => last_stats = json["stats"].clone(),
                Some("bypassed") => bypassed += 1,
                // the first file may drain the queue before the second is added
                Some("drained") if settled(&last_stats) == 2 => break,
                Some("drained") => {}
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(bypassed, 1);
        assert_eq!(last_stats["completed"], 1);
        assert_eq!(last_stats["bypassed"], 1);
        assert_eq!(last_stats["active"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_answers_ping_and_ignores_text() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new(InboxConfig::default(), ScriptedIntelligence::default());
        let port = start_server(&h).await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();
        let _ = ws.next().await.unwrap().unwrap();

        ws.send(Message::Text("hello".into())).await.unwrap();
        ws.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();

        match ws.next().await.unwrap().unwrap() {
            Message::Pong(data) => assert_eq!(&data[..], &[1, 2, 3]),
            other => panic!("expected Pong, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_lists_processed_files() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new(InboxConfig::default(), ScriptedIntelligence::default());
        let port = start_server(&h).await;

        let hash = h.enqueue("note.md", "Something worth filing").await;
        h.drain().await;

        let files: Value = reqwest::get(format!("http://127.0.0.1:{port}/api/inbox/files"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let files = files.as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["id"], hash);
        assert_eq!(files[0]["status"], "completed");
        assert_eq!(files[0]["container_path"], "Notes/note.md");
    })
    .await
    .expect("test timed out");
}
