//! HTTP state client against a live state API.

use std::sync::Arc;
use std::time::Duration;

use fleet_coord::api::{self, ApiState};
use fleet_coord::error::CoordError;
use fleet_coord::instruction::{self, Instruction, InstructionSender};
use fleet_coord::state::{Document, HttpStateClient, InMemoryStateStore, State, StateStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct Server {
    client: HttpStateClient,
    store: Arc<InMemoryStateStore>,
    receiver: instruction::InstructionReceiver,
    cancel: CancellationToken,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_server() -> Server {
    let (inbox, receiver) = instruction::channel(4);
    let store = Arc::new(InMemoryStateStore::with_inbox(inbox));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();

    tokio::spawn(api::serve(listener, ApiState::new(store.clone()), cancel.clone()));

    Server {
        client: HttpStateClient::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap(),
        store,
        receiver,
        cancel,
    }
}

#[tokio::test]
async fn test_get_upsert_delete() {
    let server = start_server().await;
    let client = &server.client;

    assert!(client.get("doc").await.unwrap().is_none());

    let doc = Document::new("doc", &State::new().with("serviceState", true)).unwrap();
    client.upsert(&doc).await.unwrap();
    assert_eq!(client.get("doc").await.unwrap(), Some(doc.clone()));

    // Upsert of an existing id replaces it.
    let replaced = Document::new("doc", &State::new().with("serviceState", false)).unwrap();
    client.upsert(&replaced).await.unwrap();
    assert_eq!(client.get("doc").await.unwrap(), Some(replaced));

    assert!(client.delete("doc").await.unwrap());
    assert!(!client.delete("doc").await.unwrap());
    assert!(server.store.is_empty().await);
}

#[tokio::test]
async fn test_ids_with_reserved_characters_round_trip() {
    let server = start_server().await;
    let client = &server.client;
    let id = "dir/sub doc?x";

    let doc = Document::new(id, &State::new().with("serviceState", true)).unwrap();
    client.upsert(&doc).await.unwrap();

    assert_eq!(server.store.get(id).await.unwrap(), Some(doc.clone()));
    assert_eq!(client.get(id).await.unwrap(), Some(doc));
    assert!(client.get("dir").await.unwrap().is_none());
    assert!(client.delete(id).await.unwrap());
    assert!(server.store.is_empty().await);
}

#[tokio::test]
async fn test_heartbeat_and_events() {
    let server = start_server().await;

    assert!(server.client.heartbeat().await.unwrap());
    // No dispatcher is draining the inbox.
    assert!(!server.client.events_online().await.unwrap());
}

#[tokio::test]
async fn test_instruction_sent_over_http_is_queued() {
    let mut server = start_server().await;
    let sender = InstructionSender::new(Arc::new(server.client.clone()));

    sender
        .send(&Instruction::reset("svcA"), &CancellationToken::new())
        .await
        .unwrap();

    let queued = server.receiver.try_recv().expect("instruction queued");
    assert_eq!(queued, Instruction::reset("svcA"));
}

#[tokio::test]
async fn test_malformed_instruction_surfaces_status() {
    let server = start_server().await;

    let doc = Document {
        id: "instructions".to_string(),
        definition: serde_json::json!({"type": "Explode"}),
    };
    let err = server.client.upsert(&doc).await.unwrap_err();
    assert!(matches!(
        err,
        CoordError::UnexpectedStatus { status: 400, .. }
    ));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let client = HttpStateClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();

    let err = client.get("doc").await.unwrap_err();
    assert!(matches!(err, CoordError::Transport { .. }));
    assert!(err.is_retryable());
}
