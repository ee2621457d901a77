//! Sampling repair loop over a scripted RPC peer: malformed replies trigger
//! repair-augmented retries, attempts stay bounded, and the terminal failure
//! is an invalid_argument schema violation.

use containerization_assist::config::SamplingConfig;
use containerization_assist::rpc::PeerHandle;
use containerization_assist::sampling::{SamplingClient, SamplingRequest, TemplateStore};
use containerization_assist::ErrorKind;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Drive a PeerHandle like the RPC read loop would: parse each outbound
/// request frame, record its prompt, and resolve it with the next canned
/// reply.
fn spawn_peer(
    mut outbound: mpsc::UnboundedReceiver<String>,
    peer: Arc<PeerHandle>,
    replies: Vec<Value>,
) -> Arc<parking_lot::Mutex<Vec<String>>> {
    let prompts = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = Arc::clone(&prompts);
    tokio::spawn(async move {
        let mut replies = replies.into_iter();
        while let Some(frame) = outbound.recv().await {
            let request: Value = serde_json::from_str(frame.trim()).unwrap();
            if request.get("method").and_then(|m| m.as_str()) != Some("sampling/createMessage") {
                continue;
            }
            let prompt = request["params"]["messages"][0]["content"]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            seen.lock().push(prompt);
            let Some(reply) = replies.next() else { break };
            peer.resolve(&request["id"], Ok(reply));
        }
    });
    prompts
}

fn client(peer: Arc<PeerHandle>, retry_attempts: u32) -> SamplingClient {
    SamplingClient::new(
        peer,
        SamplingConfig {
            retry_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..SamplingConfig::default()
        },
        Arc::new(TemplateStore::load(None).unwrap()),
    )
}

fn text_reply(text: &str) -> Value {
    json!({"content": {"type": "text", "text": text}, "model": "peer", "stopReason": "endTurn"})
}

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {"dockerfile": {"type": "string"}},
        "required": ["dockerfile"]
    })
}

#[tokio::test]
async fn malformed_reply_triggers_repair_prompt() {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = PeerHandle::new(tx);
    let prompts = spawn_peer(
        rx,
        Arc::clone(&peer),
        vec![
            text_reply("sorry, here is prose with no JSON"),
            text_reply(r#"{"dockerfile": "FROM x:1"}"#),
        ],
    );

    let client = client(Arc::clone(&peer), 3);
    let response = client
        .sample(
            SamplingRequest::new("generate a dockerfile").with_schema(schema()),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.json.unwrap()["dockerfile"], "FROM x:1");

    let prompts = prompts.lock();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], "generate a dockerfile");
    // the retry carries the repair section naming the failure and the schema
    assert!(prompts[1].starts_with("generate a dockerfile"));
    assert!(prompts[1].contains("failed validation"));
    assert!(prompts[1].contains("dockerfile"));
}

#[tokio::test]
async fn attempts_are_bounded_by_configuration() {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = PeerHandle::new(tx);
    let prompts = spawn_peer(
        rx,
        Arc::clone(&peer),
        vec![
            text_reply("nope"),
            text_reply("still nope"),
            text_reply("never json"),
            text_reply("unreachable"),
        ],
    );

    // 2 retries -> 3 total attempts
    let client = client(Arc::clone(&peer), 2);
    let err = client
        .sample(
            SamplingRequest::new("generate").with_schema(schema()),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(err.message.contains("schema_violation"));
    assert_eq!(prompts.lock().len(), 3);
}

#[tokio::test]
async fn request_identity_is_stable_across_retries() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let peer = PeerHandle::new(tx);

    let ids = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = Arc::clone(&ids);
    let resolver = Arc::clone(&peer);
    tokio::spawn(async move {
        let mut count = 0;
        while let Some(frame) = rx.recv().await {
            let request: Value = serde_json::from_str(frame.trim()).unwrap();
            seen.lock().push(
                request["params"]["metadata"]["samplingId"]
                    .as_str()
                    .unwrap()
                    .to_string(),
            );
            count += 1;
            let reply = if count == 1 {
                text_reply("not json")
            } else {
                text_reply(r#"{"dockerfile": "FROM x:1"}"#)
            };
            resolver.resolve(&request["id"], Ok(reply));
        }
    });

    let client = client(Arc::clone(&peer), 2);
    client
        .sample(
            SamplingRequest::new("generate").with_schema(schema()),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let ids = ids.lock();
    assert_eq!(ids.len(), 2);
    // the peer can deduplicate retries by this identity
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn valid_first_reply_skips_retry_entirely() {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = PeerHandle::new(tx);
    let prompts = spawn_peer(
        rx,
        Arc::clone(&peer),
        vec![text_reply(
            "```json\n{\"dockerfile\": \"FROM node:20-alpine\"}\n```",
        )],
    );

    let client = client(Arc::clone(&peer), 3);
    let response = client
        .sample(
            SamplingRequest::new("generate").with_schema(schema()),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // fenced JSON is extracted and validated
    assert_eq!(response.json.unwrap()["dockerfile"], "FROM node:20-alpine");
    assert_eq!(prompts.lock().len(), 1);
}
