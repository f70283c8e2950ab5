use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use teamlink_api::{ApiError, HistoryClient, HistorySource};
use teamlink_gateway::TokenProvider;
use teamlink_types::api::HistoryQuery;

async fn messages(
    Path(room): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer hist-token") {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    }
    match room {
        // Echo the query back through the message content.
        1 => {
            let echoed = serde_json::to_string(&params).unwrap();
            Json(json!({
                "messages": [
                    {"chatSeq": 120, "roomSeq": 1, "senderSeq": 2, "type": "TEXT", "content": echoed, "createdAt": "2024-05-01T10:00:00Z"},
                    {"chatSeq": 119, "roomSeq": 1, "senderSeq": 3, "type": "TEXT", "content": "earlier", "readBy": [3], "createdAt": "2024-05-01T09:59:00Z"}
                ],
                "hasNext": false,
                "hasPrev": true,
                "minSeq": 119,
                "maxSeq": 120
            }))
            .into_response()
        }
        2 => (StatusCode::OK, "{ not a page").into_response(),
        _ => (StatusCode::NOT_FOUND, "no such room").into_response(),
    }
}

async fn spawn_api() -> SocketAddr {
    let app = Router::new().route("/api/chat/rooms/{room}/messages", get(messages));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn fetches_a_page_with_query_and_bearer_token() {
    let addr = spawn_api().await;
    let client = HistoryClient::new(format!("http://{}/", addr), "hist-token");

    let page = client.fetch(1, HistoryQuery::older_than(121, 20)).await.unwrap();
    assert_eq!(page.messages.len(), 2);
    assert!(page.has_older());
    assert_eq!(page.bounds(), Some((119, 120)));
    assert_eq!(page.messages[1].read_by, vec![3]);

    let echoed: HashMap<String, String> = serde_json::from_str(&page.messages[0].content).unwrap();
    assert_eq!(echoed["size"], "20");
    assert_eq!(echoed["direction"], "older");
    assert_eq!(echoed["baseSeq"], "121");
    assert_eq!(echoed["includeBase"], "false");
    assert!(!echoed.contains_key("maxSeq"));
}

#[tokio::test]
async fn known_max_travels_with_the_older_query() {
    let addr = spawn_api().await;
    let client = HistoryClient::new(format!("http://{}", addr), "hist-token");

    let query = HistoryQuery::older_than(121, 20).with_max_seq(Some(140));
    let page = client.fetch(1, query).await.unwrap();
    let echoed: HashMap<String, String> = serde_json::from_str(&page.messages[0].content).unwrap();
    assert_eq!(echoed["minSeq"], "121");
    assert_eq!(echoed["maxSeq"], "140");
}

#[tokio::test]
async fn non_success_status_carries_body() {
    let addr = spawn_api().await;
    let client = HistoryClient::new(format!("http://{}", addr), "hist-token");

    let err = client.fetch(404, HistoryQuery::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 404, ref body } if body == "no such room"));
}

#[tokio::test]
async fn refreshed_token_is_used() {
    let addr = spawn_api().await;
    let client = HistoryClient::new(format!("http://{}", addr), "stale");

    let err = client.fetch(1, HistoryQuery::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }));

    client.set_token("hist-token");
    assert!(client.fetch(1, HistoryQuery::default()).await.is_ok());
}

#[tokio::test]
async fn dynamic_token_is_resolved_per_request() {
    let addr = spawn_api().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let provider = TokenProvider::dynamic(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok::<_, anyhow::Error>(if n == 0 { "expired" } else { "hist-token" }.to_string())
        }
    });
    let client = HistoryClient::new(format!("http://{}", addr), provider);

    let err = client.fetch(1, HistoryQuery::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }));
    assert!(client.fetch(1, HistoryQuery::default()).await.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_token_provider_stops_the_request() {
    let addr = spawn_api().await;
    let provider = TokenProvider::dynamic(|| async { Err::<String, _>(anyhow::anyhow!("refresh expired")) });
    let client = HistoryClient::new(format!("http://{}", addr), provider);

    let err = client.fetch(1, HistoryQuery::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Token(ref msg) if msg.contains("refresh expired")));
}

#[tokio::test]
async fn garbage_body_is_a_decode_error() {
    let addr = spawn_api().await;
    let client = HistoryClient::new(format!("http://{}", addr), "hist-token");

    let err = client.fetch(2, HistoryQuery::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn unreachable_server_is_an_http_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = HistoryClient::new(format!("http://{}", addr), "hist-token");

    let err = client.fetch(1, HistoryQuery::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Http(_)));
}
