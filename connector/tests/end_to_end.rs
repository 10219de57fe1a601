use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use crank_connector::{connect_and_serve, Connector, Ending, OriginConfig, ReqwestOrigin};
use crank_shared::protocol::{request_frames, CLOSE_INTERNAL_ERROR};
use crank_shared::CloseStatus;
use futures_util::{stream, SinkExt, StreamExt};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

async fn spawn_origin() -> SocketAddr {
    let app = Router::new()
        .route(
            "/foo",
            get(|headers: HeaderMap| async move {
                let accept = headers
                    .get(header::ACCEPT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                (
                    [
                        (header::CONTENT_TYPE, "text/plain".to_string()),
                        (HeaderName::from_static("x-seen-accept"), accept),
                    ],
                    "hi",
                )
            }),
        )
        .route(
            "/stream",
            get(|| async {
                let chunks = stream::iter(vec![
                    Ok::<_, Infallible>(Bytes::from_static(b"one,")),
                    Ok(Bytes::from_static(b"two,")),
                    Ok(Bytes::from_static(b"three")),
                ]);
                Body::from_stream(chunks)
            }),
        )
        .route("/submit", post(|| async { "unreachable" }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Plays the router: sends the request frames, then records everything the
/// connector sends until its close frame.
async fn route_one(listener: TcpListener, frames: Vec<String>) -> (Vec<Message>, Option<CloseFrame>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    for frame in frames {
        ws.send(Message::Text(frame.into())).await.unwrap();
    }

    let mut received = Vec::new();
    while let Some(msg) = ws.next().await {
        match msg.unwrap() {
            Message::Close(frame) => return (received, frame),
            other => received.push(other),
        }
    }
    panic!("socket ended without a close frame");
}

async fn router() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/connect", listener.local_addr().unwrap());
    (listener, url)
}

fn connector_for(origin: SocketAddr) -> Connector<ReqwestOrigin> {
    let client = ReqwestOrigin::new(&OriginConfig::default()).unwrap();
    let target = Url::parse(&format!("http://{}/", origin)).unwrap();
    Connector::new(Arc::new(client), target)
}

fn texts(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Text(t) => Some(t.as_str().to_owned()),
            _ => None,
        })
        .collect()
}

fn body(messages: &[Message]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Binary(b) => Some(b.to_vec()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[tokio::test]
async fn get_request_is_relayed_through_the_tunnel() {
    let origin = spawn_origin().await;
    let (listener, router_url) = router().await;
    let frames = request_frames("GET", "/foo", &[("Accept".into(), "text/plain".into())]);
    let router_task = tokio::spawn(route_one(listener, frames));

    let ending = connect_and_serve(&router_url, &connector_for(origin)).await.unwrap();
    assert_eq!(ending, Ending::Closed(CloseStatus::complete()));

    let (messages, close) = router_task.await.unwrap();
    let close = close.expect("close frame carries a status");
    assert_eq!(u16::from(close.code), 1000);
    assert_eq!(close.reason.as_str(), "Proxy complete");

    let lines = texts(&messages);
    assert_eq!(lines[0], "HTTP/1.1 200 OK\r\n");
    let terminator = lines.iter().position(|l| l == "\r\n").expect("header terminator");
    let headers = &lines[1..terminator];
    assert!(headers.contains(&"content-type: text/plain\r\n".to_string()));
    assert!(headers.contains(&"x-seen-accept: text/plain\r\n".to_string()));
    assert_eq!(terminator, lines.len() - 1);

    // every text frame precedes every binary frame
    let first_binary = messages.iter().position(|m| matches!(m, Message::Binary(_))).unwrap();
    assert!(messages[first_binary..].iter().all(|m| matches!(m, Message::Binary(_))));
    assert_eq!(body(&messages), b"hi");
}

#[tokio::test]
async fn streamed_body_arrives_in_order() {
    let origin = spawn_origin().await;
    let (listener, router_url) = router().await;
    let router_task = tokio::spawn(route_one(listener, request_frames("GET", "/stream", &[])));

    let ending = connect_and_serve(&router_url, &connector_for(origin)).await.unwrap();
    assert_eq!(ending, Ending::Closed(CloseStatus::complete()));

    let (messages, close) = router_task.await.unwrap();
    assert_eq!(close.map(|c| u16::from(c.code)), Some(1000));
    assert_eq!(body(&messages), b"one,two,three");
}

#[tokio::test]
async fn unreachable_origin_closes_abnormally() {
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let (listener, router_url) = router().await;
    let frames = request_frames("POST", "/submit", &[("Content-Type".into(), "application/json".into())]);
    let router_task = tokio::spawn(route_one(listener, frames));

    let ending = connect_and_serve(&router_url, &connector_for(dead_addr)).await.unwrap();
    let Ending::Closed(status) = ending else {
        panic!("expected the connector to close the socket");
    };
    assert_eq!(status.code, CLOSE_INTERNAL_ERROR);
    assert!(!status.reason.is_empty());

    let (messages, close) = router_task.await.unwrap();
    assert!(messages.is_empty());
    let close = close.expect("close frame carries a status");
    assert_eq!(u16::from(close.code), CLOSE_INTERNAL_ERROR);
    assert_eq!(close.reason.as_str(), status.reason);
}

#[tokio::test]
async fn malformed_request_line_closes_before_origin_call() {
    let origin = spawn_origin().await;
    let (listener, router_url) = router().await;
    let router_task = tokio::spawn(route_one(listener, vec!["GET".to_string()]));

    let ending = connect_and_serve(&router_url, &connector_for(origin)).await.unwrap();
    assert!(matches!(ending, Ending::Closed(ref s) if s.code == 1002));

    let (messages, close) = router_task.await.unwrap();
    assert!(messages.is_empty());
    assert_eq!(close.map(|c| u16::from(c.code)), Some(1002));
}
