use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use shared::{
    domain::UserId,
    protocol::PresenceSignal,
};
use tokio::{net::TcpListener, time::timeout};

use super::*;

const WAIT: Duration = Duration::from_secs(5);

fn fast_backoff() -> Backoff {
    Backoff {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(50),
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionInput>) -> TransportEvent {
    match timeout(WAIT, rx.recv()).await {
        Ok(Some(SessionInput::Transport(event))) => event,
        Ok(Some(_)) => panic!("unexpected session input"),
        Ok(None) => panic!("input channel closed"),
        Err(_) => panic!("timed out waiting for a transport event"),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(seen): State<mpsc::UnboundedSender<String>>,
) -> Response {
    ws.on_upgrade(move |socket| exchange(socket, seen))
}

/// Reads one client frame, pushes a presence signal plus an event the client
/// does not consume, then closes the socket.
async fn exchange(mut socket: WebSocket, seen: mpsc::UnboundedSender<String>) {
    match socket.recv().await {
        Some(Ok(WsMessage::Text(text))) => {
            let _ = seen.send(text);
        }
        _ => return,
    }
    let _ = socket
        .send(WsMessage::Text(r#"{"event":"online-users","data":["B"]}"#.to_string()))
        .await;
    let _ = socket
        .send(WsMessage::Text(
            r#"{"event":"typing","data":{"senderId":"B","receiverId":"A"}}"#.to_string(),
        ))
        .await;
    let _ = socket.send(WsMessage::Close(None)).await;
}

async fn serve_ws() -> (String, mpsc::UnboundedReceiver<String>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(seen_tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://{addr}"), seen_rx)
}

#[test]
fn ws_url_rewrites_scheme_and_appends_path() {
    assert_eq!(
        ws_url_for("https://chat.example.test").expect("url").as_str(),
        "wss://chat.example.test/ws"
    );
    assert_eq!(
        ws_url_for("http://127.0.0.1:8080/").expect("url").as_str(),
        "ws://127.0.0.1:8080/ws"
    );
    assert!(ws_url_for("ftp://chat.example.test").is_err());
}

#[test]
fn backoff_doubles_up_to_cap() {
    let backoff = Backoff {
        initial: Duration::from_millis(500),
        max: Duration::from_secs(5),
    };
    assert_eq!(backoff.delay(0), Duration::from_millis(500));
    assert_eq!(backoff.delay(1), Duration::from_secs(1));
    assert_eq!(backoff.delay(3), Duration::from_secs(4));
    assert_eq!(backoff.delay(20), Duration::from_secs(5));
}

#[tokio::test]
async fn exchanges_frames_and_reconnects_after_server_close() {
    let (base, mut seen) = serve_ws().await;
    let connector = WsConnector::new(&base, fast_backoff()).expect("connector");
    assert!(connector.ws_url().as_str().ends_with("/ws"));

    let (inputs, mut rx) = mpsc::unbounded_channel();
    let outbound = connector.open(inputs);

    assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);
    outbound
        .send(ClientFrame::Register(UserId::from("A")))
        .expect("queue register");
    let text = timeout(WAIT, seen.recv())
        .await
        .expect("server saw frame")
        .expect("frame");
    assert_eq!(text, r#"{"event":"register","data":"A"}"#);

    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Frame(ServerFrame::Typing(PresenceSignal {
            sender_id: UserId::from("B"),
            receiver_id: Some(UserId::from("A")),
        }))
    );
    assert!(matches!(
        next_event(&mut rx).await,
        TransportEvent::Disconnected { .. }
    ));
    assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

    drop(outbound);
}

#[tokio::test]
async fn reports_connect_errors_while_retrying() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let connector = WsConnector::new(&format!("http://{addr}"), fast_backoff()).expect("connector");
    let (inputs, mut rx) = mpsc::unbounded_channel();
    let _outbound = connector.open(inputs);

    assert!(matches!(
        next_event(&mut rx).await,
        TransportEvent::ConnectError(_)
    ));
    assert!(matches!(
        next_event(&mut rx).await,
        TransportEvent::ConnectError(_)
    ));
}
