use axum::{
    extract::{Multipart, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::*;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

async fn peers(Path(self_id): Path<String>) -> Json<Value> {
    assert_eq!(self_id, "A");
    Json(json!([
        {"_id": "B", "firstName": "Bea", "image_url": "https://cdn.test/b.png"},
        {"_id": "C", "firstName": "Cy"}
    ]))
}

async fn history(Path((self_id, peer_id)): Path<(String, String)>) -> Result<Json<Value>, StatusCode> {
    if peer_id != "B" {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!([
        {"senderId": self_id, "receiverId": "B", "message": "hi", "messageType": "text",
         "timeStamp": "2024-05-01T10:00:00.000Z", "createdAt": "2024-05-01T10:00:00.120Z"},
        {"senderId": "B", "receiverId": self_id, "message": "cat.png",
         "fileUrl": "https://cdn.test/cat.png", "fileType": "image/png",
         "createdAt": "2024-05-01T10:00:05.000Z"}
    ])))
}

async fn upload(mut multipart: Multipart) -> Result<Json<Value>, StatusCode> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        return Ok(Json(json!({
            "url": format!("/uploads/{name}"),
            "originalName": name,
            "fileSize": bytes.len(),
            "fileType": content_type,
        })));
    }
    Err(StatusCode::BAD_REQUEST)
}

fn app() -> Router {
    Router::new()
        .route("/users/:self_id", get(peers))
        .route("/messages/:self_id/:peer_id", get(history))
        .route("/api/upload", post(upload))
}

#[test]
fn endpoints_extend_base_path() {
    let api = HttpChatApi::new("http://chat.example.test/base/").expect("api");
    assert_eq!(
        api.endpoint(&["messages", "A", "B"]).expect("url").as_str(),
        "http://chat.example.test/base/messages/A/B"
    );
    assert!(HttpChatApi::new("not a url").is_err());
}

#[tokio::test]
async fn fetches_peer_directory() {
    let api = HttpChatApi::new(&serve(app()).await).expect("api");
    let peers = api.fetch_peers(&UserId::from("A")).await.expect("peers");
    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0].id, UserId::from("B"));
    assert_eq!(peers[0].first_name, "Bea");
    assert_eq!(peers[0].image_url.as_deref(), Some("https://cdn.test/b.png"));
    assert_eq!(peers[1].image_url, None);
}

#[tokio::test]
async fn fetches_history_and_maps_missing_conversation() {
    let api = HttpChatApi::new(&serve(app()).await).expect("api");
    let records = api
        .fetch_history(&UserId::from("A"), &UserId::from("B"))
        .await
        .expect("history");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].message, "hi");
    assert_eq!(records[0].sent_at(), Some("2024-05-01T10:00:00.000Z"));
    assert_eq!(
        records[1].sent_at(),
        Some("2024-05-01T10:00:05.000Z")
    );

    let err = api
        .fetch_history(&UserId::from("A"), &UserId::from("Z"))
        .await
        .expect_err("404");
    assert_eq!(err, ApiError::Status { status: 404 });
}

#[tokio::test]
async fn uploads_multipart_file_field() {
    let api = HttpChatApi::new(&serve(app()).await).expect("api");
    let response = api
        .upload(FileUpload::new("notes.txt", "text/plain", b"hello upload".to_vec()))
        .await
        .expect("upload");
    assert_eq!(response.url, "/uploads/notes.txt");
    assert_eq!(response.original_name.as_deref(), Some("notes.txt"));
    assert_eq!(response.file_size, 12);
    assert_eq!(response.file_type, "text/plain");
    assert_eq!(response.download_url, None);
}

#[tokio::test]
async fn upload_failure_status_is_reported() {
    let app = Router::new().route(
        "/api/upload",
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let api = HttpChatApi::new(&serve(app).await).expect("api");
    let err = api
        .upload(FileUpload::new("a.bin", "application/octet-stream", vec![0; 4]))
        .await
        .expect_err("must fail");
    assert_eq!(err, UploadError::Status { status: 500 });
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let api = HttpChatApi::new(&format!("http://{addr}")).expect("api");
    let err = api
        .upload(FileUpload::new("a.bin", "application/octet-stream", vec![0; 4]))
        .await
        .expect_err("must fail");
    assert!(matches!(err, UploadError::Network(_)));
}
