//! Upload bridge flow: pasted images go out-of-band over HTTP and the
//! returned workspace path is injected into the session input stream.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::mpsc;
use url::Url;

use muxpad_client::link::{LinkEvent, SessionLink, UiEvent};
use muxpad_client::upload::UploadBridge;
use muxpad_client::{
    EmulationSurface, ImageBlob, LinkConfig, PastePayload, SessionTarget, WsConnector,
};

const WAIT: Duration = Duration::from_secs(5);

struct BackendState {
    conns_tx: mpsc::UnboundedSender<BackendConn>,
    uploads: Arc<Mutex<Vec<ReceivedUpload>>>,
    /// When false, the upload route answers with a failure body.
    accept_uploads: bool,
    /// Artificial processing time before the upload route responds.
    upload_delay: Duration,
}

#[derive(Debug, Clone)]
struct ReceivedUpload {
    container: String,
    field: String,
    file_name: String,
    bytes: Vec<u8>,
}

struct BackendConn {
    incoming: mpsc::UnboundedReceiver<Message>,
    _outgoing: mpsc::UnboundedSender<Message>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BackendState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BackendState>) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let _ = state.conns_tx.send(BackendConn {
        incoming: in_rx,
        _outgoing: out_tx,
    });
    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(msg)) => {
                    if in_tx.send(msg).is_err() {
                        break;
                    }
                }
                _ => break,
            },
            out = out_rx.recv() => match out {
                Some(msg) => {
                    if socket.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

async fn upload_handler(
    Path(container): Path<String>,
    State(state): State<Arc<BackendState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    tokio::time::sleep(state.upload_delay).await;
    if !state.accept_uploads {
        return (StatusCode::INSUFFICIENT_STORAGE, "disk full".to_string()).into_response();
    }
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default().to_vec();
        state.uploads.lock().unwrap().push(ReceivedUpload {
            container: container.clone(),
            field: name,
            file_name: file_name.clone(),
            bytes,
        });
        return Json(serde_json::json!({
            "path": format!("/workspace/{}", file_name)
        }))
        .into_response();
    }
    (StatusCode::BAD_REQUEST, "no file field".to_string()).into_response()
}

async fn start_backend(
    accept_uploads: bool,
) -> (
    Url,
    mpsc::UnboundedReceiver<BackendConn>,
    Arc<Mutex<Vec<ReceivedUpload>>>,
) {
    start_backend_with_delay(accept_uploads, Duration::ZERO).await
}

async fn start_backend_with_delay(
    accept_uploads: bool,
    upload_delay: Duration,
) -> (
    Url,
    mpsc::UnboundedReceiver<BackendConn>,
    Arc<Mutex<Vec<ReceivedUpload>>>,
) {
    let (conns_tx, conns_rx) = mpsc::unbounded_channel();
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::new(BackendState {
        conns_tx,
        uploads: uploads.clone(),
        accept_uploads,
        upload_delay,
    });
    let app = Router::new()
        .route("/ws/terminal/:container/:session/:window", get(ws_handler))
        .route(
            "/api/v1/containers/:container/upload-image",
            post(upload_handler),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (
        Url::parse(&format!("http://{}", addr)).unwrap(),
        conns_rx,
        uploads,
    )
}

#[derive(Clone, Default)]
struct RecordingSurface {
    notes: Arc<Mutex<Vec<String>>>,
}

impl RecordingSurface {
    fn notes(&self) -> Vec<String> {
        self.notes.lock().unwrap().clone()
    }
}

impl EmulationSurface for RecordingSurface {
    fn write(&mut self, _bytes: &[u8]) {}
    fn clear(&mut self) {}
    fn annotate(&mut self, message: &str) {
        self.notes.lock().unwrap().push(message.to_string());
    }
    fn propose_dimensions(&self) -> Option<(u16, u16)> {
        Some((80, 24))
    }
}

fn config(server: Url) -> LinkConfig {
    let mut cfg = LinkConfig::new(
        server,
        SessionTarget {
            container_id: "box-7".to_string(),
            session_name: "main".to_string(),
            window_index: 0,
        },
    );
    cfg.settle_tick = Duration::from_millis(10);
    cfg
}

fn png() -> ImageBlob {
    ImageBlob {
        bytes: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a],
        mime: "image/png".to_string(),
        file_name: "img.png".to_string(),
    }
}

async fn accept(conns: &mut mpsc::UnboundedReceiver<BackendConn>) -> BackendConn {
    tokio::time::timeout(WAIT, conns.recv())
        .await
        .expect("no connection before timeout")
        .expect("backend gone")
}

async fn next_payload(conn: &mut BackendConn) -> Message {
    loop {
        let msg = tokio::time::timeout(WAIT, conn.incoming.recv())
            .await
            .expect("no message before timeout")
            .expect("client hung up");
        match msg {
            msg @ (Message::Text(_) | Message::Binary(_)) => return msg,
            _ => {}
        }
    }
}

#[tokio::test]
async fn pasted_image_uploads_and_injects_the_path() {
    let (server, mut conns, uploads) = start_backend(true).await;
    let surface = RecordingSurface::default();
    let (link, _events) = SessionLink::spawn(config(server), surface.clone(), WsConnector).unwrap();

    let mut conn = accept(&mut conns).await;
    next_payload(&mut conn).await; // initial RESIZE

    link.send(UiEvent::Paste(PastePayload {
        text: None,
        image: Some(png()),
    }));

    // The path comes back through the input channel as if typed.
    assert_eq!(
        next_payload(&mut conn).await,
        Message::Binary(b"/workspace/img.png".to_vec())
    );

    let received = uploads.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].container, "box-7");
    assert_eq!(received[0].field, "file");
    assert_eq!(received[0].file_name, "img.png");
    assert_eq!(received[0].bytes, png().bytes);

    link.dispose();
    link.join().await;
}

#[tokio::test]
async fn paste_with_text_and_image_never_uploads() {
    let (server, mut conns, uploads) = start_backend(true).await;
    let surface = RecordingSurface::default();
    let (link, _events) = SessionLink::spawn(config(server), surface.clone(), WsConnector).unwrap();

    let mut conn = accept(&mut conns).await;
    next_payload(&mut conn).await; // initial RESIZE

    link.send(UiEvent::Paste(PastePayload {
        text: Some("echo hi".to_string()),
        image: Some(png()),
    }));

    // Plain text wins and flows as input.
    assert_eq!(
        next_payload(&mut conn).await,
        Message::Binary(b"echo hi".to_vec())
    );
    assert!(uploads.lock().unwrap().is_empty());

    link.dispose();
    link.join().await;
}

#[tokio::test]
async fn failed_upload_annotates_and_leaves_the_socket_alone() {
    let (server, mut conns, uploads) = start_backend(false).await;
    let surface = RecordingSurface::default();
    let (link, mut events) =
        SessionLink::spawn(config(server), surface.clone(), WsConnector).unwrap();

    let mut conn = accept(&mut conns).await;
    next_payload(&mut conn).await; // initial RESIZE

    link.send(UiEvent::Paste(PastePayload {
        text: None,
        image: Some(png()),
    }));

    let event = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(e) = events.recv().await {
                if matches!(e, LinkEvent::UploadFailed { .. }) {
                    return e;
                }
            }
        }
    })
    .await
    .expect("no upload failure before timeout");
    match event {
        LinkEvent::UploadFailed { message } => {
            assert!(message.contains("507"));
            assert!(message.contains("disk full"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(surface
        .notes()
        .iter()
        .any(|n| n.contains("upload failed")));
    assert!(uploads.lock().unwrap().is_empty());

    // The socket is unaffected: input still flows after the failure.
    link.send(UiEvent::Paste(PastePayload {
        text: Some("still here".to_string()),
        image: None,
    }));
    assert_eq!(
        next_payload(&mut conn).await,
        Message::Binary(b"still here".to_vec())
    );

    link.dispose();
    link.join().await;
}

#[tokio::test]
async fn upload_finishing_after_close_is_discarded() {
    let (server, mut conns, uploads) =
        start_backend_with_delay(true, Duration::from_millis(300)).await;
    let surface = RecordingSurface::default();
    let mut cfg = config(server);
    // No automatic retries: once the socket drops, it stays down.
    cfg.reconnect.max_attempts = 0;
    let (link, mut events) = SessionLink::spawn(cfg, surface.clone(), WsConnector).unwrap();

    let mut conn = accept(&mut conns).await;
    next_payload(&mut conn).await; // initial RESIZE

    link.send(UiEvent::Paste(PastePayload {
        text: None,
        image: Some(png()),
    }));

    // Kill the socket while the upload is still in flight.
    drop(conn);
    let exhausted = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(LinkEvent::Exhausted) => break true,
                Some(_) => continue,
                None => break false,
            }
        }
    })
    .await
    .expect("no exhaustion before timeout");
    assert!(exhausted);

    // The upload itself completed server-side, but its result has nowhere
    // to go: no failure event, no annotation, no injected path.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(uploads.lock().unwrap().len(), 1);
    assert!(surface.notes().iter().all(|n| !n.contains("upload")));
    assert!(events.try_recv().is_err(), "no event should follow");

    link.dispose();
    link.join().await;
}

#[tokio::test]
async fn upload_bridge_talks_multipart_directly() {
    let (server, _conns, uploads) = start_backend(true).await;
    let cfg = config(server);
    let bridge = UploadBridge::new(cfg.upload_url().unwrap());

    let path = bridge.send(png()).await.unwrap();
    assert_eq!(path, "/workspace/img.png");
    assert_eq!(uploads.lock().unwrap().len(), 1);
}
