//! Real-socket round trip: axum server on an ephemeral port, a
//! tokio-tungstenite client playing the microphone side.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use colloquy_core::engines::stub::{
    StubAnswerEngine, StubRecognitionEngine, StubSynthesisEngine,
};
use colloquy_core::{SessionConfig, SessionEngines, TranscriptEvent};
use colloquy_server::ws::{self, AppState};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// What one test observed on the wire, in order.
#[derive(Debug, PartialEq)]
enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

async fn spawn_server(engines: SessionEngines) -> std::net::SocketAddr {
    let state = AppState {
        engines,
        config: SessionConfig::default(),
    };
    let app = ws::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    addr
}

fn scripted_engines() -> SessionEngines {
    SessionEngines {
        recognition: std::sync::Arc::new(StubRecognitionEngine::scripted(vec![
            TranscriptEvent::Final {
                text: "hello world".into(),
            },
        ])),
        answer: std::sync::Arc::new(StubAnswerEngine::new(vec![
            "Hi".into(),
            " there.".into(),
        ])),
        synthesis: std::sync::Arc::new(StubSynthesisEngine::default()),
        analysis: None,
    }
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Read frames until the server closes the socket.
async fn collect_wire_frames(ws: &mut WsClient) -> Vec<WireFrame> {
    let mut frames = Vec::new();
    loop {
        match timeout(RECV_TIMEOUT, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => frames.push(WireFrame::Text(text.to_string())),
            Ok(Some(Ok(Message::Binary(bytes)))) => {
                frames.push(WireFrame::Binary(bytes.to_vec()))
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return frames,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(err))) => panic!("websocket error: {err}; got {frames:?}"),
            Err(_) => panic!("timed out waiting for wire frame; got {frames:?}"),
        }
    }
}

#[tokio::test]
async fn full_conversation_over_a_real_socket() {
    let addr = spawn_server(scripted_engines()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/converse"))
        .await
        .expect("connect");

    ws.send(Message::Binary(vec![1u8; 320].into())).await.unwrap();
    ws.send(Message::Binary(vec![2u8; 320].into())).await.unwrap();
    ws.send(Message::Text("STOP_PROCESS".into())).await.unwrap();

    let frames = collect_wire_frames(&mut ws).await;
    assert_eq!(
        frames,
        vec![
            WireFrame::Text("FINAL: hello world".into()),
            WireFrame::Text("COMPLETE_TRANSCRIPTION: hello world".into()),
            WireFrame::Binary(b"Hi there.".to_vec()),
            WireFrame::Text("CHUNK_COMPLETE".into()),
            WireFrame::Text("DONE".into()),
        ]
    );
}

#[tokio::test]
async fn discard_over_a_real_socket_skips_the_answer() {
    let addr = spawn_server(scripted_engines()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/converse"))
        .await
        .expect("connect");

    ws.send(Message::Binary(vec![1u8; 320].into())).await.unwrap();
    ws.send(Message::Text("STOP_DISCARD".into())).await.unwrap();

    let frames = collect_wire_frames(&mut ws).await;
    assert_eq!(
        frames,
        vec![
            WireFrame::Text("FINAL: hello world".into()),
            WireFrame::Text("DONE".into()),
        ]
    );
}

#[tokio::test]
async fn client_disconnect_mid_listen_is_released_cleanly() {
    let addr = spawn_server(scripted_engines()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/converse"))
        .await
        .expect("connect");

    ws.send(Message::Binary(vec![1u8; 320].into())).await.unwrap();
    ws.close(None).await.unwrap();

    // The server must tear the session down without panicking; a fresh
    // connection on the same server still works end-to-end.
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/converse"))
        .await
        .expect("reconnect");
    ws.send(Message::Text("STOP_PROCESS".into())).await.unwrap();
    let frames = collect_wire_frames(&mut ws).await;
    assert_eq!(*frames.last().unwrap(), WireFrame::Text("DONE".into()));
}
