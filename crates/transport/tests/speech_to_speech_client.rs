//! Speech-to-speech client against an in-process WebSocket server

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use cohost_core::{SpeechToSpeech, SpeechTurnError, SpeechTurnRequest};
use cohost_transport::{
    CapacityGuard, OpusEncoder, SpeechToSpeechClient, SpeechToSpeechClientConfig,
    OPUS_FRAME_SAMPLES,
};

type ServerSocket = WebSocketStream<TcpStream>;

/// Accept one connection and hand it to `behavior`. Returns the base URL,
/// the captured request URI and the server task.
async fn serve_once<F, Fut, T>(behavior: F) -> (String, Arc<Mutex<String>>, JoinHandle<T>)
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uri = Arc::new(Mutex::new(String::new()));
    let captured = uri.clone();

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *captured.lock() = req.uri().to_string();
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
        behavior(ws).await
    });

    (format!("http://{}", addr), uri, handle)
}

fn client(url: &str) -> SpeechToSpeechClient {
    let mut config = SpeechToSpeechClientConfig::new(url);
    config.turn_timeout = Duration::from_secs(10);
    config.handshake_timeout = Duration::from_secs(2);
    config.idle_close = Duration::from_millis(150);
    config.idle_poll = Duration::from_millis(10);
    SpeechToSpeechClient::new(config).with_capacity(CapacityGuard::new())
}

fn request(user_pcm: Vec<u8>) -> SpeechTurnRequest {
    SpeechTurnRequest {
        turn_id: Some("turn-1".to_string()),
        user_pcm: Bytes::from(user_pcm),
        text_prompt: "Be nice".to_string(),
        voice_prompt: None,
        seed: Some(7),
    }
}

fn tone_packet(encoder: &OpusEncoder) -> Message {
    let frame: Vec<i16> = (0..OPUS_FRAME_SAMPLES)
        .map(|i| ((i as f32 * 0.2).sin() * 6000.0) as i16)
        .collect();
    let packet = encoder.encode(&frame).unwrap();
    Message::Binary(cohost_transport::protocol::audio_message(&packet))
}

/// Read caller frames until `expected` audio messages arrived
async fn read_frames(ws: &mut ServerSocket, expected: usize) -> usize {
    let mut frames = 0;
    while frames < expected {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) if data.first() == Some(&0x01) => frames += 1,
            Some(Ok(_)) => {},
            _ => break,
        }
    }
    frames
}

/// Drain until the client closes
async fn wait_closed(ws: &mut ServerSocket) {
    while let Some(Ok(message)) = ws.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}

#[tokio::test]
async fn test_full_turn() {
    let (url, uri, server) = serve_once(|mut ws| async move {
        ws.send(Message::Binary(vec![0x00])).await.unwrap();
        let frames = read_frames(&mut ws, 30).await;

        let encoder = OpusEncoder::new().unwrap();
        ws.send(Message::Binary(b"\x02Hi".to_vec())).await.unwrap();
        ws.send(Message::Binary(vec![0x07, 1, 2])).await.unwrap();
        for _ in 0..3 {
            ws.send(tone_packet(&encoder)).await.unwrap();
        }
        ws.send(Message::Binary(b"\x02 there".to_vec())).await.unwrap();

        wait_closed(&mut ws).await;
        frames
    })
    .await;

    let client = client(&url);
    let turn = match client.start_turn(request(vec![0u8; 6400])).await {
        Ok(turn) => turn,
        Err(e) => panic!("turn failed to start: {}", e),
    };

    let chunks: Vec<_> = timeout(Duration::from_secs(5), turn.audio.collect::<Vec<_>>())
        .await
        .unwrap();
    // Three packets plus the resampler tail flushed at close
    assert_eq!(chunks.len(), 4);
    let total: usize = chunks.iter().map(|chunk| chunk.as_ref().unwrap().len()).sum();
    // 3 x 480 samples at 24kHz -> 2880 samples at 48kHz
    assert_eq!(total, 2880 * 2);

    assert_eq!(turn.text.await, "Hi there");
    assert_eq!(timeout(Duration::from_secs(5), server).await.unwrap().unwrap(), 30);

    let uri = uri.lock().clone();
    assert_eq!(
        uri,
        "/api/chat?voice_prompt=NATF2.pt&text_prompt=%20Be%20nice%20&seed=7"
    );
}

#[tokio::test]
async fn test_busy_endpoint() {
    let guard = CapacityGuard::new();
    let url = "http://127.0.0.1:9";
    let _held = guard.try_acquire(url).unwrap();

    let client = client(url).with_capacity(guard.clone());
    let result = client.start_turn(request(vec![0u8; 640])).await;
    assert!(matches!(result, Err(SpeechTurnError::Busy(_))));
    assert!(guard.is_in_flight(url));
}

#[tokio::test]
async fn test_connect_refused_is_handshake_failure() {
    let guard = CapacityGuard::new();
    let client = client("http://127.0.0.1:9").with_capacity(guard.clone());

    let result = client.start_turn(request(vec![0u8; 640])).await;
    assert!(matches!(result, Err(SpeechTurnError::HandshakeFailed(_))));
    assert!(!guard.is_in_flight("http://127.0.0.1:9"));
}

#[tokio::test]
async fn test_closed_before_handshake() {
    let (url, _uri, _server) = serve_once(|mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;

    let result = client(&url).start_turn(request(vec![0u8; 640])).await;
    assert!(matches!(result, Err(SpeechTurnError::HandshakeFailed(_))));
}

#[tokio::test]
async fn test_handshake_timeout() {
    let (url, _uri, _server) = serve_once(|mut ws| async move {
        // Never ready
        tokio::time::sleep(Duration::from_secs(2)).await;
        let _ = ws.close(None).await;
    })
    .await;

    let guard = CapacityGuard::new();
    let mut config = SpeechToSpeechClientConfig::new(url.as_str());
    config.handshake_timeout = Duration::from_millis(200);
    let client = SpeechToSpeechClient::new(config).with_capacity(guard.clone());

    let result = client.start_turn(request(vec![0u8; 640])).await;
    assert!(matches!(result, Err(SpeechTurnError::HandshakeTimeout(200))));
    assert!(!guard.is_in_flight(&url));
}

#[tokio::test]
async fn test_no_audio_reported() {
    let (url, _uri, _server) = serve_once(|mut ws| async move {
        ws.send(Message::Binary(vec![0x00])).await.unwrap();
        read_frames(&mut ws, 20).await;
        wait_closed(&mut ws).await;
    })
    .await;

    let turn = match client(&url).start_turn(request(Vec::new())).await {
        Ok(turn) => turn,
        Err(e) => panic!("turn failed to start: {}", e),
    };

    let items: Vec<_> = timeout(Duration::from_secs(5), turn.audio.collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0], Err(SpeechTurnError::NoAudio));
    assert_eq!(turn.text.await, "");
}

#[tokio::test]
async fn test_malformed_audio_is_decode_error() {
    let (url, _uri, _server) = serve_once(|mut ws| async move {
        ws.send(Message::Binary(vec![0x00])).await.unwrap();
        // Code-3 TOC byte without its frame count
        ws.send(Message::Binary(vec![0x01, 0xFF])).await.unwrap();
        wait_closed(&mut ws).await;
    })
    .await;

    let guard = CapacityGuard::new();
    let client = client(&url).with_capacity(guard.clone());
    let turn = match client.start_turn(request(vec![0u8; 640])).await {
        Ok(turn) => turn,
        Err(e) => panic!("turn failed to start: {}", e),
    };

    let items: Vec<_> = timeout(Duration::from_secs(5), turn.audio.collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    match &items[0] {
        Err(e @ SpeechTurnError::Decode(_)) => assert_eq!(e.kind(), "decode_error"),
        other => panic!("expected decode error, got {:?}", other),
    }

    let _ = turn.text.await;
    assert!(!guard.is_in_flight(&url));
}

#[tokio::test]
async fn test_abort_stops_quietly() {
    let (url, _uri, _server) = serve_once(|mut ws| async move {
        ws.send(Message::Binary(vec![0x00])).await.unwrap();
        let encoder = OpusEncoder::new().unwrap();
        for _ in 0..500 {
            if ws.send(tone_packet(&encoder)).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    let guard = CapacityGuard::new();
    let client = client(&url).with_capacity(guard.clone());
    let mut turn = match client.start_turn(request(vec![0u8; 640])).await {
        Ok(turn) => turn,
        Err(e) => panic!("turn failed to start: {}", e),
    };

    let first = timeout(Duration::from_secs(5), turn.audio.next()).await.unwrap();
    assert!(matches!(first, Some(Ok(_))));

    turn.abort.abort();
    turn.abort.abort();

    let rest: Vec<_> = timeout(Duration::from_secs(5), turn.audio.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(rest.iter().all(|item| item.is_ok()));

    let _ = turn.text.await;
    assert!(!guard.is_in_flight(&url));
}

#[tokio::test]
async fn test_turn_timeout() {
    let (url, _uri, _server) = serve_once(|mut ws| async move {
        ws.send(Message::Binary(vec![0x00])).await.unwrap();
        let encoder = OpusEncoder::new().unwrap();
        for _ in 0..500 {
            if ws.send(tone_packet(&encoder)).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    let mut config = SpeechToSpeechClientConfig::new(url.as_str());
    config.turn_timeout = Duration::from_millis(400);
    config.handshake_timeout = Duration::from_secs(2);
    let client = SpeechToSpeechClient::new(config).with_capacity(CapacityGuard::new());

    let turn = match client.start_turn(request(vec![0u8; 640])).await {
        Ok(turn) => turn,
        Err(e) => panic!("turn failed to start: {}", e),
    };

    let items: Vec<_> = timeout(Duration::from_secs(5), turn.audio.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(items.len() > 1);
    assert_eq!(items.last(), Some(&Err(SpeechTurnError::TurnTimeout(400))));
}
