//! End-to-end streaming through a scripted engine: frame ordering,
//! backpressure, timeouts, abnormal termination and cancellation.

use std::time::Duration;

use luna_core::{
    AudioFrame, SessionState, Transport, TtsClient, TtsError, TtsOptions, FRAME_SAMPLES,
    SAMPLE_WIDTH,
};
use mock_server::{MockBehavior, MockEngine};

const FRAME_BYTES: usize = FRAME_SAMPLES * SAMPLE_WIDTH;

fn opts_for(engine: &MockEngine) -> TtsOptions {
    TtsOptions {
        base_url: engine.base_url().to_string(),
        connect_timeout_secs: 5,
        read_timeout_secs: 5,
        ..Default::default()
    }
}

fn patterned_chunk(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i + seed) % 251) as u8).collect()
}

/// Drain a session to its terminal outcome, collecting every frame
/// delivered before it.
async fn drain(
    session: &mut luna_core::StreamSession,
) -> (Vec<AudioFrame>, Result<(), TtsError>) {
    let mut frames = Vec::new();
    loop {
        match session.next_frame().await {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => return (frames, Ok(())),
            Err(err) => return (frames, Err(err)),
        }
    }
}

#[tokio::test]
async fn test_sse_stream_decodes_ordered_frames() {
    mock_server::init_tracing();
    let chunks: Vec<Vec<u8>> = (0..3).map(|i| patterned_chunk(4000, i * 7)).collect();
    let engine = MockEngine::spawn(MockBehavior {
        chunks: chunks.clone(),
        ..Default::default()
    })
    .await;

    let client = TtsClient::new(opts_for(&engine));
    let mut session = client.synthesize("नमस्ते").unwrap();
    let (frames, outcome) = drain(&mut session).await;
    outcome.unwrap();

    // 12000 bytes is 18 full frames plus a 240-sample tail.
    assert_eq!(frames.len(), 19);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.seq, i as u64);
    }
    assert!(frames[..18].iter().all(|f| f.samples == FRAME_SAMPLES));
    assert_eq!(frames[18].samples, 240);

    let decoded: Vec<u8> = frames.iter().flat_map(|f| f.data.clone()).collect();
    let sent: Vec<u8> = chunks.into_iter().flatten().collect();
    assert_eq!(decoded, sent);

    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.bytes_received(), 12_000);

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "नमस्ते");
    assert_eq!(requests[0].top_p, 0.95);
    assert_eq!(requests[0].repetition_penalty, 1.3);
}

#[tokio::test]
async fn test_websocket_stream_matches_sse_semantics() {
    let chunks: Vec<Vec<u8>> = (0..3).map(|i| patterned_chunk(4000, i * 11)).collect();
    let engine = MockEngine::spawn(MockBehavior {
        chunks: chunks.clone(),
        ..Default::default()
    })
    .await;

    let opts = TtsOptions {
        transport: Transport::WebSocket,
        ..opts_for(&engine)
    };
    let client = TtsClient::new(opts);
    let mut session = client.synthesize("नमस्ते").unwrap();
    let (frames, outcome) = drain(&mut session).await;
    outcome.unwrap();

    assert_eq!(frames.len(), 19);
    let decoded: Vec<u8> = frames.iter().flat_map(|f| f.data.clone()).collect();
    let sent: Vec<u8> = chunks.into_iter().flatten().collect();
    assert_eq!(decoded, sent);
    assert_eq!(session.state(), SessionState::Completed);

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].top_p, 0.95);
}

#[tokio::test]
async fn test_stall_past_read_timeout_fails_after_buffered_frames() {
    let engine = MockEngine::spawn(MockBehavior {
        chunks: vec![patterned_chunk(FRAME_BYTES, 0), patterned_chunk(FRAME_BYTES, 1)],
        stall_before: Some((1, Duration::from_secs(3))),
        ..Default::default()
    })
    .await;

    let opts = TtsOptions {
        read_timeout_secs: 1,
        ..opts_for(&engine)
    };
    let client = TtsClient::new(opts);
    let mut session = client.synthesize("नमस्ते").unwrap();
    let (frames, outcome) = drain(&mut session).await;

    // The frame received before the stall is still delivered.
    assert_eq!(frames.len(), 1);
    assert_eq!(
        outcome,
        Err(TtsError::StreamTimeout(Duration::from_secs(1)))
    );
    assert!(matches!(session.state(), SessionState::Failed(_)));

    // The error surfaces exactly once; the stream is over after it.
    assert_eq!(session.next_frame().await, Ok(None));
}

#[tokio::test]
async fn test_dropped_connection_is_not_a_graceful_end() {
    let engine = MockEngine::spawn(MockBehavior {
        chunks: vec![patterned_chunk(FRAME_BYTES, 0), patterned_chunk(FRAME_BYTES, 1)],
        abort_after: Some(1),
        ..Default::default()
    })
    .await;

    let client = TtsClient::new(opts_for(&engine));
    let mut session = client.synthesize("नमस्ते").unwrap();
    let (frames, outcome) = drain(&mut session).await;

    assert_eq!(frames.len(), 1);
    assert!(matches!(outcome, Err(TtsError::Transport(_))));
    assert!(matches!(session.state(), SessionState::Failed(_)));
}

#[tokio::test]
async fn test_close_mid_stream_is_idempotent() {
    let engine = MockEngine::spawn(MockBehavior {
        chunks: (0..50).map(|i| patterned_chunk(FRAME_BYTES, i)).collect(),
        chunk_delay: Some(Duration::from_millis(20)),
        ..Default::default()
    })
    .await;

    let client = TtsClient::new(opts_for(&engine));
    let mut session = client.synthesize("नमस्ते").unwrap();
    let first = session.next_frame().await.unwrap();
    assert!(first.is_some());

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.next_frame().await, Err(TtsError::SessionClosed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_racing_the_receive_loop_stays_closed() {
    let engine = MockEngine::spawn(MockBehavior {
        chunks: (0..20).map(|i| patterned_chunk(FRAME_BYTES, i)).collect(),
        chunk_delay: Some(Duration::from_millis(2)),
        ..Default::default()
    })
    .await;

    let client = TtsClient::new(opts_for(&engine));
    // Close immediately after open, while the receive loop may be
    // anywhere between connecting and its first transition. Whatever
    // it was about to store, Closed must still win.
    for _ in 0..25 {
        let mut session = client.synthesize("नमस्ते").unwrap();
        session.close();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.next_frame().await, Err(TtsError::SessionClosed));
    }
}

/// Accepts TCP connections and never speaks, so every handshake hangs.
async fn silent_listener() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

#[tokio::test]
async fn test_sse_connect_deadline() {
    let addr = silent_listener().await;
    let opts = TtsOptions {
        base_url: format!("http://{addr}"),
        connect_timeout_secs: 1,
        ..Default::default()
    };

    let mut session = TtsClient::new(opts).synthesize("नमस्ते").unwrap();
    assert_eq!(
        session.next_frame().await,
        Err(TtsError::ConnectTimeout(Duration::from_secs(1)))
    );
    assert!(matches!(
        session.state(),
        SessionState::Failed(TtsError::ConnectTimeout(_))
    ));
}

#[tokio::test]
async fn test_websocket_connect_deadline() {
    let addr = silent_listener().await;
    let opts = TtsOptions {
        base_url: format!("http://{addr}"),
        transport: Transport::WebSocket,
        connect_timeout_secs: 1,
        ..Default::default()
    };

    let mut session = TtsClient::new(opts).synthesize("नमस्ते").unwrap();
    assert_eq!(
        session.next_frame().await,
        Err(TtsError::ConnectTimeout(Duration::from_secs(1)))
    );
    assert!(matches!(
        session.state(),
        SessionState::Failed(TtsError::ConnectTimeout(_))
    ));
}

#[tokio::test]
async fn test_mismatched_advertised_format_is_rejected() {
    let engine = MockEngine::spawn(MockBehavior {
        chunks: vec![patterned_chunk(FRAME_BYTES, 0)],
        advertised_sample_rate: Some(22_050),
        ..Default::default()
    })
    .await;

    let client = TtsClient::new(opts_for(&engine));
    let mut session = client.synthesize("नमस्ते").unwrap();
    let (frames, outcome) = drain(&mut session).await;

    assert!(frames.is_empty());
    assert!(matches!(outcome, Err(TtsError::Decode(_))));
}

#[tokio::test]
async fn test_small_buffer_slow_consumer_loses_nothing() {
    let chunks: Vec<Vec<u8>> = (0..12).map(|i| patterned_chunk(FRAME_BYTES, i)).collect();
    let engine = MockEngine::spawn(MockBehavior {
        chunks: chunks.clone(),
        ..Default::default()
    })
    .await;

    let opts = TtsOptions {
        buffer_capacity: 2,
        ..opts_for(&engine)
    };
    let client = TtsClient::new(opts);
    let mut session = client.synthesize("नमस्ते").unwrap();

    let mut frames = Vec::new();
    loop {
        match session.next_frame().await.unwrap() {
            Some(frame) => {
                frames.push(frame);
                // Consume slower than the engine produces.
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            None => break,
        }
    }

    assert_eq!(frames.len(), 12);
    let decoded: Vec<u8> = frames.iter().flat_map(|f| f.data.clone()).collect();
    let sent: Vec<u8> = chunks.into_iter().flatten().collect();
    assert_eq!(decoded, sent);
}

#[tokio::test]
async fn test_into_frames_yields_then_finishes() {
    use futures_util::StreamExt;

    let engine = MockEngine::spawn(MockBehavior {
        chunks: vec![patterned_chunk(FRAME_BYTES * 2, 0)],
        ..Default::default()
    })
    .await;

    let client = TtsClient::new(opts_for(&engine));
    let session = client.synthesize("नमस्ते").unwrap();
    let frames: Vec<_> = session.into_frames().collect().await;

    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.is_ok()));
}
