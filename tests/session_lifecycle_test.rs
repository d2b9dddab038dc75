//! Integration tests for the session engine over the mock backend.
//!
//! Everything here runs without external processes or network: the mock
//! driver produces placeholder frames and drops input.

use std::time::Duration;

use vmscope::{
    BackendKind, Error, InputEvent, Provider, Session, SessionConfig, SessionEvent,
    SessionStatus, Viewport,
};

fn mock_config() -> SessionConfig {
    SessionConfig::new(BackendKind::Mock)
}

#[tokio::test]
async fn frame_loop_emits_frames() {
    let mut config = mock_config();
    config.frame_interval_ms = 10;
    config.viewport = Some(Viewport::new(64, 48));
    let session = Session::start(config).await.unwrap();

    let mut events = session.subscribe();
    let mut frames = 0;
    let deadline = tokio::time::sleep(Duration::from_millis(500));
    tokio::pin!(deadline);
    while frames < 3 {
        tokio::select! {
            event = events.recv() => {
                if let Ok(SessionEvent::Frame(frame)) = event {
                    assert_eq!(frame.content_type, "image/png");
                    assert_eq!(frame.width, 64);
                    frames += 1;
                }
            }
            _ = &mut deadline => panic!("frame loop produced no frames"),
        }
    }
    session.close().await.unwrap();
}

#[tokio::test]
async fn status_never_reenters_connected() {
    let session = Session::start(mock_config()).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Connected);

    session.close().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Disconnected);

    // Closed sessions reject work instead of reconnecting.
    assert!(session.snapshot().await.is_err());
    assert!(session
        .send_input(&InputEvent::Text { text: "x".into() })
        .await
        .is_err());
    assert_eq!(session.status(), SessionStatus::Disconnected);
}

#[tokio::test]
async fn double_close_emits_disconnected_once() {
    let session = Session::start(mock_config()).await.unwrap();
    let mut events = session.subscribe();

    session.close().await.unwrap();
    session.close().await.unwrap();

    let mut disconnects = 0;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Status(SessionStatus::Disconnected) = event {
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn read_only_input_resolves_without_error() {
    let mut config = mock_config();
    config.read_only = true;
    let session = Session::start(config).await.unwrap();

    session
        .send_input(&InputEvent::MouseMove { x: 5, y: 5 })
        .await
        .unwrap();
    session.set_clipboard("dropped").await.unwrap();

    // Reads still work on a read-only session.
    assert!(session.snapshot().await.is_ok());
    session.close().await.unwrap();
}

#[tokio::test]
async fn unsupported_backend_fails_before_any_frame() {
    for kind in [BackendKind::Rdp, BackendKind::Webrtc, BackendKind::Custom] {
        let result = Session::start(SessionConfig::new(kind)).await;
        match result {
            Err(Error::UnsupportedBackend(k)) => assert_eq!(k, kind),
            other => panic!("expected unsupported backend error, got {:?}", other.map(|_| ())),
        }
    }
}

#[tokio::test]
async fn missing_backend_parameter_is_a_config_error() {
    // spice needs a domain, vnc needs a host
    let spice = Session::start(SessionConfig::new(BackendKind::Spice)).await;
    assert!(matches!(spice, Err(Error::Config(_))));

    let vnc = Session::start(SessionConfig::new(BackendKind::Vnc)).await;
    assert!(matches!(vnc, Err(Error::Config(_))));
}

#[tokio::test]
async fn snapshot_works_alongside_the_loop() {
    let mut config = mock_config();
    config.frame_interval_ms = 20;
    config.viewport = Some(Viewport::new(100, 80));
    let session = Session::start(config).await.unwrap();

    for _ in 0..5 {
        let frame = session.snapshot().await.unwrap();
        assert_eq!(frame.viewport(), Viewport::new(100, 80));
    }
    assert!(session.health_check().await);
    session.close().await.unwrap();
}

#[tokio::test]
async fn provider_round_trip() {
    let provider = Provider::new();
    let a = provider.start_session(mock_config()).await.unwrap();
    let b = provider.start_session(mock_config()).await.unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(provider.list().await.len(), 2);

    provider.close_all().await.unwrap();
    assert_eq!(a.status(), SessionStatus::Disconnected);
    assert_eq!(b.status(), SessionStatus::Disconnected);
}
