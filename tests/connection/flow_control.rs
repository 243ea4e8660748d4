//! Send and receive window accounting

use std::time::Duration;

use bytes::Bytes;
use h2_framer::{settings_id, Config, Error, ErrorCode, Frame, Header, Setting};
use tokio::time::timeout;

use crate::mock_peer::{connect, request_headers, MockPeer};

fn post_headers() -> Vec<Header> {
    let mut headers = request_headers("/upload");
    headers[0] = Header::new(":method", "POST");
    headers
}

/// Collect `len` body bytes, skipping SETTINGS ACKs.
async fn recv_body_skipping_acks(peer: &mut MockPeer, len: usize) -> Vec<u8> {
    let mut body = Vec::new();
    while body.len() < len {
        match peer.next_frame().await {
            Frame::Data(f) => body.extend_from_slice(&f.data),
            Frame::Settings(f) if f.is_ack() => {}
            other => panic!("Expected DATA, got {:?}", other),
        }
    }
    body
}

#[tokio::test]
async fn test_send_blocks_on_stream_window() {
    let (conn, mut peer) = connect(
        Config::default(),
        &[Setting::new(settings_id::INITIAL_WINDOW_SIZE, 1000)],
    )
    .await;

    let req = conn.send_request(&post_headers(), false).await.unwrap();
    let body = Bytes::from(vec![7u8; 1024]);
    let sender = tokio::spawn(async move {
        let res = req.send_data(body, true).await;
        (req, res)
    });

    peer.recv_headers().await;
    let (first, end_stream) = peer.recv_body(1, 1000).await;
    assert_eq!(first.len(), 1000);
    assert!(!end_stream);
    // The stream window is exhausted; nothing else may arrive.
    assert!(timeout(Duration::from_millis(100), peer.reader.read_frame())
        .await
        .is_err());

    peer.writer.write_window_update(1, 24).await.unwrap();
    peer.writer.flush().await.unwrap();

    let (rest, end_stream) = peer.recv_body(1, 24).await;
    assert_eq!(rest.len(), 24);
    assert!(end_stream);

    let (_req, res) = sender.await.unwrap();
    res.unwrap();
}

#[tokio::test]
async fn test_send_blocks_on_connection_window() {
    let (conn, mut peer) = connect(Config::default(), &[]).await;

    // Two streams share the default 65535-byte connection window.
    let a = conn.send_request(&post_headers(), false).await.unwrap();
    a.send_data(Bytes::from(vec![1u8; 60_000]), false).await.unwrap();
    let b = conn.send_request(&post_headers(), false).await.unwrap();
    let sender = tokio::spawn(async move {
        let res = b.send_data(Bytes::from(vec![2u8; 10_000]), true).await;
        (b, res)
    });

    peer.recv_headers().await;
    let (body, _) = peer.recv_body(1, 60_000).await;
    assert_eq!(body.len(), 60_000);
    peer.recv_headers().await;
    let (body, _) = peer.recv_body(3, 5535).await;
    assert_eq!(body.len(), 5535);

    peer.writer.write_window_update(0, 10_000).await.unwrap();
    peer.writer.flush().await.unwrap();
    let (body, end_stream) = peer.recv_body(3, 4465).await;
    assert_eq!(body.len(), 4465);
    assert!(end_stream);

    let (_b, res) = sender.await.unwrap();
    res.unwrap();
    drop(a);
}

#[tokio::test]
async fn test_initial_window_change_applies_to_open_streams() {
    let (conn, mut peer) = connect(
        Config::default(),
        &[Setting::new(settings_id::INITIAL_WINDOW_SIZE, 100)],
    )
    .await;

    let req = conn.send_request(&post_headers(), false).await.unwrap();
    let sender = tokio::spawn(async move {
        let res = req.send_data(Bytes::from(vec![0u8; 300]), true).await;
        (req, res)
    });
    peer.recv_headers().await;
    assert_eq!(recv_body_skipping_acks(&mut peer, 100).await.len(), 100);

    peer.writer
        .write_settings(&[Setting::new(settings_id::INITIAL_WINDOW_SIZE, 300)])
        .await
        .unwrap();
    peer.writer.flush().await.unwrap();
    assert_eq!(recv_body_skipping_acks(&mut peer, 200).await.len(), 200);

    let (_req, res) = sender.await.unwrap();
    res.unwrap();
    assert_eq!(conn.peer_settings().initial_window_size, 300);
}

#[tokio::test]
async fn test_consumed_data_is_returned_to_peer() {
    let config = Config::new().window_update_threshold(1000);
    let (conn, mut peer) = connect(config, &[]).await;

    let req = conn.send_request(&request_headers("/"), true).await.unwrap();
    peer.recv_headers().await;
    peer.send_response(1, "200", false).await;
    peer.send_data(1, &[0u8; 1500], false).await;

    req.response().await.unwrap();
    assert_eq!(req.data().await.unwrap().map(|b| b.len()), Some(1500));

    let mut stream_inc = None;
    let mut conn_inc = None;
    while stream_inc.is_none() || conn_inc.is_none() {
        match peer.raw_frame().await {
            Frame::WindowUpdate(f) if f.header.stream_id == 1 => stream_inc = Some(f.increment),
            Frame::WindowUpdate(f) if f.header.stream_id == 0 => conn_inc = Some(f.increment),
            other => panic!("Expected WINDOW_UPDATE, got {:?}", other),
        }
    }
    assert_eq!(stream_inc, Some(1500));
    assert_eq!(conn_inc, Some(1500));
}

#[tokio::test]
async fn test_padding_returned_immediately() {
    let (conn, mut peer) = connect(Config::default(), &[]).await;

    let req = conn.send_request(&request_headers("/"), true).await.unwrap();
    peer.recv_headers().await;
    peer.send_response(1, "200", false).await;
    peer.writer
        .write_data_padded(1, false, b"abc", &[0u8; 20])
        .await
        .unwrap();
    peer.writer.flush().await.unwrap();

    // Pad length byte plus 20 padding bytes, before anything is read.
    let mut stream_inc = None;
    let mut conn_inc = None;
    while stream_inc.is_none() || conn_inc.is_none() {
        match peer.raw_frame().await {
            Frame::WindowUpdate(f) if f.header.stream_id == 1 => stream_inc = Some(f.increment),
            Frame::WindowUpdate(f) if f.header.stream_id == 0 => conn_inc = Some(f.increment),
            other => panic!("Expected WINDOW_UPDATE, got {:?}", other),
        }
    }
    assert_eq!(stream_inc, Some(21));
    assert_eq!(conn_inc, Some(21));

    req.response().await.unwrap();
    assert_eq!(req.data().await.unwrap(), Some(Bytes::from_static(b"abc")));
}

#[tokio::test]
async fn test_stream_window_overrun_resets_stream() {
    let config = Config::new().initial_window_size(100);
    let (conn, mut peer) = connect(config, &[]).await;

    let req = conn.send_request(&request_headers("/"), true).await.unwrap();
    peer.recv_headers().await;
    peer.send_response(1, "200", false).await;
    peer.send_data(1, &[0u8; 101], false).await;

    match peer.next_frame().await {
        Frame::RstStream(f) => {
            assert_eq!(f.header.stream_id, 1);
            assert_eq!(f.error_code, ErrorCode::FlowControlError);
        }
        other => panic!("Expected RST_STREAM, got {:?}", other),
    }
    assert!(req.data().await.is_err());
    assert!(!conn.is_closed());
}

const MAX_WINDOW: u32 = 0x7fff_ffff;

async fn expect_flow_control_goaway(peer: &mut MockPeer) {
    match peer.next_frame().await {
        Frame::GoAway(f) => assert_eq!(f.error_code, ErrorCode::FlowControlError),
        other => panic!("Expected GOAWAY, got {:?}", other),
    }
}

#[tokio::test]
async fn test_goaway_returns_refused_stream_data_to_connection_window() {
    let (conn, mut peer) = connect(Config::default(), &[]).await;

    let _req1 = conn.send_request(&request_headers("/a"), true).await.unwrap();
    let req3 = conn.send_request(&request_headers("/b"), true).await.unwrap();
    peer.recv_headers().await;
    peer.recv_headers().await;
    peer.send_response(3, "200", false).await;
    peer.send_data(3, &[0u8; 1000], false).await;
    peer.writer
        .write_goaway(1, ErrorCode::NoError, b"")
        .await
        .unwrap();
    peer.writer.flush().await.unwrap();

    match peer.raw_frame().await {
        Frame::WindowUpdate(f) => {
            assert_eq!(f.header.stream_id, 0);
            assert_eq!(f.increment, 1000);
        }
        other => panic!("Expected WINDOW_UPDATE, got {:?}", other),
    }
    match req3.data().await {
        Err(Error::StreamRefused {
            stream_id,
            last_stream_id,
        }) => {
            assert_eq!(stream_id, 3);
            assert_eq!(last_stream_id, 1);
        }
        other => panic!("Expected refused stream, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_window_overflow_closes_connection() {
    let (conn, mut peer) = connect(Config::default(), &[]).await;
    let req = conn.send_request(&post_headers(), false).await.unwrap();
    peer.recv_headers().await;

    peer.writer.write_window_update(0, MAX_WINDOW).await.unwrap();
    peer.writer.flush().await.unwrap();

    expect_flow_control_goaway(&mut peer).await;
    assert!(conn.is_closed());
    let err = req.response().await.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), Some(ErrorCode::FlowControlError));
}

#[tokio::test]
async fn test_stream_window_overflow_resets_only_its_stream() {
    let (conn, mut peer) = connect(Config::default(), &[]).await;
    let req = conn.send_request(&post_headers(), false).await.unwrap();
    peer.recv_headers().await;

    peer.writer.write_window_update(1, MAX_WINDOW).await.unwrap();
    peer.writer.flush().await.unwrap();

    match peer.next_frame().await {
        Frame::RstStream(f) => {
            assert_eq!(f.header.stream_id, 1);
            assert_eq!(f.error_code, ErrorCode::FlowControlError);
        }
        other => panic!("Expected RST_STREAM, got {:?}", other),
    }
    let err = req.response().await.unwrap_err();
    assert_eq!(err.stream_id(), Some(1));
    assert!(!err.is_connection_error());

    let pinger = tokio::spawn({
        let conn = conn.clone();
        async move { conn.ping().await }
    });
    match peer.next_frame().await {
        Frame::Ping(f) => {
            peer.writer.write_ping(true, f.data).await.unwrap();
            peer.writer.flush().await.unwrap();
        }
        other => panic!("Expected PING, got {:?}", other),
    }
    pinger.await.unwrap().unwrap();
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_initial_window_change_overflow_closes_connection() {
    let (conn, mut peer) = connect(Config::default(), &[]).await;
    let _req = conn.send_request(&post_headers(), false).await.unwrap();
    peer.recv_headers().await;

    // Stream window reaches the maximum; any positive delta overflows it.
    peer.writer
        .write_window_update(1, MAX_WINDOW - 65_535)
        .await
        .unwrap();
    peer.writer
        .write_settings(&[Setting::new(settings_id::INITIAL_WINDOW_SIZE, 65_536)])
        .await
        .unwrap();
    peer.writer.flush().await.unwrap();

    expect_flow_control_goaway(&mut peer).await;
    assert!(conn.is_closed());
}
