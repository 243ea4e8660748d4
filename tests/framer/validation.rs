//! Structural checks applied while reading

use h2_framer::{Error, ErrorCode, Frame, FrameReader, FrameType, FrameWriter};

fn expect_connection_error(res: h2_framer::Result<Frame>, want: ErrorCode) {
    match res {
        Err(Error::Connection { code, .. }) => assert_eq!(code, want),
        other => panic!("Expected connection error {:?}, got {:?}", want, other),
    }
}

#[tokio::test]
async fn test_zero_window_update_on_stream_is_stream_error() {
    let mut w = FrameWriter::new(Vec::new());
    w.set_allow_illegal_writes(true);
    w.write_window_update(5, 0).await.unwrap();
    w.write_ping(false, [0; 8]).await.unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    match r.read_frame().await {
        Err(err @ Error::Stream { .. }) => {
            assert_eq!(err.stream_id(), Some(5));
            assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
            assert!(!err.is_connection_error());
        }
        other => panic!("Expected stream error, got {:?}", other),
    }
    // The reader stays usable.
    assert!(matches!(r.read_frame().await.unwrap(), Frame::Ping(_)));
}

#[tokio::test]
async fn test_zero_window_update_on_connection_is_connection_error() {
    let mut w = FrameWriter::new(Vec::new());
    w.set_allow_illegal_writes(true);
    w.write_window_update(0, 0).await.unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    expect_connection_error(r.read_frame().await, ErrorCode::ProtocolError);
}

#[tokio::test]
async fn test_wrong_stream_domain() {
    let mut w = FrameWriter::new(Vec::new());
    w.set_allow_illegal_writes(true);
    w.write_data(0, false, b"x").await.unwrap();
    let data_on_zero = w.into_inner();
    expect_connection_error(
        FrameReader::new(&data_on_zero[..]).read_frame().await,
        ErrorCode::ProtocolError,
    );

    let mut w = FrameWriter::new(Vec::new());
    w.write_raw_frame(FrameType::Settings, 0, 1, &[]).await.unwrap();
    let settings_on_stream = w.into_inner();
    expect_connection_error(
        FrameReader::new(&settings_on_stream[..]).read_frame().await,
        ErrorCode::ProtocolError,
    );

    let mut w = FrameWriter::new(Vec::new());
    w.write_raw_frame(FrameType::GoAway, 0, 3, &[0; 8]).await.unwrap();
    let goaway_on_stream = w.into_inner();
    expect_connection_error(
        FrameReader::new(&goaway_on_stream[..]).read_frame().await,
        ErrorCode::ProtocolError,
    );
}

#[tokio::test]
async fn test_fixed_size_frames() {
    let ping: &[u8] = &[0, 0, 7, 6, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7];
    expect_connection_error(
        FrameReader::new(ping).read_frame().await,
        ErrorCode::FrameSizeError,
    );

    let window_update: &[u8] = &[0, 0, 3, 8, 0, 0, 0, 0, 0, 0, 0, 1];
    expect_connection_error(
        FrameReader::new(window_update).read_frame().await,
        ErrorCode::FrameSizeError,
    );

    let settings_ack: &[u8] = &[0, 0, 6, 4, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0];
    expect_connection_error(
        FrameReader::new(settings_ack).read_frame().await,
        ErrorCode::FrameSizeError,
    );

    let short_goaway: &[u8] = &[0, 0, 4, 7, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    expect_connection_error(
        FrameReader::new(short_goaway).read_frame().await,
        ErrorCode::FrameSizeError,
    );
}

#[tokio::test]
async fn test_padding_longer_than_payload() {
    // DATA, PADDED, pad length 9 with 2 bytes left
    let bytes = [0, 0, 3, 0, 0x8, 0, 0, 0, 1, 9, b'h', b'i'];
    expect_connection_error(
        FrameReader::new(&bytes[..]).read_frame().await,
        ErrorCode::ProtocolError,
    );
}
