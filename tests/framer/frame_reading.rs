//! Reading frames from raw bytes

use h2_framer::{
    read_frame_header, settings_id, Error, ErrorCode, Frame, FrameReader, FrameType, FrameWriter,
    Setting,
};

#[tokio::test]
async fn test_read_frame_header_consumes_nine_bytes() {
    let bytes = [0, 0, 3, 0, 1, 0, 0, 0, 1, b'a', b'b', b'c'];
    let mut input = &bytes[..];
    let header = read_frame_header(&mut input).await.unwrap();
    assert_eq!(header.frame_type, FrameType::Data);
    assert_eq!(header.length, 3);
    assert_eq!(input, b"abc");
}

#[tokio::test]
async fn test_settings_value_lookup() {
    let mut w = FrameWriter::new(Vec::new());
    w.write_settings(&[
        Setting::new(settings_id::INITIAL_WINDOW_SIZE, 65535),
        Setting::new(settings_id::MAX_CONCURRENT_STREAMS, 100),
    ])
    .await
    .unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    match r.read_frame().await.unwrap() {
        Frame::Settings(f) => {
            assert_eq!(f.value(settings_id::INITIAL_WINDOW_SIZE), Some(65535));
            assert_eq!(f.value(settings_id::MAX_CONCURRENT_STREAMS), Some(100));
            assert_eq!(f.value(settings_id::HEADER_TABLE_SIZE), None);
        }
        other => panic!("Expected SETTINGS, got {:?}", other),
    }
}

#[tokio::test]
async fn test_truncated_payload_is_io_error() {
    // Header announces 10 bytes, only 4 follow.
    let bytes: [u8; 13] = [0, 0, 10, 0, 0, 0, 0, 0, 1, 1, 2, 3, 4];
    let mut r = FrameReader::new(&bytes[..]);
    match r.read_frame().await {
        Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("Expected io error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reader_never_reads_past_frame() {
    let mut w = FrameWriter::new(Vec::new());
    w.write_data(1, false, b"one").await.unwrap();
    let mut bytes = w.into_inner();
    bytes.extend_from_slice(&[0xde, 0xad]);

    let mut r = FrameReader::new(&bytes[..]);
    r.read_frame().await.unwrap();
    assert_eq!(*r.get_ref(), &b"\xde\xad"[..]);
}

#[tokio::test]
async fn test_larger_max_frame_size_accepts_big_frames() {
    let mut w = FrameWriter::new(Vec::new());
    let payload = vec![0u8; 20_000];
    w.write_data(1, false, &payload).await.unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    match r.read_frame().await {
        Err(Error::Connection { code, .. }) => assert_eq!(code, ErrorCode::FrameSizeError),
        other => panic!("Expected frame size error, got {:?}", other),
    }

    let mut r = FrameReader::new(&bytes[..]);
    r.set_max_read_frame_size(32_768);
    match r.read_frame().await.unwrap() {
        Frame::Data(f) => assert_eq!(f.data.len(), 20_000),
        other => panic!("Expected DATA, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fresh_buffers_without_reuse() {
    let mut w = FrameWriter::new(Vec::new());
    w.write_data(1, false, b"aaaa").await.unwrap();
    w.write_data(1, false, b"bbbb").await.unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    r.set_reuse_frames(false);
    let first = r.read_frame().await.unwrap();
    let second = r.read_frame().await.unwrap();
    // Earlier frames stay valid after later reads.
    match (first, second) {
        (Frame::Data(a), Frame::Data(b)) => {
            assert_eq!(&a.data[..], b"aaaa");
            assert_eq!(&b.data[..], b"bbbb");
        }
        other => panic!("Expected DATA frames, got {:?}", other),
    }
}
