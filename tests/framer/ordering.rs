//! Header block contiguity enforced by FrameReader

use bytes::Bytes;
use h2_framer::{Error, ErrorCode, Frame, FrameReader, FrameWriter, HeadersFrameParam};

fn open_headers(stream_id: u32) -> HeadersFrameParam {
    HeadersFrameParam {
        stream_id,
        block_fragment: Bytes::from_static(&[0x82]),
        ..Default::default()
    }
}

fn assert_protocol_error(res: h2_framer::Result<Frame>) {
    match res {
        Err(Error::Connection { code, .. }) => assert_eq!(code, ErrorCode::ProtocolError),
        other => panic!("Expected connection protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_data_inside_header_block() {
    let mut w = FrameWriter::new(Vec::new());
    w.write_headers(open_headers(3)).await.unwrap();
    w.write_data(3, false, &[0u8; 1024]).await.unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    assert!(matches!(r.read_frame().await.unwrap(), Frame::Headers(_)));
    assert_protocol_error(r.read_frame().await);
}

#[tokio::test]
async fn test_continuation_completes_block() {
    let mut w = FrameWriter::new(Vec::new());
    w.write_headers(open_headers(3)).await.unwrap();
    w.write_continuation(3, false, &[0x86]).await.unwrap();
    w.write_continuation(3, true, &[0x84]).await.unwrap();
    w.write_data(3, true, b"body").await.unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    for _ in 0..3 {
        r.read_frame().await.unwrap();
    }
    match r.read_frame().await.unwrap() {
        Frame::Data(f) => assert_eq!(&f.data[..], b"body"),
        other => panic!("Expected DATA, got {:?}", other),
    }
}

#[tokio::test]
async fn test_continuation_on_other_stream() {
    let mut w = FrameWriter::new(Vec::new());
    w.write_headers(open_headers(3)).await.unwrap();
    w.write_continuation(5, true, &[0x84]).await.unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    r.read_frame().await.unwrap();
    assert_protocol_error(r.read_frame().await);
}

#[tokio::test]
async fn test_lone_continuation() {
    let mut w = FrameWriter::new(Vec::new());
    w.write_continuation(1, true, &[0x84]).await.unwrap();
    let bytes = w.into_inner();

    assert_protocol_error(FrameReader::new(&bytes[..]).read_frame().await);
}

#[tokio::test]
async fn test_interleaved_blocks_rejected() {
    let mut w = FrameWriter::new(Vec::new());
    w.write_headers(open_headers(1)).await.unwrap();
    w.write_headers(HeadersFrameParam {
        end_headers: true,
        ..open_headers(3)
    })
    .await
    .unwrap();
    let bytes = w.into_inner();

    let mut r = FrameReader::new(&bytes[..]);
    r.read_frame().await.unwrap();
    assert_protocol_error(r.read_frame().await);
}
