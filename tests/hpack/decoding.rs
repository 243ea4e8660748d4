//! Header block decoding

use h2_framer::{Error, ErrorCode, HpackDecoder};

#[test]
fn test_decode_literal_with_new_name() {
    let mut decoder = HpackDecoder::new();

    let data = [
        0x40, // Literal with indexing, new name
        0x06, // Name length: 6
        b'x', b'-', b'n', b'a', b'm', b'e',
        0x02, // Value length: 2
        b'o', b'k',
    ];

    let headers = decoder.decode(&data).unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].name, "x-name");
    assert_eq!(headers[0].value, "ok");
}

#[test]
fn test_decode_literal_indexed_name() {
    let mut decoder = HpackDecoder::new();

    let data = [
        0x41, // Literal with indexing, name index 1 (:authority)
        0x09, // Value length: 9
        b'l', b'o', b'c', b'a', b'l', b'h', b'o', b's', b't',
    ];

    let headers = decoder.decode(&data).unwrap();
    assert_eq!(headers[0].name, ":authority");
    assert_eq!(headers[0].value, "localhost");
}

#[test]
fn test_dynamic_entry_reused_by_later_block() {
    let mut decoder = HpackDecoder::new();

    decoder
        .decode(&[0x40, 0x01, b'k', 0x01, b'v'])
        .unwrap();
    // 0xbe = index 62, the first dynamic table entry
    let headers = decoder.decode(&[0xbe]).unwrap();
    assert_eq!(headers[0].name, "k");
    assert_eq!(headers[0].value, "v");
}

#[test]
fn test_truncated_block_is_compression_error() {
    let mut decoder = HpackDecoder::new();

    // Name length says 6 but only 2 bytes follow.
    match decoder.decode(&[0x40, 0x06, b'x', b'y']) {
        Err(Error::Connection { code, .. }) => assert_eq!(code, ErrorCode::CompressionError),
        other => panic!("Expected compression error, got {:?}", other),
    }
}
