//! Header block encoding

use h2_framer::{Header, HpackDecoder, HpackEncoder};

#[test]
fn test_request_headers_survive_coding() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    let headers = vec![
        Header::new(":method", "POST"),
        Header::new(":scheme", "https"),
        Header::new(":authority", "example.com"),
        Header::new(":path", "/upload"),
        Header::new("content-type", "application/octet-stream"),
    ];
    let block = encoder.encode(&headers);
    assert_eq!(decoder.decode(&block).unwrap(), headers);
}

#[test]
fn test_repeated_header_names_keep_order() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    let headers = vec![
        Header::new(":status", "200"),
        Header::new("set-cookie", "session=xyz"),
        Header::new("set-cookie", "theme=dark"),
    ];
    let decoded = decoder.decode(&encoder.encode(&headers)).unwrap();
    let cookies: Vec<_> = decoded
        .iter()
        .filter(|h| h.name == "set-cookie")
        .map(|h| h.value.as_str())
        .collect();
    assert_eq!(cookies, ["session=xyz", "theme=dark"]);
}

#[test]
fn test_encoder_and_decoder_stay_in_sync() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    for i in 0..20 {
        let headers = vec![
            Header::new(":status", "200"),
            Header::new("x-request-id", format!("req-{}", i % 3)),
        ];
        let block = encoder.encode(&headers);
        assert_eq!(decoder.decode(&block).unwrap(), headers);
    }
}

#[test]
fn test_pseudo_headers() {
    assert!(Header::new(":path", "/").is_pseudo());
    assert!(!Header::new("host", "example.com").is_pseudo());
}
