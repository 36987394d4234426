//! Tests for HTTP/2 CONTINUATION frame handling

use h2_wire::{flags, frame_type, ErrorCode, H2Codec, H2Event, H2Header, HpackEncoder};

use super::raw;

/// Literal with incremental indexing, new name: "foo: bar"
const FOO_BAR: [u8; 9] = [0x40, 0x03, b'f', b'o', b'o', 0x03, b'b', b'a', b'r'];

#[test]
fn test_continuation_single_frame() {
    let mut codec = H2Codec::client();

    // HEADERS without END_HEADERS, the literal cut in the middle
    let mut data = raw(1, frame_type::HEADERS, 0, &[0x82, 0x86, 0x84, FOO_BAR[0], FOO_BAR[1]]);
    // CONTINUATION with END_HEADERS
    data.extend_from_slice(&raw(1, frame_type::CONTINUATION, flags::END_HEADERS, &FOO_BAR[2..]));

    let events = codec.process(&data).unwrap();
    match &events[..] {
        [H2Event::Headers {
            stream_id,
            headers,
            end_stream,
            ..
        }] => {
            assert_eq!(*stream_id, 1);
            assert_eq!(headers.len(), 4);
            assert_eq!(headers[3], H2Header::new("foo", "bar"));
            assert!(!*end_stream);
        }
        other => panic!("Expected Headers event, got {other:?}"),
    }
}

#[test]
fn test_continuation_multiple_frames() {
    let mut codec = H2Codec::client();

    let mut data = raw(3, frame_type::HEADERS, 0, &[0x82, 0x86]);
    data.extend_from_slice(&raw(3, frame_type::CONTINUATION, 0, &[0x84]));
    data.extend_from_slice(&raw(3, frame_type::CONTINUATION, 0, &FOO_BAR[..4]));
    data.extend_from_slice(&raw(3, frame_type::CONTINUATION, flags::END_HEADERS, &FOO_BAR[4..]));

    let events = codec.process(&data).unwrap();
    match &events[..] {
        [H2Event::Headers {
            stream_id, headers, ..
        }] => {
            assert_eq!(*stream_id, 3);
            assert_eq!(
                headers,
                &vec![
                    H2Header::new(":method", "GET"),
                    H2Header::new(":scheme", "http"),
                    H2Header::new(":path", "/"),
                    H2Header::new("foo", "bar"),
                ]
            );
        }
        other => panic!("Expected Headers event, got {other:?}"),
    }
}

#[test]
fn test_continuation_preserves_end_stream() {
    let mut codec = H2Codec::client();

    // HEADERS with END_STREAM but no END_HEADERS
    let mut data = raw(1, frame_type::HEADERS, flags::END_STREAM, &[0x82, 0x86]);
    data.extend_from_slice(&raw(1, frame_type::CONTINUATION, flags::END_HEADERS, &[0x84]));

    let events = codec.process(&data).unwrap();
    assert!(
        matches!(events[..], [H2Event::Headers { end_stream: true, .. }]),
        "END_STREAM from HEADERS should be preserved"
    );
}

#[test]
fn test_continuation_wrong_stream_returns_error() {
    let mut codec = H2Codec::client();

    let mut data = raw(1, frame_type::HEADERS, 0, &[0x82, 0x86]);
    // CONTINUATION on stream 3 (wrong!)
    data.extend_from_slice(&raw(3, frame_type::CONTINUATION, flags::END_HEADERS, &[0x84]));

    let err = codec.process(&data).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert!(err.to_string().contains("CONTINUATION for stream 3"));
}

#[test]
fn test_unexpected_continuation_returns_error() {
    let mut codec = H2Codec::client();

    let data = raw(1, frame_type::CONTINUATION, flags::END_HEADERS, &[0x82, 0x86]);

    let err = codec.process(&data).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert!(err.to_string().contains("Unexpected CONTINUATION"));
}

#[test]
fn test_data_inside_header_block_returns_error() {
    let mut codec = H2Codec::client();

    let mut data = raw(1, frame_type::HEADERS, 0, &[0x82]);
    data.extend_from_slice(&raw(1, frame_type::DATA, 0, b"x"));

    let err = codec.process(&data).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_unknown_frame_inside_header_block_returns_error() {
    let mut codec = H2Codec::client();

    let mut data = raw(1, frame_type::HEADERS, 0, &[0x82]);
    data.extend_from_slice(&raw(1, 0xEE, 0, &[]));

    let err = codec.process(&data).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_continuation_incremental_delivery() {
    let mut codec = H2Codec::client();

    let events = codec.process(&raw(1, frame_type::HEADERS, 0, &[0x82, 0x86, 0x84])).unwrap();
    assert!(events.is_empty());
    assert_eq!(codec.pending_header_block(), Some((1, false)));

    let events = codec
        .process(&raw(1, frame_type::CONTINUATION, flags::END_HEADERS, &FOO_BAR))
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(codec.pending_header_block(), None);
}

#[test]
fn test_push_promise_with_continuation() {
    let mut codec = H2Codec::client();

    let mut payload = vec![0, 0, 0, 2]; // promised stream 2
    payload.extend_from_slice(&[0x82, 0x87]);
    let mut data = raw(1, frame_type::PUSH_PROMISE, 0, &payload);
    data.extend_from_slice(&raw(1, frame_type::CONTINUATION, flags::END_HEADERS, &[0x84]));

    let events = codec.process(&data).unwrap();
    assert_eq!(
        events,
        vec![H2Event::PushPromise {
            stream_id: 1,
            promised_stream_id: 2,
            headers: vec![
                H2Header::new(":method", "GET"),
                H2Header::new(":scheme", "https"),
                H2Header::new(":path", "/"),
            ],
        }]
    );
}

#[test]
fn test_huffman_block_across_continuations() {
    let mut encoder = HpackEncoder::with_huffman(true);
    let headers = vec![
        H2Header::new(":status", "200"),
        H2Header::new("content-type", "text/html; charset=utf-8"),
        H2Header::new("cache-control", "private, max-age=0"),
    ];
    let block = encoder.encode_header_list(&headers);

    let mut data = Vec::new();
    let mut chunks = block.chunks(4).peekable();
    let mut first = true;
    while let Some(chunk) = chunks.next() {
        let kind = if first { frame_type::HEADERS } else { frame_type::CONTINUATION };
        let end = if chunks.peek().is_none() { flags::END_HEADERS } else { 0 };
        data.extend_from_slice(&raw(7, kind, end, chunk));
        first = false;
    }

    let mut codec = H2Codec::client();
    let events = codec.process(&data).unwrap();
    assert!(matches!(
        &events[..],
        [H2Event::Headers { stream_id: 7, headers: h, .. }] if *h == headers
    ));
}

#[test]
fn test_continuation_size_bound_rejects_oversized_block() {
    let mut codec = H2Codec::client();
    codec.set_max_frame_size(1 << 20);

    // HEADERS without END_HEADERS, 200KB
    let initial_block = vec![0x82; 200 * 1024];
    codec.process(&raw(1, frame_type::HEADERS, 0, &initial_block)).unwrap();

    // CONTINUATION pushes over the 256KB limit
    let cont_block = vec![0x86; 100 * 1024];
    let err = codec
        .process(&raw(1, frame_type::CONTINUATION, flags::END_HEADERS, &cont_block))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::EnhanceYourCalm);
    assert!(err.to_string().contains("Header block too large"));
}

#[test]
fn test_headers_initial_block_exceeds_limit() {
    let mut codec = H2Codec::client();
    codec.set_max_frame_size(1 << 20);
    codec.set_max_header_block_size(1024);

    let err = codec
        .process(&raw(1, frame_type::HEADERS, 0, &vec![0x82; 2048]))
        .unwrap_err();
    assert!(err.to_string().contains("Header block too large"));
}
