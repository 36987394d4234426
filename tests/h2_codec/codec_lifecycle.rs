//! Tests for H2Codec lifecycle (reset, limits, HPACK state across blocks)

use h2_wire::{flags, frame_type, H2Codec, H2Event, H2Header, HpackEncoder, CONNECTION_PREFACE};

use super::raw;

fn settings_frame() -> Vec<u8> {
    raw(0, frame_type::SETTINGS, 0, &[])
}

#[test]
fn test_codec_reset_clears_pending_continuation() {
    let mut codec = H2Codec::client();

    // HEADERS without END_HEADERS
    let events = codec.process(&raw(1, frame_type::HEADERS, 0, &[0x82, 0x86, 0x84])).unwrap();
    assert!(events.is_empty());
    assert!(codec.pending_header_block().is_some());

    codec.reset();
    assert!(codec.pending_header_block().is_none());

    // After reset, CONTINUATION is unexpected
    codec.set_preface_received(true);
    let result = codec.process(&raw(1, frame_type::CONTINUATION, flags::END_HEADERS, &[0x82]));
    assert!(result.is_err());
}

#[test]
fn test_codec_reset_allows_new_preface() {
    let mut codec = H2Codec::new();

    let mut data = CONNECTION_PREFACE.to_vec();
    data.extend_from_slice(&settings_frame());
    assert_eq!(codec.process(&data).unwrap().len(), 1);
    assert!(codec.preface_received());

    codec.reset();
    assert!(!codec.preface_received());
    assert_eq!(codec.buffered(), 0);

    let events = codec.process(&data).unwrap();
    assert_eq!(events.len(), 1);
    assert!(codec.preface_received());
}

#[test]
fn test_codec_reset_clears_dynamic_table() {
    let mut encoder = HpackEncoder::new();
    let mut codec = H2Codec::client();
    let headers = vec![H2Header::new("x-session", "abc")];

    let block = encoder.encode_header_list(&headers);
    codec.process(&raw(1, frame_type::HEADERS, flags::END_HEADERS, &block)).unwrap();
    assert_eq!(codec.decoder().table().len(), 1);

    codec.reset();
    assert_eq!(codec.decoder().table().len(), 0);
}

#[test]
fn test_codec_reset_keeps_table_size_limit() {
    let mut codec = H2Codec::client();
    codec.set_header_table_size(256);
    codec.reset();
    assert_eq!(codec.decoder().max_allowed_table_size(), 256);
}

#[test]
fn test_dynamic_table_shared_across_blocks() {
    let mut encoder = HpackEncoder::new();
    let mut codec = H2Codec::client();
    let headers = vec![
        H2Header::new(":status", "200"),
        H2Header::new("x-trace", "0af7651916cd43dd"),
    ];

    let first = encoder.encode_header_list(&headers);
    let second = encoder.encode_header_list(&headers);
    assert!(second.len() < first.len(), "second block should use the dynamic table");

    let mut data = raw(1, frame_type::HEADERS, flags::END_HEADERS, &first);
    data.extend_from_slice(&raw(3, frame_type::HEADERS, flags::END_HEADERS, &second));

    let events = codec.process(&data).unwrap();
    assert_eq!(events.len(), 2);
    for event in events {
        match event {
            H2Event::Headers { headers: h, .. } => assert_eq!(h, headers),
            other => panic!("Expected Headers event, got {other:?}"),
        }
    }
}

#[test]
fn test_table_size_above_limit_rejected() {
    let mut codec = H2Codec::client();
    codec.set_header_table_size(100);

    // Dynamic table size update to 4096 (0x3f 0xe1 0x1f)
    let block = [0x3f, 0xe1, 0x1f, 0x82];
    let err = codec
        .process(&raw(1, frame_type::HEADERS, flags::END_HEADERS, &block))
        .unwrap_err();
    assert!(err.is_connection_error());
}
