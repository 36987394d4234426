//! Tests for H2Codec processing (bytes -> events)

use h2_wire::{flags, frame_type, ErrorCode, H2Codec, H2Event, H2Header, CONNECTION_PREFACE};

use super::raw;

fn with_preface(codec: &mut H2Codec) {
    codec.set_preface_received(true);
}

#[test]
fn test_codec_fragmented_frames() {
    let mut codec = H2Codec::new();
    with_preface(&mut codec);

    let mut frame = vec![0, 0, 5, 0, 1, 0, 0, 0, 1];
    frame.extend_from_slice(b"hello");

    // Feed it in fragments
    assert!(codec.process(&frame[..5]).unwrap().is_empty());
    assert!(codec.process(&frame[5..10]).unwrap().is_empty());
    assert_eq!(codec.buffered(), 10);

    let events = codec.process(&frame[10..]).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(codec.buffered(), 0);
}

#[test]
fn test_connection_preface_handling() {
    let mut codec = H2Codec::server();

    let mut data = CONNECTION_PREFACE.to_vec();
    data.extend_from_slice(&[0, 0, 0, 4, 0, 0, 0, 0, 0]); // Empty SETTINGS

    let events = codec.process(&data).unwrap();
    assert!(codec.preface_received());
    assert_eq!(
        events,
        vec![H2Event::Settings {
            ack: false,
            settings: vec![]
        }]
    );
}

#[test]
fn test_preface_split_across_reads() {
    let mut codec = H2Codec::new();

    assert!(codec.process(&CONNECTION_PREFACE[..7]).unwrap().is_empty());
    assert!(!codec.preface_received());

    let mut rest = CONNECTION_PREFACE[7..].to_vec();
    rest.extend_from_slice(&raw(0, frame_type::SETTINGS, flags::ACK, &[]));
    let events = codec.process(&rest).unwrap();
    assert!(codec.preface_received());
    assert!(matches!(events[..], [H2Event::Settings { ack: true, .. }]));
}

#[test]
fn test_lenient_codec_accepts_missing_preface() {
    let mut codec = H2Codec::new();
    let events = codec.process(&raw(1, frame_type::DATA, 0, b"x")).unwrap();
    assert!(codec.preface_received());
    assert_eq!(events.len(), 1);
}

#[test]
fn test_server_codec_rejects_bad_preface() {
    let mut codec = H2Codec::server();
    let err = codec.process(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_padded_data_frame() {
    let mut codec = H2Codec::client();

    // DATA frame with PADDED flag: length 10, pad_length 4, data "hello"
    let mut frame = vec![0, 0, 10, 0, 0x9, 0, 0, 0, 1]; // 0x9 = END_STREAM | PADDED
    frame.push(4); // Pad length
    frame.extend_from_slice(b"hello");
    frame.extend_from_slice(&[0, 0, 0, 0]); // Padding

    let events = codec.process(&frame).unwrap();
    assert_eq!(
        events,
        vec![H2Event::Data {
            stream_id: 1,
            data: b"hello".to_vec(),
            end_stream: true,
        }]
    );
}

#[test]
fn test_codec_parse_headers() {
    let mut codec = H2Codec::client();
    // :method GET, :scheme http, :path /
    let frame = raw(
        1,
        frame_type::HEADERS,
        flags::END_HEADERS | flags::END_STREAM,
        &[0x82, 0x86, 0x84],
    );

    let events = codec.process(&frame).unwrap();
    match &events[..] {
        [H2Event::Headers {
            stream_id,
            headers,
            end_stream,
            priority,
        }] => {
            assert_eq!(*stream_id, 1);
            assert_eq!(
                headers,
                &vec![
                    H2Header::new(":method", "GET"),
                    H2Header::new(":scheme", "http"),
                    H2Header::new(":path", "/"),
                ]
            );
            assert!(*end_stream);
            assert!(priority.is_none());
        }
        other => panic!("Expected Headers event, got {other:?}"),
    }
}

#[test]
fn test_headers_with_priority_flag() {
    let mut codec = H2Codec::client();

    // HEADERS with PRIORITY: exclusive dependency on stream 3, weight 255
    let mut payload = vec![0x80, 0, 0, 3, 255];
    payload.extend_from_slice(&[0x82, 0x86]);
    let frame = raw(5, frame_type::HEADERS, flags::END_HEADERS | flags::PRIORITY, &payload);

    let events = codec.process(&frame).unwrap();
    match &events[..] {
        [H2Event::Headers {
            headers,
            priority: Some(priority),
            ..
        }] => {
            assert_eq!(headers.len(), 2);
            assert!(priority.exclusive);
            assert_eq!(priority.dependency, 3);
            assert_eq!(priority.weight, 255);
        }
        other => panic!("Expected Headers event with priority, got {other:?}"),
    }
}

#[test]
fn test_padded_headers_with_priority() {
    let mut codec = H2Codec::client();

    let mut payload = vec![2]; // Pad length
    payload.extend_from_slice(&[0, 0, 0, 0, 15]);
    payload.push(0x82);
    payload.extend_from_slice(&[0, 0]);
    let flags = flags::END_HEADERS | flags::PRIORITY | flags::PADDED;

    let events = codec.process(&raw(1, frame_type::HEADERS, flags, &payload)).unwrap();
    assert!(matches!(
        &events[..],
        [H2Event::Headers { headers, priority: Some(p), .. }]
            if headers.len() == 1 && p.weight == 15
    ));
}

#[test]
fn test_codec_parse_rst_stream() {
    let mut codec = H2Codec::client();
    let frame = [0, 0, 4, 3, 0, 0, 0, 0, 1, 0, 0, 0, 0x8];
    let events = codec.process(&frame).unwrap();
    assert_eq!(
        events,
        vec![H2Event::StreamReset {
            stream_id: 1,
            error_code: ErrorCode::Cancel,
        }]
    );
}

#[test]
fn test_unknown_error_code_maps_to_internal_error() {
    let mut codec = H2Codec::client();
    // HTTP_1_1_REQUIRED (0xd) is not in RFC 7540
    let frame = [0, 0, 4, 3, 0, 0, 0, 0, 1, 0, 0, 0, 0xd];
    let events = codec.process(&frame).unwrap();
    assert!(matches!(
        events[..],
        [H2Event::StreamReset {
            error_code: ErrorCode::InternalError,
            ..
        }]
    ));
}

#[test]
fn test_codec_parse_goaway() {
    let mut codec = H2Codec::client();
    let mut payload = vec![0, 0, 0, 5, 0, 0, 0, 0x1];
    payload.extend_from_slice(b"bye");
    let events = codec.process(&raw(0, frame_type::GOAWAY, 0, &payload)).unwrap();
    assert_eq!(
        events,
        vec![H2Event::GoAway {
            last_stream_id: 5,
            error_code: ErrorCode::ProtocolError,
            debug_data: b"bye".to_vec(),
        }]
    );
}

#[test]
fn test_multiple_frames_in_single_process() {
    let mut codec = H2Codec::client();
    let mut data = Vec::new();
    data.extend_from_slice(&[0, 0, 2, 1, 5, 0, 0, 0, 1]);
    data.extend_from_slice(&[0x82, 0x86]);
    data.extend_from_slice(&[0, 0, 1, 1, 4, 0, 0, 0, 3]);
    data.extend_from_slice(&[0x84]);
    data.extend_from_slice(&[0, 0, 5, 0, 1, 0, 0, 0, 3]);
    data.extend_from_slice(b"hello");
    let events = codec.process(&data).unwrap();
    assert_eq!(events.len(), 3);
}

#[test]
fn test_empty_data_frame() {
    let mut codec = H2Codec::client();
    let events = codec.process(&[0, 0, 0, 0, 1, 0, 0, 0, 1]).unwrap();
    assert_eq!(
        events,
        vec![H2Event::Data {
            stream_id: 1,
            data: vec![],
            end_stream: true,
        }]
    );
}

#[test]
fn test_max_size_frame_accepted() {
    let mut codec = H2Codec::client();
    let payload = vec![0xAB; 16384];
    let events = codec
        .process(&raw(1, frame_type::DATA, flags::END_STREAM, &payload))
        .unwrap();
    assert!(matches!(&events[..], [H2Event::Data { data, .. }] if data.len() == 16384));
}

#[test]
fn test_raised_max_frame_size() {
    let mut codec = H2Codec::client();
    codec.set_max_frame_size(32_768);
    let payload = vec![0; 20_000];
    let events = codec.process(&raw(1, frame_type::DATA, 0, &payload)).unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn test_priority_frame_reported() {
    let mut codec = H2Codec::client();
    let frame = raw(1, frame_type::PRIORITY, 0, &[0, 0, 0, 0, 16]);

    let events = codec.process(&frame).unwrap();
    assert!(matches!(
        events[..],
        [H2Event::Priority { stream_id: 1, priority }]
            if priority.weight == 16 && !priority.exclusive
    ));
}

#[test]
fn test_unknown_frame_type_ignored() {
    let mut codec = H2Codec::client();
    let mut data = raw(1, 0xFF, 0, &[1, 2, 3]);
    data.extend_from_slice(&raw(1, frame_type::DATA, 0, b"after"));

    let events = codec.process(&data).unwrap();
    assert_eq!(events.len(), 1, "Unknown frame types should be silently ignored");
}

#[test]
fn test_buffer_empty_after_complete_consumption() {
    let mut codec = H2Codec::client();
    codec.process(&raw(1, frame_type::DATA, 0, b"hello")).unwrap();

    assert_eq!(codec.buffered(), 0);
    assert!(codec.process(&[]).unwrap().is_empty());
}
