//! Tests for HTTP/2 protocol frames (PING, WINDOW_UPDATE, SETTINGS)

use h2_wire::{flags, frame_type, settings_id, H2Codec, H2Event, Settings};

use super::raw;

#[test]
fn test_ping_frame_parsing() {
    let mut codec = H2Codec::client();
    let events = codec
        .process(&raw(0, frame_type::PING, 0, &[1, 2, 3, 4, 5, 6, 7, 8]))
        .unwrap();

    assert_eq!(
        events,
        vec![H2Event::Ping {
            ack: false,
            data: [1, 2, 3, 4, 5, 6, 7, 8]
        }]
    );
}

#[test]
fn test_ping_ack_frame_parsing() {
    let mut codec = H2Codec::client();
    let data = [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE];
    let events = codec.process(&raw(0, frame_type::PING, flags::ACK, &data)).unwrap();

    assert_eq!(events, vec![H2Event::Ping { ack: true, data }]);
}

#[test]
fn test_window_update_parsing() {
    let mut codec = H2Codec::client();
    let frame = raw(5, frame_type::WINDOW_UPDATE, 0, &0x0001_0000u32.to_be_bytes());

    let events = codec.process(&frame).unwrap();
    assert_eq!(
        events,
        vec![H2Event::WindowUpdate {
            stream_id: 5,
            increment: 65536
        }]
    );
}

#[test]
fn test_window_update_connection_level() {
    let mut codec = H2Codec::client();
    let frame = raw(0, frame_type::WINDOW_UPDATE, 0, &0x0010_0000u32.to_be_bytes());

    let events = codec.process(&frame).unwrap();
    assert_eq!(
        events,
        vec![H2Event::WindowUpdate {
            stream_id: 0,
            increment: 0x100000
        }]
    );
}

#[test]
fn test_window_update_reserved_bit_ignored() {
    let mut codec = H2Codec::client();
    let frame = raw(1, frame_type::WINDOW_UPDATE, 0, &0x8000_0010u32.to_be_bytes());

    let events = codec.process(&frame).unwrap();
    assert!(matches!(events[..], [H2Event::WindowUpdate { increment: 16, .. }]));
}

#[test]
fn test_settings_frame_parsing() {
    let mut codec = H2Codec::client();

    let mut payload = Vec::new();
    payload.extend_from_slice(&settings_id::MAX_CONCURRENT_STREAMS.to_be_bytes());
    payload.extend_from_slice(&100u32.to_be_bytes());
    payload.extend_from_slice(&settings_id::INITIAL_WINDOW_SIZE.to_be_bytes());
    payload.extend_from_slice(&65535u32.to_be_bytes());

    let events = codec.process(&raw(0, frame_type::SETTINGS, 0, &payload)).unwrap();
    assert_eq!(
        events,
        vec![H2Event::Settings {
            ack: false,
            settings: vec![
                (settings_id::MAX_CONCURRENT_STREAMS, 100),
                (settings_id::INITIAL_WINDOW_SIZE, 65535),
            ],
        }]
    );
}

#[test]
fn test_settings_ack_parsing() {
    let mut codec = H2Codec::client();
    let events = codec.process(&raw(0, frame_type::SETTINGS, flags::ACK, &[])).unwrap();
    assert_eq!(
        events,
        vec![H2Event::Settings {
            ack: true,
            settings: vec![]
        }]
    );
}

#[test]
fn test_settings_unknown_id_passed_through() {
    let mut codec = H2Codec::client();
    let payload = [0x00, 0xff, 0, 0, 0, 42];
    let events = codec.process(&raw(0, frame_type::SETTINGS, 0, &payload)).unwrap();

    let H2Event::Settings { settings, .. } = &events[0] else {
        panic!("Expected Settings event");
    };
    assert_eq!(settings, &vec![(0xff, 42)]);

    // Applying them leaves known values alone
    let mut applied = Settings::default();
    applied.apply(settings).unwrap();
    assert_eq!(applied, Settings::default());
}

#[test]
fn test_goaway_with_debug_data() {
    let mut codec = H2Codec::client();
    let mut payload = vec![0, 0, 0, 7, 0, 0, 0, 0];
    payload.extend_from_slice(b"maintenance");

    let events = codec.process(&raw(0, frame_type::GOAWAY, 0, &payload)).unwrap();
    match &events[..] {
        [H2Event::GoAway {
            last_stream_id,
            debug_data,
            ..
        }] => {
            assert_eq!(*last_stream_id, 7);
            assert_eq!(debug_data, b"maintenance");
        }
        other => panic!("Expected GoAway event, got {other:?}"),
    }
}
