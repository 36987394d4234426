//! Stream-id rules and bookkeeping of the per-connection stream table

use std::time::Duration;

use h2_wire::{Direction, ErrorCode, FrameType, H2Error, Role, StreamState, StreamTable};

const GRACE: Duration = Duration::from_secs(5);

fn server() -> StreamTable {
    StreamTable::new(Role::Server, true, GRACE)
}

fn client() -> StreamTable {
    StreamTable::new(Role::Client, true, GRACE)
}

#[test]
fn test_role_parity() {
    assert!(Role::Client.initiates(1));
    assert!(!Role::Client.initiates(2));
    assert!(Role::Server.initiates(2));
    assert!(!Role::Server.initiates(0));
    assert_eq!(Role::Client.peer(), Role::Server);
}

#[test]
fn test_server_tracks_a_request() {
    let mut table = server();
    assert_eq!(table.state(1), StreamState::Idle);
    assert!(table.is_empty());

    assert_eq!(table.recv(1, FrameType::Headers, false).unwrap(), StreamState::Open);
    assert_eq!(table.recv(1, FrameType::Data, true).unwrap(), StreamState::HalfClosedRemote);
    assert_eq!(table.active_peer_streams(), 1);

    assert_eq!(table.send(1, FrameType::Headers, true).unwrap(), StreamState::Closed);
    assert_eq!(table.active_peer_streams(), 0);
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(1).map(|s| s.id()), Some(1));
}

#[test]
fn test_ids_skip_forward() {
    let mut table = server();
    table.recv(7, FrameType::Headers, true).unwrap();
    assert_eq!(table.last_peer_stream_id(), 7);

    // Stream 3 was never used and is now implicitly closed
    let err = table.recv(3, FrameType::Headers, true).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::ProtocolError);

    table.recv(9, FrameType::Headers, true).unwrap();
    assert_eq!(table.last_peer_stream_id(), 9);
}

#[test]
fn test_reusing_an_id_is_rejected() {
    let mut table = server();
    table.recv(1, FrameType::Headers, true).unwrap();
    table.send(1, FrameType::Headers, true).unwrap();

    // Once closed, new HEADERS on the stream are a stream error
    let err = table.recv(1, FrameType::Headers, false).unwrap_err();
    assert!(matches!(
        err,
        H2Error::Stream {
            stream_id: 1,
            code: ErrorCode::StreamClosed,
            ..
        }
    ));
}

#[test]
fn test_local_id_rules_are_send_errors() {
    let mut table = client();
    let err = table.send(2, FrameType::Headers, false).unwrap_err();
    assert!(matches!(err, H2Error::InvalidFrame(_)), "{err:?}");

    table.send(5, FrameType::Headers, false).unwrap();
    let err = table.send(3, FrameType::Headers, false).unwrap_err();
    assert!(matches!(err, H2Error::InvalidFrame(_)), "{err:?}");
    assert_eq!(table.next_local_stream_id(), 7);
}

#[test]
fn test_illegal_send_names_the_frame() {
    let mut table = client();
    table.send(1, FrameType::Headers, true).unwrap();
    let err = table.send(1, FrameType::Data, false).unwrap_err();
    match err {
        H2Error::IllegalSend {
            stream_id,
            frame_type,
            state,
        } => {
            assert_eq!(stream_id, 1);
            assert_eq!(frame_type, "DATA");
            assert_eq!(state, StreamState::HalfClosedLocal);
        }
        other => panic!("expected IllegalSend, got {other:?}"),
    }
    // The failed send left the stream alone
    assert_eq!(table.state(1), StreamState::HalfClosedLocal);
}

#[test]
fn test_data_on_idle_stream() {
    let mut table = server();
    let err = table.recv(1, FrameType::Data, false).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_priority_on_idle_streams_is_not_stored() {
    let mut table = server();
    for id in (1..20_000).step_by(2) {
        assert_eq!(table.recv(id, FrameType::Priority, false).unwrap(), StreamState::Idle);
    }
    assert!(table.is_empty());
    assert_eq!(table.last_peer_stream_id(), 0);

    // The ids are still free to open
    table.recv(1, FrameType::Headers, false).unwrap();
    assert_eq!(table.len(), 1);
}

#[test]
fn test_permissive_mode_accepts_any_order() {
    let mut table = StreamTable::new(Role::Client, false, GRACE);
    table.send(4, FrameType::Headers, false).unwrap();
    table.send(2, FrameType::Headers, false).unwrap();
    table.recv(3, FrameType::Headers, false).unwrap();
    table.recv(1, FrameType::Headers, false).unwrap();
    assert_eq!(table.last_peer_stream_id(), 3);
    assert_eq!(table.len(), 4);
}

#[test]
fn test_window_update_grace() {
    let mut table = server();
    table.recv(1, FrameType::Headers, true).unwrap();
    table.send(1, FrameType::RstStream, false).unwrap();
    assert_eq!(table.state(1), StreamState::Closed);

    assert_eq!(table.recv(1, FrameType::WindowUpdate, false).unwrap(), StreamState::Closed);
    assert_eq!(table.recv(1, FrameType::RstStream, false).unwrap(), StreamState::Closed);

    let mut strict = StreamTable::new(Role::Server, true, Duration::ZERO);
    strict.recv(1, FrameType::Headers, true).unwrap();
    strict.send(1, FrameType::RstStream, false).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let err = strict.recv(1, FrameType::WindowUpdate, false).unwrap_err();
    assert!(!err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::StreamClosed);
}

#[test]
fn test_close_after_stream_error() {
    let mut table = server();
    table.recv(1, FrameType::Headers, false).unwrap();
    table.close(1);
    assert_eq!(table.state(1), StreamState::Closed);
    assert_eq!(table.active_peer_streams(), 0);

    // Closing an unknown stream does nothing
    table.close(99);
    assert!(table.get(99).is_none());
}

#[test]
fn test_client_receives_push() {
    let mut table = client();
    table.send(1, FrameType::Headers, true).unwrap();

    assert_eq!(table.recv(1, FrameType::PushPromise, false).unwrap(), StreamState::HalfClosedLocal);
    assert_eq!(table.reserve(2, Direction::Recv).unwrap(), StreamState::ReservedRemote);
    assert_eq!(table.recv(2, FrameType::Headers, false).unwrap(), StreamState::HalfClosedLocal);
    assert_eq!(table.recv(2, FrameType::Data, true).unwrap(), StreamState::Closed);

    // Promised ids follow the same ordering rules
    let err = table.reserve(2, Direction::Recv).unwrap_err();
    assert!(err.is_connection_error());
    let err = table.reserve(3, Direction::Recv).unwrap_err();
    assert!(err.is_connection_error());
}

#[test]
fn test_server_push_ids() {
    let mut table = server();
    table.recv(1, FrameType::Headers, true).unwrap();

    let promised = table.next_local_stream_id();
    assert_eq!(promised, 2);
    table.reserve(promised, Direction::Send).unwrap();
    assert_eq!(table.next_local_stream_id(), 4);
    assert_eq!(table.state(2), StreamState::ReservedLocal);

    // A reserved stream is not an active peer stream
    assert_eq!(table.active_peer_streams(), 0);
}
