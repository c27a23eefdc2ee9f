/*
 * h2_connection.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the HTTP/2 connection: two endpoints wired back to
 * back through in-memory byte sinks, exercising the preface, SETTINGS
 * exchange, header-block assembly, flow control, and error responses.
 *
 * Run with:
 *   cargo test -p telaio --test h2_connection
 */

use bytes::{Bytes, BytesMut};

use telaio::h2::{
    frame::{
        ERROR_CANCEL, ERROR_COMPRESSION_ERROR, ERROR_FLOW_CONTROL_ERROR, ERROR_PROTOCOL_ERROR,
        FLAG_END_HEADERS, FLAG_END_STREAM, SETTINGS_ENABLE_PUSH, SETTINGS_INITIAL_WINDOW_SIZE,
        TYPE_CONTINUATION, TYPE_HEADERS, TYPE_PING,
    },
    Frame, H2Connection, H2ConnectionHandler, H2Parser, SendOutcome, StreamState,
    CONNECTION_PREFACE,
};
use telaio::hpack::Header;

/// Records everything the connection reports and queues outbound bytes for
/// the other endpoint.
#[derive(Default)]
struct Recording {
    out: BytesMut,
    frames: Vec<Frame>,
    settings_acks: usize,
    ping_acks: Vec<u64>,
    goaways: Vec<(u32, u32, Bytes)>,
}

impl H2ConnectionHandler for Recording {
    fn send_bytes(&mut self, bytes: Bytes) {
        self.out.extend_from_slice(&bytes);
    }
    fn frame_received(&mut self, frame: &Frame) {
        self.frames.push(frame.clone());
    }
    fn settings_ack_received(&mut self) {
        self.settings_acks += 1;
    }
    fn ping_ack_received(&mut self, opaque_data: u64) {
        self.ping_acks.push(opaque_data);
    }
    fn goaway_received(&mut self, last_stream_id: u32, error_code: u32, debug_data: &Bytes) {
        self.goaways
            .push((last_stream_id, error_code, debug_data.clone()));
    }
}

impl Recording {
    fn take_out(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    fn headers_frames(&self) -> Vec<&Frame> {
        self.frames
            .iter()
            .filter(|f| matches!(f, Frame::Headers { .. }))
            .collect()
    }

    fn data_frames(&self) -> Vec<&Frame> {
        self.frames
            .iter()
            .filter(|f| matches!(f, Frame::Data { .. }))
            .collect()
    }
}

/// Shuttle pending bytes both ways until neither side has output.
fn exchange(
    a: &mut H2Connection,
    a_rec: &mut Recording,
    b: &mut H2Connection,
    b_rec: &mut Recording,
) {
    loop {
        let a_to_b = a_rec.take_out();
        if !a_to_b.is_empty() {
            b.process_incoming_data(&a_to_b, b_rec).unwrap();
        }
        let b_to_a = b_rec.take_out();
        if !b_to_a.is_empty() {
            a.process_incoming_data(&b_to_a, a_rec).unwrap();
        }
        if a_rec.out.is_empty() && b_rec.out.is_empty() {
            break;
        }
    }
}

/// Preface + SETTINGS both ways, ACKs exchanged.
fn handshake() -> (H2Connection, Recording, H2Connection, Recording) {
    let mut client = H2Connection::client();
    let mut server = H2Connection::server();
    let mut client_rec = Recording::default();
    let mut server_rec = Recording::default();
    client.send_preface(&mut client_rec).unwrap();
    client.send_settings(&[], &mut client_rec).unwrap();
    server.send_settings(&[], &mut server_rec).unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);
    assert_eq!(client_rec.settings_acks, 1);
    assert_eq!(server_rec.settings_acks, 1);
    client_rec.frames.clear();
    server_rec.frames.clear();
    (client, client_rec, server, server_rec)
}

fn request_headers() -> Vec<Header> {
    vec![
        Header::new(":method", "GET"),
        Header::new(":scheme", "https"),
        Header::new(":path", "/"),
        Header::new(":authority", "example.com"),
    ]
}

/// Collect the frames present in a raw outbound byte run.
fn parse_wire(bytes: &[u8]) -> Vec<Frame> {
    let parser = H2Parser::new();
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();
    while let Some(frame) = parser.next_frame(&mut buf).unwrap() {
        frames.push(frame);
    }
    assert!(buf.is_empty());
    frames
}

/// Wire scenario: a single-byte indexed HEADERS frame,
/// `00 00 01 01 05 00 00 00 05 82`.
#[test]
fn static_table_indexed_get() {
    let mut server = H2Connection::server();
    let mut rec = Recording::default();
    let mut wire = CONNECTION_PREFACE.to_vec();
    wire.extend_from_slice(&[0, 0, 1, TYPE_HEADERS, FLAG_END_STREAM | FLAG_END_HEADERS, 0, 0, 0, 5, 0x82]);
    server.process_incoming_data(&wire, &mut rec).unwrap();

    assert_eq!(rec.frames.len(), 1);
    match &rec.frames[0] {
        Frame::Headers {
            stream_id,
            end_stream,
            end_headers,
            headers,
            ..
        } => {
            assert_eq!(*stream_id, 5);
            assert!(end_stream);
            assert!(end_headers);
            assert_eq!(headers, &vec![Header::new(":method", "GET")]);
        }
        other => panic!("expected Headers, got {:?}", other),
    }
    assert_eq!(server.stream_state(5), StreamState::HalfClosedRemote);
}

/// Wire scenario: HEADERS without END_HEADERS followed by CONTINUATION;
/// exactly one logical event carrying the assembled list.
#[test]
fn continuation_reassembly() {
    let mut server = H2Connection::server();
    let mut rec = Recording::default();
    let mut wire = CONNECTION_PREFACE.to_vec();
    wire.extend_from_slice(&[0, 0, 1, TYPE_HEADERS, 0, 0, 0, 0, 1, 0x82]);
    server.process_incoming_data(&wire, &mut rec).unwrap();
    assert!(rec.frames.is_empty(), "no event until END_HEADERS");

    let cont = [0, 0, 1, TYPE_CONTINUATION, FLAG_END_HEADERS, 0, 0, 0, 1, 0x84];
    server.process_incoming_data(&cont, &mut rec).unwrap();
    assert_eq!(rec.frames.len(), 1);
    match &rec.frames[0] {
        Frame::Headers {
            stream_id,
            end_headers,
            headers,
            ..
        } => {
            assert_eq!(*stream_id, 1);
            assert!(end_headers);
            assert_eq!(
                headers,
                &vec![Header::new(":method", "GET"), Header::new(":path", "/")]
            );
        }
        other => panic!("expected Headers, got {:?}", other),
    }
    assert_eq!(server.stream_state(1), StreamState::Open);
}

/// A frame other than CONTINUATION inside an open header block kills the
/// connection, as does CONTINUATION for the wrong stream.
#[test]
fn continuation_on_wrong_stream_is_fatal() {
    let mut server = H2Connection::server();
    let mut rec = Recording::default();
    let mut wire = CONNECTION_PREFACE.to_vec();
    wire.extend_from_slice(&[0, 0, 1, TYPE_HEADERS, 0, 0, 0, 0, 1, 0x82]);
    // CONTINUATION for stream 3 while stream 1's block is open.
    wire.extend_from_slice(&[0, 0, 1, TYPE_CONTINUATION, FLAG_END_HEADERS, 0, 0, 0, 3, 0x84]);
    let err = server.process_incoming_data(&wire, &mut rec).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    let frames = parse_wire(&rec.take_out());
    assert!(matches!(
        frames.last(),
        Some(Frame::GoAway {
            error_code: ERROR_PROTOCOL_ERROR,
            ..
        })
    ));
}

#[test]
fn unexpected_continuation_is_fatal() {
    let mut server = H2Connection::server();
    let mut rec = Recording::default();
    let mut wire = CONNECTION_PREFACE.to_vec();
    wire.extend_from_slice(&[0, 0, 1, TYPE_CONTINUATION, FLAG_END_HEADERS, 0, 0, 0, 1, 0x82]);
    assert!(server.process_incoming_data(&wire, &mut rec).is_err());
}

/// Wire scenario: PING is answered with an identical-opaque ACK inside the
/// same process call.
#[test]
fn ping_is_echoed() {
    let mut server = H2Connection::server();
    let mut rec = Recording::default();
    let mut wire = CONNECTION_PREFACE.to_vec();
    wire.extend_from_slice(&[0, 0, 8, TYPE_PING, 0, 0, 0, 0, 0]);
    wire.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    server.process_incoming_data(&wire, &mut rec).unwrap();

    let out = rec.take_out();
    assert_eq!(out.len(), 17);
    assert_eq!(out[3], TYPE_PING);
    assert_eq!(out[4], 0x1, "ACK flag");
    assert_eq!(&out[9..], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
}

/// Wire scenario: an HPACK reference beyond the tables produces GOAWAY with
/// COMPRESSION_ERROR and the last successfully processed stream ID.
#[test]
fn hpack_failure_produces_goaway() {
    let mut server = H2Connection::server();
    let mut rec = Recording::default();

    // One good request on stream 1 first.
    let mut wire = CONNECTION_PREFACE.to_vec();
    wire.extend_from_slice(&[0, 0, 1, TYPE_HEADERS, FLAG_END_STREAM | FLAG_END_HEADERS, 0, 0, 0, 1, 0x82]);
    server.process_incoming_data(&wire, &mut rec).unwrap();

    // Then a HEADERS whose block references index 99.
    let bad = [0, 0, 1, TYPE_HEADERS, FLAG_END_STREAM | FLAG_END_HEADERS, 0, 0, 0, 3, 0x80 | 99];
    let err = server.process_incoming_data(&bad, &mut rec).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

    let frames = parse_wire(&rec.take_out());
    match frames.last() {
        Some(Frame::GoAway {
            last_stream_id,
            error_code,
            ..
        }) => {
            assert_eq!(*error_code, ERROR_COMPRESSION_ERROR);
            assert_eq!(*last_stream_id, 1, "stream 3 never completed");
        }
        other => panic!("expected GoAway, got {:?}", other),
    }
    // The connection refuses further input.
    assert!(server.process_incoming_data(&[0; 9], &mut rec).is_err());
}

/// Full request/response conversation across two endpoints.
#[test]
fn request_response_conversation() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    client
        .send_headers(1, &request_headers(), true, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    let headers = server_rec.headers_frames();
    assert_eq!(headers.len(), 1);
    match headers[0] {
        Frame::Headers {
            stream_id,
            end_stream,
            headers,
            ..
        } => {
            assert_eq!(*stream_id, 1);
            assert!(end_stream);
            assert_eq!(headers, &request_headers());
        }
        _ => unreachable!(),
    }
    assert_eq!(server.stream_state(1), StreamState::HalfClosedRemote);
    assert_eq!(client.stream_state(1), StreamState::HalfClosedLocal);

    server
        .send_headers(
            1,
            &[
                Header::new(":status", "200"),
                Header::new("content-type", "text/plain"),
            ],
            false,
            None,
            None,
            &mut server_rec,
        )
        .unwrap();
    server
        .send_data(1, b"Hello!", true, &mut server_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    assert_eq!(client_rec.headers_frames().len(), 1);
    let data = client_rec.data_frames();
    assert_eq!(data.len(), 1);
    match data[0] {
        Frame::Data {
            data, end_stream, ..
        } => {
            assert_eq!(&data[..], b"Hello!");
            assert!(end_stream);
        }
        _ => unreachable!(),
    }
    // Both half-closures resolved: the stream is fully closed on both ends.
    assert_eq!(client.stream_state(1), StreamState::Closed);
    assert_eq!(server.stream_state(1), StreamState::Closed);
}

/// send_data segments to the peer's MAX_FRAME_SIZE with END_STREAM on the
/// final frame only, and the payloads concatenate to the input.
#[test]
fn send_data_segments_to_max_frame_size() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    client
        .send_headers(1, &request_headers(), false, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);
    server_rec.frames.clear();

    let body: Vec<u8> = (0..40000u32).map(|i| i as u8).collect();
    let outcome = client
        .send_data(1, &body, true, &mut client_rec)
        .unwrap();
    assert_eq!(outcome, SendOutcome::Complete);

    let frames = parse_wire(&client_rec.take_out());
    let sizes: Vec<usize> = frames
        .iter()
        .map(|f| match f {
            Frame::Data { data, .. } => data.len(),
            other => panic!("expected only DATA frames, got {:?}", other),
        })
        .collect();
    assert_eq!(sizes, vec![16384, 16384, 7232]);
    let end_flags: Vec<bool> = frames
        .iter()
        .map(|f| match f {
            Frame::Data { end_stream, .. } => *end_stream,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(end_flags, vec![false, false, true]);
    assert_eq!(client.stream_state(1), StreamState::HalfClosedLocal);

    let concatenated: Vec<u8> = frames
        .iter()
        .flat_map(|f| match f {
            Frame::Data { data, .. } => data.to_vec(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(concatenated, body);
}

/// Exhausting the 65535-byte windows blocks send_data; WINDOW_UPDATE frees
/// it again.
#[test]
fn send_data_blocks_and_resumes_on_window_update() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    client
        .send_headers(1, &request_headers(), false, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    let chunk = vec![0u8; 65535];
    assert_eq!(
        client.send_data(1, &chunk, false, &mut client_rec).unwrap(),
        SendOutcome::Complete
    );
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    // Windows are dry on the client side now.
    assert_eq!(
        client.send_data(1, b"x", false, &mut client_rec).unwrap(),
        SendOutcome::Blocked { consumed: 0 }
    );

    // The server grants room on the stream and the connection.
    server.send_window_update(1, 1024, &mut server_rec).unwrap();
    server.send_window_update(0, 1024, &mut server_rec).unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    assert_eq!(
        client
            .send_data(1, &vec![1u8; 1024], true, &mut client_rec)
            .unwrap(),
        SendOutcome::Complete
    );
}

/// A SETTINGS_INITIAL_WINDOW_SIZE change retroactively adjusts open streams'
/// send windows.
#[test]
fn initial_window_size_change_is_retroactive() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    client
        .send_headers(1, &request_headers(), false, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    server
        .send_settings(&[(SETTINGS_INITIAL_WINDOW_SIZE, 100)], &mut server_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    // The client's stream window shrank from 65535 to 100.
    let outcome = client
        .send_data(1, &vec![0u8; 200], false, &mut client_rec)
        .unwrap();
    assert_eq!(outcome, SendOutcome::Blocked { consumed: 100 });
}

/// DATA beyond the advertised receive window is a connection error.
#[test]
fn data_overflowing_recv_window_is_fatal() {
    let mut client = H2Connection::client();
    let mut server = H2Connection::server();
    let mut client_rec = Recording::default();
    let mut server_rec = Recording::default();
    // The server shrinks its per-stream receive allowance before anything
    // opens; the client never learns of it.
    server.set_local_setting(SETTINGS_INITIAL_WINDOW_SIZE, 10).unwrap();
    client.send_preface(&mut client_rec).unwrap();
    let preface = client_rec.take_out();
    server.process_incoming_data(&preface, &mut server_rec).unwrap();

    client
        .send_headers(1, &request_headers(), false, None, None, &mut client_rec)
        .unwrap();
    let headers = client_rec.take_out();
    server.process_incoming_data(&headers, &mut server_rec).unwrap();

    client
        .send_data(1, &[0u8; 11], false, &mut client_rec)
        .unwrap();
    let data = client_rec.take_out();
    let err = server.process_incoming_data(&data, &mut server_rec).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    let frames = parse_wire(&server_rec.take_out());
    assert!(matches!(
        frames.last(),
        Some(Frame::GoAway {
            error_code: ERROR_FLOW_CONTROL_ERROR,
            ..
        })
    ));
}

/// Trailers without END_STREAM get the stream reset.
#[test]
fn trailers_without_end_stream_are_reset() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    client
        .send_headers(1, &request_headers(), false, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    // Second HEADERS on the open stream without END_STREAM.
    client
        .send_headers(
            1,
            &[Header::new("x-trailer", "1")],
            false,
            None,
            None,
            &mut client_rec,
        )
        .unwrap();
    let wire = client_rec.take_out();
    server.process_incoming_data(&wire, &mut server_rec).unwrap();

    let frames = parse_wire(&server_rec.take_out());
    assert!(matches!(
        frames.last(),
        Some(Frame::RstStream {
            stream_id: 1,
            error_code: ERROR_PROTOCOL_ERROR,
        })
    ));
    assert_eq!(server.stream_state(1), StreamState::Closed);
}

/// RST_STREAM on an idle stream is a connection error; on a closed stream it
/// is ignored.
#[test]
fn rst_stream_idle_and_closed_handling() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    // Closed: run a full request, then reset it from the client.
    client
        .send_headers(1, &request_headers(), true, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);
    server
        .send_headers(1, &[Header::new(":status", "200")], true, None, None, &mut server_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);
    assert_eq!(server.stream_state(1), StreamState::Closed);

    // A late RST_STREAM for the closed stream is tolerated.
    let mut w = telaio::h2::H2Writer::new();
    w.write_rst_stream(1, ERROR_CANCEL).unwrap();
    server.process_incoming_data(&w.take_buffer(), &mut server_rec).unwrap();

    // Idle: an RST for a stream the client never opened is fatal.
    let mut w = telaio::h2::H2Writer::new();
    w.write_rst_stream(99, ERROR_CANCEL).unwrap();
    let err = server
        .process_incoming_data(&w.take_buffer(), &mut server_rec)
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

/// Server push: promise, reserved states on both sides, pushed response.
#[test]
fn push_promise_lifecycle() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    client
        .send_headers(1, &request_headers(), true, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    let push_headers = vec![
        Header::new(":method", "GET"),
        Header::new(":scheme", "https"),
        Header::new(":path", "/style.css"),
        Header::new(":authority", "example.com"),
    ];
    server
        .send_push_promise(1, 2, &push_headers, None, &mut server_rec)
        .unwrap();
    assert_eq!(server.stream_state(2), StreamState::ReservedLocal);
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);
    assert_eq!(client.stream_state(2), StreamState::ReservedRemote);

    let promise = client_rec
        .frames
        .iter()
        .find(|f| matches!(f, Frame::PushPromise { .. }))
        .expect("client saw the promise");
    match promise {
        Frame::PushPromise {
            stream_id,
            promised_stream_id,
            headers,
            ..
        } => {
            assert_eq!(*stream_id, 1);
            assert_eq!(*promised_stream_id, 2);
            assert_eq!(headers, &push_headers);
        }
        _ => unreachable!(),
    }

    // The pushed response itself.
    server
        .send_headers(2, &[Header::new(":status", "200")], false, None, None, &mut server_rec)
        .unwrap();
    assert_eq!(server.stream_state(2), StreamState::HalfClosedRemote);
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);
    assert_eq!(client.stream_state(2), StreamState::HalfClosedLocal);

    server.send_data(2, b"body", true, &mut server_rec).unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);
    assert_eq!(client.stream_state(2), StreamState::Closed);
}

/// ENABLE_PUSH = 0 forbids pushing in both directions of the exchange.
#[test]
fn push_disabled_by_settings() {
    let mut client = H2Connection::client();
    let mut server = H2Connection::server();
    let mut client_rec = Recording::default();
    let mut server_rec = Recording::default();
    client.send_preface(&mut client_rec).unwrap();
    client
        .send_settings(&[(SETTINGS_ENABLE_PUSH, 0)], &mut client_rec)
        .unwrap();
    server.send_settings(&[], &mut server_rec).unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    client
        .send_headers(1, &request_headers(), true, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    let err = server
        .send_push_promise(1, 2, &request_headers(), None, &mut server_rec)
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

/// GOAWAY: the peer's last-stream mark is surfaced and new local opens are
/// refused.
#[test]
fn goaway_stops_new_streams() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    client
        .send_headers(1, &request_headers(), true, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    server
        .send_goaway(0, b"maintenance", &mut server_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    assert!(client.is_going_away());
    assert_eq!(client_rec.goaways.len(), 1);
    let (last_stream_id, error_code, debug) = &client_rec.goaways[0];
    assert_eq!(*last_stream_id, 1);
    assert_eq!(*error_code, 0);
    assert_eq!(&debug[..], b"maintenance");

    let err = client
        .send_headers(3, &request_headers(), true, None, None, &mut client_rec)
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}

/// Oversized header blocks are split into CONTINUATIONs on the sending side
/// and reassembled into a single logical event on the receiving side.
#[test]
fn large_header_block_roundtrip() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    let mut headers = request_headers();
    // Roughly 22 KiB even after Huffman coding: too big for one frame.
    let big_value: String = "abcdefghijklmnopqrstuvwxyz0123456789-"
        .chars()
        .cycle()
        .take(30000)
        .collect();
    headers.push(Header::new("x-big", big_value));

    client
        .send_headers(1, &headers, true, None, None, &mut client_rec)
        .unwrap();
    let wire = client_rec.take_out();
    let frames = parse_wire(&wire);
    assert!(
        frames.len() >= 2,
        "expected HEADERS + CONTINUATION, got {} frames",
        frames.len()
    );
    assert!(matches!(
        frames[0],
        Frame::Headers {
            end_headers: false,
            ..
        }
    ));
    assert!(matches!(
        frames.last().unwrap(),
        Frame::Continuation {
            end_headers: true,
            ..
        }
    ));

    server.process_incoming_data(&wire, &mut server_rec).unwrap();
    let received = server_rec.headers_frames();
    assert_eq!(received.len(), 1, "one logical headers event");
    match received[0] {
        Frame::Headers { headers: list, .. } => assert_eq!(list, &headers),
        _ => unreachable!(),
    }
}

/// WINDOW_UPDATE pushing a stream window past 2^31-1 resets the stream;
/// on the connection it is fatal.
#[test]
fn window_update_overflow_scoping() {
    let (mut client, mut client_rec, mut server, mut server_rec) = handshake();

    client
        .send_headers(1, &request_headers(), false, None, None, &mut client_rec)
        .unwrap();
    exchange(&mut client, &mut client_rec, &mut server, &mut server_rec);

    // Stream-scoped overflow: two maximal increments.
    let mut w = telaio::h2::H2Writer::new();
    w.write_window_update(1, 0x7fff_ffff).unwrap();
    server.process_incoming_data(&w.take_buffer(), &mut server_rec).unwrap();
    let frames = parse_wire(&server_rec.take_out());
    assert!(matches!(
        frames.last(),
        Some(Frame::RstStream {
            stream_id: 1,
            error_code: ERROR_FLOW_CONTROL_ERROR,
        })
    ));

    // Connection-scoped overflow is fatal.
    let mut w = telaio::h2::H2Writer::new();
    w.write_window_update(0, 0x7fff_ffff).unwrap();
    let err = server
        .process_incoming_data(&w.take_buffer(), &mut server_rec)
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    let frames = parse_wire(&server_rec.take_out());
    assert!(matches!(
        frames.last(),
        Some(Frame::GoAway {
            error_code: ERROR_FLOW_CONTROL_ERROR,
            ..
        })
    ));
}
