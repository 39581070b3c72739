//! End-to-end framing and correlation over real loopback sockets

use codec::{ClientId, Message, ObjectChanged, RequestOption, Response, ResultsQueue, SyncRequest};
use config::SubstrateConfig;
use crossbeam_channel::{unbounded, Receiver, Sender};
use locking::{LockRegistry, OrderedLock, RegistrySettings};
use network::{Connection, ConnectionHandler, TransportError, TransportFactory};
use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

enum Event {
    Connected(Connection),
    Message(Connection, Message),
    Disconnected(String),
}

/// Forwards every callback to a channel the test drains
struct ChannelHandler {
    events: Sender<Event>,
}

impl ConnectionHandler for ChannelHandler {
    fn on_message(&self, connection: &Connection, message: Message) {
        let _ = self.events.send(Event::Message(connection.clone(), message));
    }

    fn on_connect(&self, connection: &Connection) {
        let _ = self.events.send(Event::Connected(connection.clone()));
    }

    fn on_disconnect(&self, connection: &Connection) {
        let _ = self.events.send(Event::Disconnected(connection.name().to_string()));
    }
}

struct Side {
    factory: TransportFactory,
    events: Receiver<Event>,
}

fn side(config: &SubstrateConfig) -> Side {
    let (tx, rx) = unbounded();
    let locks = LockRegistry::new(RegistrySettings::quiet());
    Side {
        factory: TransportFactory::with_lock_registry(ChannelHandler { events: tx }, config, locks),
        events: rx,
    }
}

/// Connected (client, server) pair plus each side's event stream
fn pair() -> (Connection, Side, Connection, Side) {
    pair_with(&SubstrateConfig::default())
}

fn pair_with(config: &SubstrateConfig) -> (Connection, Side, Connection, Side) {
    let server = side(config);
    let client = side(config);
    let listener = server.factory.bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let acceptor = thread::spawn(move || listener.accept().unwrap());
    let client_conn = client.factory.connect(addr).unwrap();
    let server_conn = acceptor.join().unwrap();

    assert!(matches!(next(&client.events), Event::Connected(_)));
    assert!(matches!(next(&server.events), Event::Connected(_)));
    (client_conn, client, server_conn, server)
}

fn next(events: &Receiver<Event>) -> Event {
    events.recv_timeout(WAIT).expect("event within timeout")
}

fn next_message(events: &Receiver<Event>) -> (Connection, Message) {
    match next(events) {
        Event::Message(conn, message) => (conn, message),
        Event::Connected(_) => panic!("unexpected connect"),
        Event::Disconnected(name) => panic!("unexpected disconnect of {}", name),
    }
}

fn question(client: &Connection, prompt: &str) -> SyncRequest {
    let mut request = client.correlator().new_request(prompt);
    request.add_option(RequestOption::new("Yes", 1, true)).unwrap();
    request.add_option(RequestOption::new("No", 2, true)).unwrap();
    request
}

#[test_log::test]
fn plain_messages_reach_the_handler() {
    let (client, _client_side, _server, server_side) = pair();

    client.send(&ClientId::new(7).into()).unwrap();
    let nested = ObjectChanged::new(ClientId::new(1), ClientId::new(2));
    client.send(&nested.clone().into()).unwrap();

    assert_eq!(next_message(&server_side.events).1, Message::from(ClientId::new(7)));
    assert_eq!(next_message(&server_side.events).1, Message::from(nested));

    let stats = client.stats();
    assert_eq!(stats.frames_sent, 2);
    assert!(stats.bytes_sent > 0);
    client.shutdown();
}

#[test_log::test]
fn replies_in_reverse_order_reach_their_own_requesters() {
    let (client, _client_side, _server, server_side) = pair();

    let first = client.request(question(&client, "First?")).unwrap();
    let second = client.request(question(&client, "Second?")).unwrap();
    assert_eq!(client.correlator().pending_count(), 2);

    let (conn_a, Message::SyncRequest(mut req_a)) = next_message(&server_side.events) else {
        panic!("expected a request");
    };
    let (conn_b, Message::SyncRequest(mut req_b)) = next_message(&server_side.events) else {
        panic!("expected a request");
    };
    assert_eq!(req_a.message(), "First?");

    req_b.set_answer_by_id(2).unwrap();
    conn_b.send(&Response::answering(&req_b).into()).unwrap();
    req_a.set_answer_by_id(1).unwrap();
    conn_a.send(&Response::answering(&req_a).into()).unwrap();

    let second_answer = second.wait_timeout(WAIT).unwrap();
    let first_answer = first.wait_timeout(WAIT).unwrap();
    assert_eq!(first_answer.message(), "First?");
    assert_eq!(first_answer.answer_id(), 1);
    assert_eq!(second_answer.message(), "Second?");
    assert_eq!(second_answer.answer_id(), 2);
    assert_eq!(client.correlator().pending_count(), 0);
    client.shutdown();
}

#[test_log::test]
fn echoed_request_completes_and_is_not_handled() {
    let (client, client_side, _server, server_side) = pair();

    let pending = client.request(question(&client, "Echo?")).unwrap();
    let (conn, Message::SyncRequest(mut request)) = next_message(&server_side.events) else {
        panic!("expected a request");
    };
    request.set_custom_answer("typed");
    conn.send(&request.into()).unwrap();

    let answered = pending.wait_timeout(WAIT).unwrap();
    assert_eq!(answered.answer_text(), Some("typed"));
    assert!(client_side
        .events
        .recv_timeout(Duration::from_millis(100))
        .is_err());
    client.shutdown();
}

#[test_log::test]
fn results_queue_collects_several_answers() {
    let (client, _client_side, _server, server_side) = pair();
    let queue = client.correlator().new_results_queue();

    let mut keys = Vec::new();
    for prompt in ["a", "b", "c"] {
        let mut request = question(&client, prompt);
        request.set_results_queue(Some(queue.clone()));
        keys.push(request.sync_key());
        client.send(&request.into()).unwrap();
    }

    for _ in 0..3 {
        let (conn, Message::SyncRequest(mut request)) = next_message(&server_side.events) else {
            panic!("expected a request");
        };
        request.set_answer_by_id(2).unwrap();
        conn.send(&Response::answering(&request).into()).unwrap();
    }

    let mut answered: Vec<i32> = (0..3)
        .map(|_| {
            let request = queue.recv_timeout(WAIT).expect("answer queued");
            assert_eq!(request.answer_id(), 2);
            request.sync_key()
        })
        .collect();
    answered.sort_unstable();
    keys.sort_unstable();
    assert_eq!(answered, keys);
    client.shutdown();
}

#[test_log::test]
fn full_results_queue_does_not_stall_the_receiver() {
    let (client, client_side, server, server_side) = pair();
    let queue = ResultsQueue::bounded(1);

    let mut pending = Vec::new();
    for prompt in ["one", "two"] {
        let mut request = question(&client, prompt);
        request.set_results_queue(Some(queue.clone()));
        pending.push(client.request(request).unwrap());
    }
    for _ in 0..2 {
        let (conn, Message::SyncRequest(mut request)) = next_message(&server_side.events) else {
            panic!("expected a request");
        };
        request.set_answer_by_id(1).unwrap();
        conn.send(&Response::answering(&request).into()).unwrap();
    }

    // Nothing drains the queue, yet later frames still arrive
    server.send(&ClientId::new(8).into()).unwrap();
    assert_eq!(
        next_message(&client_side.events).1,
        Message::from(ClientId::new(8))
    );
    for reply in pending {
        assert_eq!(reply.wait_timeout(WAIT).unwrap().answer_id(), 1);
    }
    assert_eq!(queue.len(), 1);
    client.shutdown();
}

#[test_log::test]
fn late_reply_after_timeout_is_dropped() {
    let (client, client_side, _server, server_side) = pair();

    let request = question(&client, "Slow?");
    let key = request.sync_key();
    let pending = client.request(request).unwrap();
    let (conn, _) = next_message(&server_side.events);

    let err = pending.wait_timeout(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, TransportError::Timeout { .. }));
    assert!(!client.correlator().is_pending(key));

    conn.send(&Response::new(key, 1, "Yes").into()).unwrap();
    assert!(client_side
        .events
        .recv_timeout(Duration::from_millis(100))
        .is_err());
    assert!(pending.try_answer().is_none());
    client.shutdown();
}

#[test_log::test]
fn configured_timeout_bounds_plain_wait() {
    let config =
        SubstrateConfig::from_toml_str("[correlation]\nrequest_timeout_ms = 30\n").unwrap();
    let (client, _client_side, _server, _server_side) = pair_with(&config);

    let pending = client.request(question(&client, "Anyone?")).unwrap();
    let started = Instant::now();
    assert!(matches!(pending.wait(), Err(TransportError::Timeout { .. })));
    assert!(started.elapsed() < WAIT);
    client.shutdown();
}

#[test_log::test]
fn unmatched_response_is_dropped_silently() {
    let (client, client_side, server, _server_side) = pair();

    server.send(&Response::new(-999, 1, "nobody").into()).unwrap();
    server.send(&ClientId::new(5).into()).unwrap();
    // The stray response never reaches the handler
    assert_eq!(
        next_message(&client_side.events).1,
        Message::from(ClientId::new(5))
    );
    assert_eq!(client.stats().frames_received, 2);
    client.shutdown();
}

#[test_log::test]
fn factory_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[network]\ntcp_nodelay = false\n\n[correlation]\nresults_queue_capacity = 2").unwrap();
    let config = SubstrateConfig::load(file.path()).unwrap();
    assert!(!config.network.tcp_nodelay);

    let (client, _client_side, _server, server_side) = pair_with(&config);
    client.send(&ClientId::new(11).into()).unwrap();
    assert_eq!(
        next_message(&server_side.events).1,
        Message::from(ClientId::new(11))
    );
    client.shutdown();
}

#[test_log::test]
fn factory_applies_locking_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Deadlocks.log");
    let mut config = SubstrateConfig::default();
    config.locking.deadlock_log = Some(path.clone());
    config.locking.report_to_stderr = false;

    let (tx, _rx) = unbounded();
    let factory = TransportFactory::new(ChannelHandler { events: tx }, &config);
    let inner = OrderedLock::new_in(factory.lock_registry(), "ConfiguredInner", 1);
    let outer = OrderedLock::new_in(factory.lock_registry(), "ConfiguredOuter", 2);
    {
        let _a = inner.lock();
        let _b = outer.lock();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("order violation"));
    assert!(contents.contains("ConfiguredOuter[2]"));
}

#[test_log::test]
fn answered_requests_cannot_await_replies() {
    let (client, _client_side, _server, _server_side) = pair();
    let mut request = question(&client, "Done?");
    request.set_answer_by_id(1).unwrap();
    let err = client.request(request).unwrap_err();
    assert_eq!(err.category(), "protocol");
    client.shutdown();
}

#[test_log::test]
fn concurrent_senders_never_interleave_frames() {
    let (client, _client_side, _server, server_side) = pair();

    let senders: Vec<_> = (0..4)
        .map(|t| {
            let conn = client.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let mut request = SyncRequest::with_key(t * 1000 + i, "x".repeat(200));
                    request.add_option(RequestOption::new("ok", 1, true)).unwrap();
                    request.set_answer_by_id(1).unwrap();
                    conn.send(&request.into()).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    for _ in 0..200 {
        let (_, message) = next_message(&server_side.events);
        let Message::SyncRequest(request) = message else {
            panic!("frame decoded to the wrong kind");
        };
        assert_eq!(request.message().len(), 200);
    }
    assert_eq!(client.stats().frames_sent, 200);
    client.shutdown();
}

#[test_log::test]
fn shutdown_disconnects_both_sides() {
    let (client, client_side, server, server_side) = pair();

    client.shutdown();
    assert!(!client.is_running());
    assert!(matches!(next(&client_side.events), Event::Disconnected(_)));
    assert!(matches!(next(&server_side.events), Event::Disconnected(_)));
    assert!(!server.is_running());

    let err = client.send(&ClientId::new(1).into()).unwrap_err();
    assert!(err.is_disconnect());
    client.shutdown();
}

#[test_log::test]
fn undecodable_frame_is_skipped() {
    let server = side(&SubstrateConfig::default());
    let listener = server.factory.bind("127.0.0.1:0").unwrap();
    let mut raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let conn = listener.accept().unwrap();
    assert!(matches!(next(&server.events), Event::Connected(_)));

    // Bare ClinID tag, length 6, no body
    raw.write_all(&[0, 0, 0, 6, b'C', b'l', b'i', b'n', b'I', b'D'])
        .unwrap();
    raw.write_all(&[0, 0, 0, 10, b'C', b'l', b'i', b'n', b'I', b'D', 0, 0, 0, 9])
        .unwrap();

    assert_eq!(next_message(&server.events).1, Message::from(ClientId::new(9)));
    assert!(conn.is_running());
    assert_eq!(conn.stats().frames_received, 2);
    conn.shutdown();
}

#[test_log::test]
fn unknown_tag_drops_the_connection() {
    let server = side(&SubstrateConfig::default());
    let listener = server.factory.bind("127.0.0.1:0").unwrap();
    let mut raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let conn = listener.accept().unwrap();
    assert!(matches!(next(&server.events), Event::Connected(_)));

    raw.write_all(&[0, 0, 0, 6, b'B', b'o', b'g', b'u', b's', b'!'])
        .unwrap();
    assert!(matches!(next(&server.events), Event::Disconnected(_)));
    assert!(!conn.is_running());
}

#[test_log::test]
fn deeply_nested_frame_drops_only_that_peer() {
    let server = side(&SubstrateConfig::default());
    let listener = server.factory.bind("127.0.0.1:0").unwrap();
    let mut raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let conn = listener.accept().unwrap();
    assert!(matches!(next(&server.events), Event::Connected(_)));

    let payload = b"ObjInf".repeat(100_000);
    raw.write_all(&(payload.len() as u32).to_be_bytes()).unwrap();
    raw.write_all(&payload).unwrap();

    assert!(matches!(next(&server.events), Event::Disconnected(_)));
    assert!(!conn.is_running());
}

#[test_log::test]
fn oversized_frames_are_refused() {
    let config =
        SubstrateConfig::from_toml_str("[network]\nmax_frame_size = 64\n").unwrap();
    let (client, _client_side, _server, _server_side) = pair_with(&config);

    let big = SyncRequest::with_key(1, "y".repeat(100));
    let err = client.send(&big.into()).unwrap_err();
    assert_eq!(err.category(), "protocol");
    assert!(client.is_running());
    client.shutdown();
}
