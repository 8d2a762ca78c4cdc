use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use relay_bridge::{BridgeError, ConnectError, FunnelError};
use relay_config::Config;
use similar_asserts::assert_eq;

const INPUT: &str = "counts.times_occurred|20.000000|1391189888\n\
                     timers.event.p95|1.899065|1391189890\n\
                     gauges.number|200.000000|1391189899\n\
                     sets.mappings|4|1391189900\n\
                     hoopie.froods|1|1391189900\n";

/// What the fake collector observed during one connection.
struct Received {
    handshake: Vec<String>,
    data: String,
}

/// Accepts a single connection, reads the two handshake lines, sends `response` and then reads
/// everything until the client closes the connection.
fn collector(response: &'static [u8]) -> (u16, mpsc::Receiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        let mut handshake = Vec::new();
        for _ in 0..2 {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            handshake.push(line);
        }

        writer.write_all(response).unwrap();

        let mut data = String::new();
        reader.read_to_string(&mut data).ok();
        tx.send(Received { handshake, data }).ok();
    });

    (port, rx)
}

fn feedback_receiver() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

fn recv_line(socket: &UdpSocket) -> String {
    let mut buf = [0; 512];
    let len = socket.recv(&mut buf).unwrap();
    String::from_utf8(buf[..len].to_vec()).unwrap()
}

fn config(port: u16, feedback_port: u16, timeout: &str) -> Config {
    Config::from_json_value(serde_json::json!({
        "upstream": {
            "host": "127.0.0.1",
            "port": port,
            "token": "secret",
            "timeout": timeout,
        },
        "keys": {"prefix": "app."},
        "feedback": {"host": "127.0.0.1", "port": feedback_port},
    }))
    .unwrap()
}

#[test]
fn test_forward_to_collector() {
    relay_log::init_test!();

    let (port, received) = collector(b"ok\nok\n");
    let (feedback, feedback_port) = feedback_receiver();
    let config = config(port, feedback_port, "10s");

    let report = relay_bridge::run(&config, INPUT.as_bytes()).unwrap();
    assert_eq!(report.forwarded, 4);
    assert_eq!(report.dropped, 1);

    let received = received.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(
        received.handshake,
        ["hello version 1.0\n", "authenticate secret\n"]
    );
    assert_eq!(
        received.data,
        "increment app.times_occurred 20.000000 1391189888\n\
         gauge app.event.p95 1.899065 1391189890\n\
         gauge app.number 200.000000 1391189899\n\
         gauge_absolute app.mappings 4 1391189900\n"
    );

    assert_eq!(recv_line(&feedback), "event.p95:1.899065|g\n");
    assert_eq!(recv_line(&feedback), "number:200.000000|g\n");
}

#[test]
fn test_authentication_failed() {
    let (port, received) = collector(b"ok\nfail\n");
    let config = config(port, 0, "10s");

    let error = relay_bridge::run(&config, INPUT.as_bytes()).unwrap_err();
    assert!(error.is_authentication_failure());
    assert!(matches!(
        error,
        BridgeError::Connect(ConnectError::AuthenticationFailed)
    ));

    // No data is sent after a declined handshake.
    let received = received.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(received.data, "");
}

#[test]
fn test_connection_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = config(port, 0, "2s");

    let error = relay_bridge::run(&config, INPUT.as_bytes()).unwrap_err();
    assert!(!error.is_authentication_failure());
    assert!(matches!(error, BridgeError::Connect(ConnectError::Dial(_))));
}

#[test]
fn test_handshake_deadline() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    // Accept the connection but never respond.
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).ok();
    });

    let config = config(port, 0, "200ms");
    let error = relay_bridge::run(&config, INPUT.as_bytes()).unwrap_err();

    match error {
        BridgeError::Connect(ConnectError::Response(error)) => {
            assert_eq!(error.kind(), std::io::ErrorKind::TimedOut);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    handle.join().unwrap();
}

/// Yields one line per read and stalls before every line after the first.
struct SlowInput {
    lines: Vec<&'static [u8]>,
    delay: Duration,
    started: bool,
}

impl Read for SlowInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.lines.is_empty() {
            return Ok(0);
        }

        if self.started {
            thread::sleep(self.delay);
        }
        self.started = true;

        let line = self.lines.remove(0);
        let len = line.len().min(buf.len());
        buf[..len].copy_from_slice(&line[..len]);
        Ok(len)
    }
}

#[test]
fn test_streaming_deadline() {
    let (port, received) = collector(b"ok\nok\n");
    let config = config(port, 0, "300ms");

    let input = SlowInput {
        lines: vec![
            &b"gauges.first|1|1391189899\n"[..],
            &b"gauges.second|2|1391189899\n"[..],
        ],
        delay: Duration::from_millis(600),
        started: false,
    };

    let start = Instant::now();
    let error = relay_bridge::run(&config, BufReader::new(input)).unwrap_err();

    match error {
        BridgeError::Funnel(FunnelError::Write(error)) => {
            assert_eq!(error.kind(), io::ErrorKind::TimedOut);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(start.elapsed() >= Duration::from_millis(600));

    // Records written before the deadline still reach the collector.
    let received = received.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(received.data, "gauge app.first 1 1391189899\n");
}

#[test]
fn test_feedback_after_read_error() {
    let (port, received) = collector(b"ok\nok\n");
    let (feedback, feedback_port) = feedback_receiver();
    let mut config = config(port, feedback_port, "10s");
    config
        .apply_override(relay_config::OverridableConfig {
            prefix: Some(String::new()),
            ..Default::default()
        })
        .unwrap();

    let input = format!("gauges.number|200|1391189899\ngauges.{}|1|1\n", "x".repeat(70_000));
    let error = relay_bridge::run(&config, input.as_bytes()).unwrap_err();
    assert!(matches!(error, BridgeError::Funnel(FunnelError::LineTooLong(_))));

    let received = received.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(received.data, "gauge number 200 1391189899\n");
    assert_eq!(recv_line(&feedback), "number:200|g\n");
}
