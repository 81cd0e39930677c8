//! Integration tests: scripted HTTP/1.1 servers over real TCP connections.
//!
//! Each test binds a listener, scripts the server side on a thread with
//! plain std sockets, and drives the client against it.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use fetchline::{Client, Config, Error};

// ── Helpers ─────────────────────────────────────────────────────────

fn test_config(max_per_host: usize, queue_depth: usize) -> Config {
    Client::options()
        .threads(1)
        .max_connections_per_host(max_per_host)
        .pending_queue_depth(queue_depth)
        .build()
        .unwrap()
}

/// Read one full HTTP request (headers plus Content-Length body) from the
/// stream.
fn read_request(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).expect("read request");
        assert!(n > 0, "client closed mid-request");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).expect("read body");
        assert!(n > 0, "client closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf[..header_end + content_length]).to_string()
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let message = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(message.as_bytes()).unwrap();
    stream.flush().unwrap();
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

// ── Basic request/response ──────────────────────────────────────────

#[test]
fn simple_get() {
    let (listener, port) = bind();
    let (captured_tx, captured_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        captured_tx.send(request).unwrap();
        respond(&mut stream, "200 OK", "hi");
    });

    let client = Client::init(test_config(1, 8)).unwrap();
    let response = client
        .get(&format!("http://127.0.0.1:{port}/hello"))
        .header("User-Agent", "custom/1")
        .send()
        .wait()
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.body().as_ref(), b"hi");

    let request = captured_rx.recv().unwrap();
    assert!(request.starts_with("GET /hello HTTP/1.1\r\n"));
    assert!(request.contains(&format!("Host: 127.0.0.1:{port}\r\n")));
    assert!(request.contains("User-Agent: fetchline/0.1\r\n"));
    assert!(!request.contains("custom/1"));
    assert!(!request.contains("Content-Length"));

    server.join().unwrap();
}

#[test]
fn post_sends_body() {
    let (listener, port) = bind();
    let (captured_tx, captured_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        captured_tx.send(request).unwrap();
        respond(&mut stream, "201 Created", "");
    });

    let client = Client::init(test_config(1, 8)).unwrap();
    let response = client
        .post(&format!("http://127.0.0.1:{port}/p"))
        .body("abc")
        .send()
        .wait()
        .unwrap();

    assert_eq!(response.status(), 201);

    let request = captured_rx.recv().unwrap();
    assert!(request.starts_with("POST /p HTTP/1.1\r\n"));
    assert!(request.contains("Content-Length: 3\r\n"));
    assert!(request.ends_with("\r\n\r\nabc"));

    server.join().unwrap();
}

#[test]
fn params_and_cookies_on_the_wire() {
    let (listener, port) = bind();
    let (captured_tx, captured_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        captured_tx.send(request).unwrap();
        respond(&mut stream, "200 OK", "");
    });

    let client = Client::init(test_config(1, 8)).unwrap();
    client
        .get(&format!("http://127.0.0.1:{port}/q"))
        .param("x", "1")
        .param("y", "2")
        .cookie("a", "1")
        .cookie("b", "2")
        .send()
        .wait()
        .unwrap();

    let request = captured_rx.recv().unwrap();
    assert!(request.starts_with("GET /q?x=1&y=2 HTTP/1.1\r\n"));
    assert!(request.contains("Cookie: a=1; b=2\r\n"));
    assert_eq!(request.matches("Cookie:").count(), 1);

    server.join().unwrap();
}

// ── Pooling and pending queues ──────────────────────────────────────

#[test]
fn pending_request_drains_after_release() {
    let (listener, port) = bind();

    let server = thread::spawn(move || {
        // One connection services both requests back to back.
        let (mut stream, _) = listener.accept().unwrap();
        for body in ["one", "two"] {
            let request = read_request(&mut stream);
            assert!(request.starts_with("GET /"));
            thread::sleep(Duration::from_millis(50));
            respond(&mut stream, "200 OK", body);
        }
    });

    let client = Client::init(test_config(1, 8)).unwrap();
    let host = format!("http://127.0.0.1:{port}");
    let first = client.get(&format!("{host}/a")).send();
    let second = client.get(&format!("{host}/b")).send();

    let second_response = second.wait().unwrap();
    assert_eq!(second_response.body().as_ref(), b"two");

    // By the time the queued request resolved, the first must have already
    // completed and released the connection.
    let first_result = first
        .wait_timeout(Duration::ZERO)
        .expect("first request still pending after second resolved");
    assert_eq!(first_result.unwrap().body().as_ref(), b"one");

    // The release callback runs just after the completion settles; give it
    // a moment.
    let host_key = format!("127.0.0.1:{port}");
    for _ in 0..100 {
        if client.idle_connections(&host_key) == 1 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(client.idle_connections(&host_key), 1);

    server.join().unwrap();
}

#[test]
fn queue_full_rejects_synchronously() {
    let (listener, port) = bind();

    let server = thread::spawn(move || {
        // Accept and hang: never read, never respond.
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    let mut client = Client::init(test_config(1, 1)).unwrap();
    let host = format!("http://127.0.0.1:{port}");
    let first = client.get(&format!("{host}/1")).send();
    let second = client.get(&format!("{host}/2")).send();

    let started = Instant::now();
    let third = client.get(&format!("{host}/3")).send();
    let third_result = third.wait();
    assert!(matches!(third_result, Err(Error::QueueFull)));
    assert!(started.elapsed() < Duration::from_millis(100));

    client.shutdown();
    drop(client);
    assert!(matches!(first.wait(), Err(_)));
    assert!(matches!(second.wait(), Err(Error::Canceled)));

    server.join().unwrap();
}

// ── Timeouts ────────────────────────────────────────────────────────

#[test]
fn timeout_rejects_and_connection_recovers() {
    let (listener, port) = bind();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // Swallow the first request without responding; answer the second.
        let _ = read_request(&mut stream);
        let _ = read_request(&mut stream);
        respond(&mut stream, "200 OK", "ok");
    });

    let client = Client::init(test_config(1, 8)).unwrap();
    let host = format!("http://127.0.0.1:{port}");

    let started = Instant::now();
    let result = client
        .get(&format!("{host}/slow"))
        .timeout(Duration::from_millis(10))
        .send()
        .wait();
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(Error::Timeout)));
    assert!(elapsed >= Duration::from_millis(5), "fired too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "fired too late: {elapsed:?}");

    // The connection was released and stays usable.
    let response = client.get(&format!("{host}/after")).send().wait().unwrap();
    assert_eq!(response.body().as_ref(), b"ok");

    server.join().unwrap();
}

// ── Peer close ──────────────────────────────────────────────────────

#[test]
fn peer_close_rejects_in_flight_and_reconnects() {
    let (listener, port) = bind();

    let server = thread::spawn(move || {
        // First connection: accept and close immediately.
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
        // Second connection: behave.
        let (mut stream, _) = listener.accept().unwrap();
        let _ = read_request(&mut stream);
        respond(&mut stream, "200 OK", "back");
    });

    let client = Client::init(test_config(1, 8)).unwrap();
    let host = format!("http://127.0.0.1:{port}");

    let result = client.get(&format!("{host}/x")).send().wait();
    assert!(
        matches!(
            result,
            Err(Error::PeerClosed) | Err(Error::Send(_)) | Err(Error::Recv(_)) | Err(Error::Connect(_))
        ),
        "unexpected result: {result:?}"
    );

    // Give the worker a moment to finish tearing down the dead socket,
    // then the slot reconnects on the next lease.
    thread::sleep(Duration::from_millis(50));
    let response = client.get(&format!("{host}/y")).send().wait().unwrap();
    assert_eq!(response.body().as_ref(), b"back");

    server.join().unwrap();
}

// ── Connect failures ────────────────────────────────────────────────

#[test]
fn connection_refused_rejects() {
    // Bind then drop to find a port with no listener.
    let (listener, port) = bind();
    drop(listener);

    let client = Client::init(test_config(1, 8)).unwrap();
    let result = client
        .get(&format!("http://127.0.0.1:{port}/nope"))
        .send()
        .wait();
    assert!(matches!(result, Err(Error::Connect(_))), "got {result:?}");

    // The slot is released and a later submission fails the same way
    // rather than hanging.
    let again = client
        .get(&format!("http://127.0.0.1:{port}/still"))
        .send()
        .wait();
    assert!(matches!(again, Err(Error::Connect(_))));
}

#[test]
fn unresolvable_host_rejects() {
    let client = Client::init(test_config(1, 8)).unwrap();
    let result = client.get("http://host.invalid./x").send().wait();
    assert!(
        matches!(result, Err(Error::AddressResolution(_))),
        "got {result:?}"
    );
}

// ── Shutdown ────────────────────────────────────────────────────────

#[test]
fn shutdown_is_idempotent() {
    let mut client = Client::init(test_config(1, 8)).unwrap();
    client.shutdown();
    client.shutdown();
}
