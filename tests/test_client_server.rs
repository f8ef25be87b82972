use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use httpagent::client::ClientAgent;
use httpagent::config::EngineConfig;
use httpagent::dispatch::socket::Family;
use httpagent::http::options::Options;
use httpagent::http::request::Method;
use httpagent::server::{Listen, ListenAgent};
use httpagent::stream::Stream;

const WAIT: Duration = Duration::from_secs(5);

fn listen() -> (Arc<ListenAgent>, Arc<Listen>, SocketAddr) {
    let agent = ListenAgent::new(EngineConfig::default()).unwrap();
    let listen = agent
        .connect("127.0.0.1:0", Family::Inet, &Options::new())
        .unwrap();
    let addr = listen.local_addr();
    (agent, listen, addr)
}

/// Answers every request with "<METHOD> <path> <body>".
fn echo(stream: Arc<Stream>) {
    let (Some(request), Some(response)) = (stream.request(), stream.response()) else {
        return;
    };
    let body = String::from_utf8_lossy(&request.body()).into_owned();
    response.set_header("X-Path", request.path());
    response.set_body(format!("{} {} {}", request.method(), request.path(), body));
    stream.write().unwrap();
}

fn raw(addr: SocketAddr) -> TcpStream {
    let socket = TcpStream::connect(addr).unwrap();
    socket.set_read_timeout(Some(WAIT)).unwrap();
    socket
}

/// Reads up to and including the blank line ending a header block.
fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => head.push(byte[0]),
            Err(e) => panic!("read failed: {e}"),
        }
    }
    String::from_utf8(head).unwrap()
}

#[test]
fn test_get_round_trip() {
    let (_server, listen, addr) = listen();
    listen.on_request(echo);

    let agent = ClientAgent::new(EngineConfig::default()).unwrap();
    let client = agent.connect(&addr.to_string(), &Options::new()).unwrap();
    assert_eq!(agent.len(), 1);

    let stream = client.make_stream(&Options::new()).unwrap();
    stream.request().unwrap().set_path("/hello");
    let (tx, rx) = mpsc::channel();
    stream.response().unwrap().on_end(move |r| {
        let _ = tx.send((r.code(), r.reason(), r.body(), r.header("x-path")));
    });
    stream.write().unwrap();

    let (code, reason, body, path) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(code, 200);
    assert_eq!(reason, "OK");
    assert_eq!(&body[..], b"GET /hello ");
    assert_eq!(path.as_deref(), Some("/hello"));
}

#[test]
fn test_post_body_delivered() {
    let (_server, listen, addr) = listen();
    listen.on_request(echo);

    let agent = ClientAgent::new(EngineConfig::default()).unwrap();
    let client = agent.connect(&addr.to_string(), &Options::new()).unwrap();
    let stream = client.make_stream(&Options::new()).unwrap();
    let request = stream.request().unwrap();
    request.set_method(Method::POST);
    request.set_path("/submit");
    request.set_body("ping");

    let (tx, rx) = mpsc::channel();
    stream.response().unwrap().on_end(move |r| {
        let _ = tx.send(r.body());
    });
    request.write().unwrap();

    assert_eq!(&rx.recv_timeout(WAIT).unwrap()[..], b"POST /submit ping");
}

#[test]
fn test_responses_arrive_in_request_order() {
    let (_server, listen, addr) = listen();
    listen.on_request(echo);

    let agent = ClientAgent::new(EngineConfig::default()).unwrap();
    let client = agent.connect(&addr.to_string(), &Options::new()).unwrap();

    let (tx, rx) = mpsc::channel();
    for i in 0..5 {
        let stream = client.make_stream(&Options::new()).unwrap();
        stream.request().unwrap().set_path(format!("/{i}"));
        let tx = tx.clone();
        stream.response().unwrap().on_end(move |r| {
            let _ = tx.send(r.header("x-path").unwrap_or_default());
        });
        stream.write().unwrap();
    }

    let order: Vec<String> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(order, vec!["/0", "/1", "/2", "/3", "/4"]);
}

#[test]
fn test_head_response_has_no_body() {
    let (_server, listen, addr) = listen();
    listen.on_request(echo);

    let agent = ClientAgent::new(EngineConfig::default()).unwrap();
    let client = agent.connect(&addr.to_string(), &Options::new()).unwrap();

    let (tx, rx) = mpsc::channel();
    for method in [Method::HEAD, Method::GET] {
        let stream = client.make_stream(&Options::new()).unwrap();
        stream.request().unwrap().set_method(method);
        let tx = tx.clone();
        stream.response().unwrap().on_end(move |r| {
            let _ = tx.send((r.content_length(), r.body_len()));
        });
        stream.write().unwrap();
    }

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (Some(7), 0));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (Some(6), 6));
}

#[test]
fn test_bodiless_post_rejected_locally() {
    let (_server, listen, addr) = listen();
    let seen = Arc::new(AtomicUsize::new(0));
    let count = seen.clone();
    listen.on_request(move |stream| {
        count.fetch_add(1, Ordering::SeqCst);
        echo(stream);
    });

    let agent = ClientAgent::new(EngineConfig::default()).unwrap();
    let client = agent.connect(&addr.to_string(), &Options::new()).unwrap();

    let (tx, rx) = mpsc::channel();
    let empty = client.make_stream(&Options::new()).unwrap();
    empty.request().unwrap().set_method(Method::PUT);
    let on_empty = tx.clone();
    empty.response().unwrap().on_end(move |r| {
        let _ = on_empty.send(r.code());
    });
    empty.write().unwrap();

    let next = client.make_stream(&Options::new()).unwrap();
    next.response().unwrap().on_end(move |r| {
        let _ = tx.send(r.code());
    });
    next.write().unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 411);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 200);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_post_without_length_gets_411() {
    let (_server, listen, addr) = listen();
    listen.on_request(echo);

    let mut socket = raw(addr);
    socket.write_all(b"POST /x HTTP/1.1\r\n\r\n").unwrap();
    let mut reply = String::new();
    socket.read_to_string(&mut reply).unwrap();

    assert_eq!(reply, "HTTP/1.1 411 LENGTH REQUIRED\r\n\r\n");
}

#[test]
fn test_oversized_body_gets_413_and_connection_survives() {
    let (_server, listen, addr) = listen();
    listen.on_request(echo);

    let mut socket = raw(addr);
    socket
        .write_all(b"POST /big HTTP/1.1\r\nContent-Length: 2000000\r\n\r\n")
        .unwrap();
    socket.write_all(&vec![b'x'; 2_000_000]).unwrap();
    assert_eq!(read_head(&mut socket), "HTTP/1.1 413 PAYLOAD TOO LARGE\r\n\r\n");

    socket.write_all(b"GET /after HTTP/1.1\r\n\r\n").unwrap();
    let head = read_head(&mut socket);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert!(head.contains("X-Path: /after\r\n"), "{head}");
}

#[test]
fn test_garbage_start_line_reports_and_closes() {
    let (_server, listen, addr) = listen();
    let (tx, rx) = mpsc::channel();
    listen.on_error(move |server, reason| {
        let _ = tx.send((server.peer(), reason.to_string()));
    });

    let mut socket = raw(addr);
    socket.write_all(b"GET\r\n\r\n").unwrap();
    let mut reply = Vec::new();
    socket.read_to_end(&mut reply).unwrap();

    assert!(reply.is_empty());
    let (peer, reason) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(peer, socket.local_addr().unwrap());
    assert_eq!(reason, "invalid start line");
}

#[test]
fn test_no_handler_answers_501() {
    let (_server, _listen, addr) = listen();

    let mut socket = raw(addr);
    socket.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_head(&mut socket), "HTTP/1.1 501 NOT IMPLEMENTED\r\n\r\n");
}

#[test]
fn test_panicking_handler_answers_500() {
    let (_server, listen, addr) = listen();
    listen.on_request(|_stream| panic!("handler bug"));

    let mut socket = raw(addr);
    socket.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_head(&mut socket), "HTTP/1.1 500 INTERNAL SERVER ERROR\r\n\r\n");
}

#[test]
fn test_handler_panic_after_write_answers_once() {
    let (_server, listen, addr) = listen();
    let (tx, rx) = mpsc::channel();
    listen.on_request(move |stream| {
        stream.response().unwrap().set_body("ok");
        stream.write().unwrap();
        let _ = tx.send(stream.reject(500).is_err());
        panic!("handler bug after answering");
    });

    let mut socket = raw(addr);
    for _ in 0..20 {
        socket.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let head = read_head(&mut socket);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
        assert!(head.contains("Content-Length: 2\r\n"), "{head}");
        let mut body = [0u8; 2];
        socket.read_exact(&mut body).unwrap();
        assert_eq!(&body, b"ok");
        assert!(rx.recv_timeout(WAIT).unwrap());
    }

    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut extra = [0u8; 1];
    let err = socket.read(&mut extra).unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        "{err}"
    );
}

#[test]
fn test_ended_unanswered_stream_gets_500_and_connection_continues() {
    let (_server, listen, addr) = listen();
    listen.on_request(|stream| {
        if stream.request().unwrap().path() == "/end" {
            stream.end();
        } else {
            echo(stream);
        }
    });

    let mut socket = raw(addr);
    socket
        .write_all(b"GET /end HTTP/1.1\r\n\r\nGET /next HTTP/1.1\r\n\r\n")
        .unwrap();
    assert_eq!(read_head(&mut socket), "HTTP/1.1 500 INTERNAL SERVER ERROR\r\n\r\n");
    let head = read_head(&mut socket);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert!(head.contains("X-Path: /next\r\n"), "{head}");
}

#[test]
fn test_pipelined_backlog_behind_slow_handler() {
    let config = EngineConfig {
        header_limit: 1024,
        body_limit: 1024,
        ..EngineConfig::default()
    };
    let agent = ListenAgent::new(config).unwrap();
    let listen = agent
        .connect("127.0.0.1:0", Family::Inet, &Options::new())
        .unwrap();
    listen.on_request(|stream| {
        if stream.request().unwrap().path() == "/slow" {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(300));
                echo(stream);
            });
        } else {
            echo(stream);
        }
    });

    let mut socket = raw(listen.local_addr());
    let mut batch = b"GET /slow HTTP/1.1\r\n\r\n".to_vec();
    for i in 0..300 {
        batch.extend_from_slice(format!("GET /n{i} HTTP/1.1\r\n\r\n").as_bytes());
    }
    socket.write_all(&batch).unwrap();

    let expected = std::iter::once("/slow".to_string()).chain((0..300).map(|i| format!("/n{i}")));
    for path in expected {
        let head = read_head(&mut socket);
        assert!(head.contains(&format!("X-Path: {path}\r\n")), "{head}");
        let length: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        let mut body = vec![0u8; length];
        socket.read_exact(&mut body).unwrap();
        assert_eq!(body, format!("GET {path} ").into_bytes());
    }
}

#[test]
fn test_http10_request_closes_after_response() {
    let (_server, listen, addr) = listen();
    listen.on_request(echo);

    let mut socket = raw(addr);
    socket.write_all(b"GET /old HTTP/1.0\r\n\r\n").unwrap();
    let mut reply = String::new();
    socket.read_to_string(&mut reply).unwrap();

    assert!(reply.starts_with("HTTP/1.0 200 OK\r\n"), "{reply}");
    assert!(reply.ends_with("GET /old "), "{reply}");
}

#[test]
fn test_close_in_flight_fails_stream() {
    let (_server, listen, addr) = listen();
    let (held_tx, held_rx) = mpsc::channel();
    listen.on_request(move |stream| {
        // never answered
        let _ = held_tx.send(stream);
    });

    let agent = ClientAgent::new(EngineConfig::default()).unwrap();
    let client = agent.connect(&addr.to_string(), &Options::new()).unwrap();
    let closes = Arc::new(AtomicUsize::new(0));
    let counted = closes.clone();
    client.on_close(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
    });

    let stream = client.make_stream(&Options::new()).unwrap();
    let (tx, rx) = mpsc::channel();
    stream.response().unwrap().on_error(move |_, reason| {
        let _ = tx.send(reason.to_string());
    });
    stream.write().unwrap();
    let _held = held_rx.recv_timeout(WAIT).unwrap();

    client.close();
    client.close();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "connection closed");
    assert!(rx.try_recv().is_err());
    assert!(stream.is_ended());
    assert!(agent.is_empty());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(matches!(
        client.make_stream(&Options::new()),
        Err(httpagent::Error::NotReady)
    ));
}

#[test]
fn test_connection_close_header_closes_client() {
    let (_server, listen, addr) = listen();
    listen.on_request(|stream| {
        if let Some(response) = stream.response() {
            response.set_header("Connection", "close");
        }
        echo(stream);
    });

    let agent = ClientAgent::new(EngineConfig::default()).unwrap();
    let client = agent.connect(&addr.to_string(), &Options::new()).unwrap();
    let (closed_tx, closed_rx) = mpsc::channel();
    client.on_close(move |c| {
        let _ = closed_tx.send(c.peer());
    });

    let stream = client.make_stream(&Options::new()).unwrap();
    let (tx, rx) = mpsc::channel();
    stream.response().unwrap().on_end(move |r| {
        let _ = tx.send(r.code());
    });
    stream.write().unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 200);
    assert_eq!(closed_rx.recv_timeout(WAIT).unwrap(), addr);
    assert!(agent.is_empty());
}

#[test]
fn test_listen_reset_closes_servers() {
    let (_server, listen, addr) = listen();
    let (tx, rx) = mpsc::channel();
    listen.on_close(move |server| {
        let _ = tx.send(server.peer());
    });

    let socket = raw(addr);
    let peer = socket.local_addr().unwrap();
    let deadline = std::time::Instant::now() + WAIT;
    while listen.map_locate(peer).is_none() {
        assert!(std::time::Instant::now() < deadline, "connection never mapped");
        std::thread::sleep(Duration::from_millis(10));
    }

    listen.reset();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), peer);
    assert!(listen.is_empty());
    assert!(listen.is_ready());
}
