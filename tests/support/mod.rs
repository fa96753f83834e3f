//! Loopback HTTP server for integration tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use url::Url;

/// How the server treats each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer every request and keep the connection open.
    KeepAlive,
    /// Answer one request, then close the connection.
    OneShot,
    /// Read one request, then close without answering.
    Hangup,
}

#[derive(Default)]
struct Shared {
    accepted: AtomicUsize,
    heads: Mutex<Vec<String>>,
}

pub struct TestServer {
    port: u16,
    shared: Arc<Shared>,
}

impl TestServer {
    pub fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared::default());

        let server = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                server.accepted.fetch_add(1, Ordering::SeqCst);
                let server = Arc::clone(&server);
                thread::spawn(move || handle(stream, behavior, &server));
            }
        });

        Self { port, shared }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}{path}", self.port)).unwrap()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Request heads received so far, lower-cased.
    pub fn heads(&self) -> Vec<String> {
        self.shared.heads.lock().unwrap().clone()
    }
}

fn handle(stream: TcpStream, behavior: Behavior, shared: &Shared) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    loop {
        let Some(head) = read_head(&mut reader) else {
            return;
        };
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        if reader.read_exact(&mut body).is_err() {
            return;
        }
        shared.heads.lock().unwrap().push(head);

        if behavior == Behavior::Hangup {
            return;
        }

        let response = "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        if writer.write_all(response.as_bytes()).is_err() {
            return;
        }
        if behavior == Behavior::OneShot {
            return;
        }
    }
}

fn read_head(reader: &mut impl BufRead) -> Option<String> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return None,
            Ok(_) if line == "\r\n" => return Some(head),
            Ok(_) => head.push_str(&line.to_ascii_lowercase()),
        }
    }
}
