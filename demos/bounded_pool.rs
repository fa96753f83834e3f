//! Bounded pool example.
//!
//! Starts a small local HTTP server, then has several threads share a
//! client whose pool holds at most two connections across four
//! destinations. Keys compete for the two slots and the least recently
//! used one is evicted.
//!
//! Run: cargo run --example bounded_pool

use persistent_http::{Client, ClientConfig, PoolMode};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

const THREADS: usize = 4;
const REQUESTS_PER_THREAD: usize = 5;

/// Answer keep-alive requests on one connection until the client hangs up.
fn serve(stream: TcpStream) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut writer = stream;
    let mut line = String::new();
    loop {
        // Request line and headers; the demo only sends bodiless GETs.
        let mut saw_request = false;
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) if line == "\r\n" => break,
                Ok(_) => saw_request = true,
            }
        }
        if !saw_request {
            return;
        }
        let body = "pong";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{body}",
            body.len()
        );
        if writer.write_all(response.as_bytes()).is_err() {
            return;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || serve(stream));
        }
    });
    println!("Server listening on 127.0.0.1:{port}");

    let config = ClientConfig::new("bounded-demo")
        .with_pool(PoolMode::bounded(2, Duration::from_secs(5)));
    let client = Client::new(config)?;

    // Each host name is its own destination key.
    let hosts = ["127.0.0.1", "localhost", "127.0.0.2", "127.0.0.3"];

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let client = client.clone();
            thread::spawn(move || -> persistent_http::Result<()> {
                let mut worker = client.worker();
                for i in 0..REQUESTS_PER_THREAD {
                    let host = hosts[(t + i) % hosts.len()];
                    let url = Url::parse(&format!("http://{host}:{port}/ping"))?;
                    let response = worker.get(&url)?;
                    println!("thread {t} -> {host}: {} {}", response.status, response.text());
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.join().expect("worker thread panicked") {
            println!("request failed: {e}");
        }
    }

    if let Some(pool) = client.pool() {
        println!("\nPool after the run: {:?}", pool.stats());
    }
    client.shutdown();
    println!("Done!");
    Ok(())
}
