//! Fetch example.
//!
//! Makes a few requests to one destination through a single worker, so
//! every request after the first reuses the same connection.
//!
//! Run: cargo run --example fetch -- https://example.com/
//! Set RUST_LOG=persistent_http=debug to watch connections being reused.

use persistent_http::{Client, ClientConfig, Method, ProxyConfig, Request};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://example.com/".to_string());
    let url = Url::parse(&target)?;

    let config = ClientConfig::new("fetch")
        .with_proxy(ProxyConfig::Env)
        .with_idle_timeout(Duration::from_secs(5));
    let client = Client::new(config)?;
    let mut worker = client.worker();

    println!("--- GET {url} ---");
    for i in 1..=3 {
        let response = worker.get(&url)?;
        println!(
            "Request {i}: status={} bytes={} open_connections={}",
            response.status,
            response.body.len(),
            worker.open_connections()
        );
    }

    println!("\n--- HEAD {url} ---");
    let head = Request::builder(Method::Head, url.path()).build();
    let response = worker.request(&url, Some(head))?;
    for (name, value) in &response.headers {
        println!("{name}: {}", value.to_str().unwrap_or("<binary>"));
    }

    println!("\nProtocol version: {:?}", client.http_version(&url));

    worker.shutdown();
    println!("Done!");
    Ok(())
}
