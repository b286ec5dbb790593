//! Publishes a batch of messages to a running broker and prints the acks.
//!
//! ```bash
//! cargo run --example broker
//! cargo run --example publisher
//! BROKER_ADDR=127.0.0.1:17777 MESSAGES=1000 ACK_INTERVAL=100 cargo run --example publisher
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use tidemq::client::PublishClient;
use tidemq::telemetry::{LogFormat, init_logging};
use tidemq::types::{Partition, Topic};
use tracing::{info, warn};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::from_env()).map_err(|e| -> Box<dyn std::error::Error> { e })?;

    let addr: String = env_or("BROKER_ADDR", "127.0.0.1:17777".to_string());
    let messages: i64 = env_or("MESSAGES", 25);
    let ack_interval: i32 = env_or("ACK_INTERVAL", 10);

    let mut client = PublishClient::connect(&addr).await?;
    let accepted = client
        .init(
            Topic::new("demo", "events"),
            Partition::new(1024, 0, 1024, 0),
            ack_interval,
        )
        .await?;
    if accepted.is_error() {
        warn!(error = %accepted.error, "Broker refused the stream");
        return Ok(());
    }
    info!(addr = %addr, messages, ack_interval, "Publishing");

    for i in 0..messages {
        let ts_ns = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos() as i64;
        client
            .publish(format!("key-{}", i), format!("message {}", i), ts_ns)
            .await?;
    }

    for response in client.close().await? {
        if response.is_error() {
            warn!(error = %response.error, "Broker reported an error");
        } else {
            info!(
                ack_sequence = response.ack_sequence,
                should_close = response.should_close,
                "Response"
            );
        }
    }
    Ok(())
}
