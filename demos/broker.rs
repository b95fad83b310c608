//! Standalone broker.
//!
//! Binds `tcp://*:5555` unless `MDP_BROKER_ENDPOINT` says otherwise. Set
//! `MDP_BROKER_CONFIG` to a JSON file to override heartbeat settings:
//!
//! ```json
//! { "heartbeat_interval_ms": 1000, "heartbeat_liveness": 5 }
//! ```
//!
//! ```sh
//! RUST_LOG=debug cargo run --example broker
//! ```

use majordomo::config::{self, BrokerConfig, DEFAULT_BROKER_BIND};
use majordomo::Broker;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config: BrokerConfig = match std::env::var("MDP_BROKER_CONFIG") {
        Ok(path) => config::from_json_file(path)?,
        Err(_) => BrokerConfig::default(),
    };
    let endpoint =
        std::env::var("MDP_BROKER_ENDPOINT").unwrap_or_else(|_| DEFAULT_BROKER_BIND.to_string());

    let mut broker = Broker::builder().config(config).bind(&endpoint)?;
    broker.run()?;
    Ok(())
}
