//! Echo client - sends numbered requests and reports throughput.
//!
//! ```sh
//! cargo run --example echo_client -- 10000
//! ```

use std::time::Instant;

use majordomo::config::DEFAULT_BROKER_CONNECT;
use majordomo::message::{Multipart, RawMultipart};
use majordomo::ClientSession;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let count: usize = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 1000,
    };
    let mut session = ClientSession::connect(DEFAULT_BROKER_CONNECT)?;

    let start = Instant::now();
    let mut completed = 0usize;
    for index in 0..count {
        let text = format!("hello world {}", index);
        let Some(reply) = session.send("echo", RawMultipart::from_frames([text.as_str()]))? else {
            error!("No reply, giving up");
            break;
        };
        if reply.first() != Some(text.as_bytes()) {
            return Err(format!("Incorrect reply to request {}", index).into());
        }
        completed += 1;
    }
    let elapsed = start.elapsed();
    session.shutdown()?;

    info!(
        completed,
        elapsed_ms = elapsed.as_millis() as u64,
        per_second = completed as f64 / elapsed.as_secs_f64(),
        "Done"
    );
    Ok(())
}
