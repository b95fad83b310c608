//! Echo worker - replies with the request it was given.
//!
//! ```sh
//! cargo run --example broker &
//! cargo run --example echo_worker
//! ```

use majordomo::config::DEFAULT_BROKER_CONNECT;
use majordomo::WorkerSession;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut session = WorkerSession::connect("echo", DEFAULT_BROKER_CONNECT)?;

    let mut served = 0u64;
    let mut reply = None;
    while let Some(request) = session.recv(reply.take())? {
        served += 1;
        reply = Some(request);
    }

    info!(served, "Echo worker done");
    session.shutdown()?;
    Ok(())
}
