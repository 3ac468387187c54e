mod workers;

use peerlink::utils::logging;
use tracing::{info, warn};
use workers::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();
    logging::init(args.verbose, args.log_file.as_deref())?;

    let config = args.session_config()?;
    info!(
        event = "startup",
        chunk_size = config.chunk_size,
        buffer_threshold = config.buffer_threshold,
        files = args.files.len(),
        "Starting loopback session"
    );

    tokio::select! {
        result = workers::demo::run(args, config) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(event = "interrupted", "Ctrl+C received, shutting down");
            Ok(())
        }
    }
}
