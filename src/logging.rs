use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

/// Progress goes to stderr at INFO; `--verbose` adds per-word DEBUG detail.
pub fn init(verbose: bool) -> Result<()> {
    let _ = fmt()
        .with_max_level(max_level(verbose))
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_level(true)
        .without_time()
        .try_init();
    Ok(())
}

fn max_level(verbose: bool) -> Level {
    if verbose { Level::DEBUG } else { Level::INFO }
}
