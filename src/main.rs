use std::io::{self, Write};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use stamplog::config::{self, LoggerConfig};
use stamplog::logging::{FileOpener, SystemClock};
use stamplog::Logger;

/// Copy stdin to stdout, logging every line
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = config::config_file_path();
    let config = LoggerConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let opener = FileOpener::new(config.create_folder);

    let logger = Logger::from_parts(config, std::sync::Arc::new(SystemClock), Box::new(opener))
        .context("Failed to start logger")?;

    tracing::info!("Logging to {}", logger.config().folder.display());

    // With global capture active, plain stdout is already mirrored
    let mut out: Box<dyn Write> = if logger.is_intercepting() {
        Box::new(io::stdout())
    } else {
        Box::new(logger.stdout())
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        out.write_all(format!("{}\n", line).as_bytes())
            .context("Failed to write stdout")?;
    }
    out.flush().context("Failed to flush stdout")?;

    logger.flush().await.context("Log file writes failed")?;
    if logger.dropped_records() > 0 {
        tracing::warn!("{} log records were dropped", logger.dropped_records());
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stamplog=warn".into());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}
