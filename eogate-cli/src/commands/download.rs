//! `eogate download`: search, then fetch every product found.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use eogate::deferred::PollPolicy;
use tracing::{error, info};

use super::common::{format_bytes, SearchArgs, TerminalProgress};
use super::search::find;
use crate::error::CliError;
use crate::runner::CliRunner;

#[derive(Debug, Args)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub search: SearchArgs,

    /// Output directory (default: [download] directory from config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Seconds between order status checks
    #[arg(long)]
    pub wait: Option<u64>,

    /// Minutes to wait for ordered products before giving up
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not wait for offline products; report them as not yet available
    #[arg(long, conflicts_with_all = ["wait", "timeout"])]
    pub no_wait: bool,

    /// Hide progress bars
    #[arg(short, long)]
    pub quiet: bool,
}

impl DownloadArgs {
    /// Order polling, falling back to the configured one per field.
    fn poll_policy(&self, configured: PollPolicy) -> PollPolicy {
        if self.no_wait {
            return PollPolicy::no_wait();
        }
        let interval = self
            .wait
            .map(Duration::from_secs)
            .unwrap_or(configured.interval);
        let deadline = match self.timeout {
            Some(mins) => Some(Duration::from_secs(mins * 60)),
            None => configured.deadline,
        };
        PollPolicy { interval, deadline }
    }
}

/// Run the download command.
pub fn run(args: DownloadArgs, runner: CliRunner) -> Result<(), CliError> {
    runner.log_startup("download");
    let query = args.search.to_query()?;
    let destination = args
        .output
        .clone()
        .unwrap_or_else(|| runner.config().download.directory.clone());
    let policy = args.poll_policy(runner.config().poll_policy());
    let progress = Arc::new(TerminalProgress::new(args.quiet));
    let gateway = runner.gateway(progress.clone())?;
    let cancel = runner.interrupt_token()?;
    let runtime = runner.runtime()?;

    let found = runtime.block_on(find(&gateway, &query, args.search.all, &cancel));
    progress.finish();
    let found = found?;
    if found.products.is_empty() {
        println!("No products found.");
        return Ok(());
    }
    info!(
        count = found.products.len(),
        destination = %destination.display(),
        "Downloading"
    );

    let results = runtime.block_on(gateway.download_all(
        &found.products,
        &destination,
        Some(policy),
        &cancel,
    ));
    progress.finish();

    let total = results.len();
    let mut failed = 0;
    for (product, result) in found.products.iter().zip(results) {
        match result {
            Ok(path) => {
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                println!("{}  {}  ({})", product.id, path.display(), format_bytes(size));
            }
            Err(e) => {
                failed += 1;
                error!(product = %product.id, provider = %product.provider, error = %e, "Download failed");
                eprintln!("{}  FAILED: {}", product.id, e);
                if total == 1 {
                    return Err(e.into());
                }
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(eogate::GatewayError::Cancelled {
            operation: "download".to_string(),
        }
        .into());
    }
    if failed > 0 {
        return Err(CliError::Downloads { failed, total });
    }
    Ok(())
}
