//! Seed command: fills a cache from a tile server.

use std::sync::Arc;
use std::time::SystemTime;

use clap::Args;
use tileseed::source::{HttpTileSource, ReqwestClient, TileSource};
use tileseed::task::{self, SeedTask};

use super::common::{days_ago, parse_timestamp, CommonArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for `tileseed seed`.
#[derive(Debug, Args)]
pub struct SeedArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Tile URL template with {x}, {y} or {-y} and {z} placeholders
    #[arg(long)]
    pub url: String,

    /// Re-seed tiles older than this many days
    #[arg(long, conflicts_with = "refresh_before")]
    pub refresh_days: Option<u64>,

    /// Re-seed tiles written before this date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_timestamp)]
    pub refresh_before: Option<SystemTime>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "30")]
    pub http_timeout: u64,
}

impl SeedArgs {
    fn refresh_timestamp(&self) -> Option<SystemTime> {
        self.refresh_before
            .or_else(|| self.refresh_days.map(days_ago))
    }
}

/// Run the seed command.
pub fn run(args: SeedArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(&args.common)?;
    runner.log_startup("seed");

    let client = Arc::new(ReqwestClient::with_timeout(args.http_timeout)?);
    let source: Arc<dyn TileSource> =
        Arc::new(HttpTileSource::new(&args.url, args.common.grid.grid(), client)?);

    let manager = args.common.manager(Some(Arc::clone(&source)));
    let mut task = SeedTask::new(args.common.task_spec("seed", manager)?);
    if let Some(timestamp) = args.refresh_timestamp() {
        task = task.with_refresh_before(timestamp);
    }

    let options = runner.batch_options(&args.common);
    let locker = runner.locker();
    let report = runner.block_on(task::seed(vec![task], &options, &locker))?;

    // the blocking HTTP client must be dropped outside the runtime
    drop(source);
    runner.finish(&report)
}
