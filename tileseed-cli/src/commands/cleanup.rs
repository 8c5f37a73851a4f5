//! Cleanup command: removes old tiles from a cache.

use std::time::SystemTime;

use clap::Args;
use tileseed::task::{self, CleanupTask};
use tracing::warn;

use super::common::{days_ago, parse_timestamp, CommonArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for `tileseed cleanup`.
#[derive(Debug, Args)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Remove tiles older than this many days
    #[arg(long, required_unless_present = "before", conflicts_with = "before")]
    pub older_than_days: Option<u64>,

    /// Remove tiles written before this date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_timestamp)]
    pub before: Option<SystemTime>,

    /// Remove whole levels without walking the tiles (requires no --bbox)
    #[arg(long)]
    pub complete_extent: bool,
}

impl CleanupArgs {
    fn remove_before(&self) -> SystemTime {
        match (self.before, self.older_than_days) {
            (Some(before), _) => before,
            (None, Some(days)) => days_ago(days),
            (None, None) => SystemTime::UNIX_EPOCH,
        }
    }
}

/// Run the cleanup command.
pub fn run(args: CleanupArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(&args.common)?;
    runner.log_startup("cleanup");

    let complete_extent = args.complete_extent && args.common.bbox.is_none();
    if args.complete_extent && !complete_extent {
        warn!("--complete-extent ignored because --bbox restricts the job");
    }

    let manager = args.common.manager(None);
    let task = CleanupTask::new(args.common.task_spec("cleanup", manager)?, args.remove_before())
        .with_complete_extent(complete_extent);

    let options = runner.batch_options(&args.common);
    let locker = runner.locker();
    let report = runner.block_on(task::cleanup(vec![task], &options, &locker))?;
    runner.finish(&report)
}
