//! Export command: copies cached tiles into a directory archive.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tileseed::provider::DirectoryArchive;
use tileseed::task::{self, ExportTask};

use super::common::CommonArgs;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for `tileseed export`.
#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Destination directory
    #[arg(long)]
    pub dest: PathBuf,
}

/// Run the export command.
pub fn run(args: ExportArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(&args.common)?;
    runner.log_startup("export");

    let archive =
        Arc::new(DirectoryArchive::new(&args.dest).with_extension(args.common.extension.clone()));
    let manager = args.common.manager(None);
    let task = ExportTask::new(args.common.task_spec("export", manager)?, archive);

    let options = runner.batch_options(&args.common);
    let locker = runner.locker();
    let report = runner.block_on(task::export(vec![task], &options, &locker))?;
    runner.finish(&report)
}
