//! Import command: copies tiles from a directory archive into a cache.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tileseed::provider::DirectoryArchive;
use tileseed::task::{self, ImportTask};

use super::common::CommonArgs;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for `tileseed import`.
#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Source directory
    #[arg(long)]
    pub src: PathBuf,

    /// Replace tiles that are already cached
    #[arg(long)]
    pub overwrite: bool,
}

/// Run the import command.
pub fn run(args: ImportArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(&args.common)?;
    runner.log_startup("import");

    let archive =
        Arc::new(DirectoryArchive::new(&args.src).with_extension(args.common.extension.clone()));
    let manager = args.common.manager(None);
    let task = ImportTask::new(args.common.task_spec("import", manager)?, archive)
        .with_overwrite(args.overwrite);

    let options = runner.batch_options(&args.common);
    let locker = runner.locker();
    let report = runner.block_on(task::import(vec![task], &options, &locker))?;
    runner.finish(&report)
}
