//! TileSeed CLI - Command-line interface
//!
//! Seeds, cleans up, exports and imports file system tile caches using the
//! tileseed batch scheduler.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

use commands::cleanup::CleanupArgs;
use commands::export::ExportArgs;
use commands::import::ImportArgs;
use commands::seed::SeedArgs;

#[derive(Parser)]
#[command(name = "tileseed")]
#[command(version, about = "Seed, clean up, export and import map tile caches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill a cache with missing or outdated tiles from a tile server
    Seed(SeedArgs),
    /// Remove tiles older than a timestamp
    Cleanup(CleanupArgs),
    /// Copy cached tiles into a directory archive
    Export(ExportArgs),
    /// Copy tiles from a directory archive into the cache
    Import(ImportArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Seed(args) => commands::seed::run(args),
        Commands::Cleanup(args) => commands::cleanup::run(args),
        Commands::Export(args) => commands::export::run(args),
        Commands::Import(args) => commands::import::run(args),
    };

    if let Err(e) = result {
        e.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use commands::common::{GridType, Levels};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_seed() {
        let cli = Cli::try_parse_from([
            "tileseed",
            "seed",
            "--cache-dir",
            "/tmp/osm",
            "--levels",
            "0-3",
            "--bbox",
            "-10,-5,10,5",
            "--meta-size",
            "4x4",
            "--url",
            "https://tiles.example.com/{z}/{x}/{y}.png",
            "--refresh-days",
            "7",
        ])
        .unwrap();

        let Commands::Seed(args) = cli.command else {
            panic!("expected seed command");
        };
        assert_eq!(args.common.levels, Levels(vec![0, 1, 2, 3]));
        assert_eq!(args.common.meta_size, (4, 4));
        assert_eq!(args.common.grid, GridType::Mercator);
        assert_eq!(args.common.bbox.unwrap().min_x, -10.0);
        assert_eq!(args.refresh_days, Some(7));
        assert!(!args.common.dry_run);
    }

    #[test]
    fn test_parse_cleanup_requires_age() {
        let base = ["tileseed", "cleanup", "--cache-dir", "/tmp/osm", "--levels", "2"];
        assert!(Cli::try_parse_from(base).is_err());

        let mut with_days = base.to_vec();
        with_days.extend(["--older-than-days", "30", "--complete-extent"]);
        let Commands::Cleanup(args) = Cli::try_parse_from(with_days).unwrap().command else {
            panic!("expected cleanup command");
        };
        assert_eq!(args.older_than_days, Some(30));
        assert!(args.complete_extent);

        let mut both = base.to_vec();
        both.extend(["--older-than-days", "30", "--before", "2024-01-01"]);
        assert!(Cli::try_parse_from(both).is_err());
    }

    #[test]
    fn test_parse_export_and_import() {
        let cli = Cli::try_parse_from([
            "tileseed",
            "export",
            "--cache-dir",
            "/tmp/osm",
            "--levels",
            "0,2",
            "--grid",
            "geodetic",
            "--dest",
            "/tmp/out",
            "--concurrency",
            "8",
            "--dry-run",
        ])
        .unwrap();
        let Commands::Export(args) = cli.command else {
            panic!("expected export command");
        };
        assert_eq!(args.common.grid, GridType::Geodetic);
        assert_eq!(args.common.concurrency, Some(8));
        assert!(args.common.dry_run);

        let cli = Cli::try_parse_from([
            "tileseed",
            "import",
            "--cache-dir",
            "/tmp/osm",
            "--levels",
            "1",
            "--src",
            "/tmp/out",
            "--overwrite",
            "--progress-file",
            "/tmp/progress.json",
            "--resume",
        ])
        .unwrap();
        let Commands::Import(args) = cli.command else {
            panic!("expected import command");
        };
        assert!(args.overwrite);
        assert!(args.common.resume);
        assert!(args.common.progress_file.is_some());
    }

    #[test]
    fn test_invalid_levels_rejected() {
        assert!(Cli::try_parse_from([
            "tileseed",
            "import",
            "--cache-dir",
            "/tmp/osm",
            "--levels",
            "5-1",
            "--src",
            "/tmp/out",
        ])
        .is_err());
    }
}
