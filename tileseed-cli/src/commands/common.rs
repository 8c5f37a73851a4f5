//! Common types and utilities shared across CLI commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use clap::{Args, ValueEnum};
use tileseed::coverage::{BBoxCoverage, TaskCoverage};
use tileseed::grid::{BBox, TileGrid};
use tileseed::manager::{DiskTileManager, TileManager};
use tileseed::source::TileSource;
use tileseed::task::TaskSpec;

use crate::error::CliError;

/// Tile grid selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum GridType {
    /// EPSG:4326, two tiles at level 1
    Geodetic,
    /// EPSG:3857, the web mercator grid used by most tile servers
    Mercator,
}

impl GridType {
    pub fn grid(self) -> TileGrid {
        match self {
            GridType::Geodetic => TileGrid::global_geodetic(),
            GridType::Mercator => TileGrid::global_mercator(),
        }
    }
}

/// Arguments shared by all batch commands.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Cache directory holding `{z}/{x}/{y}.{ext}` tiles
    #[arg(long)]
    pub cache_dir: PathBuf,

    /// Cache name used for locking (defaults to the directory name)
    #[arg(long)]
    pub cache_name: Option<String>,

    /// Tile grid of the cache
    #[arg(long, value_enum, default_value = "mercator")]
    pub grid: GridType,

    /// File extension of cached tiles
    #[arg(long, default_value = "png")]
    pub extension: String,

    /// Restrict the job to MIN_X,MIN_Y,MAX_X,MAX_Y in grid coordinates
    #[arg(long, allow_hyphen_values = true)]
    pub bbox: Option<BBox>,

    /// Levels, as a range ("0-5") or a list ("0,2,4")
    #[arg(long, value_parser = parse_levels)]
    pub levels: Levels,

    /// Meta-tile size, e.g. "4x4"
    #[arg(long, value_parser = parse_meta_size, default_value = "1x1")]
    pub meta_size: (u32, u32),

    /// Configuration file (default: ~/.config/tileseed/tileseed.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Concurrent work units, overrides the config file
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Log the work without touching any tile
    #[arg(long)]
    pub dry_run: bool,

    /// Checkpoint file, overrides the config file
    #[arg(long)]
    pub progress_file: Option<PathBuf>,

    /// Continue from the checkpoint file of an interrupted run
    #[arg(long)]
    pub resume: bool,

    /// Directory for the log file (console only when omitted)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl CommonArgs {
    /// Name used for the task id and the cache lock.
    pub fn cache_name(&self) -> String {
        self.cache_name.clone().unwrap_or_else(|| {
            self.cache_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "cache".to_string())
        })
    }

    /// Coverage of the job in the selected grid.
    pub fn coverage(&self) -> TaskCoverage {
        let grid = self.grid.grid();
        match self.bbox {
            None => TaskCoverage::Full,
            Some(bbox) if !bbox.intersects(&grid.extent()) => TaskCoverage::Empty,
            Some(bbox) => TaskCoverage::Area(Arc::new(BBoxCoverage::new(bbox, grid.srs()))),
        }
    }

    /// Cache manager for `--cache-dir`.
    pub fn manager(&self, source: Option<Arc<dyn TileSource>>) -> Arc<DiskTileManager> {
        let mut manager =
            DiskTileManager::new(self.cache_name(), &self.cache_dir, self.grid.grid())
                .with_extension(self.extension.clone())
                .with_meta_size(self.meta_size);
        if let Some(source) = source {
            manager = manager.with_source(source);
        }
        Arc::new(manager)
    }

    /// Task description for the given manager.
    pub fn task_spec(&self, kind: &str, manager: Arc<DiskTileManager>) -> Result<TaskSpec, CliError> {
        if self.levels.0.is_empty() {
            return Err(CliError::Config("--levels must name at least one level".to_string()));
        }
        let max = manager.grid().levels();
        if let Some(&level) = self.levels.0.iter().find(|&&l| usize::from(l) >= max) {
            return Err(CliError::Config(format!(
                "level {} is not defined, the grid has {} levels",
                level, max
            )));
        }
        let id = format!("{}-{}", kind, self.cache_name());
        Ok(TaskSpec::new(id, manager, self.levels.0.clone(), self.coverage())
            .with_metadata("cache_dir", self.cache_dir.display().to_string()))
    }
}

/// Sorted, deduplicated zoom levels.
#[derive(Debug, Clone, PartialEq)]
pub struct Levels(pub Vec<u8>);

/// Parse a level range ("0-5") or list ("0,2,4").
pub fn parse_levels(s: &str) -> Result<Levels, String> {
    let invalid = || format!("invalid levels '{}', expected e.g. 0-5 or 0,2,4", s);
    let mut levels = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u8 = start.trim().parse().map_err(|_| invalid())?;
                let end: u8 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                levels.extend(start..=end);
            }
            None => levels.push(part.parse().map_err(|_| invalid())?),
        }
    }
    if levels.is_empty() {
        return Err(invalid());
    }
    levels.sort_unstable();
    levels.dedup();
    Ok(Levels(levels))
}

/// Parse a meta-tile size such as "4x4".
pub fn parse_meta_size(s: &str) -> Result<(u32, u32), String> {
    let invalid = || format!("invalid meta size '{}', expected e.g. 4x4", s);
    let (w, h) = s
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(invalid)?;
    let w: u32 = w.trim().parse().map_err(|_| invalid())?;
    let h: u32 = h.trim().parse().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok((w, h))
}

/// Parse a timestamp given as a date ("2024-05-01") or an RFC 3339 string.
pub fn parse_timestamp(s: &str) -> Result<SystemTime, String> {
    let invalid = || format!("invalid timestamp '{}', expected YYYY-MM-DD or RFC 3339", s);
    let datetime = if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        dt.with_timezone(&Utc)
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        Utc.from_utc_datetime(&dt)
    } else {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
        Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?)
    };
    Ok(datetime.into())
}

/// The point in time `days` days ago.
pub fn days_ago(days: u64) -> SystemTime {
    SystemTime::now()
        .checked_sub(Duration::from_secs(days * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(bbox: Option<BBox>) -> CommonArgs {
        CommonArgs {
            cache_dir: PathBuf::from("/var/cache/tiles/osm"),
            cache_name: None,
            grid: GridType::Geodetic,
            extension: "png".to_string(),
            bbox,
            levels: Levels(vec![0, 1]),
            meta_size: (2, 2),
            config: None,
            concurrency: None,
            dry_run: false,
            progress_file: None,
            resume: false,
            log_dir: None,
        }
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(parse_levels("0-3").unwrap(), Levels(vec![0, 1, 2, 3]));
        assert_eq!(parse_levels("4,2, 2,0").unwrap(), Levels(vec![0, 2, 4]));
        assert_eq!(parse_levels("1-2,5").unwrap(), Levels(vec![1, 2, 5]));
        assert!(parse_levels("3-1").is_err());
        assert!(parse_levels("").is_err());
        assert!(parse_levels("a").is_err());
    }

    #[test]
    fn test_parse_meta_size() {
        assert_eq!(parse_meta_size("4x4").unwrap(), (4, 4));
        assert_eq!(parse_meta_size("2X1").unwrap(), (2, 1));
        assert!(parse_meta_size("0x4").is_err());
        assert!(parse_meta_size("4").is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        let day = parse_timestamp("1970-01-02").unwrap();
        assert_eq!(day, SystemTime::UNIX_EPOCH + Duration::from_secs(86_400));

        let rfc = parse_timestamp("1970-01-01T00:01:00Z").unwrap();
        assert_eq!(rfc, SystemTime::UNIX_EPOCH + Duration::from_secs(60));

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_days_ago() {
        let before = days_ago(1);
        let elapsed = SystemTime::now().duration_since(before).unwrap();
        assert!(elapsed >= Duration::from_secs(86_400));
    }

    #[test]
    fn test_coverage() {
        assert!(matches!(args(None).coverage(), TaskCoverage::Full));
        assert!(matches!(
            args(Some(BBox::new(0.0, 0.0, 10.0, 10.0))).coverage(),
            TaskCoverage::Area(_)
        ));
        assert!(args(Some(BBox::new(200.0, 0.0, 210.0, 10.0)))
            .coverage()
            .is_empty());
    }

    #[test]
    fn test_task_spec() {
        let args = args(None);
        assert_eq!(args.cache_name(), "osm");

        let manager = args.manager(None);
        assert_eq!(manager.cache_name(), "osm");
        assert_eq!(manager.meta_grid().unwrap().configured_meta_size(), (2, 2));

        let spec = args.task_spec("seed", manager).unwrap();
        assert_eq!(spec.id, "seed-osm");
        assert_eq!(spec.levels, vec![0, 1]);
    }

    #[test]
    fn test_task_spec_rejects_undefined_levels() {
        let mut args = args(None);
        args.levels = Levels(vec![200]);
        assert!(args.task_spec("seed", args.manager(None)).is_err());
        args.levels.0.clear();
        assert!(args.task_spec("seed", args.manager(None)).is_err());
    }
}
