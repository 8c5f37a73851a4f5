//! INI parsing for [`ConfigFile`].
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::{ConfigFile, ConfigFileError};

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [batch] section
    if let Some(section) = ini.section(Some("batch")) {
        if let Some(v) = section.get("concurrency") {
            config.batch.concurrency = parse_positive(v, "batch", "concurrency")?;
        }
        if let Some(v) = section.get("skip_geoms_for_last_levels") {
            config.batch.skip_geoms_for_last_levels = parse_number(
                v,
                "batch",
                "skip_geoms_for_last_levels",
                "must be a non-negative integer",
            )?;
        }
        if let Some(v) = section.get("dry_run") {
            config.batch.dry_run = parse_bool(v, "batch", "dry_run")?;
        }
    }

    // [lock] section
    if let Some(section) = ini.section(Some("lock")) {
        if let Some(v) = non_empty(section, "directory") {
            config.lock.directory = expand_tilde(v);
        }
        if let Some(v) = section.get("timeout") {
            config.lock.timeout_secs =
                parse_number(v, "lock", "timeout", "must be a non-negative integer (seconds)")?;
        }
    }

    // [retry] section
    if let Some(section) = ini.section(Some("retry")) {
        if let Some(v) = section.get("max_attempts") {
            config.retry.max_attempts = parse_positive(v, "retry", "max_attempts")?;
        }
        if let Some(v) = section.get("initial_delay_ms") {
            config.retry.initial_delay_ms = parse_number(
                v,
                "retry",
                "initial_delay_ms",
                "must be a non-negative integer (milliseconds)",
            )?;
        }
        if let Some(v) = section.get("max_delay_secs") {
            config.retry.max_delay_secs = parse_number(
                v,
                "retry",
                "max_delay_secs",
                "must be a non-negative integer (seconds)",
            )?;
        }
    }

    // [progress] section
    if let Some(section) = ini.section(Some("progress")) {
        if let Some(v) = non_empty(section, "file") {
            config.progress.file = Some(expand_tilde(v));
        }
        if let Some(v) = section.get("log_interval_secs") {
            config.progress.log_interval_secs = parse_number(
                v,
                "progress",
                "log_interval_secs",
                "must be a non-negative integer (seconds)",
            )?;
        }
        if let Some(v) = section.get("step_interval_ms") {
            config.progress.step_interval_ms = parse_number(
                v,
                "progress",
                "step_interval_ms",
                "must be a non-negative integer (milliseconds)",
            )?;
        }
        if let Some(v) = section.get("verbose") {
            config.progress.verbose = parse_bool(v, "progress", "verbose")?;
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number<T: FromStr>(
    value: &str,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_positive<T: FromStr + Default + PartialOrd>(
    value: &str,
    section: &str,
    key: &str,
) -> Result<T, ConfigFileError> {
    let reason = "must be a positive integer";
    let parsed: T = parse_number(value, section, key, reason)?;
    if parsed <= T::default() {
        return Err(invalid(section, key, value, reason));
    }
    Ok(parsed)
}

fn parse_bool(value: &str, section: &str, key: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

/// Expand ~ to home directory in paths.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        parse_ini(&Ini::load_from_str(content).unwrap())
    }

    #[test]
    fn test_empty_ini_is_default() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_all_sections() {
        let config = parse(
            r#"
[batch]
concurrency = 6
skip_geoms_for_last_levels = 3
dry_run = yes

[lock]
directory = /var/lock/tileseed
timeout = 120

[retry]
max_attempts = 5
initial_delay_ms = 250
max_delay_secs = 10

[progress]
file = /var/lib/tileseed/progress.json
log_interval_secs = 5
step_interval_ms = 100
verbose = off
"#,
        )
        .unwrap();

        assert_eq!(config.batch.concurrency, 6);
        assert_eq!(config.batch.skip_geoms_for_last_levels, 3);
        assert!(config.batch.dry_run);
        assert_eq!(config.lock.directory, PathBuf::from("/var/lock/tileseed"));
        assert_eq!(config.lock.timeout_secs, 120);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 250);
        assert_eq!(config.retry.max_delay_secs, 10);
        assert_eq!(
            config.progress.file,
            Some(PathBuf::from("/var/lib/tileseed/progress.json"))
        );
        assert_eq!(config.progress.log_interval_secs, 5);
        assert_eq!(config.progress.step_interval_ms, 100);
        assert!(!config.progress.verbose);
    }

    #[test]
    fn test_invalid_values() {
        let err = parse("[batch]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref section, ref key, .. }
                if section == "batch" && key == "concurrency"
        ));

        assert!(parse("[retry]\nmax_attempts = lots\n").is_err());
        assert!(parse("[progress]\nverbose = maybe\n").is_err());
        assert!(parse("[lock]\ntimeout = -1\n").is_err());
    }

    #[test]
    fn test_blank_paths_keep_defaults() {
        let config = parse("[lock]\ndirectory =\n[progress]\nfile = \n").unwrap();
        assert_eq!(config.lock.directory, super::super::default_lock_directory());
        assert!(config.progress.file.is_none());
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/locks"), home.join("locks"));
        }
        assert_eq!(expand_tilde("/tmp/locks"), PathBuf::from("/tmp/locks"));
    }
}
