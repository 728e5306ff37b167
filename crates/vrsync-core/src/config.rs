// Configuration loading and parsing (sync.toml, credentials.toml).

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SYNC_FILE: &str = "sync.toml";

/// Explicit start years at or below this value are treated as "not set".
const MIN_EXPLICIT_START_YEAR: i32 = 2012;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub vrapi: VrApiConfig,
    pub import: ImportConfig,
    pub credentials: CredentialsConfig,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// sync.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire sync.toml file.
#[derive(Debug, Clone, Deserialize)]
struct SyncFile {
    vrapi: VrApiConfig,
    import: ImportConfig,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VrApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// Oldest year scanned. When absent (or not later than 2012) the floor is
    /// derived from the current date, see [`ImportConfig::effective_start_year`].
    #[serde(default)]
    pub upload_start_year: Option<i32>,
    /// The scan stops once this many tournaments have been created in one run.
    pub upload_limit: u64,
    /// Chance (0-100) that an up-to-date box ladder is reloaded anyway.
    pub box_ladder_force_reload_percent: f64,
    /// Minutes between scheduled runs. Zero runs a single import and exits.
    #[serde(default)]
    pub interval_minutes: u64,
}

impl ImportConfig {
    /// The floor year of the backward scan.
    ///
    /// An explicit year later than 2012 wins. Otherwise, from June onwards
    /// only the current year is loaded; before June the previous year is
    /// loaded as well.
    pub fn effective_start_year(&self, today: NaiveDate) -> i32 {
        match self.upload_start_year {
            Some(year) if year > MIN_EXPLICIT_START_YEAR => year,
            _ => {
                if today.month0() > 4 {
                    today.year()
                } else {
                    today.year() - 1
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub vrapi_user: Option<String>,
    pub vrapi_password: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/sync.toml` and (optionally)
/// `config/credentials.toml`, relative to the given `base_dir`.
///
/// This does not copy defaults. Prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- sync.toml (required) ---
    let sync_path = config_dir.join(SYNC_FILE);
    let sync_text = read_file(&sync_path)?;
    let sync_file: SyncFile = toml::from_str(&sync_text).map_err(|e| ConfigError::ParseError {
        path: sync_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        vrapi: sync_file.vrapi,
        import: sync_file.import,
        credentials,
        db_path: sync_file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/sync.toml` from `defaults/sync.toml` if it is missing.
///
/// Returns the path written, or `None` when a `sync.toml` was already in
/// place. `credentials.toml` is never seeded; it holds secrets and is
/// optional.
pub fn ensure_sync_toml(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(SYNC_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(SYNC_FILE);
    let copy_error = |what: &str, path: &Path, e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to {what} {}: {e}", path.display()),
    };

    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no {} and no {} to seed it from; run from the project root",
                target.display(),
                source.display()
            ),
        });
    }
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| copy_error("create", dir, e))?;
    }
    std::fs::copy(&source, &target).map_err(|e| copy_error("copy to", &target, e))?;
    Ok(Some(target))
}

/// Loads config relative to the current working directory, copying default
/// config files first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_sync_toml(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.vrapi.base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "vrapi.base_url".into(),
            message: "must not be empty".into(),
        });
    }

    if config.import.upload_limit == 0 {
        return Err(ConfigError::ValidationError {
            field: "import.upload_limit".into(),
            message: "must be greater than 0".into(),
        });
    }

    let pct = config.import.box_ladder_force_reload_percent;
    if !(0.0..=100.0).contains(&pct) {
        return Err(ConfigError::ValidationError {
            field: "import.box_ladder_force_reload_percent".into(),
            message: format!("must be between 0 and 100 inclusive, got {pct}"),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Repository root, where `defaults/` lives.
    fn project_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    /// Fresh temp dir with `config/sync.toml` built from the shipped defaults
    /// after applying `edit`.
    fn temp_config_dir(name: &str, edit: impl Fn(String) -> String) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let config_dir = tmp.join("config");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&config_dir).unwrap();

        let text = fs::read_to_string(project_root().join("defaults/sync.toml")).unwrap();
        fs::write(config_dir.join("sync.toml"), edit(text)).unwrap();
        tmp
    }

    fn import_config(upload_start_year: Option<i32>) -> ImportConfig {
        ImportConfig {
            upload_start_year,
            upload_limit: 10,
            box_ladder_force_reload_percent: 0.0,
            interval_minutes: 0,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = temp_config_dir("vrsync_config_valid", |s| s);
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.vrapi.base_url, "https://api.tournamentsoftware.com/1.0");
        assert_eq!(config.vrapi.timeout_secs, 30);
        assert_eq!(config.import.upload_start_year, None);
        assert_eq!(config.import.upload_limit, 10);
        assert!((config.import.box_ladder_force_reload_percent - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.import.interval_minutes, 360);
        assert_eq!(config.db_path, "vrsync.db");
        assert!(config.credentials.vrapi_user.is_none());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn credentials_toml_is_read_when_present() {
        let tmp = temp_config_dir("vrsync_config_creds", |s| s);
        fs::write(
            tmp.join("config/credentials.toml"),
            "vrapi_user = \"loader\"\nvrapi_password = \"secret\"\n",
        )
        .unwrap();

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.credentials.vrapi_user.as_deref(), Some("loader"));
        assert_eq!(config.credentials.vrapi_password.as_deref(), Some("secret"));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_upload_limit() {
        let tmp = temp_config_dir("vrsync_config_zero_limit", |s| {
            s.replace("upload_limit = 10", "upload_limit = 0")
        });

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "import.upload_limit");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_reload_percent_above_100() {
        let tmp = temp_config_dir("vrsync_config_pct", |s| {
            s.replace(
                "box_ladder_force_reload_percent = 10.0",
                "box_ladder_force_reload_percent = 150.0",
            )
        });

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "import.box_ladder_force_reload_percent");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_config_dir("vrsync_config_invalid", |_| "not [[[ toml".to_string());

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_sync_toml() {
        let tmp = std::env::temp_dir().join("vrsync_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("sync.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn sync_toml_is_seeded_once_from_defaults() {
        let tmp = std::env::temp_dir().join("vrsync_config_seed");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(
            project_root().join("defaults/sync.toml"),
            tmp.join("defaults/sync.toml"),
        )
        .unwrap();
        fs::write(tmp.join("defaults/credentials.toml.example"), "vrapi_user = \"x\"\n").unwrap();

        let seeded = ensure_sync_toml(&tmp).expect("should seed");
        assert_eq!(seeded, Some(tmp.join("config/sync.toml")));
        assert!(!tmp.join("config/credentials.toml.example").exists());
        assert!(load_config_from(&tmp).is_ok());

        // An edited sync.toml is left alone.
        fs::write(tmp.join("config/sync.toml"), "edited").unwrap();
        assert_eq!(ensure_sync_toml(&tmp).unwrap(), None);
        assert_eq!(fs::read_to_string(tmp.join("config/sync.toml")).unwrap(), "edited");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn seeding_fails_without_defaults() {
        let tmp = std::env::temp_dir().join("vrsync_config_no_defaults");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_sync_toml(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));
        assert!(!tmp.join("config").exists());

        let _ = fs::remove_dir_all(&tmp);
    }

    // ------------------------------------------------------------------
    // Effective start year
    // ------------------------------------------------------------------

    #[test]
    fn explicit_start_year_wins_when_recent() {
        let cfg = import_config(Some(2019));
        assert_eq!(cfg.effective_start_year(date(2024, 3, 1)), 2019);
    }

    #[test]
    fn old_explicit_start_year_falls_back_to_date() {
        let cfg = import_config(Some(2012));
        assert_eq!(cfg.effective_start_year(date(2024, 3, 1)), 2023);
    }

    #[test]
    fn derived_start_year_before_and_after_june() {
        let cfg = import_config(None);
        assert_eq!(cfg.effective_start_year(date(2024, 5, 31)), 2023);
        assert_eq!(cfg.effective_start_year(date(2024, 6, 1)), 2024);
    }
}
