//! Where preload keeps `preload.json` and `preload.log`.
//!
//! One base directory per file kind, resolved in this order:
//! 1. `--config-dir` from the command line
//! 2. `$PRELOAD_CONFIG_DIR`
//! 3. the working directory, if it already holds one of our files
//! 4. the platform location from dirs-next: settings under the config dir
//!    (`~/.config/preload` on Linux), logs under the data dir
//!    (`~/.local/share/preload`)
//!
//! Steps 1-3 give both kinds the same directory.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Settings file name
pub const CONFIG_FILE: &str = "preload.json";

/// Default log file name
pub const LOG_FILE: &str = "preload.log";

/// Environment override for the base directory
pub const ENV_CONFIG_DIR: &str = "PRELOAD_CONFIG_DIR";

const APP_DIR: &str = "preload";

/// Explicit base directory, if the user picked one.
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// CLI value first, then `$PRELOAD_CONFIG_DIR`.
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        Self::pick(cli_dir, std::env::var_os(ENV_CONFIG_DIR))
    }

    fn pick(cli_dir: Option<PathBuf>, env_dir: Option<OsString>) -> Self {
        Self {
            config_dir: cli_dir.or_else(|| env_dir.filter(|d| !d.is_empty()).map(PathBuf::from)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirKind {
    Config,
    Data,
}

impl DirKind {
    fn platform_base(self) -> Option<PathBuf> {
        match self {
            DirKind::Config => dirs_next::config_dir(),
            DirKind::Data => dirs_next::data_dir(),
        }
    }
}

fn holds_our_files(dir: &Path) -> bool {
    [CONFIG_FILE, LOG_FILE].iter().any(|f| dir.join(f).is_file())
}

fn resolve_dir(kind: DirKind, config: &PathConfig, cwd: Option<&Path>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(cwd) = cwd.filter(|d| holds_our_files(d)) {
        return cwd.to_path_buf();
    }
    kind.platform_base()
        .map(|base| base.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn base_dir(kind: DirKind, config: &PathConfig) -> PathBuf {
    let cwd = std::env::current_dir().ok();
    resolve_dir(kind, config, cwd.as_deref())
}

/// Path of a settings file such as [`CONFIG_FILE`].
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    base_dir(DirKind::Config, config).join(name)
}

/// Path of a runtime file such as [`LOG_FILE`].
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    base_dir(DirKind::Data, config).join(name)
}

/// Create both base directories if missing.
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let mut dirs = vec![base_dir(DirKind::Config, config), base_dir(DirKind::Data, config)];
    dirs.dedup();
    for dir in dirs {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(dir: &str) -> PathConfig {
        PathConfig {
            config_dir: Some(PathBuf::from(dir)),
        }
    }

    #[test]
    fn test_custom_dir_holds_both_kinds() {
        let config = custom("/custom");
        assert_eq!(config_file(CONFIG_FILE, &config), PathBuf::from("/custom/preload.json"));
        assert_eq!(data_file(LOG_FILE, &config), PathBuf::from("/custom/preload.log"));
    }

    #[test]
    fn test_cli_dir_wins_over_env() {
        let config = PathConfig::pick(Some(PathBuf::from("/from-cli")), Some("/from-env".into()));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from-cli")));

        let config = PathConfig::pick(None, Some("/from-env".into()));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from-env")));

        let config = PathConfig::pick(None, Some(OsString::new()));
        assert!(config.config_dir.is_none());
    }

    #[test]
    fn test_working_dir_used_only_when_it_has_our_files() {
        let temp = tempfile::tempdir().unwrap();
        let config = PathConfig::default();

        let dir = resolve_dir(DirKind::Config, &config, Some(temp.path()));
        assert_ne!(dir, temp.path());
        assert!(dir.ends_with(APP_DIR) || dir == Path::new("."));

        std::fs::write(temp.path().join(LOG_FILE), "").unwrap();
        assert_eq!(resolve_dir(DirKind::Config, &config, Some(temp.path())), temp.path());
        assert_eq!(resolve_dir(DirKind::Data, &config, Some(temp.path())), temp.path());
    }

    #[test]
    fn test_explicit_dir_beats_working_dir() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "{}").unwrap();
        let config = custom("/explicit");
        assert_eq!(
            resolve_dir(DirKind::Data, &config, Some(temp.path())),
            PathBuf::from("/explicit")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_custom_dir() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("nested").join("cfg");
        let config = PathConfig {
            config_dir: Some(dir.clone()),
        };

        ensure_dirs(&config).unwrap();
        assert!(dir.is_dir());
        // Existing directory is fine
        ensure_dirs(&config).unwrap();
    }
}
