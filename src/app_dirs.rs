//! Where `dishlab` keeps its config file and launch logs.
//!
//! Everything lives in one `.dishlab` folder. Its parent is, in order: a
//! test override, `DISHLAB_CONFIG_HOME`, then the OS config directory. The
//! chosen parent is reported alongside the path so `dishlab config show` can
//! explain which one won.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the config home.
pub const APP_DIR_NAME: &str = ".dishlab";
/// Environment variable that relocates the config home.
pub const CONFIG_HOME_ENV: &str = "DISHLAB_CONFIG_HOME";
/// Subdirectory of the app directory holding per-launch logs.
pub const LOGS_DIR_NAME: &str = "logs";

static CONFIG_BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("No config home found; set {CONFIG_HOME_ENV} to choose one")]
    NoBaseDir,
    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Which source supplied the config home.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HomeOrigin {
    Override,
    Environment,
    Platform,
}

impl fmt::Display for HomeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => f.write_str("override"),
            Self::Environment => f.write_str(CONFIG_HOME_ENV),
            Self::Platform => f.write_str("OS config directory"),
        }
    }
}

/// The resolved `.dishlab` directory and where its parent came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppDir {
    pub root: PathBuf,
    pub origin: HomeOrigin,
}

impl AppDir {
    /// Resolve the app directory, creating it if needed.
    pub fn locate() -> Result<Self, AppDirError> {
        let (home, origin) = config_home().ok_or(AppDirError::NoBaseDir)?;
        let root = home.join(APP_DIR_NAME);
        ensure_dir(&root)?;
        Ok(Self { root, origin })
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// The logs directory, created on demand.
    pub fn logs(&self) -> Result<PathBuf, AppDirError> {
        let path = self.root.join(LOGS_DIR_NAME);
        ensure_dir(&path)?;
        Ok(path)
    }
}

pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    AppDir::locate()?.logs()
}

fn ensure_dir(path: &Path) -> Result<(), AppDirError> {
    std::fs::create_dir_all(path).map_err(|source| AppDirError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn config_home() -> Option<(PathBuf, HomeOrigin)> {
    if let Some(path) = CONFIG_BASE_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
    {
        return Some((path, HomeOrigin::Override));
    }
    if let Some(path) = std::env::var_os(CONFIG_HOME_ENV).filter(|path| !path.is_empty()) {
        return Some((PathBuf::from(path), HomeOrigin::Environment));
    }
    BaseDirs::new().map(|dirs| (dirs.config_dir().to_path_buf(), HomeOrigin::Platform))
}

#[cfg(test)]
static OVERRIDE_TEST_LOCK: Mutex<()> = Mutex::new(());

/// Scoped override of the config home, restored on drop.
///
/// Holds a process-wide lock so tests touching the override run one at a time.
#[cfg(test)]
pub(crate) struct ConfigBaseGuard {
    _lock: std::sync::MutexGuard<'static, ()>,
}

#[cfg(test)]
impl ConfigBaseGuard {
    pub(crate) fn set(path: PathBuf) -> Self {
        let lock = OVERRIDE_TEST_LOCK
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        *CONFIG_BASE_OVERRIDE
            .lock()
            .unwrap_or_else(|err| err.into_inner()) = Some(path);
        Self { _lock: lock }
    }
}

#[cfg(test)]
impl Drop for ConfigBaseGuard {
    fn drop(&mut self) {
        if let Ok(mut guard) = CONFIG_BASE_OVERRIDE.lock() {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn override_places_config_and_logs_under_one_root() {
        let base = tempdir().unwrap();
        let _guard = ConfigBaseGuard::set(base.path().to_path_buf());
        let dir = AppDir::locate().unwrap();
        assert_eq!(dir.origin, HomeOrigin::Override);
        assert_eq!(dir.root, base.path().join(APP_DIR_NAME));
        assert!(dir.root.is_dir());
        assert_eq!(dir.file("config.toml"), dir.root.join("config.toml"));

        let logs = logs_dir().unwrap();
        assert_eq!(logs, dir.root.join(LOGS_DIR_NAME));
        assert!(logs.is_dir());
    }

    #[test]
    fn origin_names_the_environment_variable() {
        assert_eq!(HomeOrigin::Environment.to_string(), CONFIG_HOME_ENV);
        assert_eq!(HomeOrigin::Platform.to_string(), "OS config directory");
    }
}
