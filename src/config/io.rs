use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::OpenOptions;
use std::str;
use log::{info, warn};

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to nuimo-link.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // /opt/nuimo-link => /opt/nuimo-link.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to nuimo-link.json in an os dependent standard directory, such as ~/.config on linux.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "senic", "nuimo-link").map(|dirs| {
        dirs.config_dir().join("nuimo-link.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            }
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
                }
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

/// The configuration file. Clones share the same open file.
#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    /// Opens (or creates) the configuration file at `path`, or at the default location.
    pub fn new_sync(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => get_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            if !directory.as_os_str().is_empty() {
                std::fs::create_dir_all(directory)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    /// An exclusive file lock, so that the configuration file is used by only one instance of
    /// this application.
    pub fn locker(&mut self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    // None if the file is blank
    async fn read_content(&self) -> Result<Option<String>, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        Ok(Some(str::from_utf8(&content)?.to_string()))
    }

    /// Missing fields result in default values. An empty file is filled with the default values
    /// so that there is something to edit after the first run.
    pub async fn read_or_init(&self) -> Result<Config, ConfigError> {
        match self.read_content().await? {
            Some(content) => Ok(serde_json::from_str(&content)?),
            None => {
                let config = Config::default();
                self.save(&config).await?;
                Ok(config)
            },
        }
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("nuimo-link-{}-{}.json", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn test_saved_config_is_read_back() {
        let path = temp_config_path("save");
        let config_io = ConfigIO::new_sync(Some(&path)).unwrap();

        let config = Config { detect_unreachable: true, matrix_brightness: 0.25, ..Config::default() };
        config_io.save(&config).await.unwrap();
        assert_eq!(config_io.read_or_init().await.unwrap(), config);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_first_run_writes_defaults() {
        let path = temp_config_path("init");
        let config_io = ConfigIO::new_sync(Some(&path)).unwrap();

        assert_eq!(config_io.read_or_init().await.unwrap(), Config::default());
        let written: Config = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, Config::default());

        // an existing file is left alone
        let config = Config { detect_unreachable: true, ..Config::default() };
        config_io.save(&config).await.unwrap();
        let before = std::fs::read_to_string(&path).unwrap();
        assert_eq!(config_io.read_or_init().await.unwrap(), config);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let path = temp_config_path("invalid");
        std::fs::write(&path, "{ nope").unwrap();
        let config_io = ConfigIO::new_sync(Some(&path)).unwrap();

        assert!(matches!(config_io.read_or_init().await, Err(ConfigError::JsonError { .. })));
        assert!(!config_io.read_or_init().await.unwrap_err().is_file_not_found_error());
        // a broken file is not replaced with defaults
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ nope");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let path = temp_config_path("lock");
        let mut first = ConfigIO::new_sync(Some(&path)).unwrap();
        let mut second = ConfigIO::new_sync(Some(&path)).unwrap();

        let mut first_locker = first.locker().unwrap();
        let _guard = first_locker.lock().unwrap();
        let mut second_locker = second.locker().unwrap();
        assert!(matches!(second_locker.lock(), Err(ConfigError::CanNotLock { .. })));

        drop(_guard);
        let _ = std::fs::remove_file(&path);
    }
}
