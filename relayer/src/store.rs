use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::*;

use crate::{
    error::RegistryError,
    registry::{Config, SUPPORTED_VERSION},
};

/// Persistence for the relayer [Config].
///
/// Every mutation goes through [ConfigStore::modify], which loads the whole registry, applies the change and writes
/// the whole registry back while excluding other writers. If the change returns an error, nothing is written.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Config, RegistryError>;

    fn save(&self, config: &Config) -> Result<(), RegistryError>;

    fn modify(
        &self,
        change: &mut dyn FnMut(&mut Config) -> Result<(), RegistryError>,
    ) -> Result<Config, RegistryError>;
}

fn check_version(config: &Config, location: &str) -> Result<(), RegistryError> {
    if *config != Config::default() && config.version != SUPPORTED_VERSION {
        return Err(RegistryError::Schema {
            location: location.to_owned(),
            found: config.version.clone(),
        });
    }
    Ok(())
}

fn stamped(config: &Config) -> Config {
    Config {
        version: SUPPORTED_VERSION.to_owned(),
        ..config.clone()
    }
}

/// A YAML registry file.
///
/// Saves are atomic: the new contents are written to a temporary file next to the target, which is then renamed over
/// it. Mutations additionally hold an exclusive advisory lock on `<file>.lock`, so concurrent relayer processes
/// serialize their load-modify-save cycles.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn ensure_parent_dir(&self) -> Result<&Path, RegistryError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| RegistryError::io(dir.display().to_string(), e))?;
        Ok(dir)
    }

    fn lock(&self) -> Result<File, RegistryError> {
        self.ensure_parent_dir()?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| RegistryError::io(lock_path.display().to_string(), e))?;
        // Released when the handle is closed.
        file.lock()
            .map_err(|e| RegistryError::io(lock_path.display().to_string(), e))?;
        Ok(file)
    }
}

impl ConfigStore for FileStore {
    fn load(&self) -> Result<Config, RegistryError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no relayer registry yet");
                return Ok(Config::default());
            }
            Err(e) => return Err(RegistryError::io(self.location(), e)),
        };
        if contents.trim().is_empty() {
            return Ok(Config::default());
        }

        let config: Config =
            serde_yaml::from_str(&contents).map_err(|source| RegistryError::Encoding {
                location: self.location(),
                source,
            })?;
        check_version(&config, &self.location())?;
        Ok(config)
    }

    fn save(&self, config: &Config) -> Result<(), RegistryError> {
        let config = stamped(config);
        let contents = serde_yaml::to_string(&config).map_err(|source| RegistryError::Encoding {
            location: self.location(),
            source,
        })?;

        let dir = self.ensure_parent_dir()?;
        let write = || -> io::Result<()> {
            let mut file = NamedTempFile::new_in(dir)?;
            file.write_all(contents.as_bytes())?;
            file.as_file().sync_all()?;
            file.persist(&self.path).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|e| RegistryError::io(self.location(), e))?;

        trace!(path = %self.path.display(), chains = config.chains.len(), paths = config.paths.len(), "saved relayer registry");
        Ok(())
    }

    fn modify(
        &self,
        change: &mut dyn FnMut(&mut Config) -> Result<(), RegistryError>,
    ) -> Result<Config, RegistryError> {
        let _writer = self.writer.lock();
        let _lock = self.lock()?;

        let mut config = self.load()?;
        change(&mut config)?;
        let config = stamped(&config);
        self.save(&config)?;
        Ok(config)
    }
}

/// A registry held in memory, for tests and embedders which do not want to touch the filesystem.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: Mutex<Config>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing registry exactly as given; it is not version-stamped until the first save.
    pub fn with_config(config: Config) -> Self {
        MemoryStore {
            config: Mutex::new(config),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Config, RegistryError> {
        let config = self.config.lock().clone();
        check_version(&config, "<memory>")?;
        Ok(config)
    }

    fn save(&self, config: &Config) -> Result<(), RegistryError> {
        *self.config.lock() = stamped(config);
        Ok(())
    }

    fn modify(
        &self,
        change: &mut dyn FnMut(&mut Config) -> Result<(), RegistryError>,
    ) -> Result<Config, RegistryError> {
        let mut current = self.config.lock();
        check_version(&current, "<memory>")?;

        let mut config = current.clone();
        change(&mut config)?;
        let config = stamped(&config);
        *current = config.clone();
        Ok(config)
    }
}
