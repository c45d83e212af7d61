//! On-disk migration units.
//!
//! Each unit is a directory named `<unix-timestamp>-<description>` holding a
//! forward and a reverse script:
//!
//! ```text
//! migrations/
//!   1700000000-create-users/
//!     migration.sql
//!     rollback.sql
//! ```

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use dbman_core::config::MigrationsConfig;
use dbman_core::error::{DbmanError, Result};
use dbman_core::migration::{unit_name, unit_timestamp, Direction, MigrationUnit};

/// Reads migration units from the migrations directory.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    root: PathBuf,
    forward_file: String,
    reverse_file: String,
}

impl MigrationStore {
    pub fn new(config: &MigrationsConfig) -> Self {
        Self {
            root: config.dir.clone(),
            forward_file: config.forward_file.clone(),
            reverse_file: config.reverse_file.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unit names in chronological order.
    ///
    /// Names are stably ordered by their numeric timestamp prefix over
    /// storage order, which is byte-wise name order. Plain files in the root
    /// are not units and are ignored.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|source| self.read_error(&self.root, source))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| self.read_error(&self.root, source))?
        {
            let path = entry.path();
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|source| self.read_error(&path, source))?;
            if !metadata.is_dir() {
                debug!("Skipping non-directory entry {:?}", path);
                continue;
            }

            let name = entry.file_name().into_string().map_err(|raw| {
                DbmanError::MalformedUnitName(raw.to_string_lossy().into_owned())
            })?;
            names.push(name);
        }

        // Storage order is byte-wise name order; read_dir guarantees none.
        names.sort();
        let mut keyed = names
            .into_iter()
            .map(|name| unit_timestamp(&name).map(|ts| (ts, name)))
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by_key(|(ts, _)| *ts);

        debug!("Found {} migration units in {:?}", keyed.len(), self.root);
        Ok(keyed.into_iter().map(|(_, name)| name).collect())
    }

    /// Read one script of a unit. A zero-length file yields an empty string.
    pub async fn load_script(&self, name: &str, direction: Direction) -> Result<String> {
        let dir = self.unit_dir(name).await?;
        let path = dir.join(self.script_file(direction));

        match tokio::fs::read_to_string(&path).await {
            Ok(script) => Ok(script),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DbmanError::ScriptNotFound {
                unit: name.to_string(),
                path,
            }),
            Err(source) => Err(self.read_error(&path, source)),
        }
    }

    /// Read both scripts of a unit.
    pub async fn load(&self, name: &str) -> Result<MigrationUnit> {
        Ok(MigrationUnit {
            name: name.to_string(),
            forward: self.load_script(name, Direction::Forward).await?,
            reverse: self.load_script(name, Direction::Reverse).await?,
        })
    }

    /// Scaffold a new unit stamped with the current time, with both scripts
    /// empty. Returns the unit name.
    pub async fn create(&self, description: &str) -> Result<String> {
        let name = unit_name(chrono::Utc::now().timestamp(), description)?;
        let dir = self.root.join(&name);

        if tokio::fs::try_exists(&dir).await? {
            return Err(DbmanError::Config(format!(
                "Migration directory already exists: {}",
                dir.display()
            )));
        }

        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&self.forward_file), "").await?;
        tokio::fs::write(dir.join(&self.reverse_file), "").await?;

        debug!("Created migration unit {:?}", dir);
        Ok(name)
    }

    /// File name of the script for a direction.
    pub fn script_file(&self, direction: Direction) -> &str {
        match direction {
            Direction::Forward => &self.forward_file,
            Direction::Reverse => &self.reverse_file,
        }
    }

    async fn unit_dir(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single {
            return Err(DbmanError::UnitNotFound(name.to_string()));
        }

        let dir = self.root.join(name);
        match tokio::fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => Ok(dir),
            Ok(_) => Err(DbmanError::UnitNotFound(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DbmanError::UnitNotFound(name.to_string()))
            }
            Err(source) => Err(self.read_error(&dir, source)),
        }
    }

    fn read_error(&self, path: &Path, source: std::io::Error) -> DbmanError {
        DbmanError::StorageRead {
            path: path.to_path_buf(),
            source,
        }
    }
}
