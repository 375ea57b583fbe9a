use crate::storage::StoreOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SonicConfig {
    pub database: Option<String>,
    #[serde(default)]
    pub store: StoreOptions,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("sonicstore.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".sonicstore").join("sonicstore.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<SonicConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: SonicConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

impl SonicConfig {
    /// Database path: explicit flag, then config, then the default under `base`
    pub fn database_path(&self, flag: Option<&Path>, base: &Path) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.database.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| default_database_path_in(base))
    }
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
