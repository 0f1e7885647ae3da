use crate::{game, game::GameId, paths};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub active_game: GameId,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default = "default_true")]
    pub confirm_profile_delete: bool,
}

impl AppConfig {
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let path = data_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            if !game::supported_games().contains(&config.active_game) {
                config.active_game = GameId::default();
                config.save(data_dir)?;
            }
            return Ok(config);
        }

        let config = AppConfig {
            active_game: GameId::default(),
            active_profile: None,
            confirm_profile_delete: true,
        };
        config.save(data_dir)?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let path = data_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    paths::base_data_dir()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_or_create_writes_defaults_once() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().to_path_buf();
        let first = AppConfig::load_or_create(&data).unwrap();
        assert_eq!(first.active_game, GameId::default());
        assert!(first.confirm_profile_delete);

        let mut changed = first.clone();
        changed.active_profile = Some("Main".to_string());
        changed.save(&data).unwrap();
        let reread = AppConfig::load_or_create(&data).unwrap();
        assert_eq!(reread.active_profile.as_deref(), Some("Main"));
    }
}
