use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-profile directory overrides. Any unset field falls back to the
/// default layout under the profile's own storage root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathOverrides {
    #[serde(default)]
    pub mods_dir: Option<PathBuf>,
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
    #[serde(default)]
    pub saves_dir: Option<PathBuf>,
    #[serde(default)]
    pub backups_dir: Option<PathBuf>,
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("modfold"))
}

pub fn profiles_root(data_dir: &Path) -> PathBuf {
    data_dir.join("profiles")
}

pub fn profile_root(data_dir: &Path, profile_name: &str) -> PathBuf {
    profiles_root(data_dir).join(profile_name)
}

pub fn profile_file(data_dir: &Path, profile_name: &str) -> PathBuf {
    profile_root(data_dir, profile_name).join("profile.json")
}

pub fn mods_dir(data_dir: &Path, profile_name: &str, overrides: &PathOverrides) -> PathBuf {
    match &overrides.mods_dir {
        Some(path) => path.clone(),
        None => profile_root(data_dir, profile_name).join("mods"),
    }
}

pub fn config_dir(data_dir: &Path, profile_name: &str, overrides: &PathOverrides) -> PathBuf {
    match &overrides.config_dir {
        Some(path) => path.clone(),
        None => profile_root(data_dir, profile_name).join("configs"),
    }
}

pub fn saves_dir(data_dir: &Path, profile_name: &str, overrides: &PathOverrides) -> PathBuf {
    match &overrides.saves_dir {
        Some(path) => path.clone(),
        None => profile_root(data_dir, profile_name).join("saves"),
    }
}

pub fn backups_dir(data_dir: &Path, profile_name: &str, overrides: &PathOverrides) -> PathBuf {
    match &overrides.backups_dir {
        Some(path) => path.clone(),
        None => profile_root(data_dir, profile_name).join("backups"),
    }
}

pub fn mod_storage_dir(mods_dir: &Path, mod_name: &str) -> PathBuf {
    mods_dir.join(mod_name)
}

pub fn resources_dir(data_dir: &Path, game: &str) -> PathBuf {
    data_dir.join("resources").join(game)
}
