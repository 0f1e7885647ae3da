use crate::modid;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

/// Policy for writes into a mod's private storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Non-destructive default: never touch a file already in storage.
    Keep,
    /// Existing files may be overwritten in place.
    Overwrite,
    /// Storage is cleared first, then populated fresh.
    Replace,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Keep
    }
}

/// One staged candidate awaiting placement.
#[derive(Debug, Clone)]
pub struct ImportFile {
    pub source: PathBuf,
    /// Path relative to the staging root, `/`-separated.
    pub relative: String,
    pub enabled: bool,
}

/// Explicit source→destination rewrite from an installer selection.
#[derive(Debug, Clone)]
pub struct PathMapping {
    pub source_prefix: String,
    pub destination: String,
}

/// An in-flight mod addition, consumed once by [`complete_mod_import`].
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub staging_dir: PathBuf,
    pub files: Vec<ImportFile>,
    pub mappings: Vec<PathMapping>,
    /// Recognized install-root subdirectories inside the staging tree.
    pub install_roots: Vec<String>,
    pub plugin_files: Vec<String>,
    pub strategy: MergeStrategy,
    /// Import came from a user's folder that must be preserved: copy
    /// instead of move.
    pub preserve_source: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub placed: usize,
    pub skipped_existing: usize,
    pub remapped: usize,
}

/// Strip `prefix` from the front of `path`, component-wise and
/// case-insensitively. Returns the remainder without a leading slash.
fn strip_component_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    let mut rest = path;
    for want in prefix.split('/') {
        let (head, tail) = match rest.split_once('/') {
            Some(parts) => parts,
            None => return None,
        };
        if !head.eq_ignore_ascii_case(want) {
            return None;
        }
        rest = tail;
    }
    Some(rest)
}

fn strip_data_root_token<'a>(dest: &'a str, token: &str) -> &'a str {
    strip_component_prefix(dest, token).unwrap_or(dest)
}

/// Destination for one candidate, or `None` if it is excluded.
fn destination_for(
    file: &ImportFile,
    mappings: &[PathMapping],
    install_roots: &[String],
    data_root_token: &str,
) -> Option<String> {
    // Longest matching explicit mapping wins over the plain enabled flag.
    let mut best: Option<(&PathMapping, &str)> = None;
    for mapping in mappings {
        if let Some(rest) = strip_component_prefix(&file.relative, &mapping.source_prefix) {
            let longer = match best {
                Some((current, _)) => mapping.source_prefix.len() > current.source_prefix.len(),
                None => true,
            };
            if longer {
                best = Some((mapping, rest));
            }
        }
    }
    if let Some((mapping, rest)) = best {
        let dest = if mapping.destination.is_empty() {
            rest.to_string()
        } else if rest.is_empty() {
            mapping.destination.clone()
        } else {
            format!("{}/{}", mapping.destination, rest)
        };
        return Some(strip_data_root_token(&dest, data_root_token).to_string());
    }

    if !file.enabled {
        return None;
    }

    if install_roots.is_empty() {
        return Some(strip_data_root_token(&file.relative, data_root_token).to_string());
    }

    for root in install_roots {
        if let Some(rest) = strip_component_prefix(&file.relative, root) {
            if !rest.is_empty() {
                return Some(strip_data_root_token(rest, data_root_token).to_string());
            }
        }
    }
    None
}

/// Place a staged candidate set into a mod's private storage directory.
/// Writes run strictly in candidate order; with several install roots the
/// relative order is what lets later files intentionally replace earlier
/// ones. Never touches the game directory.
pub fn complete_mod_import(request: &ImportRequest, storage_dir: &Path) -> Result<MergeReport> {
    complete_mod_import_with_data_root(request, storage_dir, "")
}

pub fn complete_mod_import_with_data_root(
    request: &ImportRequest,
    storage_dir: &Path,
    data_root_token: &str,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();

    // Deduplicate by destination keeping the last-seen mapping; the write
    // slot moves to the later candidate's position.
    let mut ordered: Vec<Option<(String, PathBuf)>> = Vec::new();
    let mut by_dest: HashMap<String, usize> = HashMap::new();
    for file in &request.files {
        let Some(dest) = destination_for(
            file,
            &request.mappings,
            &request.install_roots,
            data_root_token,
        ) else {
            continue;
        };
        if dest.is_empty() {
            continue;
        }
        if let Some(prior) = by_dest.get(&dest) {
            if let Some((_, prior_source)) = ordered[*prior].take() {
                warn!(
                    "import mapping {:?} -> {dest} replaces earlier mapping from {:?}",
                    file.source, prior_source
                );
                report.remapped += 1;
            }
        }
        by_dest.insert(dest.clone(), ordered.len());
        ordered.push(Some((dest, file.source.clone())));
    }

    if request.strategy == MergeStrategy::Replace && storage_dir.exists() {
        fs::remove_dir_all(storage_dir).context("clear mod storage")?;
    }
    fs::create_dir_all(storage_dir).context("create mod storage")?;

    let may_overwrite = matches!(
        request.strategy,
        MergeStrategy::Overwrite | MergeStrategy::Replace
    );

    for slot in ordered.into_iter().flatten() {
        let (dest_rel, source) = slot;
        let dest = storage_dir.join(&dest_rel);
        if dest.exists() && !may_overwrite {
            match (modid::file_digest(&source), modid::file_digest(&dest)) {
                (Ok(new), Ok(existing)) if new == existing => {
                    debug!("import skip {dest_rel}: identical file already stored")
                }
                _ => info!("import skip {dest_rel}: keeping existing file"),
            }
            report.skipped_existing += 1;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create storage subdir")?;
        }
        if request.preserve_source {
            fs::copy(&source, &dest)
                .with_context(|| format!("copy {:?} -> {:?}", source, dest))?;
        } else {
            move_file(&source, &dest)?;
        }
        report.placed += 1;
    }

    Ok(report)
}

/// Rename with copy+remove fallback for cross-device staging dirs.
fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest).with_context(|| format!("copy {:?} -> {:?}", source, dest))?;
    fs::remove_file(source).with_context(|| format!("remove staged {:?}", source))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stage(dir: &TempDir, files: &[(&str, &str)]) -> Vec<ImportFile> {
        files
            .iter()
            .map(|(rel, contents)| {
                let path = dir.path().join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, contents).unwrap();
                ImportFile {
                    source: path,
                    relative: rel.to_string(),
                    enabled: true,
                }
            })
            .collect()
    }

    fn request(staging: &TempDir, files: Vec<ImportFile>) -> ImportRequest {
        ImportRequest {
            staging_dir: staging.path().to_path_buf(),
            files,
            mappings: Vec::new(),
            install_roots: Vec::new(),
            plugin_files: Vec::new(),
            strategy: MergeStrategy::Keep,
            preserve_source: true,
        }
    }

    #[test]
    fn disabled_files_are_excluded() {
        let staging = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let mut files = stage(&staging, &[("a.dds", "a"), ("b.dds", "b")]);
        files[1].enabled = false;
        let report = complete_mod_import(&request(&staging, files), storage.path()).unwrap();
        assert_eq!(report.placed, 1);
        assert!(storage.path().join("a.dds").exists());
        assert!(!storage.path().join("b.dds").exists());
    }

    #[test]
    fn mapping_rewrites_and_strips_data_root() {
        let staging = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let files = stage(&staging, &[("optional/textures/texA.dds", "x")]);
        let mut req = request(&staging, files);
        req.mappings = vec![PathMapping {
            source_prefix: "optional".to_string(),
            destination: "Data Files/textures-hd".to_string(),
        }];
        let report =
            complete_mod_import_with_data_root(&req, storage.path(), "Data Files").unwrap();
        assert_eq!(report.placed, 1);
        assert!(storage
            .path()
            .join("textures-hd/textures/texA.dds")
            .exists());
    }

    #[test]
    fn install_roots_gate_unmapped_files() {
        let staging = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let files = stage(
            &staging,
            &[("Core/meshes/a.nif", "a"), ("readme.txt", "r")],
        );
        let mut req = request(&staging, files);
        req.install_roots = vec!["Core".to_string()];
        let report = complete_mod_import(&req, storage.path()).unwrap();
        assert_eq!(report.placed, 1);
        assert!(storage.path().join("meshes/a.nif").exists());
        assert!(!storage.path().join("readme.txt").exists());
    }

    #[test]
    fn duplicate_destinations_keep_last_seen() {
        let staging = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let files = stage(
            &staging,
            &[("Core/tex.dds", "first"), ("Patch/tex.dds", "second")],
        );
        let mut req = request(&staging, files);
        req.install_roots = vec!["Core".to_string(), "Patch".to_string()];
        let report = complete_mod_import(&req, storage.path()).unwrap();
        assert_eq!(report.placed, 1);
        assert_eq!(report.remapped, 1);
        assert_eq!(
            fs::read_to_string(storage.path().join("tex.dds")).unwrap(),
            "second"
        );
    }

    #[test]
    fn keep_strategy_preserves_existing_files() {
        let staging = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        fs::write(storage.path().join("tex.dds"), "old").unwrap();
        let files = stage(&staging, &[("tex.dds", "new")]);
        let report = complete_mod_import(&request(&staging, files), storage.path()).unwrap();
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(
            fs::read_to_string(storage.path().join("tex.dds")).unwrap(),
            "old"
        );
    }

    #[test]
    fn replace_is_idempotent_over_prior_contents() {
        let staging = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        fs::write(storage.path().join("stale.dds"), "stale").unwrap();

        for round in 0..2 {
            let files = stage(&staging, &[("tex.dds", "fresh")]);
            let mut req = request(&staging, files);
            req.strategy = MergeStrategy::Replace;
            complete_mod_import(&req, storage.path()).unwrap();
            let mut listing: Vec<String> = fs::read_dir(storage.path())
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            listing.sort();
            assert_eq!(listing, vec!["tex.dds"], "round {round}");
        }
    }

    #[test]
    fn move_import_consumes_the_staging_copy() {
        let staging = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let files = stage(&staging, &[("tex.dds", "x")]);
        let source = files[0].source.clone();
        let mut req = request(&staging, files);
        req.preserve_source = false;
        complete_mod_import(&req, storage.path()).unwrap();
        assert!(!source.exists());
        assert!(storage.path().join("tex.dds").exists());
    }
}
