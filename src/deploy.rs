use crate::{
    game::{self, GameSpec, PluginListDialect},
    linkprobe::{self, LinkKind},
    overwrite,
    paths,
    profile::{mod_source_dir, FullProfile, ModRef, Profile},
};
use anyhow::{bail, Context, Result};
use filetime::{set_file_mtime, FileTime};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// Hidden manifest file inside the game's data directory. Its presence is
/// the sole signal that a deployment is active for that directory.
pub const MANIFEST_FILE: &str = ".modfold-manifest.json";
/// Hidden sibling directory holding displaced external files.
pub const BACKUP_DIR_NAME: &str = ".modfold-backup";

/// Resting deployment state for a game data directory. The transitional
/// phases of a running deploy or undeploy never rest on disk; the
/// manifest is the only durable marker, and a failed deploy rolls back
/// to `Undeployed` before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Undeployed,
    Deployed,
}

pub fn deploy_state(game_data_dir: &Path) -> DeployState {
    if game_data_dir.join(MANIFEST_FILE).exists() {
        DeployState::Deployed
    } else {
        DeployState::Undeployed
    }
}

/// Record of every file written into the live game directory for one
/// profile. Data-mod paths are stored relative to the data directory so a
/// manifest stays portable across installations; root-mod and managed
/// ancillary paths are absolute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployManifest {
    pub profile: String,
    pub profile_mod_files: Vec<String>,
}

/// Restore found a directory where a file was displaced, or the reverse.
/// Believed unreachable in practice; kept a hard error rather than guessed
/// at.
#[derive(Debug, Error)]
#[error("backup restore mismatch: {backup:?} and {dest:?} differ in kind")]
pub struct RestoreMismatch {
    pub backup: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Default)]
pub struct DeployReport {
    pub files_written: usize,
    pub shadowed_skipped: usize,
    pub externals_displaced: usize,
    pub plugins_listed: usize,
    pub resources_deployed: usize,
    pub link_mode_summary: String,
    pub warnings: Vec<String>,
}

/// Live locations touched by deployment, derived from the profile's game
/// installation descriptor.
#[derive(Debug, Clone)]
pub struct DeployPaths {
    pub game_root: PathBuf,
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub saves_dir: PathBuf,
}

pub fn detect_paths(profile: &FullProfile) -> Result<DeployPaths> {
    let spec = profile.game.spec();
    if profile.game_root.as_os_str().is_empty() {
        bail!("profile {:?} has no game installation path", profile.name);
    }
    if !profile.game_root.is_dir() {
        bail!("game root does not exist: {:?}", profile.game_root);
    }
    Ok(DeployPaths {
        game_root: profile.game_root.clone(),
        data_dir: profile.game_root.join(spec.data_subdir),
        config_dir: profile.game_root.clone(),
        saves_dir: profile.game_root.join(spec.save_subdir),
    })
}

struct PlacementModes {
    use_links: bool,
    source_root: PathBuf,
    modes: HashMap<PathBuf, LinkKind>,
    used: HashSet<LinkKind>,
}

impl PlacementModes {
    fn new(use_links: bool, source_root: PathBuf) -> Self {
        Self {
            use_links,
            source_root,
            modes: HashMap::new(),
            used: HashSet::new(),
        }
    }

    fn mode_for(&mut self, target_root: &Path) -> Result<LinkKind> {
        if !self.use_links {
            self.used.insert(LinkKind::Copy);
            return Ok(LinkKind::Copy);
        }
        if let Some(mode) = self.modes.get(target_root) {
            self.used.insert(*mode);
            return Ok(*mode);
        }
        let caps = linkprobe::probe(&self.source_root, target_root)?;
        let mode = caps.preferred();
        self.modes.insert(target_root.to_path_buf(), mode);
        self.used.insert(mode);
        Ok(mode)
    }

    fn summary(&self) -> String {
        match self.used.len() {
            0 => "none".to_string(),
            1 => self
                .used
                .iter()
                .next()
                .map(|mode| mode.label().to_string())
                .unwrap_or_default(),
            _ => "mixed".to_string(),
        }
    }
}

struct DeployContext {
    manifest: DeployManifest,
    written: HashSet<PathBuf>,
    displaced: HashSet<PathBuf>,
    report: DeployReport,
}

impl DeployContext {
    /// Move a colliding external file aside into the reversible backup
    /// location next to its target root. Each path is displaced at most
    /// once per deploy.
    fn displace_external(&mut self, dest: &Path, dest_root: &Path, rel: &str) -> Result<()> {
        if self.displaced.contains(dest) {
            return Ok(());
        }
        let backup_path = dest_root.join(BACKUP_DIR_NAME).join(rel);
        if let Some(parent) = backup_path.parent() {
            fs::create_dir_all(parent).context("create backup dir")?;
        }
        fs::rename(dest, &backup_path)
            .with_context(|| format!("displace external file {:?}", dest))?;
        self.displaced.insert(dest.to_path_buf());
        self.report.externals_displaced += 1;
        Ok(())
    }
}

/// Project the profile's full mod stack and managed resources into the
/// live game directory. Never exits half-applied: any failure rolls back
/// through the partial manifest before the error is re-raised.
pub fn deploy(data_dir: &Path, profile: &FullProfile, deploy_plugins: bool) -> Result<DeployReport> {
    if profile.locked {
        bail!("profile {:?} is locked", profile.name);
    }
    let spec = profile.game.spec();
    let paths = detect_paths(profile)?;
    if deploy_plugins && spec.plugin_list != PluginListDialect::None && spec.plugin_list_name.is_none()
    {
        bail!(
            "game {} declares a plugin list but no list path",
            spec.display_name
        );
    }

    fs::create_dir_all(&paths.data_dir).context("create game data dir")?;

    // The game directory must never hold two overlapping deployments: any
    // existing manifest, ours or a foreign profile's, is unwound first.
    if let Some(previous) = load_manifest(&paths.data_dir)? {
        if previous.profile != profile.name {
            info!(
                "undeploying foreign profile {:?} before deploying {:?}",
                previous.profile, profile.name
            );
        }
        undeploy_with_manifest(&paths, &previous)?;
    }

    let mods_root = paths::mods_dir(data_dir, &profile.name, &profile.overrides);
    let mut modes = PlacementModes::new(profile.use_links, mods_root);
    let mut ctx = DeployContext {
        manifest: DeployManifest {
            profile: profile.name.clone(),
            profile_mod_files: Vec::new(),
        },
        written: HashSet::new(),
        displaced: HashSet::new(),
        report: DeployReport::default(),
    };

    match deploy_inner(data_dir, profile, spec, &paths, deploy_plugins, &mut modes, &mut ctx) {
        Ok(()) => {
            if !ctx.manifest.profile_mod_files.is_empty() {
                save_manifest(&paths.data_dir, &ctx.manifest)?;
            }
            ctx.report.link_mode_summary = modes.summary();
            Ok(ctx.report)
        }
        Err(err) => {
            error!("deploy of {:?} failed, rolling back: {err:#}", profile.name);
            if let Err(rollback_err) = undeploy_with_manifest(&paths, &ctx.manifest) {
                error!("rollback after failed deploy also failed: {rollback_err:#}");
            }
            Err(err)
        }
    }
}

fn deploy_inner(
    data_dir: &Path,
    profile: &FullProfile,
    spec: &GameSpec,
    paths: &DeployPaths,
    deploy_plugins: bool,
    modes: &mut PlacementModes,
    ctx: &mut DeployContext,
) -> Result<()> {
    let root_stack: Vec<&ModRef> = profile.root_mods.enabled_entries().collect();
    let data_stack: Vec<&ModRef> = profile.data_mods.enabled_entries().collect();

    // Root mods first, then data mods. Each stack is walked in reverse
    // order with no-clobber semantics: the highest-priority copy of a file
    // lands first and nothing below it may replace it.
    deploy_stack(data_dir, profile, &root_stack, &paths.game_root, false, None, modes, ctx)?;
    let mut dir_casing = DirCasing::default();
    let casing = profile.normalize_case.then_some((&mut dir_casing, spec));
    deploy_stack(data_dir, profile, &data_stack, &paths.data_dir, true, casing, modes, ctx)?;

    if deploy_plugins {
        write_plugin_list(profile, spec, paths, &data_stack, data_dir, ctx)?;
    }
    if profile.manage_config {
        deploy_config_files(data_dir, profile, spec, paths, ctx)?;
    }
    if profile.manage_saves {
        deploy_save_link(data_dir, profile, paths, ctx)?;
    }
    deploy_compat_links(data_dir, profile, paths, ctx)?;
    deploy_static_resources(data_dir, profile, spec, paths, modes, ctx)?;
    if spec.mtime_load_order {
        normalize_plugin_times(spec, paths, &data_stack, data_dir, profile)?;
    }
    Ok(())
}

fn deploy_stack(
    data_dir: &Path,
    profile: &FullProfile,
    stack: &[&ModRef],
    dest_root: &Path,
    record_relative: bool,
    mut casing: Option<(&mut DirCasing, &GameSpec)>,
    modes: &mut PlacementModes,
    ctx: &mut DeployContext,
) -> Result<()> {
    for entry in stack.iter().rev() {
        let source_root = mod_source_dir(data_dir, profile, entry);
        let files = overwrite::scan_mod_files(&source_root)?;
        for original in files {
            let rel = match casing.as_mut() {
                Some((dir_casing, spec)) => {
                    let plugin = game::is_plugin_file(spec, &original);
                    dir_casing.normalize(dest_root, &original, plugin)
                }
                None => original.clone(),
            };
            let dest = dest_root.join(rel.split('/').collect::<PathBuf>());
            if ctx.written.contains(&dest) {
                ctx.report.shadowed_skipped += 1;
                continue;
            }
            if let Ok(meta) = fs::symlink_metadata(&dest) {
                // A directory here may hold files a higher-priority mod
                // already deployed; it is never displaced. Fail and let
                // the rollback unwind the partial deploy.
                if meta.file_type().is_dir() {
                    bail!(
                        "mod {:?} file {rel:?} collides with directory {:?}",
                        entry.name,
                        dest
                    );
                }
                ctx.displace_external(&dest, dest_root, &rel)?;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).context("create deploy dir")?;
            }
            let mode = modes.mode_for(dest_root)?;
            let source = source_root.join(original.split('/').collect::<PathBuf>());
            linkprobe::place_file(&source, &dest, mode)
                .with_context(|| format!("deploy file for mod {:?}", entry.name))?;
            ctx.written.insert(dest.clone());
            let recorded = if record_relative {
                rel
            } else {
                dest.to_string_lossy().to_string()
            };
            ctx.manifest.profile_mod_files.push(recorded);
            ctx.report.files_written += 1;
        }
    }
    Ok(())
}

/// Enabled plugin file names in ascending stack order: the load order the
/// list dialects and mtime normalization both express.
fn ordered_plugins(
    data_dir: &Path,
    profile: &FullProfile,
    spec: &GameSpec,
    stack: &[&ModRef],
) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut plugins = Vec::new();
    for entry in stack {
        let source_root = mod_source_dir(data_dir, profile, entry);
        for rel in overwrite::scan_mod_files(&source_root)? {
            let name = rel.rsplit('/').next().unwrap_or(&rel).to_string();
            if game::is_plugin_file(spec, &name) && seen.insert(name.clone()) {
                plugins.push(name);
            }
        }
    }
    Ok(plugins)
}

fn write_plugin_list(
    profile: &FullProfile,
    spec: &GameSpec,
    paths: &DeployPaths,
    data_stack: &[&ModRef],
    data_dir: &Path,
    ctx: &mut DeployContext,
) -> Result<()> {
    let list_name = match (spec.plugin_list, spec.plugin_list_name) {
        (PluginListDialect::None, _) | (_, None) => return Ok(()),
        (_, Some(name)) => name,
    };
    let plugins = ordered_plugins(data_dir, profile, spec, data_stack)?;
    if plugins.is_empty() {
        return Ok(());
    }

    let mut body = String::new();
    for plugin in &plugins {
        match spec.plugin_list {
            PluginListDialect::Flat => body.push_str(plugin),
            PluginListDialect::EnabledPrefix => {
                body.push('*');
                body.push_str(plugin);
            }
            PluginListDialect::None => unreachable!(),
        }
        body.push('\n');
    }

    let dest = paths.config_dir.join(list_name);
    if dest.exists() && !ctx.written.contains(&dest) {
        ctx.displace_external(&dest, &paths.config_dir, list_name)?;
    }
    write_atomic_text(&dest, &body).context("write plugin list")?;
    ctx.written.insert(dest.clone());
    ctx.manifest
        .profile_mod_files
        .push(dest.to_string_lossy().to_string());
    ctx.report.plugins_listed = plugins.len();
    Ok(())
}

fn deploy_config_files(
    data_dir: &Path,
    profile: &FullProfile,
    spec: &GameSpec,
    paths: &DeployPaths,
    ctx: &mut DeployContext,
) -> Result<()> {
    let profile_config = paths::config_dir(data_dir, &profile.name, &profile.overrides);
    for name in spec.config_files {
        let source = profile_config.join(name);
        if !source.is_file() {
            continue;
        }
        let dest = paths.config_dir.join(name);
        if dest.exists() {
            ctx.displace_external(&dest, &paths.config_dir, name)?;
        }
        fs::copy(&source, &dest).with_context(|| format!("deploy config {name}"))?;
        ctx.written.insert(dest.clone());
        ctx.manifest
            .profile_mod_files
            .push(dest.to_string_lossy().to_string());
        ctx.report.files_written += 1;
    }
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(not(unix))]
fn symlink_dir(_source: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "directory symlink unavailable on this platform",
    ))
}

fn deploy_save_link(
    data_dir: &Path,
    profile: &FullProfile,
    paths: &DeployPaths,
    ctx: &mut DeployContext,
) -> Result<()> {
    let profile_saves = paths::saves_dir(data_dir, &profile.name, &profile.overrides);
    fs::create_dir_all(&profile_saves).context("create profile saves dir")?;
    let dest = &paths.saves_dir;
    if let Ok(meta) = fs::symlink_metadata(dest) {
        if meta.file_type().is_symlink() {
            fs::remove_file(dest).context("remove stale save link")?;
        } else {
            let name = dest
                .file_name()
                .context("save dir name")?
                .to_string_lossy()
                .to_string();
            ctx.displace_external(dest, &paths.game_root, &name)?;
        }
    }
    match symlink_dir(&profile_saves, dest) {
        Ok(()) => {
            ctx.written.insert(dest.clone());
            ctx.manifest
                .profile_mod_files
                .push(dest.to_string_lossy().to_string());
        }
        Err(err) => {
            warn!("save folder link skipped: {err}");
            ctx.report
                .warnings
                .push(format!("save folder link skipped: {err}"));
        }
    }
    Ok(())
}

fn deploy_compat_links(
    data_dir: &Path,
    profile: &FullProfile,
    paths: &DeployPaths,
    ctx: &mut DeployContext,
) -> Result<()> {
    for link in &profile.compat_links {
        let source = if link.source.is_absolute() {
            link.source.clone()
        } else {
            paths::profile_root(data_dir, &profile.name).join(&link.source)
        };
        if !source.exists() {
            ctx.report
                .warnings
                .push(format!("compat link target missing: {:?}", source));
            continue;
        }
        let dest = paths.game_root.join(&link.dest);
        if let Ok(meta) = fs::symlink_metadata(&dest) {
            if meta.file_type().is_symlink() {
                fs::remove_file(&dest).context("remove stale compat link")?;
            } else {
                ctx.displace_external(&dest, &paths.game_root, &link.dest)?;
            }
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create compat link dir")?;
        }
        symlink_dir(&source, &dest)
            .with_context(|| format!("compat link {:?} -> {:?}", source, dest))?;
        ctx.written.insert(dest.clone());
        ctx.manifest
            .profile_mod_files
            .push(dest.to_string_lossy().to_string());
    }
    Ok(())
}

fn deploy_static_resources(
    data_dir: &Path,
    profile: &FullProfile,
    spec: &GameSpec,
    paths: &DeployPaths,
    modes: &mut PlacementModes,
    ctx: &mut DeployContext,
) -> Result<()> {
    let resources = paths::resources_dir(data_dir, profile.game.as_str());
    for resource in spec.resources {
        let source = resources.join(resource.source_name);
        if !source.is_file() {
            continue;
        }
        let dest = paths.data_dir.join(resource.relative_path);
        // Already present, whether ours or the user's: leave it alone.
        if dest.exists() {
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create resource dir")?;
        }
        let mode = modes.mode_for(&paths.data_dir)?;
        linkprobe::place_file(&source, &dest, mode)
            .with_context(|| format!("deploy resource {}", resource.relative_path))?;
        ctx.written.insert(dest);
        ctx.manifest
            .profile_mod_files
            .push(resource.relative_path.to_string());
        ctx.report.resources_deployed += 1;
    }
    Ok(())
}

/// Some games read load order purely from plugin mtimes: rewrite enabled
/// plugins in ascending stack order with one-second increments.
fn normalize_plugin_times(
    spec: &GameSpec,
    paths: &DeployPaths,
    data_stack: &[&ModRef],
    data_dir: &Path,
    profile: &FullProfile,
) -> Result<()> {
    let plugins = ordered_plugins(data_dir, profile, spec, data_stack)?;
    let base = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    for (index, plugin) in plugins.iter().enumerate() {
        let path = paths.data_dir.join(plugin);
        if !path.exists() {
            continue;
        }
        let stamp = FileTime::from_unix_time(base + index as i64, 0);
        set_file_mtime(&path, stamp)
            .with_context(|| format!("set load-order mtime for {plugin}"))?;
    }
    Ok(())
}

/// Remove the projection recorded in the manifest and restore displaced
/// external files. Idempotent for paths already absent. No-op when no
/// manifest-bearing deployment exists.
pub fn undeploy(data_dir: &Path, profile: &FullProfile) -> Result<()> {
    let paths = detect_paths(profile)?;
    let Some(manifest) = load_manifest(&paths.data_dir)? else {
        return Ok(());
    };
    if manifest.profile != profile.name {
        match Profile::load(data_dir, &manifest.profile) {
            Ok(owner) => warn!(
                "manifest belongs to profile {:?}, undeploying it on behalf of {:?}",
                owner.name(),
                profile.name
            ),
            Err(_) => warn!(
                "orphaned deployment: manifest profile {:?} no longer resolvable, \
                 proceeding with raw manifest paths",
                manifest.profile
            ),
        }
    }
    undeploy_with_manifest(&paths, &manifest)
}

fn undeploy_with_manifest(paths: &DeployPaths, manifest: &DeployManifest) -> Result<()> {
    for raw in &manifest.profile_mod_files {
        let listed = PathBuf::from(raw);
        let path = if listed.is_absolute() {
            listed
        } else {
            paths.data_dir.join(raw.split('/').collect::<PathBuf>())
        };
        if let Ok(meta) = fs::symlink_metadata(&path) {
            if meta.file_type().is_dir() {
                fs::remove_dir_all(&path)
                    .with_context(|| format!("remove deployed dir {:?}", path))?;
            } else {
                fs::remove_file(&path)
                    .with_context(|| format!("remove deployed file {:?}", path))?;
            }
        }
        let stop = if path.starts_with(&paths.data_dir) {
            &paths.data_dir
        } else {
            &paths.game_root
        };
        prune_empty_parents(&path, stop);
    }

    let mut backup_roots = vec![paths.data_dir.clone(), paths.game_root.clone()];
    backup_roots.dedup();
    for root in backup_roots {
        let backup = root.join(BACKUP_DIR_NAME);
        if !backup.exists() {
            continue;
        }
        restore_tree(&backup, &root)?;
        fs::remove_dir_all(&backup).context("remove backup dir")?;
    }

    let manifest_path = paths.data_dir.join(MANIFEST_FILE);
    if manifest_path.exists() {
        fs::remove_file(&manifest_path).context("remove manifest")?;
    }
    Ok(())
}

/// Merge a backup directory back into its live destination. Directories
/// merge recursively; files move back replacing whatever the deploy left.
fn restore_tree(backup: &Path, dest: &Path) -> Result<()> {
    for entry in fs::read_dir(backup).with_context(|| format!("read backup {:?}", backup))? {
        let entry = entry.context("read backup entry")?;
        let source = entry.path();
        let target = dest.join(entry.file_name());
        let is_dir = entry.file_type().context("backup entry type")?.is_dir();
        let existing = fs::symlink_metadata(&target).ok();
        let mismatch = || RestoreMismatch {
            backup: source.clone(),
            dest: target.clone(),
        };
        if is_dir {
            match existing {
                Some(meta) if meta.file_type().is_dir() => restore_tree(&source, &target)?,
                Some(_) => return Err(mismatch().into()),
                None => fs::rename(&source, &target)
                    .with_context(|| format!("restore dir {:?}", target))?,
            }
        } else {
            match existing {
                Some(meta) if meta.file_type().is_dir() => return Err(mismatch().into()),
                Some(_) => {
                    fs::remove_file(&target)
                        .with_context(|| format!("clear deployed file {:?}", target))?;
                    fs::rename(&source, &target)
                        .with_context(|| format!("restore file {:?}", target))?;
                }
                None => fs::rename(&source, &target)
                    .with_context(|| format!("restore file {:?}", target))?,
            }
        }
    }
    Ok(())
}

/// Remove directories left empty after undeploy, walking upward and
/// stopping at the given root.
fn prune_empty_parents(path: &Path, stop_root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop_root || !dir.starts_with(stop_root) {
            break;
        }
        match fs::read_dir(dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            }
            Err(_) => break,
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Lower-case every path segment except a plugin file's own base name,
/// and coerce directory segments to the casing of an already-existing
/// directory so no duplicate dirs differing only by case appear.
#[derive(Default)]
struct DirCasing {
    listings: HashMap<PathBuf, Vec<String>>,
}

impl DirCasing {
    fn normalize(&mut self, dest_root: &Path, rel: &str, is_plugin: bool) -> String {
        let segments: Vec<&str> = rel.split('/').collect();
        let mut out: Vec<String> = Vec::with_capacity(segments.len());
        let mut current = dest_root.to_path_buf();
        for (index, segment) in segments.iter().enumerate() {
            let last = index + 1 == segments.len();
            if last {
                if is_plugin {
                    out.push(segment.to_string());
                } else {
                    out.push(segment.to_ascii_lowercase());
                }
                break;
            }
            let coerced = self
                .existing_child(&current, segment)
                .unwrap_or_else(|| segment.to_ascii_lowercase());
            current = current.join(&coerced);
            out.push(coerced);
        }
        out.join("/")
    }

    fn existing_child(&mut self, dir: &Path, segment: &str) -> Option<String> {
        let listing = self.listings.entry(dir.to_path_buf()).or_insert_with(|| {
            fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .filter_map(|entry| entry.ok())
                        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
                        .map(|entry| entry.file_name().to_string_lossy().to_string())
                        .collect()
                })
                .unwrap_or_default()
        });
        listing
            .iter()
            .find(|name| name.eq_ignore_ascii_case(segment))
            .cloned()
    }
}

fn load_manifest(game_data_dir: &Path) -> Result<Option<DeployManifest>> {
    let path = game_data_dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).context("read manifest")?;
    let manifest = serde_json::from_str(&raw).context("parse manifest")?;
    Ok(Some(manifest))
}

fn save_manifest(game_data_dir: &Path, manifest: &DeployManifest) -> Result<()> {
    let path = game_data_dir.join(MANIFEST_FILE);
    let raw = serde_json::to_string_pretty(manifest).context("serialize manifest")?;
    write_atomic_text(&path, &raw).context("write manifest")
}

fn write_atomic_text(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().context("atomic write parent")?;
    fs::create_dir_all(parent).context("create parent dir")?;
    let file_name = path.file_name().context("atomic write filename")?;
    let mut temp_name = std::ffi::OsString::from(file_name);
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);
    fs::write(&temp_path, contents).context("write temp file")?;
    fs::rename(&temp_path, path).context("finalize atomic write")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn manifest_round_trips_camel_case_keys() {
        let manifest = DeployManifest {
            profile: "Main".to_string(),
            profile_mod_files: vec!["textures/a.dds".to_string()],
        };
        let raw = serde_json::to_string(&manifest).unwrap();
        assert!(raw.contains("\"profileModFiles\""));
        let parsed: DeployManifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.profile, "Main");
        assert_eq!(parsed.profile_mod_files, manifest.profile_mod_files);
    }

    #[test]
    fn deploy_state_tracks_manifest_presence() {
        let dir = TempDir::new().unwrap();
        assert_eq!(deploy_state(dir.path()), DeployState::Undeployed);
        let manifest = DeployManifest {
            profile: "Main".to_string(),
            profile_mod_files: Vec::new(),
        };
        save_manifest(dir.path(), &manifest).unwrap();
        assert_eq!(deploy_state(dir.path()), DeployState::Deployed);
    }

    #[test]
    fn prune_stops_at_root_and_nonempty_dirs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let deep = root.join("a/b/c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(root.join("a/keep.txt"), "x").unwrap();
        prune_empty_parents(&deep.join("file.dds"), root);
        assert!(!root.join("a/b").exists());
        assert!(root.join("a").exists());
        assert!(root.join("a/keep.txt").exists());
    }

    #[test]
    fn dir_casing_matches_existing_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Textures")).unwrap();
        let mut casing = DirCasing::default();
        assert_eq!(
            casing.normalize(dir.path(), "textures/Armor/TexA.DDS", false),
            "Textures/armor/texa.dds"
        );
        // Plugin base names keep their casing.
        assert_eq!(
            casing.normalize(dir.path(), "Patch.ESP", true),
            "Patch.ESP"
        );
    }

    #[test]
    fn restore_tree_merges_and_flags_mismatch() {
        let dir = TempDir::new().unwrap();
        let backup = dir.path().join("backup");
        let dest = dir.path().join("live");
        fs::create_dir_all(backup.join("sub")).unwrap();
        fs::write(backup.join("sub/orig.ini"), "orig").unwrap();
        fs::create_dir_all(dest.join("sub")).unwrap();
        fs::write(dest.join("sub/other.ini"), "other").unwrap();
        restore_tree(&backup, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("sub/orig.ini")).unwrap(), "orig");
        assert!(dest.join("sub/other.ini").exists());

        let backup2 = dir.path().join("backup2");
        fs::create_dir_all(backup2.join("clash")).unwrap();
        fs::write(backup2.join("clash/x"), "x").unwrap();
        let dest2 = dir.path().join("live2");
        fs::create_dir_all(&dest2).unwrap();
        fs::write(dest2.join("clash"), "i am a file").unwrap();
        let err = restore_tree(&backup2, &dest2).unwrap_err();
        assert!(err.downcast_ref::<RestoreMismatch>().is_some());
    }
}
