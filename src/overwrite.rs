use crate::profile::{mod_source_dir, HasModStack};
use anyhow::{Context, Result};
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::WalkDir;

/// Files are scanned in fixed batches so a streaming caller can yield to
/// its scheduler between batches on large stacks.
pub const SCAN_BATCH_SIZE: usize = 100;

/// One layer of the stack as seen by the resolver: an ordered mod with its
/// on-disk storage directory, lowest priority first.
#[derive(Debug, Clone)]
pub struct StackMod {
    pub name: String,
    pub dir: PathBuf,
}

/// Files of one lower layer shadowed by a single higher mod.
/// `owner == None` means the external (non-mod-owned) base layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedLayer {
    pub owner: Option<String>,
    pub files: Vec<String>,
}

/// Streaming result for one finished mod: the shadows it casts on every
/// layer below it. Only non-empty sets are reported.
#[derive(Debug, Clone)]
pub struct ModShadows {
    pub mod_name: String,
    pub shadowed: Vec<ShadowedLayer>,
    pub completed: bool,
}

pub type ShadowCallback = Arc<dyn Fn(&ModShadows) + Send + Sync>;
pub type BatchTick = Arc<dyn Fn() + Send + Sync>;

pub struct StreamOptions {
    pub callback: ShadowCallback,
    /// Invoked between file batches; the caller's cooperative yield point.
    pub tick: Option<BatchTick>,
    pub batch_size: usize,
}

impl StreamOptions {
    pub fn new(callback: ShadowCallback) -> Self {
        Self {
            callback,
            tick: None,
            batch_size: SCAN_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowSet {
    pub shadowing_mod: String,
    pub files: Vec<String>,
}

/// Per-mod record of which of its files are shadowed and by whom.
/// Ephemeral: recomputed on demand, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverwriteMap {
    pub by_mod: BTreeMap<String, Vec<ShadowSet>>,
    /// Shadows cast onto the external base layer.
    pub external: Vec<ShadowSet>,
}

impl OverwriteMap {
    fn record(&mut self, owner: &Option<String>, shadowing: &str, file: &str) {
        let sets = match owner {
            Some(name) => self.by_mod.entry(name.clone()).or_default(),
            None => &mut self.external,
        };
        if let Some(set) = sets.iter_mut().find(|set| set.shadowing_mod == shadowing) {
            set.files.push(file.to_string());
        } else {
            sets.push(ShadowSet {
                shadowing_mod: shadowing.to_string(),
                files: vec![file.to_string()],
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_mod.is_empty() && self.external.is_empty()
    }
}

struct Layer {
    owner: Option<String>,
    files: HashSet<String>,
}

/// Walk the stack lowest to highest, checking each mod's files against
/// every already-cached lower layer. A match means the lower layer's copy
/// is shadowed by the current mod; the current mod's files then become the
/// next cached layer. Purely reads mod directories, never writes.
pub fn calculate_overwrite_files(
    stack: &[StackMod],
    external: &[String],
    stream: Option<&StreamOptions>,
) -> Result<OverwriteMap> {
    let mut layers: Vec<Layer> = vec![Layer {
        owner: None,
        files: external.iter().cloned().collect(),
    }];
    let mut map = OverwriteMap::default();
    let batch_size = stream.map_or(SCAN_BATCH_SIZE, |s| s.batch_size.max(1));

    for (index, stack_mod) in stack.iter().enumerate() {
        let files = scan_mod_files(&stack_mod.dir)?;
        let mut shadowed: Vec<ShadowedLayer> = Vec::new();

        for batch in files.chunks(batch_size) {
            for file in batch {
                for layer in &layers {
                    if !layer.files.contains(file) {
                        continue;
                    }
                    map.record(&layer.owner, &stack_mod.name, file);
                    match shadowed.iter_mut().find(|entry| entry.owner == layer.owner) {
                        Some(entry) => entry.files.push(file.clone()),
                        None => shadowed.push(ShadowedLayer {
                            owner: layer.owner.clone(),
                            files: vec![file.clone()],
                        }),
                    }
                }
            }
            if let Some(tick) = stream.and_then(|s| s.tick.as_ref()) {
                tick();
            }
        }

        if let Some(stream) = stream {
            (stream.callback)(&ModShadows {
                mod_name: stack_mod.name.clone(),
                shadowed,
                completed: index + 1 == stack.len(),
            });
        }

        layers.push(Layer {
            owner: Some(stack_mod.name.clone()),
            files: files.into_iter().collect(),
        });
    }

    Ok(map)
}

/// Both stacks of one profile, resolved independently.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverwrites {
    pub data: OverwriteMap,
    pub root: OverwriteMap,
}

/// Resolve shadowing for a profile against a live game installation.
/// Root and data stacks never cross-shadow, except when the root and data
/// directories coincide: then each stack's files are unioned into the
/// other's external layer so true collisions still surface.
pub fn calculate_profile_overwrites<P: HasModStack>(
    data_dir: &Path,
    profile: &P,
    game_root: &Path,
    game_data_dir: &Path,
    stream: Option<&StreamOptions>,
) -> Result<ProfileOverwrites> {
    let data_stack = enabled_stack(data_dir, profile, profile.data_mods().enabled_entries());
    let root_stack = enabled_stack(data_dir, profile, profile.root_mods().enabled_entries());

    let mut data_external = scan_external_files(game_data_dir, &stack_files(&data_stack)?)?;
    let mut root_external = scan_external_files(game_root, &stack_files(&root_stack)?)?;

    if game_root == game_data_dir {
        data_external.extend(stack_files(&root_stack)?);
        root_external.extend(stack_files(&data_stack)?);
        data_external.sort();
        data_external.dedup();
        root_external.sort();
        root_external.dedup();
    }

    Ok(ProfileOverwrites {
        data: calculate_overwrite_files(&data_stack, &data_external, stream)?,
        root: calculate_overwrite_files(&root_stack, &root_external, stream)?,
    })
}

fn enabled_stack<'a, P: HasModStack>(
    data_dir: &Path,
    profile: &P,
    entries: impl Iterator<Item = &'a crate::profile::ModRef>,
) -> Vec<StackMod> {
    entries
        .map(|entry| StackMod {
            name: entry.name.clone(),
            dir: mod_source_dir(data_dir, profile, entry),
        })
        .collect()
}

fn stack_files(stack: &[StackMod]) -> Result<Vec<String>> {
    let mut all = Vec::new();
    for stack_mod in stack {
        all.extend(scan_mod_files(&stack_mod.dir)?);
    }
    all.sort();
    all.dedup();
    Ok(all)
}

/// Relative file paths under a mod directory, `/`-separated, sorted. A
/// missing directory contributes no layer and no shadows.
pub fn scan_mod_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_ignored_path(entry.path()))
    {
        let entry = entry.with_context(|| format!("walk {:?}", dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).context("rel path")?;
        files.push(relative_key(rel));
    }
    files.sort();
    Ok(files)
}

/// Files present in a live directory that no enabled mod provides.
pub fn scan_external_files(dir: &Path, owned: &[String]) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let owned: HashSet<&String> = owned.iter().collect();
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_ignored_path(entry.path()))
    {
        let entry = entry.with_context(|| format!("walk {:?}", dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).context("rel path")?;
        let key = relative_key(rel);
        if !owned.contains(&key) {
            files.push(key);
        }
    }
    files.sort();
    Ok(files)
}

pub fn relative_key(rel: &Path) -> String {
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| {
        let part = component.as_os_str().to_string_lossy();
        part.eq_ignore_ascii_case("__MACOSX")
            || part.eq_ignore_ascii_case(".ds_store")
            || part.eq_ignore_ascii_case("thumbs.db")
            || part == ".git"
            || part == ".svn"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, sync::Mutex};
    use tempfile::TempDir;

    fn write_files(root: &Path, files: &[&str]) {
        for file in files {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, *file).unwrap();
        }
    }

    fn stack_in(dir: &TempDir, mods: &[(&str, &[&str])]) -> Vec<StackMod> {
        mods.iter()
            .map(|(name, files)| {
                let mod_dir = dir.path().join(name);
                write_files(&mod_dir, files);
                StackMod {
                    name: name.to_string(),
                    dir: mod_dir,
                }
            })
            .collect()
    }

    #[test]
    fn higher_mods_shadow_lower_never_reverse() {
        let dir = TempDir::new().unwrap();
        let stack = stack_in(
            &dir,
            &[
                ("m1", &["texA.dds", "only1.nif"]),
                ("m2", &["texA.dds", "shared23.ini"]),
                ("m3", &["texA.dds", "shared23.ini"]),
            ],
        );
        let map = calculate_overwrite_files(&stack, &[], None).unwrap();

        let m1 = &map.by_mod["m1"];
        assert_eq!(m1.len(), 2);
        assert!(m1.iter().any(|set| set.shadowing_mod == "m2" && set.files == ["texA.dds"]));
        assert!(m1.iter().any(|set| set.shadowing_mod == "m3" && set.files == ["texA.dds"]));

        let m2 = &map.by_mod["m2"];
        assert_eq!(m2.len(), 1);
        assert_eq!(m2[0].shadowing_mod, "m3");
        // m3 shadows every m2 file it also carries, texA.dds included,
        // even though m1 holds that file too.
        assert_eq!(m2[0].files, vec!["shared23.ini", "texA.dds"]);

        assert!(!map.by_mod.contains_key("m3"));
    }

    #[test]
    fn identical_inputs_produce_identical_maps() {
        let dir = TempDir::new().unwrap();
        let stack = stack_in(
            &dir,
            &[
                ("Armor Retexture", &["texA.dds"]),
                ("Lighting Overhaul", &["texA.dds", "ini1.ini"]),
            ],
        );
        let first = calculate_overwrite_files(&stack, &[], None).unwrap();
        let second = calculate_overwrite_files(&stack, &[], None).unwrap();
        assert_eq!(first, second);

        let sets = &first.by_mod["Armor Retexture"];
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].shadowing_mod, "Lighting Overhaul");
        assert_eq!(sets[0].files, vec!["texA.dds"]);
    }

    #[test]
    fn external_layer_is_shadowed_under_no_owner() {
        let dir = TempDir::new().unwrap();
        let stack = stack_in(&dir, &[("m1", &["base.ini"])]);
        let map =
            calculate_overwrite_files(&stack, &["base.ini".to_string()], None).unwrap();
        assert_eq!(map.external.len(), 1);
        assert_eq!(map.external[0].shadowing_mod, "m1");
        assert_eq!(map.external[0].files, vec!["base.ini"]);
        assert!(map.by_mod.is_empty());
    }

    #[test]
    fn missing_mod_dir_contributes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut stack = stack_in(&dir, &[("m1", &["a.dds"])]);
        stack.push(StackMod {
            name: "ghost".to_string(),
            dir: dir.path().join("does-not-exist"),
        });
        let map = calculate_overwrite_files(&stack, &[], None).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn coinciding_root_and_data_dirs_union_each_others_files() {
        use crate::{
            paths::PathOverrides,
            profile::{BaseProfile, ModRef, ModStack},
        };

        let data = TempDir::new().unwrap();
        let game = TempDir::new().unwrap();
        let profile = BaseProfile {
            name: "Main".into(),
            data_mods: ModStack {
                entries: vec![ModRef::new("DataMod")],
                sections: Vec::new(),
            },
            root_mods: ModStack {
                entries: vec![ModRef::new("RootMod")],
                sections: Vec::new(),
            },
            overrides: PathOverrides::default(),
        };
        let mods = data.path().join("profiles/Main/mods");
        write_files(&mods.join("DataMod"), &["shared.ini"]);
        write_files(&mods.join("RootMod"), &["shared.ini"]);

        // Same directory for root and data: each stack sees the other's
        // files as part of its external layer.
        let result = calculate_profile_overwrites(
            data.path(),
            &profile,
            game.path(),
            game.path(),
            None,
        )
        .unwrap();
        assert_eq!(result.data.external.len(), 1);
        assert_eq!(result.data.external[0].shadowing_mod, "DataMod");
        assert_eq!(result.data.external[0].files, vec!["shared.ini"]);
        assert_eq!(result.root.external.len(), 1);
        assert_eq!(result.root.external[0].shadowing_mod, "RootMod");

        // Separate directories: the stacks never cross-shadow.
        let separate = TempDir::new().unwrap();
        let result = calculate_profile_overwrites(
            data.path(),
            &profile,
            game.path(),
            separate.path(),
            None,
        )
        .unwrap();
        assert!(result.data.is_empty());
        assert!(result.root.is_empty());
    }

    #[test]
    fn streaming_reports_each_mod_once_with_final_flag() {
        let dir = TempDir::new().unwrap();
        let stack = stack_in(
            &dir,
            &[("m1", &["f.dds"]), ("m2", &["f.dds"]), ("m3", &["other.nif"])],
        );
        let seen: Arc<Mutex<Vec<(String, usize, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ticks = Arc::new(Mutex::new(0usize));
        let tick_sink = Arc::clone(&ticks);
        let stream = StreamOptions {
            callback: Arc::new(move |shadows: &ModShadows| {
                sink.lock().unwrap().push((
                    shadows.mod_name.clone(),
                    shadows.shadowed.len(),
                    shadows.completed,
                ));
            }),
            tick: Some(Arc::new(move || {
                *tick_sink.lock().unwrap() += 1;
            })),
            batch_size: 1,
        };
        calculate_overwrite_files(&stack, &[], Some(&stream)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("m1".to_string(), 0, false),
                ("m2".to_string(), 1, false),
                ("m3".to_string(), 0, true),
            ]
        );
        // One tick per file batch of every mod.
        assert_eq!(*ticks.lock().unwrap(), 3);
    }
}
