use crate::{
    game::GameId,
    paths::{self, PathOverrides},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// One mod's membership in a profile's stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModRef {
    pub name: String,
    pub enabled: bool,
    /// Deploy this mod out of another profile's storage instead of our own.
    #[serde(default)]
    pub base_profile: Option<String>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl ModRef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            base_profile: None,
            updated_at: epoch_now(),
        }
    }
}

/// A named boundary marker in a mod stack. `anchor` is the index of the
/// mod immediately after which the section begins; `None` means the top
/// of the stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModSection {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub anchor: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModStack {
    pub entries: Vec<ModRef>,
    #[serde(default)]
    pub sections: Vec<ModSection>,
}

impl ModStack {
    pub fn enabled_entries(&self) -> impl Iterator<Item = &ModRef> {
        self.entries.iter().filter(|entry| entry.enabled)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }
}

fn epoch_now() -> Option<i64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_secs() as i64)
}

/// Reordering and section re-indexing are pure: each operation returns a
/// new stack so the logic stays testable away from any UI state.
#[must_use]
pub fn with_inserted(stack: &ModStack, index: usize, entry: ModRef) -> ModStack {
    let index = index.min(stack.entries.len());
    let mut entries = stack.entries.clone();
    entries.insert(index, entry);
    let sections = stack
        .sections
        .iter()
        .map(|section| ModSection {
            anchor: match section.anchor {
                Some(anchor) if anchor >= index => Some(anchor + 1),
                other => other,
            },
            ..section.clone()
        })
        .collect();
    ModStack { entries, sections }
}

#[must_use]
pub fn with_removed(stack: &ModStack, index: usize) -> ModStack {
    if index >= stack.entries.len() {
        return stack.clone();
    }
    let mut entries = stack.entries.clone();
    entries.remove(index);
    let sections = stack
        .sections
        .iter()
        .map(|section| ModSection {
            anchor: match section.anchor {
                Some(anchor) if anchor > index => Some(anchor - 1),
                // The anchor mod itself went away: the section now starts
                // after the previous mod, or at the top if there is none.
                Some(anchor) if anchor == index => anchor.checked_sub(1),
                other => other,
            },
            ..section.clone()
        })
        .collect();
    ModStack { entries, sections }
}

#[must_use]
pub fn with_moved(stack: &ModStack, from: usize, to: usize) -> ModStack {
    if from >= stack.entries.len() || to >= stack.entries.len() || from == to {
        return stack.clone();
    }
    let entry = stack.entries[from].clone();
    let removed = with_removed(stack, from);
    with_inserted(&removed, to, entry)
}

#[must_use]
pub fn with_enabled(stack: &ModStack, index: usize, enabled: bool) -> ModStack {
    let mut next = stack.clone();
    if let Some(entry) = next.entries.get_mut(index) {
        entry.enabled = enabled;
        entry.updated_at = epoch_now();
    }
    next
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullProfile {
    pub name: String,
    pub game: GameId,
    pub game_root: PathBuf,
    #[serde(default)]
    pub data_mods: ModStack,
    #[serde(default)]
    pub root_mods: ModStack,
    #[serde(default)]
    pub overrides: PathOverrides,
    #[serde(default)]
    pub use_links: bool,
    #[serde(default)]
    pub normalize_case: bool,
    #[serde(default)]
    pub manage_config: bool,
    #[serde(default)]
    pub manage_saves: bool,
    #[serde(default)]
    pub locked: bool,
    /// Shell command `modfold run` executes after a successful deploy.
    #[serde(default)]
    pub launch_command: Option<String>,
    /// Extra symlinks deployed into the game root for compatibility
    /// layers (wine prefixes and the like).
    #[serde(default)]
    pub compat_links: Vec<CompatLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompatLink {
    /// Link target, absolute or relative to the profile root.
    pub source: PathBuf,
    /// Link location relative to the game root.
    pub dest: String,
}

/// A shared mod stack other profiles may inherit from. Carries no game
/// installation and can never be deployed itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseProfile {
    pub name: String,
    #[serde(default)]
    pub data_mods: ModStack,
    #[serde(default)]
    pub root_mods: ModStack,
    #[serde(default)]
    pub overrides: PathOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Profile {
    Full(FullProfile),
    Base(BaseProfile),
}

/// Capability subset the overwrite engine needs: a named, ordered pair of
/// mod stacks with resolvable storage.
pub trait HasModStack {
    fn profile_name(&self) -> &str;
    fn data_mods(&self) -> &ModStack;
    fn root_mods(&self) -> &ModStack;
    fn path_overrides(&self) -> &PathOverrides;
}

/// Capability subset the deploy engine needs on top of a mod stack.
pub trait HasGameInstall: HasModStack {
    fn game(&self) -> GameId;
    fn game_root(&self) -> &Path;
}

impl HasModStack for FullProfile {
    fn profile_name(&self) -> &str {
        &self.name
    }
    fn data_mods(&self) -> &ModStack {
        &self.data_mods
    }
    fn root_mods(&self) -> &ModStack {
        &self.root_mods
    }
    fn path_overrides(&self) -> &PathOverrides {
        &self.overrides
    }
}

impl HasGameInstall for FullProfile {
    fn game(&self) -> GameId {
        self.game
    }
    fn game_root(&self) -> &Path {
        &self.game_root
    }
}

impl HasModStack for BaseProfile {
    fn profile_name(&self) -> &str {
        &self.name
    }
    fn data_mods(&self) -> &ModStack {
        &self.data_mods
    }
    fn root_mods(&self) -> &ModStack {
        &self.root_mods
    }
    fn path_overrides(&self) -> &PathOverrides {
        &self.overrides
    }
}

impl Profile {
    pub fn name(&self) -> &str {
        match self {
            Profile::Full(profile) => &profile.name,
            Profile::Base(profile) => &profile.name,
        }
    }

    pub fn as_full(&self) -> Option<&FullProfile> {
        match self {
            Profile::Full(profile) => Some(profile),
            Profile::Base(_) => None,
        }
    }

    pub fn load(data_dir: &Path, name: &str) -> Result<Self> {
        let path = paths::profile_file(data_dir, name);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read profile {:?}", path))?;
        let profile = serde_json::from_str(&raw).context("parse profile")?;
        Ok(profile)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = paths::profile_file(data_dir, self.name());
        let parent = path.parent().context("profile parent dir")?;
        fs::create_dir_all(parent).context("create profile dir")?;
        let raw = serde_json::to_string_pretty(self).context("serialize profile")?;
        fs::write(&path, raw).with_context(|| format!("write profile {:?}", path))?;
        Ok(())
    }

    pub fn delete(data_dir: &Path, name: &str) -> Result<()> {
        let root = paths::profile_root(data_dir, name);
        if root.exists() {
            fs::remove_dir_all(&root).with_context(|| format!("delete profile {:?}", root))?;
        }
        Ok(())
    }
}

pub fn list_profiles(data_dir: &Path) -> Result<Vec<String>> {
    let root = paths::profiles_root(data_dir);
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(&root).context("read profiles dir")? {
        let entry = entry.context("read profiles dir entry")?;
        if !entry.file_type().context("profile entry type")?.is_dir() {
            continue;
        }
        if entry.path().join("profile.json").exists() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Storage directory for one mod of a profile, honoring base-profile
/// inheritance: an inherited mod deploys out of the base profile's
/// storage, never a copy of it.
pub fn mod_source_dir(data_dir: &Path, profile: &impl HasModStack, entry: &ModRef) -> PathBuf {
    match &entry.base_profile {
        Some(base) => {
            // Base profile overrides are not visible here; inherited mods
            // use the base profile's default layout.
            let base_mods = paths::mods_dir(data_dir, base, &PathOverrides::default());
            paths::mod_storage_dir(&base_mods, &entry.name)
        }
        None => {
            let own_mods = paths::mods_dir(data_dir, profile.profile_name(), profile.path_overrides());
            paths::mod_storage_dir(&own_mods, &entry.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(names: &[&str]) -> ModStack {
        ModStack {
            entries: names.iter().map(|name| ModRef::new(name)).collect(),
            sections: Vec::new(),
        }
    }

    fn names(stack: &ModStack) -> Vec<&str> {
        stack.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    #[test]
    fn insert_shifts_later_anchors() {
        let mut base = stack(&["a", "b", "c"]);
        base.sections = vec![
            ModSection {
                name: "Top".into(),
                icon: None,
                anchor: None,
            },
            ModSection {
                name: "Tail".into(),
                icon: None,
                anchor: Some(1),
            },
        ];
        let next = with_inserted(&base, 1, ModRef::new("x"));
        assert_eq!(names(&next), vec!["a", "x", "b", "c"]);
        assert_eq!(next.sections[0].anchor, None);
        assert_eq!(next.sections[1].anchor, Some(2));
        // Original untouched.
        assert_eq!(base.sections[1].anchor, Some(1));
    }

    #[test]
    fn remove_reanchors_section_on_removed_mod() {
        let mut base = stack(&["a", "b", "c"]);
        base.sections = vec![ModSection {
            name: "Mid".into(),
            icon: None,
            anchor: Some(1),
        }];
        let next = with_removed(&base, 1);
        assert_eq!(names(&next), vec!["a", "c"]);
        assert_eq!(next.sections[0].anchor, Some(0));

        let mut top = stack(&["a", "b"]);
        top.sections = vec![ModSection {
            name: "First".into(),
            icon: None,
            anchor: Some(0),
        }];
        let next = with_removed(&top, 0);
        assert_eq!(next.sections[0].anchor, None);
    }

    #[test]
    fn move_is_remove_then_insert() {
        let base = stack(&["a", "b", "c", "d"]);
        let next = with_moved(&base, 0, 2);
        assert_eq!(names(&next), vec!["b", "c", "a", "d"]);
        let back = with_moved(&next, 2, 0);
        assert_eq!(names(&back), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn move_out_of_bounds_is_identity() {
        let base = stack(&["a", "b"]);
        assert_eq!(names(&with_moved(&base, 5, 0)), vec!["a", "b"]);
        assert_eq!(names(&with_moved(&base, 0, 0)), vec!["a", "b"]);
    }

    #[test]
    fn profile_json_discriminates_full_and_base() {
        let base = Profile::Base(BaseProfile {
            name: "Shared".into(),
            data_mods: stack(&["a"]),
            root_mods: ModStack::default(),
            overrides: PathOverrides::default(),
        });
        let raw = serde_json::to_string(&base).unwrap();
        assert!(raw.contains("\"kind\":\"base\""));
        let parsed: Profile = serde_json::from_str(&raw).unwrap();
        assert!(parsed.as_full().is_none());
    }

    #[test]
    fn inherited_mod_resolves_to_base_profile_storage() {
        let data = PathBuf::from("/data");
        let profile = BaseProfile {
            name: "Main".into(),
            data_mods: ModStack::default(),
            root_mods: ModStack::default(),
            overrides: PathOverrides::default(),
        };
        let mut entry = ModRef::new("Armor");
        entry.base_profile = Some("Shared".into());
        assert_eq!(
            mod_source_dir(&data, &profile, &entry),
            PathBuf::from("/data/profiles/Shared/mods/Armor")
        );
        entry.base_profile = None;
        assert_eq!(
            mod_source_dir(&data, &profile, &entry),
            PathBuf::from("/data/profiles/Main/mods/Armor")
        );
    }
}
