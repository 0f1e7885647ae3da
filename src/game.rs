use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameId {
    Morrowind,
    Oblivion,
    SkyrimSe,
}

impl Default for GameId {
    fn default() -> Self {
        GameId::Morrowind
    }
}

impl GameId {
    pub fn as_str(self) -> &'static str {
        match self {
            GameId::Morrowind => "morrowind",
            GameId::Oblivion => "oblivion",
            GameId::SkyrimSe => "skyrimse",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "morrowind" => Some(GameId::Morrowind),
            "oblivion" => Some(GameId::Oblivion),
            "skyrimse" => Some(GameId::SkyrimSe),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        self.spec().display_name
    }

    pub fn spec(self) -> &'static GameSpec {
        match self {
            GameId::Morrowind => &MORROWIND,
            GameId::Oblivion => &OBLIVION,
            GameId::SkyrimSe => &SKYRIM_SE,
        }
    }
}

/// How the plugin list file encodes an enabled plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginListDialect {
    /// One plugin file name per line.
    Flat,
    /// One plugin file name per line, enabled entries prefixed with `*`.
    EnabledPrefix,
    /// The game has no plugin list file.
    None,
}

/// A file shipped alongside the manager that must exist in the game
/// directory for mods to take effect (archive invalidation and the like).
#[derive(Debug, Clone, Copy)]
pub struct StaticResource {
    /// Path relative to the game data directory.
    pub relative_path: &'static str,
    /// File name under the per-game resources directory.
    pub source_name: &'static str,
}

#[derive(Debug, Clone)]
pub struct GameSpec {
    pub id: GameId,
    pub display_name: &'static str,
    /// Data directory name under the game root.
    pub data_subdir: &'static str,
    pub plugin_extensions: &'static [&'static str],
    pub plugin_list: PluginListDialect,
    /// Plugin list location relative to the game config directory.
    pub plugin_list_name: Option<&'static str>,
    /// Load order is expressed purely through plugin file mtimes.
    pub mtime_load_order: bool,
    pub resources: &'static [StaticResource],
    pub config_files: &'static [&'static str],
    pub save_subdir: &'static str,
}

static MORROWIND: GameSpec = GameSpec {
    id: GameId::Morrowind,
    display_name: "Morrowind",
    data_subdir: "Data Files",
    plugin_extensions: &["esp", "esm"],
    plugin_list: PluginListDialect::None,
    plugin_list_name: None,
    mtime_load_order: true,
    resources: &[],
    config_files: &["Morrowind.ini"],
    save_subdir: "Saves",
};

static OBLIVION: GameSpec = GameSpec {
    id: GameId::Oblivion,
    display_name: "Oblivion",
    data_subdir: "Data",
    plugin_extensions: &["esp", "esm"],
    plugin_list: PluginListDialect::Flat,
    plugin_list_name: Some("Plugins.txt"),
    mtime_load_order: true,
    resources: &[StaticResource {
        relative_path: "ArchiveInvalidationInvalidated!.bsa",
        source_name: "ArchiveInvalidationInvalidated!.bsa",
    }],
    config_files: &["Oblivion.ini"],
    save_subdir: "Saves",
};

static SKYRIM_SE: GameSpec = GameSpec {
    id: GameId::SkyrimSe,
    display_name: "Skyrim Special Edition",
    data_subdir: "Data",
    plugin_extensions: &["esp", "esm", "esl"],
    plugin_list: PluginListDialect::EnabledPrefix,
    plugin_list_name: Some("plugins.txt"),
    mtime_load_order: false,
    resources: &[],
    config_files: &["Skyrim.ini", "SkyrimPrefs.ini"],
    save_subdir: "Saves",
};

pub fn supported_games() -> Vec<GameId> {
    vec![GameId::Morrowind, GameId::Oblivion, GameId::SkyrimSe]
}

pub fn is_plugin_file(spec: &GameSpec, name: &str) -> bool {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => return false,
    };
    spec.plugin_extensions
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}
