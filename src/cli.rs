use crate::{
    config::{self, AppConfig},
    deploy,
    merge::{self, ImportFile, ImportRequest, MergeStrategy},
    overwrite::{self, ModShadows, StreamOptions},
    paths,
    profile::{self, Profile},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    profile: Option<String>,
    data_dir: Option<PathBuf>,
}

enum CliCommand {
    Deploy { plugins: bool },
    Undeploy,
    Run,
    Conflicts { stream: bool },
    Import(ImportOptions),
    ProfilesList,
    Paths,
    Help,
    Version,
}

struct ImportOptions {
    staging: PathBuf,
    mod_name: String,
    strategy: MergeStrategy,
    preserve_source: bool,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, options) = parse_args(&args)?;
    let data_dir = match &options.data_dir {
        Some(dir) => dir.clone(),
        None => config::default_data_dir()?,
    };

    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("modfold {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::ProfilesList => {
            let names = profile::list_profiles(&data_dir)?;
            match options.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
                OutputFormat::Text => {
                    for name in names {
                        println!("{name}");
                    }
                }
            }
            Ok(())
        }
        CliCommand::Paths => {
            let full = load_full_profile(&data_dir, &options)?;
            let live = deploy::detect_paths(&full)?;
            let report = PathsReport {
                data_dir: data_dir.clone(),
                mods_dir: paths::mods_dir(&data_dir, &full.name, &full.overrides),
                config_dir: paths::config_dir(&data_dir, &full.name, &full.overrides),
                saves_dir: paths::saves_dir(&data_dir, &full.name, &full.overrides),
                backups_dir: paths::backups_dir(&data_dir, &full.name, &full.overrides),
                game_root: live.game_root,
                game_data_dir: live.data_dir,
            };
            match options.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => report.print(),
            }
            Ok(())
        }
        CliCommand::Deploy { plugins } => {
            let full = load_full_profile(&data_dir, &options)?;
            let report = deploy::deploy(&data_dir, &full, plugins)?;
            print_deploy_report(&full.name, &report, options.format);
            Ok(())
        }
        CliCommand::Undeploy => {
            let full = load_full_profile(&data_dir, &options)?;
            deploy::undeploy(&data_dir, &full)?;
            if options.format == OutputFormat::Text {
                println!("undeployed {}", full.name);
            }
            Ok(())
        }
        CliCommand::Run => {
            let full = load_full_profile(&data_dir, &options)?;
            let launch = full
                .launch_command
                .clone()
                .context("profile has no launch command configured")?;
            let report = deploy::deploy(&data_dir, &full, true)?;
            print_deploy_report(&full.name, &report, options.format);
            let status = Command::new("sh")
                .arg("-c")
                .arg(&launch)
                .current_dir(&full.game_root)
                .status()
                .with_context(|| format!("launch {launch:?}"))?;
            if !status.success() {
                bail!("launch command exited with {status}");
            }
            Ok(())
        }
        CliCommand::Conflicts { stream } => {
            let full = load_full_profile(&data_dir, &options)?;
            let live = deploy::detect_paths(&full)?;
            let stream_options = stream.then(|| {
                StreamOptions::new(Arc::new(|shadows: &ModShadows| {
                    for layer in &shadows.shadowed {
                        let owner = layer.owner.as_deref().unwrap_or("<external>");
                        eprintln!(
                            "{}: shadows {} file(s) of {}",
                            shadows.mod_name,
                            layer.files.len(),
                            owner
                        );
                    }
                }))
            });
            let result = overwrite::calculate_profile_overwrites(
                &data_dir,
                &full,
                &live.game_root,
                &live.data_dir,
                stream_options.as_ref(),
            )?;
            print_overwrites(&result, options.format)
        }
        CliCommand::Import(import) => {
            let full = load_full_profile(&data_dir, &options)?;
            let staging = import.staging.clone();
            if !staging.is_dir() {
                bail!("import source is not a directory: {:?}", staging);
            }
            let files: Vec<ImportFile> = overwrite::scan_mod_files(&staging)?
                .into_iter()
                .map(|relative| ImportFile {
                    source: staging.join(relative.split('/').collect::<PathBuf>()),
                    relative,
                    enabled: true,
                })
                .collect();
            let spec = full.game.spec();
            let plugin_files = files
                .iter()
                .filter(|file| crate::game::is_plugin_file(spec, &file.relative))
                .map(|file| file.relative.clone())
                .collect();
            let request = ImportRequest {
                staging_dir: staging,
                files,
                mappings: Vec::new(),
                install_roots: Vec::new(),
                plugin_files,
                strategy: import.strategy,
                preserve_source: import.preserve_source,
            };
            let mods_dir = paths::mods_dir(&data_dir, &full.name, &full.overrides);
            let storage = paths::mod_storage_dir(&mods_dir, &import.mod_name);
            let report = merge::complete_mod_import_with_data_root(
                &request,
                &storage,
                spec.data_subdir,
            )?;
            match options.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "mod": import.mod_name,
                            "placed": report.placed,
                            "skippedExisting": report.skipped_existing,
                            "remapped": report.remapped,
                        })
                    );
                }
                OutputFormat::Text => println!(
                    "imported {} file(s) into {:?} ({} skipped, {} remapped)",
                    report.placed, storage, report.skipped_existing, report.remapped
                ),
            }
            Ok(())
        }
    }
}

fn load_full_profile(data_dir: &Path, options: &GlobalOptions) -> Result<crate::profile::FullProfile> {
    let name = match &options.profile {
        Some(name) => name.clone(),
        None => {
            let config = AppConfig::load_or_create(data_dir)?;
            config
                .active_profile
                .context("no profile selected; pass --profile or set one in config")?
        }
    };
    let profile = Profile::load(data_dir, &name)?;
    match profile {
        Profile::Full(full) => Ok(full),
        Profile::Base(_) => bail!("profile {name:?} is a base profile and cannot be deployed"),
    }
}

fn parse_args(args: &[String]) -> Result<(CliCommand, GlobalOptions)> {
    let mut options = GlobalOptions {
        format: OutputFormat::Text,
        profile: None,
        data_dir: None,
    };
    let mut positional: Vec<&str> = Vec::new();
    let mut plugins = true;
    let mut stream = false;
    let mut strategy = MergeStrategy::default();
    let mut preserve_source = true;
    let mut mod_name: Option<String> = None;

    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => {
                let value = iter.next().context("--format requires a value")?;
                options.format =
                    OutputFormat::parse(value).with_context(|| format!("unknown format {value:?}"))?;
            }
            "--profile" | "-p" => {
                options.profile = Some(iter.next().context("--profile requires a name")?.clone());
            }
            "--data-dir" => {
                options.data_dir =
                    Some(PathBuf::from(iter.next().context("--data-dir requires a path")?));
            }
            "--no-plugins" => plugins = false,
            "--stream" => stream = true,
            "--move" => preserve_source = false,
            "--mod" => {
                mod_name = Some(iter.next().context("--mod requires a name")?.clone());
            }
            "--strategy" => {
                let value = iter.next().context("--strategy requires a value")?;
                strategy = match value.as_str() {
                    "keep" => MergeStrategy::Keep,
                    "overwrite" => MergeStrategy::Overwrite,
                    "replace" => MergeStrategy::Replace,
                    other => bail!("unknown merge strategy {other:?}"),
                };
            }
            "--help" | "-h" => return Ok((CliCommand::Help, options)),
            "--version" | "-V" => return Ok((CliCommand::Version, options)),
            other if other.starts_with('-') => bail!("unknown option {other:?}"),
            other => positional.push(other),
        }
    }

    let command = match positional.first().copied() {
        None | Some("help") => CliCommand::Help,
        Some("version") => CliCommand::Version,
        Some("deploy") => CliCommand::Deploy { plugins },
        Some("undeploy") => CliCommand::Undeploy,
        Some("run") => CliCommand::Run,
        Some("conflicts") => CliCommand::Conflicts { stream },
        Some("paths") => CliCommand::Paths,
        Some("profiles") => match positional.get(1).copied() {
            Some("list") | None => CliCommand::ProfilesList,
            Some(other) => bail!("unknown profiles subcommand {other:?}"),
        },
        Some("import") => {
            let staging = positional
                .get(1)
                .context("import requires a staging directory")?;
            CliCommand::Import(ImportOptions {
                staging: PathBuf::from(staging),
                mod_name: mod_name.context("import requires --mod <name>")?,
                strategy,
                preserve_source,
            })
        }
        Some(other) => bail!("unknown command {other:?}"),
    };
    Ok((command, options))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PathsReport {
    data_dir: PathBuf,
    mods_dir: PathBuf,
    config_dir: PathBuf,
    saves_dir: PathBuf,
    backups_dir: PathBuf,
    game_root: PathBuf,
    game_data_dir: PathBuf,
}

impl PathsReport {
    fn print(&self) {
        println!("data dir:      {}", self.data_dir.display());
        println!("mods dir:      {}", self.mods_dir.display());
        println!("config dir:    {}", self.config_dir.display());
        println!("saves dir:     {}", self.saves_dir.display());
        println!("backups dir:   {}", self.backups_dir.display());
        println!("game root:     {}", self.game_root.display());
        println!("game data dir: {}", self.game_data_dir.display());
    }
}

fn print_deploy_report(profile: &str, report: &deploy::DeployReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "profile": profile,
                "filesWritten": report.files_written,
                "shadowedSkipped": report.shadowed_skipped,
                "externalsDisplaced": report.externals_displaced,
                "pluginsListed": report.plugins_listed,
                "resourcesDeployed": report.resources_deployed,
                "linkMode": report.link_mode_summary,
                "warnings": report.warnings,
            });
            println!("{value}");
        }
        OutputFormat::Text => {
            println!(
                "deployed {}: {} file(s), {} shadowed, {} external(s) displaced, link mode {}",
                profile,
                report.files_written,
                report.shadowed_skipped,
                report.externals_displaced,
                report.link_mode_summary
            );
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
        }
    }
}

fn print_overwrites(result: &overwrite::ProfileOverwrites, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let render_sets = |sets: &[overwrite::ShadowSet]| {
                serde_json::json!(sets
                    .iter()
                    .map(|set| {
                        serde_json::json!({
                            "shadowingMod": set.shadowing_mod,
                            "files": set.files,
                        })
                    })
                    .collect::<Vec<_>>())
            };
            let render = |map: &overwrite::OverwriteMap| {
                let mut out = serde_json::Map::new();
                for (name, sets) in &map.by_mod {
                    out.insert(name.clone(), render_sets(sets));
                }
                serde_json::json!({
                    "byMod": serde_json::Value::Object(out),
                    "external": render_sets(&map.external),
                })
            };
            let value = serde_json::json!({
                "data": render(&result.data),
                "root": render(&result.root),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            for (label, map) in [("data", &result.data), ("root", &result.root)] {
                if map.is_empty() {
                    continue;
                }
                println!("{label} mods:");
                for (name, sets) in &map.by_mod {
                    for set in sets {
                        println!(
                            "  {name}: {} file(s) shadowed by {}",
                            set.files.len(),
                            set.shadowing_mod
                        );
                        for file in &set.files {
                            println!("    {file}");
                        }
                    }
                }
                for set in &map.external {
                    println!(
                        "  <external>: {} file(s) shadowed by {}",
                        set.files.len(),
                        set.shadowing_mod
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("modfold - profile-based mod deployment");
    println!();
    println!("Usage: modfold [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  deploy              Project the profile's mod stack into the game directory");
    println!("  undeploy            Remove a deployment and restore displaced files");
    println!("  run                 Deploy, then run the profile's launch command");
    println!("  conflicts           Show the overwrite map for the profile's stacks");
    println!("  import <dir>        Merge a staged directory into a mod's storage (--mod NAME)");
    println!("  profiles list       List stored profiles");
    println!("  paths               Show resolved storage and game paths");
    println!();
    println!("Options:");
    println!("  -p, --profile NAME  Profile to operate on (default: config.json active profile)");
    println!("      --data-dir DIR  Override the modfold data directory");
    println!("      --format FMT    Output format: text or json");
    println!("      --no-plugins    Skip writing the plugin list on deploy");
    println!("      --stream        Stream per-mod conflict results as they are computed");
    println!("      --strategy S    Import merge strategy: keep, overwrite, replace");
    println!("      --move          Consume staged files instead of copying them");
}
