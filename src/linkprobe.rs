use anyhow::{Context, Result};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Which placement strategies work between a mod storage directory and a
/// deploy target, determined by real write+remove probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCapabilities {
    pub hardlink: bool,
    pub symlink: bool,
    pub junction: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Hard,
    Sym,
    Copy,
}

impl LinkKind {
    pub fn label(self) -> &'static str {
        match self {
            LinkKind::Hard => "hardlink",
            LinkKind::Sym => "symlink",
            LinkKind::Copy => "copy",
        }
    }
}

impl LinkCapabilities {
    /// Preferred placement: hardlink when both sides share a filesystem,
    /// then symlink, then plain copy.
    pub fn preferred(self) -> LinkKind {
        if self.hardlink {
            LinkKind::Hard
        } else if self.symlink {
            LinkKind::Sym
        } else {
            LinkKind::Copy
        }
    }
}

/// Removes probe artifacts on every exit path, success or error.
struct ProbeGuard {
    paths: Vec<PathBuf>,
}

impl ProbeGuard {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        for path in self.paths.iter().rev() {
            let _ = fs::remove_file(path);
        }
    }
}

fn probe_name(tag: &str) -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!(".modfold-probe-{tag}-{stamp}")
}

#[cfg(unix)]
fn create_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(not(unix))]
fn create_symlink(_source: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink unavailable on this platform",
    ))
}

/// Probe link support from `source_dir` into `target_dir` by creating and
/// removing throwaway files. Junctions are a Windows directory feature
/// this probe cannot exercise, so they are always reported unsupported.
pub fn probe(source_dir: &Path, target_dir: &Path) -> Result<LinkCapabilities> {
    fs::create_dir_all(source_dir).context("create probe source dir")?;
    fs::create_dir_all(target_dir).context("create probe target dir")?;

    let mut guard = ProbeGuard::new();
    let probe_source = guard.track(source_dir.join(probe_name("src")));
    fs::write(&probe_source, b"modfold probe")
        .with_context(|| format!("write probe file {:?}", probe_source))?;

    let hard_dest = guard.track(target_dir.join(probe_name("hard")));
    let hardlink = fs::hard_link(&probe_source, &hard_dest).is_ok();

    let sym_dest = guard.track(target_dir.join(probe_name("sym")));
    let symlink = create_symlink(&probe_source, &sym_dest).is_ok();

    Ok(LinkCapabilities {
        hardlink,
        symlink,
        junction: false,
    })
}

/// Place `source` at `dest` using the given strategy, replacing any
/// existing file. A directory at `dest` is an error; callers resolve
/// collisions before placement.
pub fn place_file(source: &Path, dest: &Path, kind: LinkKind) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(dest) {
        if meta.file_type().is_dir() {
            anyhow::bail!("destination exists as directory: {:?}", dest);
        }
        fs::remove_file(dest).with_context(|| format!("remove existing file {:?}", dest))?;
    }
    match kind {
        LinkKind::Hard => {
            fs::hard_link(source, dest)
                .with_context(|| format!("hardlink {:?} -> {:?}", source, dest))?;
        }
        LinkKind::Sym => {
            if let Err(err) = create_symlink(source, dest) {
                if dest.exists() {
                    let _ = fs::remove_file(dest);
                }
                return Err(err).with_context(|| format!("symlink {:?} -> {:?}", source, dest));
            }
        }
        LinkKind::Copy => {
            fs::copy(source, dest)
                .with_context(|| format!("copy {:?} -> {:?}", source, dest))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn probe_cleans_up_artifacts() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("store");
        let target = dir.path().join("game");
        let caps = probe(&source, &target).unwrap();
        // Same tmpfs, so at least one link flavor must work on unix.
        #[cfg(unix)]
        assert!(caps.hardlink || caps.symlink);
        assert!(!caps.junction, "junction support is never claimed unprobed");
        let leftovers: Vec<_> = fs::read_dir(&source)
            .unwrap()
            .chain(fs::read_dir(&target).unwrap())
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "probe left {:?}", leftovers);
        let _ = caps;
    }

    #[test]
    fn place_file_copy_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let dest = dir.path().join("b.txt");
        fs::write(&source, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();
        place_file(&source, &dest, LinkKind::Copy).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn place_file_refuses_directory_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        fs::write(&source, b"x").unwrap();
        let dest = dir.path().join("sub");
        fs::create_dir(&dest).unwrap();
        assert!(place_file(&source, &dest, LinkKind::Copy).is_err());
    }
}
