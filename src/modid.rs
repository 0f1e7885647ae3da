use anyhow::{Context, Result};
use std::{fs, io, path::Path};

/// Stable id for a mod derived from its normalized label. Used for
/// manifest bookkeeping and de-duplicating repeat imports.
pub fn mod_id(label: &str) -> String {
    let normalized: String = label
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect();
    let hash = blake3::hash(normalized.as_bytes());
    hash.to_hex()[..16].to_string()
}

pub fn file_digest(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = fs::File::open(path).with_context(|| format!("open {:?}", path))?;
    io::copy(&mut file, &mut hasher).with_context(|| format!("hash {:?}", path))?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_id_ignores_case_and_separators() {
        assert_eq!(mod_id("Lighting Overhaul"), mod_id("lighting_overhaul"));
        assert_ne!(mod_id("Lighting Overhaul"), mod_id("Lighting Overhaul 2"));
        assert_eq!(mod_id("x").len(), 16);
    }
}
