//! The on-disk profile layout.
//!
//! A profile tree is a directory whose leaf directories named
//! `<segment>.profile` hold file configurations. The profile id is the
//! root-relative path with separators replaced by `-` and the suffix
//! stripped, so `a/b.profile` loads as profile `a-b`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::profile::{Profile, ProfileBuilder};
use crate::ProfileError;

/// Directory suffix marking a profile.
pub const PROFILE_FOLDER_SUFFIX: &str = ".profile";

/// Load every profile under `root`, keyed by id.
pub fn load_profiles(root: &Path) -> Result<HashMap<String, Profile>, ProfileError> {
    let mut profiles = HashMap::new();
    if root.is_dir() {
        walk(root, root, &mut profiles)?;
    }
    tracing::debug!(count = profiles.len(), root = %root.display(), "loaded profiles");
    Ok(profiles)
}

fn walk(
    root: &Path,
    dir: &Path,
    profiles: &mut HashMap<String, Profile>,
) -> Result<(), ProfileError> {
    let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if name.ends_with(PROFILE_FOLDER_SUFFIX) {
        let profile = load_one(root, dir)?;
        profiles.insert(profile.id().to_string(), profile);
        return Ok(());
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    for entry in entries {
        if entry.is_dir() {
            walk(root, &entry, profiles)?;
        }
    }
    Ok(())
}

fn load_one(root: &Path, dir: &Path) -> Result<Profile, ProfileError> {
    let relative = dir.strip_prefix(root).unwrap_or(dir);
    let mut id = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("-");
    id.truncate(id.len().saturating_sub(PROFILE_FOLDER_SUFFIX.len()));

    let mut builder = ProfileBuilder::new(id);
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        builder = builder.add_file_configuration(name, fs::read(&path)?);
    }
    Ok(builder.build())
}

/// Write a profile's files under `root`; fails if any file already exists.
pub fn write_profile(root: &Path, profile: &Profile) -> Result<(), ProfileError> {
    let dir = profile_dir(root, profile.id());
    fs::create_dir_all(&dir)?;
    for (name, bytes) in profile.file_configurations() {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(name))?;
        file.write_all(bytes)?;
    }
    Ok(())
}

/// Delete a profile's directory, if present.
pub fn delete_profile(root: &Path, id: &str) -> Result<(), ProfileError> {
    let dir = profile_dir(root, id);
    if dir.is_dir() {
        fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

fn profile_dir(root: &Path, id: &str) -> PathBuf {
    let mut dir = root.to_path_buf();
    for segment in id.split('-') {
        dir.push(segment);
    }
    let mut name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    name.push_str(PROFILE_FOLDER_SUFFIX);
    dir.set_file_name(name);
    dir
}
