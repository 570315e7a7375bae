//! Overlay assembly: flatten a profile's parent graph into one profile.
//!
//! The parent graph is walked depth-first post-order (children after
//! parents), cycle-safe through a visited set of profile ids. Property
//! files merge key by key with the `#deleted#` sentinel rules; opaque
//! files overwrite wholesale. With an environment, a sibling `key#env`
//! entry replaces `key`'s value for that merge step.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::profile::{Profile, ProfileBuilder, DELETED, PROPERTIES_SUFFIX};
use crate::{props, ProfileError};

/// Flatten `profile` over its parent graph.
pub fn overlay(
    profile: &Profile,
    profiles: &HashMap<String, Profile>,
) -> Result<Profile, ProfileError> {
    overlay_with_env(profile, profiles, None)
}

/// Flatten `profile`, substituting environment-qualified entries for the
/// given environment.
pub fn overlay_with_env(
    profile: &Profile,
    profiles: &HashMap<String, Profile>,
    environment: Option<&str>,
) -> Result<Profile, ProfileError> {
    // Overlaying is idempotent: an overlay flattens to itself.
    if profile.is_overlay() {
        return Ok(profile.clone());
    }

    let mut inherited = Vec::new();
    let mut seen = HashSet::new();
    fill_parents(profile, profiles, &mut seen, &mut inherited)?;

    let mut aggregate: IndexMap<String, Supplement> = IndexMap::new();
    for profile in inherited {
        supplement(profile, environment, &mut aggregate);
    }

    let mut files = IndexMap::new();
    for (name, entry) in aggregate {
        let bytes = match entry {
            Supplement::Data(bytes) => bytes,
            Supplement::Props(props) => props::to_bytes(&props),
        };
        files.insert(name, bytes);
    }

    Ok(ProfileBuilder::new(profile.id())
        .set_file_configurations(files)
        .set_attributes(profile.attributes())
        .set_overlay(true)
        .build())
}

/// A merge accumulator entry: parsed for property files, raw otherwise.
enum Supplement {
    Data(Vec<u8>),
    Props(IndexMap<String, String>),
}

fn fill_parents<'a>(
    profile: &'a Profile,
    profiles: &'a HashMap<String, Profile>,
    seen: &mut HashSet<String>,
    out: &mut Vec<&'a Profile>,
) -> Result<(), ProfileError> {
    // Mark on enter so parent cycles terminate.
    if !seen.insert(profile.id().to_string()) {
        return Ok(());
    }
    for parent_id in profile.parent_ids() {
        let parent = profiles
            .get(parent_id)
            .ok_or_else(|| ProfileError::MissingProfile(parent_id.clone()))?;
        fill_parents(parent, profiles, seen, out)?;
    }
    out.push(profile);
    Ok(())
}

fn supplement(
    profile: &Profile,
    environment: Option<&str>,
    aggregate: &mut IndexMap<String, Supplement>,
) {
    for (name, bytes) in profile.file_configurations() {
        // Environment-qualified entries are only consulted as siblings.
        if name.contains('#') {
            continue;
        }
        let mut bytes = bytes.clone();
        if let Some(environment) = environment {
            if let Some(qualified) = profile.file(&format!("{name}#{environment}")) {
                bytes = qualified.to_vec();
            }
        }

        if name.ends_with(PROPERTIES_SUFFIX) {
            match aggregate.get_mut(name) {
                Some(Supplement::Props(existing)) => {
                    let mut incoming = props::parse(&bytes);
                    if incoming.shift_remove(DELETED).is_some() {
                        existing.clear();
                    }
                    for (key, value) in incoming {
                        if value == DELETED {
                            existing.shift_remove(&key);
                        } else {
                            existing.insert(key, value);
                        }
                    }
                }
                _ => {
                    aggregate.insert(name.clone(), Supplement::Props(props::parse(&bytes)));
                }
            }
        } else {
            aggregate.insert(name.clone(), Supplement::Data(bytes));
        }
    }
}
