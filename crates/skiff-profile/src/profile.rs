//! The profile model and its builder.
//!
//! A profile's parents and attributes are not separate fields on disk:
//! they live inside the internal `profile.properties` entry under
//! `attribute.`-prefixed keys, with the parent list space-separated under
//! `attribute.parents`. The builder reads and writes that entry; the built
//! [`Profile`] exposes the derived views.

use indexmap::IndexMap;

use crate::props;

/// File suffix marking a property-file entry.
pub const PROPERTIES_SUFFIX: &str = ".properties";
/// Sentinel key/value driving deletion during overlay merges.
pub const DELETED: &str = "#deleted#";
/// Pid of the internal entry carrying attributes and the parent list.
pub const INTERNAL_PID: &str = "profile";
/// Prefix of attribute keys inside the internal entry.
pub const ATTRIBUTE_PREFIX: &str = "attribute.";

const PARENTS_ATTRIBUTE: &str = "parents";

/// A named bundle of file-shaped configuration entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    id: String,
    parents: Vec<String>,
    files: IndexMap<String, Vec<u8>>,
    overlay: bool,
}

impl Profile {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parent profile ids, in declaration order.
    pub fn parent_ids(&self) -> &[String] {
        &self.parents
    }

    /// All file entries, name to bytes.
    pub fn file_configurations(&self) -> &IndexMap<String, Vec<u8>> {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// The parsed key-value view of every `.properties` entry, keyed by
    /// pid (the file name with the suffix stripped).
    pub fn configurations(&self) -> IndexMap<String, IndexMap<String, String>> {
        let mut out = IndexMap::new();
        for (name, bytes) in &self.files {
            if let Some(pid) = name.strip_suffix(PROPERTIES_SUFFIX) {
                out.insert(pid.to_string(), props::parse(bytes));
            }
        }
        out
    }

    /// The key-value content of one `.properties` entry; empty when the
    /// pid has no entry.
    pub fn configuration(&self, pid: &str) -> IndexMap<String, String> {
        self.file(&format!("{pid}{PROPERTIES_SUFFIX}"))
            .map(props::parse)
            .unwrap_or_default()
    }

    /// Attributes from the internal entry, prefix stripped. The parent
    /// list appears here under `parents`.
    pub fn attributes(&self) -> IndexMap<String, String> {
        self.configuration(INTERNAL_PID)
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(ATTRIBUTE_PREFIX)
                    .map(|stripped| (stripped.to_string(), value))
            })
            .collect()
    }

    pub fn is_overlay(&self) -> bool {
        self.overlay
    }
}

/// Builder for [`Profile`]. Every method returns the builder.
#[derive(Debug, Clone, Default)]
pub struct ProfileBuilder {
    id: String,
    files: IndexMap<String, Vec<u8>>,
    overlay: bool,
}

impl ProfileBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            files: IndexMap::new(),
            overlay: false,
        }
    }

    /// Start from an existing profile's identity and files.
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            id: profile.id().to_string(),
            files: profile.file_configurations().clone(),
            overlay: false,
        }
    }

    pub fn identity(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    // --- Files ---

    pub fn add_file_configuration(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.into(), data.into());
        self
    }

    pub fn delete_file_configuration(mut self, name: &str) -> Self {
        self.files.shift_remove(name);
        self
    }

    pub fn set_file_configurations(mut self, files: IndexMap<String, Vec<u8>>) -> Self {
        self.files = files;
        self
    }

    // --- Configurations (property files) ---

    /// Replace the `.properties` entry for `pid`.
    pub fn add_configuration(self, pid: &str, config: IndexMap<String, String>) -> Self {
        self.add_file_configuration(format!("{pid}{PROPERTIES_SUFFIX}"), props::to_bytes(&config))
    }

    /// Set one key in the `.properties` entry for `pid`.
    pub fn add_config_entry(
        self,
        pid: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut config = self.configuration(pid);
        config.insert(key.into(), value.into());
        self.add_configuration(pid, config)
    }

    /// Replace every `.properties` entry with the given configurations.
    pub fn set_configurations(
        mut self,
        configs: IndexMap<String, IndexMap<String, String>>,
    ) -> Self {
        let property_files: Vec<String> = self
            .files
            .keys()
            .filter(|name| name.ends_with(PROPERTIES_SUFFIX))
            .cloned()
            .collect();
        for name in property_files {
            self.files.shift_remove(&name);
        }
        for (pid, config) in configs {
            self = self.add_configuration(&pid, config);
        }
        self
    }

    /// The parsed `.properties` entry for `pid`; empty when missing.
    pub fn configuration(&self, pid: &str) -> IndexMap<String, String> {
        self.files
            .get(&format!("{pid}{PROPERTIES_SUFFIX}"))
            .map(|bytes| props::parse(bytes))
            .unwrap_or_default()
    }

    // --- Parents ---

    pub fn parents(&self) -> Vec<String> {
        let config = self.configuration(INTERNAL_PID);
        config
            .get(&format!("{ATTRIBUTE_PREFIX}{PARENTS_ATTRIBUTE}"))
            .map(|spec| spec.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn add_parent(self, parent_id: impl Into<String>) -> Self {
        let mut parents = self.parents();
        let parent_id = parent_id.into();
        if !parents.contains(&parent_id) {
            parents.push(parent_id);
        }
        self.write_parents(parents)
    }

    pub fn set_parents(self, parent_ids: Vec<String>) -> Self {
        self.write_parents(parent_ids)
    }

    pub fn remove_parent(self, parent_id: &str) -> Self {
        let parents = self
            .parents()
            .into_iter()
            .filter(|p| p != parent_id)
            .collect();
        self.write_parents(parents)
    }

    fn write_parents(self, parents: Vec<String>) -> Self {
        let mut config = self.configuration(INTERNAL_PID);
        let key = format!("{ATTRIBUTE_PREFIX}{PARENTS_ATTRIBUTE}");
        if parents.is_empty() {
            config.shift_remove(&key);
        } else {
            config.insert(key, parents.join(" "));
        }
        self.add_configuration(INTERNAL_PID, config)
    }

    // --- Attributes ---

    pub fn add_attribute(self, key: &str, value: impl Into<String>) -> Self {
        self.add_config_entry(INTERNAL_PID, format!("{ATTRIBUTE_PREFIX}{key}"), value)
    }

    /// Replace all attributes. Keys are unprefixed, as
    /// [`Profile::attributes`] returns them, so a parent list round-trips
    /// through this call.
    pub fn set_attributes(self, attributes: IndexMap<String, String>) -> Self {
        let mut config = self.configuration(INTERNAL_PID);
        config.retain(|key, _| !key.starts_with(ATTRIBUTE_PREFIX));
        for (key, value) in attributes {
            config.insert(format!("{ATTRIBUTE_PREFIX}{key}"), value);
        }
        self.add_configuration(INTERNAL_PID, config)
    }

    pub fn set_overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn build(self) -> Profile {
        let parents = self.parents();
        Profile {
            id: self.id,
            parents,
            files: self.files,
            overlay: self.overlay,
        }
    }
}
