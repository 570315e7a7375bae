//! Lazy, cycle-safe placeholder interpolation over a profile's
//! configuration space.
//!
//! Substitution of a value runs in four stages: scheme-less resolvers on
//! the raw value, scheme-qualified resolvers after splitting on `:`,
//! `${..}` expansion across the whole configuration space, and finally
//! resolvers registered under [`CATCH_ALL_SCHEME`]. Values are computed on
//! demand and memoised per configuration key.
//!
//! Expansion is innermost-first and tracks the in-progress key set: a
//! placeholder that re-enters a key already being computed resolves to the
//! unexpanded placeholder text `${key}` — the pinned cycle sentinel —
//! instead of looping or failing.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::profile::{Profile, ProfileBuilder};

/// Reserved scheme for resolvers that run as a post-pass after `${..}`
/// expansion.
pub const CATCH_ALL_SCHEME: &str = "*";

/// The configuration space handed to resolvers: pid → key → raw text.
pub type ConfigView = IndexMap<String, IndexMap<String, String>>;

/// A pluggable substitution strategy, optionally bound to a scheme.
pub trait PlaceholderResolver {
    /// `None` for scheme-less resolvers that see every raw value.
    fn scheme(&self) -> Option<&str>;

    /// Resolve `value` for the given configuration key; `None` passes.
    fn resolve(&self, config: &ConfigView, pid: &str, key: &str, value: &str) -> Option<String>;
}

/// The standard `profile:` resolver: `${profile:pid/key}` reads another
/// configuration entry's raw value.
pub struct ProfileResolver;

impl PlaceholderResolver for ProfileResolver {
    fn scheme(&self) -> Option<&str> {
        Some("profile")
    }

    fn resolve(&self, config: &ConfigView, _pid: &str, _key: &str, value: &str) -> Option<String> {
        let (pid, key) = value.split_once('/')?;
        config.get(pid)?.get(key).cloned()
    }
}

/// Lazy substituted view over a profile's configurations.
pub struct Interpolator<'a> {
    config: ConfigView,
    resolvers: &'a [&'a dyn PlaceholderResolver],
    final_substitution: bool,
    memo: Mutex<HashMap<(String, String), String>>,
    in_progress: Mutex<HashSet<(String, String)>>,
}

impl<'a> Interpolator<'a> {
    pub fn new(
        profile: &Profile,
        resolvers: &'a [&'a dyn PlaceholderResolver],
        final_substitution: bool,
    ) -> Self {
        Self {
            config: profile.configurations(),
            resolvers,
            final_substitution,
            memo: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    /// The substituted value for a configuration key, or `None` when the
    /// key does not exist. Computed on first read, memoised after.
    pub fn value(&self, pid: &str, key: &str) -> Option<String> {
        let raw = self.config.get(pid)?.get(key)?.clone();
        Some(self.compute(pid, key, &raw))
    }

    /// The fully substituted configuration for one pid.
    pub fn configuration(&self, pid: &str) -> IndexMap<String, String> {
        let Some(config) = self.config.get(pid) else {
            return IndexMap::new();
        };
        let keys: Vec<String> = config.keys().cloned().collect();
        keys.into_iter()
            .filter_map(|key| self.value(pid, &key).map(|value| (key, value)))
            .collect()
    }

    /// Force every value and rebuild the profile with substituted
    /// property entries; opaque files pass through unchanged.
    pub fn profile(&self, profile: &Profile) -> Profile {
        let mut builder = ProfileBuilder::from_profile(profile);
        let pids: Vec<String> = self.config.keys().cloned().collect();
        for pid in pids {
            builder = builder.add_configuration(&pid, self.configuration(&pid));
        }
        builder.set_overlay(profile.is_overlay()).build()
    }

    fn compute(&self, pid: &str, key: &str, raw: &str) -> String {
        let id = (pid.to_string(), key.to_string());
        if let Some(hit) = self
            .memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
        {
            return hit.clone();
        }

        self.in_progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone());

        // Stage 1: scheme-less resolvers against the raw value.
        let mut value = raw.to_string();
        let mut resolved = false;
        for resolver in self.resolvers {
            if resolver.scheme().is_none() {
                if let Some(replacement) = resolver.resolve(&self.config, pid, key, &value) {
                    value = replacement;
                    resolved = true;
                    break;
                }
            }
        }

        // Stage 2: scheme-qualified resolvers.
        if !resolved {
            if let Some(split) = value.find(':') {
                let scheme = value[..split].to_string();
                let rest = value[split + 1..].to_string();
                for resolver in self.resolvers {
                    if resolver.scheme() == Some(scheme.as_str()) {
                        if let Some(replacement) = resolver.resolve(&self.config, pid, key, &rest) {
                            value = replacement;
                            break;
                        }
                    }
                }
            }
        }

        // Stage 3: ${..} expansion.
        let mut value = self.substitute(pid, key, &value);

        // Stage 4: catch-all post-pass.
        for resolver in self.resolvers {
            if resolver.scheme() == Some(CATCH_ALL_SCHEME) {
                if let Some(replacement) = resolver.resolve(&self.config, pid, key, &value) {
                    value = replacement;
                }
            }
        }

        self.in_progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        self.memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, value.clone());
        value
    }

    /// Innermost-first `${..}` expansion. Replacement text is inserted
    /// verbatim and never re-scanned, which is what makes the cycle
    /// sentinel terminating.
    fn substitute(&self, pid: &str, key: &str, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let bytes = value.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
                if let Some(end) = matching_brace(value, i + 2) {
                    let inner = &value[i + 2..end];
                    // Inner placeholders expand first.
                    let name = self.substitute(pid, key, inner);
                    out.push_str(&self.lookup(pid, key, &name));
                    i = end + 1;
                    continue;
                }
            }
            // Walk one full character, not one byte.
            let ch_len = value[i..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(1);
            out.push_str(&value[i..i + ch_len]);
            i += ch_len;
        }
        out
    }

    /// Resolve one placeholder name: resolvers first, then the same-pid
    /// configuration (recursively, cycle-tracked), then the environment or
    /// the unexpanded form depending on `final_substitution`.
    fn lookup(&self, pid: &str, key: &str, name: &str) -> String {
        for resolver in self.resolvers {
            if resolver.scheme().is_none() {
                if let Some(replacement) = resolver.resolve(&self.config, pid, key, name) {
                    return replacement;
                }
            }
        }
        if let Some((scheme, rest)) = name.split_once(':') {
            for resolver in self.resolvers {
                if resolver.scheme() == Some(scheme) {
                    if let Some(replacement) = resolver.resolve(&self.config, pid, key, rest) {
                        return replacement;
                    }
                }
            }
        }

        if let Some(raw) = self.config.get(pid).and_then(|c| c.get(name)).cloned() {
            let id = (pid.to_string(), name.to_string());
            let re_entry = self
                .in_progress
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&id);
            if re_entry {
                return format!("${{{name}}}");
            }
            return self.compute(pid, name, &raw);
        }

        if self.final_substitution {
            std::env::var(name).unwrap_or_default()
        } else {
            format!("${{{name}}}")
        }
    }
}

/// Index of the `}` matching an opening `${` whose content starts at
/// `from`, honouring nested `${..}`.
fn matching_brace(value: &str, from: usize) -> Option<usize> {
    let bytes = value.as_bytes();
    let mut depth = 1;
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += 1;
        } else {
            i += 1;
        }
    }
    None
}
