//! Resource, capability, and requirement types.

use indexmap::IndexMap;

use crate::filter::Filter;

/// Something a resource provides: a namespace plus attributes the
/// requirement filters match against.
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub namespace: String,
    pub attributes: IndexMap<String, String>,
}

impl Capability {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            attributes: IndexMap::new(),
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Something a resource needs: a namespace plus an optional filter. A
/// missing filter matches every capability in the namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub namespace: String,
    pub filter: Option<Filter>,
}

impl Requirement {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub(crate) fn matches(&self, capability: &Capability) -> bool {
        if capability.namespace != self.namespace {
            return false;
        }
        match &self.filter {
            Some(filter) => filter.matches(&capability.attributes),
            None => true,
        }
    }
}

/// Anything sortable by its capabilities and requirements.
pub trait Resource {
    fn capabilities(&self) -> &[Capability];
    fn requirements(&self) -> &[Requirement];
}

/// A plain owned resource; the common case for feature descriptors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureResource {
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub requirements: Vec<Requirement>,
}

impl FeatureResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            requirements: Vec::new(),
        }
    }

    pub fn provides(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }
}

impl Resource for FeatureResource {
    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }
}
