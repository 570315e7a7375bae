//! skiff-features: capability/requirement resource sorting.
//!
//! Resources declare capabilities (a namespace plus an attribute map) and
//! requirements (a namespace plus an optional filter). [`sort`] re-orders a
//! collection so providers precede the resources that require them, stably
//! and cycle-tolerantly.

pub mod filter;
pub mod resource;
pub mod sort;

pub use filter::{Filter, FilterError};
pub use resource::{Capability, FeatureResource, Requirement, Resource};
pub use sort::sort;
