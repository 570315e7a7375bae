//! skiff-profile: layered key-value configuration profiles.
//!
//! A profile is a named bundle of file-shaped configuration entries plus a
//! parent list. This crate provides:
//!
//! - **Profile / ProfileBuilder**: the model, with parents and attributes
//!   stored in the internal `profile.properties` entry
//! - **Overlay**: parent-graph flattening with property-level merging and
//!   the `#deleted#` sentinel rules
//! - **Interpolation**: lazy, cycle-safe `${..}` substitution driven by
//!   pluggable placeholder resolvers
//! - **Layout**: the on-disk `<id>.profile` directory format

use thiserror::Error;

pub mod interpolate;
pub mod layout;
pub mod overlay;
pub mod profile;
pub mod props;

pub use interpolate::{
    ConfigView, Interpolator, PlaceholderResolver, ProfileResolver, CATCH_ALL_SCHEME,
};
pub use layout::{delete_profile, load_profiles, write_profile, PROFILE_FOLDER_SUFFIX};
pub use overlay::{overlay, overlay_with_env};
pub use profile::{Profile, ProfileBuilder, ATTRIBUTE_PREFIX, DELETED, INTERNAL_PID, PROPERTIES_SUFFIX};

/// Errors raised by overlay assembly and the on-disk layout.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// A parent reference could not be resolved.
    #[error("missing profile: {0}")]
    MissingProfile(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
