//! Custom resource definitions for the RukPak provisioner engine.
//!
//! This crate only contains the wire types: [`Bundle`] and [`BundleDeployment`],
//! their spec/status shapes, and the small set of helpers needed to read and
//! write them (condition helpers, the source-variant tagged union, the
//! template fingerprint). Reconciliation logic lives in `rukpak-provisioner-core`
//! and `rukpak-operator`.

pub mod bundle;
pub mod bundle_deployment;
pub mod condition;
pub mod fingerprint;
pub mod probe;
pub mod source;

pub use bundle::{Bundle, BundlePhase, BundleSpec, BundleStatus};
pub use bundle_deployment::{BundleDeployment, BundleDeploymentSpec, BundleDeploymentStatus};
pub use source::{BundleSource, ResolvedBundleSource};

/// Label/annotation prefix used for every object this engine manages.
pub const GROUP: &str = "core.rukpak.io";

/// Name of the field manager used for all server-side-apply patches.
pub const FIELD_MANAGER: &str = "rukpak";

/// Finalizer placed on every [`Bundle`] so its cached archive can be cleaned
/// up before the API object disappears.
pub const BUNDLE_FINALIZER: &str = "core.rukpak.io/bundle-content-cleanup";

/// Well-known provisioner class names for the three render variants this
/// engine ships. Operators are free to run under a different class name;
/// these are just the defaults used by `rukpak-operator`'s CLI.
pub const PROVISIONER_PLAIN: &str = "core.rukpak.io/plain";
pub const PROVISIONER_REGISTRY: &str = "core.rukpak.io/registry";
pub const PROVISIONER_HELM: &str = "core.rukpak.io/helm";

/// Label keys used to mark objects rendered and installed by this engine as
/// owned by a particular `BundleDeployment`, per §4.4 "Tie-break rules".
pub mod owner_labels {
    pub const OWNER_KIND: &str = "core.rukpak.io/owner-kind";
    pub const OWNER_NAME: &str = "core.rukpak.io/owner-name";
}
