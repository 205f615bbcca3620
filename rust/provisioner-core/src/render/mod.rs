//! Renderer / Handler (C3, §4.3): adapts a [`BundleFs`] into a list of
//! target-cluster objects. Pure: identical inputs yield byte-identical
//! outputs, so this module never touches the network or the orchestrator.

pub mod chart;
pub mod plain;
pub mod registry;

use serde_json::Value;
use snafu::Snafu;

use crate::fs::BundleFs;

/// A decoded, still-unstructured Kubernetes-style object: enough to read
/// `kind`/`apiVersion`/`metadata` generically without needing every type in
/// the scheme linked in.
pub type RenderedObject = Value;

#[derive(Snafu, Debug)]
pub enum RenderError {
    #[snafu(display("plain render failed"), context(false))]
    Plain { source: plain::PlainRenderError },

    #[snafu(display("registry render failed"), context(false))]
    Registry { source: registry::RegistryRenderError },

    #[snafu(display("chart render failed"), context(false))]
    Chart { source: chart::ChartRenderError },
}

impl crate::error::ReconcilerError for RenderError {
    fn category(&self) -> &'static str {
        "InstallFailed"
    }
}

/// The three render variants named in §4.3, keyed by the same
/// `provisionerClassName` a Bundle/BundleDeployment carries.
pub enum RenderVariant {
    Plain,
    Registry,
    Chart,
}

impl RenderVariant {
    pub fn from_provisioner_class(class: &str) -> Option<Self> {
        match class {
            rukpak_crd::PROVISIONER_PLAIN => Some(RenderVariant::Plain),
            rukpak_crd::PROVISIONER_REGISTRY => Some(RenderVariant::Registry),
            rukpak_crd::PROVISIONER_HELM => Some(RenderVariant::Chart),
            _ => None,
        }
    }
}

/// `Render(fs, config) -> (objects[], error)` (§4.3 contract).
pub fn render(
    variant: &RenderVariant,
    fs: &BundleFs,
    config: Option<&Value>,
) -> Result<Vec<RenderedObject>, RenderError> {
    match variant {
        RenderVariant::Plain => Ok(plain::render(fs)?),
        RenderVariant::Registry => Ok(registry::render(fs)?),
        RenderVariant::Chart => Ok(chart::render(fs, config)?),
    }
}
