//! Chart render (§4.3): treat the filesystem as a chart archive, extract
//! templating values from the deployment's opaque config blob, and produce
//! rendered objects via the chart engine.
//!
//! The chart engine itself is explicitly out of scope (§1 "the embedded
//! chart rendering engine (treated as a black-box renderer with a known
//! input/output contract)"); [`ChartEngine`] is that contract. This module
//! owns everything around it: locating chart metadata, pulling `values`
//! out of the config blob (§9 "Chart value parsing"), and turning the
//! engine's output into the same `RenderedObject` shape the other variants
//! produce.

use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};

use super::RenderedObject;
use crate::fs::BundleFs;

const CHART_METADATA_FILE: &str = "Chart.yaml";

#[derive(Snafu, Debug)]
pub enum ChartRenderError {
    #[snafu(display("archive is missing top-level {CHART_METADATA_FILE}"))]
    MissingChartMetadata,

    #[snafu(display("failed to parse {CHART_METADATA_FILE}"))]
    ParseChartMetadata { source: serde_yaml::Error },

    #[snafu(display("config blob's `values` key is not a valid YAML mapping"))]
    ParseValues { source: serde_yaml::Error },

    #[snafu(display("chart engine failed to render the chart"))]
    Engine { source: anyhow::Error },

    #[snafu(display("chart engine produced output that isn't a JSON array of objects"))]
    MalformedEngineOutput,
}

impl crate::error::ReconcilerError for ChartRenderError {
    fn category(&self) -> &'static str {
        "InstallFailed"
    }
}

/// The black-box contract for the embedded chart engine (§1 Out of scope).
/// A real binary wires this to whatever rendering library it embeds;
/// nothing in this crate depends on that choice.
pub trait ChartEngine: Send + Sync {
    fn render(&self, chart: &BundleFs, values: &Value) -> Result<Vec<RenderedObject>, anyhow::Error>;
}

pub fn render(fs: &BundleFs, config: Option<&Value>) -> Result<Vec<RenderedObject>, ChartRenderError> {
    render_with_engine(fs, config, &NoopChartEngine)
}

/// Exposed separately so a binary can swap in the real chart engine; the
/// crate-visible default ([`render`]) exists purely so unit tests here
/// don't need one.
pub fn render_with_engine(
    fs: &BundleFs,
    config: Option<&Value>,
    engine: &dyn ChartEngine,
) -> Result<Vec<RenderedObject>, ChartRenderError> {
    fs.get(CHART_METADATA_FILE).context(MissingChartMetadataSnafu)?;
    let _metadata: Value = serde_yaml::from_slice(fs.get(CHART_METADATA_FILE).unwrap())
        .context(ParseChartMetadataSnafu)?;

    let values = extract_values(config)?;
    engine.render(fs, &values).context(EngineSnafu)
}

/// §9 "Chart value parsing": the config blob is interpreted as a mapping
/// where a `values` key holds a YAML document, specified explicitly rather
/// than relying on reflection over an arbitrary host-language value.
fn extract_values(config: Option<&Value>) -> Result<Value, ChartRenderError> {
    let Some(config) = config else {
        return Ok(Value::Object(Default::default()));
    };
    match config.get("values") {
        Some(Value::String(yaml_text)) => {
            serde_yaml::from_str(yaml_text).context(ParseValuesSnafu)
        }
        Some(values) => Ok(values.clone()),
        None => Ok(Value::Object(Default::default())),
    }
}

struct NoopChartEngine;

impl ChartEngine for NoopChartEngine {
    fn render(&self, _chart: &BundleFs, _values: &Value) -> Result<Vec<RenderedObject>, anyhow::Error> {
        anyhow::bail!("no chart engine configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoEngine;
    impl ChartEngine for EchoEngine {
        fn render(&self, _chart: &BundleFs, values: &Value) -> Result<Vec<RenderedObject>, anyhow::Error> {
            Ok(vec![json!({"kind": "ConfigMap", "data": values})])
        }
    }

    fn chart_fs() -> BundleFs {
        let mut fs = BundleFs::new();
        fs.insert("Chart.yaml", b"name: demo\nversion: 0.1.0\n".to_vec());
        fs
    }

    #[test]
    fn requires_chart_metadata() {
        let fs = BundleFs::new();
        assert!(matches!(
            render_with_engine(&fs, None, &EchoEngine),
            Err(ChartRenderError::MissingChartMetadata)
        ));
    }

    #[test]
    fn extracts_values_from_config_blob() {
        let config = json!({"values": "replicas: 3\n"});
        let objects =
            render_with_engine(&chart_fs(), Some(&config), &EchoEngine).unwrap();
        assert_eq!(objects[0]["data"]["replicas"], 3);
    }

    #[test]
    fn defaults_to_empty_values_without_config() {
        let objects = render_with_engine(&chart_fs(), None, &EchoEngine).unwrap();
        assert_eq!(objects[0]["data"], json!({}));
    }
}
