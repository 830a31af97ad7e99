use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::schema::PolicyBundle;
use crate::validator::ValidationConfig;

/// Only bundle schema version understood by this crate.
pub const SUPPORTED_VERSION: &str = "1.0";

/// On-disk encoding of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    Yaml,
    Json,
}

impl BundleFormat {
    /// `.json` files are JSON; everything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Load a [`PolicyBundle`] from a YAML or JSON file on disk.
///
/// Validates the bundle after deserialization; see [`load_bundle_from_str`].
pub fn load_bundle(path: impl AsRef<Path>, config: &ValidationConfig) -> Result<PolicyBundle> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file: {}", path.display()))?;
    load_bundle_from_str(&contents, BundleFormat::from_path(path), config)
        .with_context(|| format!("failed to load policy file: {}", path.display()))
}

/// Parse and validate a [`PolicyBundle`].
///
/// Every condition tree is parsed and validated, so a bundle that loads can
/// be evaluated without structural surprises.
pub fn load_bundle_from_str(
    text: &str,
    format: BundleFormat,
    config: &ValidationConfig,
) -> Result<PolicyBundle> {
    let bundle: PolicyBundle = match format {
        BundleFormat::Yaml => serde_yml::from_str(text).context("YAML deserialization failed")?,
        BundleFormat::Json => serde_json::from_str(text).context("JSON deserialization failed")?,
    };
    validate(&bundle, config)?;
    debug!(
        endpoints = bundle.endpoints.len(),
        policies = bundle.policies.len(),
        "policy bundle validated"
    );
    Ok(bundle)
}

/// Cross-reference checks that serde cannot express.
fn validate(bundle: &PolicyBundle, config: &ValidationConfig) -> Result<()> {
    if bundle.version != SUPPORTED_VERSION {
        bail!(
            "unsupported policy version '{}'; only '{}' is supported",
            bundle.version,
            SUPPORTED_VERSION
        );
    }

    let mut routes = HashSet::new();
    let mut endpoints = HashMap::new();
    for endpoint in &bundle.endpoints {
        if !routes.insert((endpoint.method, endpoint.path.as_str())) {
            bail!("duplicate endpoint: {} {}", endpoint.method, endpoint.path);
        }
        if endpoints.insert(endpoint.id, endpoint).is_some() {
            bail!("duplicate endpoint id: {}", endpoint.id);
        }
    }

    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for rule in &bundle.policies {
        if !ids.insert(rule.id) {
            bail!("duplicate policy id: {}", rule.id);
        }
        let Some(endpoint) = endpoints.get(&rule.end_point_id) else {
            bail!(
                "policy '{}' references unknown endpoint id {}",
                rule.name,
                rule.end_point_id
            );
        };
        if !names.insert((rule.end_point_id, rule.name.as_str())) {
            bail!(
                "duplicate policy name '{}' for endpoint {} {}",
                rule.name,
                endpoint.method,
                endpoint.path
            );
        }
        rule.check(config)
            .with_context(|| format!("policy '{}' ({}) is invalid", rule.name, rule.id))?;
    }

    Ok(())
}
