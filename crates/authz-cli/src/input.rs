use std::path::Path;

use abac_engine::loader::BundleFormat;
use abac_engine::{Attributes, AuthorizationRequest, PolicyBundle, PolicyRule};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// A request file: the subject's claims next to the request itself.
#[derive(Debug, Deserialize)]
pub struct RequestFile {
    #[serde(default)]
    pub subject: Attributes,
    #[serde(flatten)]
    pub request: AuthorizationRequest,
}

impl RequestFile {
    /// The subject's `id` claim, if it is a string or a number.
    pub fn subject_id(&self) -> Option<String> {
        match self.subject.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Read a request file; `.json` is JSON, anything else YAML.
pub fn load_request(path: &Path) -> Result<RequestFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request file: {}", path.display()))?;
    parse_request(&contents, BundleFormat::from_path(path))
        .with_context(|| format!("failed to parse request file: {}", path.display()))
}

pub fn parse_request(text: &str, format: BundleFormat) -> Result<RequestFile> {
    let file = match format {
        BundleFormat::Yaml => serde_yml::from_str(text)?,
        BundleFormat::Json => serde_json::from_str(text)?,
    };
    Ok(file)
}

/// Find a rule by id, or failing that by name.
///
/// Names are only unique per endpoint, so a name shared by several rules is
/// an error that lists their ids.
pub fn find_rule<'b>(bundle: &'b PolicyBundle, key: &str) -> Result<&'b PolicyRule> {
    if let Some(rule) = bundle.policies.iter().find(|rule| rule.id.to_string() == key) {
        return Ok(rule);
    }

    let named: Vec<&PolicyRule> = bundle
        .policies
        .iter()
        .filter(|rule| rule.name == key)
        .collect();
    match named.as_slice() {
        [] => bail!("no policy with id or name '{key}'"),
        [rule] => Ok(rule),
        many => {
            let ids: Vec<String> = many.iter().map(|rule| rule.id.to_string()).collect();
            bail!(
                "policy name '{key}' is ambiguous; use one of the ids: {}",
                ids.join(", ")
            )
        }
    }
}
