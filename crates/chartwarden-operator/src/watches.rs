//! Watch configuration
//!
//! Maps custom-resource kinds to chart directories. Configuration comes
//! from a watches file (explicit via `HELM_CHART_WATCHES`, or the default
//! path when present) or, as a fallback, from the single-watch environment
//! variables `API_VERSION`, `KIND` and `HELM_CHART`.

use kube::api::ApiResource;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use chartwarden_core::LoadedChart;

/// Environment variable pointing at the watches file. Setting it (even to
/// an empty string) overrides every fallback.
pub const WATCHES_ENV: &str = "HELM_CHART_WATCHES";

/// Environment variable for the fallback `group/version`
pub const API_VERSION_ENV: &str = "API_VERSION";

/// Environment variable for the fallback kind
pub const KIND_ENV: &str = "KIND";

/// Environment variable for the fallback chart directory
pub const HELM_CHART_ENV: &str = "HELM_CHART";

/// Default watches file location inside the operator image
pub const DEFAULT_WATCHES_FILE: &str = "/opt/helm/watches.yaml";

/// Watch configuration errors; all of these are fatal at startup
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to read watches file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse watches file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid watch configuration: {0}")]
    Invalid(String),
}

/// One entry of the watches file
#[derive(Debug, Clone, Deserialize)]
struct RawWatch {
    #[serde(default)]
    group: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    chart: String,
}

/// A validated watch: one custom-resource kind bound to one chart
#[derive(Debug, Clone)]
pub struct WatchEntry {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub chart: PathBuf,
}

impl WatchEntry {
    /// The `apiVersion` string for this kind
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The dynamic API resource for this kind
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: format!("{}s", self.kind.to_lowercase()),
        }
    }
}

impl std::fmt::Display for WatchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Load the watch configuration from the environment
pub fn load() -> Result<Vec<WatchEntry>, WatchError> {
    if let Some(path) = watches_file() {
        return load_file(&path);
    }
    from_env_single()
}

/// Resolve the watches file to use, if any
fn watches_file() -> Option<PathBuf> {
    // An explicitly set variable wins, even when empty: the user asked for
    // that file.
    if let Ok(path) = std::env::var(WATCHES_ENV) {
        return Some(PathBuf::from(path));
    }

    let default = Path::new(DEFAULT_WATCHES_FILE);
    if default.exists() {
        return Some(default.to_path_buf());
    }
    None
}

/// Load and validate a watches file
pub fn load_file(path: &Path) -> Result<Vec<WatchEntry>, WatchError> {
    let content = std::fs::read_to_string(path).map_err(|source| WatchError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_watches(&content)
}

/// Parse and validate watches file content
pub fn parse_watches(content: &str) -> Result<Vec<WatchEntry>, WatchError> {
    let raw: Vec<RawWatch> = serde_yaml::from_str(content)?;

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw.len());
    for watch in raw {
        let entry = validate(watch.group, watch.version, watch.kind, watch.chart)?;
        let key = (entry.group.clone(), entry.version.clone(), entry.kind.clone());
        if !seen.insert(key) {
            return Err(WatchError::Invalid(format!("duplicate watch: {}", entry)));
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Build the single fallback watch from the environment
fn from_env_single() -> Result<Vec<WatchEntry>, WatchError> {
    let api_version = std::env::var(API_VERSION_ENV).unwrap_or_default();
    let kind = std::env::var(KIND_ENV).unwrap_or_default();
    let chart = std::env::var(HELM_CHART_ENV).unwrap_or_default();

    let (group, version) = parse_group_version(&api_version)?;
    Ok(vec![validate(group, version, kind, chart)?])
}

/// Split an `apiVersion` string into group and version
///
/// A bare version with no group is valid.
pub fn parse_group_version(api_version: &str) -> Result<(String, String), WatchError> {
    match api_version.split_once('/') {
        Some((group, version)) if !version.contains('/') => {
            Ok((group.to_string(), version.to_string()))
        }
        Some(_) => Err(WatchError::Invalid(format!(
            "malformed apiVersion '{}'",
            api_version
        ))),
        None => Ok((String::new(), api_version.to_string())),
    }
}

/// Validate a single watch entry
fn validate(
    group: String,
    version: String,
    kind: String,
    chart: String,
) -> Result<WatchEntry, WatchError> {
    if version.is_empty() {
        return Err(WatchError::Invalid("version must not be empty".to_string()));
    }
    if kind.is_empty() {
        return Err(WatchError::Invalid("kind must not be empty".to_string()));
    }

    let chart = PathBuf::from(chart);
    if !LoadedChart::is_chart_dir(&chart) {
        return Err(WatchError::Invalid(format!(
            "invalid chart directory '{}'",
            chart.display()
        )));
    }

    Ok(WatchEntry {
        group,
        version,
        kind,
        chart,
    })
}
