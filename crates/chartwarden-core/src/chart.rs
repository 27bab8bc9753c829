//! Chart definition and loading

use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::values::Values;

/// Name of the chart descriptor file inside a chart directory.
pub const CHART_FILE: &str = "Chart.yaml";

/// A Chartwarden chart - a directory bundle of templated manifests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    /// API version (chartwarden/v1)
    pub api_version: String,

    /// Chart metadata
    pub metadata: ChartMetadata,

    /// Subchart requirements
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// Chart metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name (required)
    pub name: String,

    /// Chart version (required, SemVer)
    pub version: Version,

    /// Description
    #[serde(default)]
    pub description: Option<String>,

    /// Application version
    #[serde(default)]
    pub app_version: Option<String>,

    /// Home URL
    #[serde(default)]
    pub home: Option<String>,

    /// Source URLs
    #[serde(default)]
    pub sources: Vec<String>,

    /// Keywords
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A subchart requirement
///
/// Dependencies are resolved from the `charts/` directory. A dependency can
/// be switched on and off through its `condition` (a dot-path into the
/// release values) and can export parts of its defaults back into the
/// parent scope through `import-values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Dependency name (directory name under `charts/`)
    pub name: String,

    /// Static enable/disable flag, evaluated at parse time
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Runtime condition, a dot-path evaluated against the release values
    /// (e.g. `redis.enabled` checks `values.redis.enabled`)
    #[serde(default)]
    pub condition: Option<String>,

    /// Alias name (overrides the dependency name for value scoping)
    #[serde(default)]
    pub alias: Option<String>,

    /// Dot-paths in the subchart's default values to merge back into the
    /// parent values under the subchart's scope
    #[serde(default, rename = "import-values")]
    pub import_values: Vec<String>,
}

impl Dependency {
    /// Effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether this subchart is enabled for the given values
    ///
    /// The static `enabled` flag always wins; a missing condition path is
    /// treated as falsy.
    pub fn is_enabled(&self, values: &serde_json::Value) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.condition {
            Some(condition) => evaluate_condition(condition, values),
            None => true,
        }
    }
}

/// Evaluate a dot-path condition against values
///
/// Supports paths like `redis.enabled`, `features.cache.memory`.
fn evaluate_condition(condition: &str, values: &serde_json::Value) -> bool {
    let mut current = values;
    for part in condition.split('.') {
        match current.get(part) {
            Some(v) => current = v,
            None => return false,
        }
    }

    // Coerce to boolean
    match current {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

fn default_true() -> bool {
    true
}

/// Loaded chart with resolved paths
#[derive(Debug, Clone)]
pub struct LoadedChart {
    /// Chart definition
    pub chart: Chart,

    /// Root directory of the chart
    pub root: PathBuf,

    /// Templates directory
    pub templates_dir: PathBuf,

    /// Default values file path
    pub values_path: PathBuf,

    /// Subcharts directory (charts/)
    pub subcharts_dir: PathBuf,
}

impl LoadedChart {
    /// Load a chart from a directory
    ///
    /// Re-reads everything from disk; callers that need pristine state per
    /// render (the release manager does) load a fresh copy each time.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let chart_file = root.join(CHART_FILE);
        if !chart_file.exists() {
            return Err(CoreError::InvalidChart {
                message: format!("{} not found in {}", CHART_FILE, root.display()),
            });
        }

        let content = std::fs::read_to_string(&chart_file)?;
        let chart: Chart = serde_yaml::from_str(&content)?;

        if chart.api_version != "chartwarden/v1" {
            return Err(CoreError::InvalidChart {
                message: format!(
                    "Unsupported API version: {}. Expected: chartwarden/v1",
                    chart.api_version
                ),
            });
        }

        Ok(Self {
            chart,
            templates_dir: root.join("templates"),
            values_path: root.join("values.yaml"),
            subcharts_dir: root.join("charts"),
            root,
        })
    }

    /// Check whether a directory looks like a chart without fully loading it
    pub fn is_chart_dir<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        path.is_dir() && path.join(CHART_FILE).is_file()
    }

    /// Load the chart's default values (empty if values.yaml is absent)
    pub fn default_values(&self) -> Result<Values> {
        if self.values_path.exists() {
            Values::from_file(&self.values_path)
        } else {
            Ok(Values::new())
        }
    }

    /// List of template files, sorted for deterministic rendering
    pub fn template_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        if !self.templates_dir.exists() {
            return Ok(files);
        }

        for entry in walkdir::WalkDir::new(&self.templates_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() {
                if let Some(ext) = path.extension() {
                    let ext = ext.to_string_lossy().to_lowercase();
                    if matches!(ext.as_str(), "yaml" | "yml" | "j2" | "jinja2" | "txt" | "json") {
                        files.push(path.to_path_buf());
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Subchart directories present under `charts/`, sorted by name
    pub fn subchart_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.subcharts_dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if Self::is_chart_dir(&path) {
                    dirs.push(path);
                }
            }
        }
        dirs.sort();
        dirs
    }

    /// Find the dependency declaration matching a subchart directory name
    pub fn dependency_for(&self, dir_name: &str) -> Option<&Dependency> {
        self.chart.dependencies.iter().find(|d| d.name == dir_name)
    }
}
