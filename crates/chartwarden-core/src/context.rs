//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chart::ChartMetadata;
use crate::release::ReleaseInfo;
use crate::values::Values;

/// Context available to all templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// User values (merged)
    pub values: JsonValue,

    /// Release information
    pub release: ReleaseInfo,

    /// Chart metadata
    pub chart: ChartInfo,
}

/// Chart information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    /// Chart name
    pub name: String,

    /// Chart version
    pub version: String,

    /// App version
    pub app_version: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            app_version: meta.app_version.clone(),
        }
    }
}

impl TemplateContext {
    /// Create a new template context
    pub fn new(values: Values, release: ReleaseInfo, chart: &ChartMetadata) -> Self {
        Self {
            values: values.into_inner(),
            release,
            chart: ChartInfo::from(chart),
        }
    }

    /// Derive a context for a subchart, keeping the release facts
    pub fn for_subchart(&self, values: Values, chart: &ChartMetadata) -> Self {
        Self {
            values: values.into_inner(),
            release: self.release.clone(),
            chart: ChartInfo::from(chart),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn metadata(name: &str) -> ChartMetadata {
        ChartMetadata {
            name: name.to_string(),
            version: Version::new(1, 0, 0),
            description: None,
            app_version: Some("2.0.0".to_string()),
            home: None,
            sources: vec![],
            keywords: vec![],
        }
    }

    #[test]
    fn test_template_context() {
        let values = Values::from_yaml("replicas: 3").unwrap();
        let release = ReleaseInfo::for_install("myapp", "default");
        let ctx = TemplateContext::new(values, release, &metadata("mychart"));

        assert_eq!(ctx.chart.name, "mychart");
        assert_eq!(ctx.release.name, "myapp");
        assert!(ctx.release.is_install);
    }

    #[test]
    fn test_for_subchart_keeps_release() {
        let values = Values::from_yaml("replicas: 3").unwrap();
        let release = ReleaseInfo::for_upgrade("myapp", "default", 2);
        let ctx = TemplateContext::new(values, release, &metadata("parent"));

        let sub = ctx.for_subchart(Values::new(), &metadata("redis"));
        assert_eq!(sub.chart.name, "redis");
        assert_eq!(sub.release.revision, 2);
    }
}
