//! Owner-reference propagation for rendered manifests
//!
//! Wraps any `Renderer` so every rendered YAML document carries the watched
//! custom resource as its sole controller owner. Cascade deletion of
//! everything a release created then follows from Kubernetes garbage
//! collection.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};

use chartwarden_engine::{EngineError, RenderedChart, Renderer};
use chartwarden_core::{LoadedChart, TemplateContext};

use crate::resources::split_documents;

/// Build the controller owner reference for a custom resource
pub fn controller_owner_ref(cr: &DynamicObject, api_resource: &ApiResource) -> OwnerReference {
    OwnerReference {
        api_version: api_resource.api_version.clone(),
        kind: api_resource.kind.clone(),
        name: cr.metadata.name.clone().unwrap_or_default(),
        uid: cr.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Renderer wrapper that stamps an owner reference onto rendered documents
pub struct OwnerRefRenderer<R> {
    inner: R,
    owner_ref: OwnerReference,
}

impl<R> OwnerRefRenderer<R> {
    /// Wrap a renderer with an owner reference
    pub fn new(inner: R, owner_ref: OwnerReference) -> Self {
        Self { inner, owner_ref }
    }

    /// Inject the owner reference into every document of a rendered file
    ///
    /// Returns `None` when all documents were effectively empty, in which
    /// case the file is dropped from the output.
    fn inject_into_file(&self, file: &str, contents: &str) -> Result<Option<String>, EngineError> {
        let owner_value = serde_yaml::to_value(&self.owner_ref).map_err(|e| {
            EngineError::InvalidManifest {
                file: file.to_string(),
                message: e.to_string(),
            }
        })?;

        let mut docs = Vec::new();
        for doc in split_documents(contents) {
            let parsed: serde_yaml::Value =
                serde_yaml::from_str(doc).map_err(|e| EngineError::InvalidManifest {
                    file: file.to_string(),
                    message: e.to_string(),
                })?;

            let mut mapping = match parsed {
                serde_yaml::Value::Null => continue,
                serde_yaml::Value::Mapping(m) if m.is_empty() => continue,
                serde_yaml::Value::Mapping(m) => m,
                _ => {
                    return Err(EngineError::InvalidManifest {
                        file: file.to_string(),
                        message: "expected a mapping at the document root".to_string(),
                    })
                }
            };

            let metadata_key = serde_yaml::Value::String("metadata".to_string());
            if !mapping.contains_key(&metadata_key) {
                mapping.insert(
                    metadata_key.clone(),
                    serde_yaml::Value::Mapping(Default::default()),
                );
            }
            match mapping.get_mut(&metadata_key) {
                Some(serde_yaml::Value::Mapping(metadata)) => {
                    // Replace whatever is present: the CR is the sole owner
                    metadata.insert(
                        serde_yaml::Value::String("ownerReferences".to_string()),
                        serde_yaml::Value::Sequence(vec![owner_value.clone()]),
                    );
                }
                _ => {
                    return Err(EngineError::InvalidManifest {
                        file: file.to_string(),
                        message: "metadata is not a mapping".to_string(),
                    })
                }
            }

            let serialized = serde_yaml::to_string(&serde_yaml::Value::Mapping(mapping))
                .map_err(|e| EngineError::InvalidManifest {
                    file: file.to_string(),
                    message: e.to_string(),
                })?;
            docs.push(serialized);
        }

        if docs.is_empty() {
            return Ok(None);
        }
        Ok(Some(docs.join("---\n")))
    }
}

impl<R: Renderer> Renderer for OwnerRefRenderer<R> {
    fn render(
        &self,
        chart: &LoadedChart,
        context: &TemplateContext,
    ) -> chartwarden_engine::Result<RenderedChart> {
        let rendered = self.inner.render(chart, context)?;

        let mut manifests = indexmap::IndexMap::new();
        for (file, contents) in rendered.manifests {
            if !(file.ends_with(".yaml") || file.ends_with(".yml")) {
                manifests.insert(file, contents);
                continue;
            }

            if let Some(owned) = self.inject_into_file(&file, &contents)? {
                manifests.insert(file, owned);
            }
        }

        Ok(RenderedChart {
            manifests,
            notes: rendered.notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::fs;
    use tempfile::TempDir;

    /// Renderer returning canned output, ignoring the chart on disk
    struct StaticRenderer {
        files: IndexMap<String, String>,
    }

    impl Renderer for StaticRenderer {
        fn render(
            &self,
            _chart: &LoadedChart,
            _context: &TemplateContext,
        ) -> chartwarden_engine::Result<RenderedChart> {
            Ok(RenderedChart {
                manifests: self.files.clone(),
                notes: None,
            })
        }
    }

    fn fixture_chart() -> (TempDir, LoadedChart) {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("Chart.yaml"),
            "apiVersion: chartwarden/v1\nmetadata:\n  name: demo\n  version: 1.0.0\n",
        )
        .unwrap();
        let chart = LoadedChart::load(tmp.path()).unwrap();
        (tmp, chart)
    }

    fn context(chart: &LoadedChart) -> TemplateContext {
        TemplateContext::new(
            chartwarden_core::Values::new(),
            chartwarden_core::ReleaseInfo::for_install("t1", "default"),
            &chart.chart.metadata,
        )
    }

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "apache.org/v1alpha1".to_string(),
            kind: "Tomcat".to_string(),
            name: "t1".to_string(),
            uid: "1b4e28ba-2fa1-11d2-883f-0016d3cca427".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn render_files(files: Vec<(&str, &str)>) -> RenderedChart {
        let (_tmp, chart) = fixture_chart();
        let ctx = context(&chart);
        let inner = StaticRenderer {
            files: files
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        OwnerRefRenderer::new(inner, owner())
            .render(&chart, &ctx)
            .unwrap()
    }

    #[test]
    fn test_owner_ref_added() {
        let result = render_files(vec![(
            "service.yaml",
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n",
        )]);

        let svc = result.manifests.get("service.yaml").unwrap();
        let parsed: serde_json::Value = serde_yaml::from_str(svc).unwrap();
        let refs = &parsed["metadata"]["ownerReferences"];
        assert_eq!(refs.as_array().unwrap().len(), 1);
        assert_eq!(refs[0]["kind"], "Tomcat");
        assert_eq!(refs[0]["name"], "t1");
        assert_eq!(refs[0]["controller"], true);
        assert_eq!(refs[0]["blockOwnerDeletion"], true);
    }

    #[test]
    fn test_existing_owner_refs_replaced() {
        let result = render_files(vec![(
            "cm.yaml",
            "kind: ConfigMap\nmetadata:\n  name: cm\n  ownerReferences:\n    - kind: Other\n      name: x\n",
        )]);

        let cm = result.manifests.get("cm.yaml").unwrap();
        let parsed: serde_json::Value = serde_yaml::from_str(cm).unwrap();
        let refs = parsed["metadata"]["ownerReferences"].as_array().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0]["kind"], "Tomcat");
    }

    #[test]
    fn test_multi_document_injection() {
        let result = render_files(vec![(
            "all.yaml",
            "kind: Service\nmetadata:\n  name: svc\n---\nkind: Deployment\nmetadata:\n  name: dep\n",
        )]);

        let all = result.manifests.get("all.yaml").unwrap();
        let docs: Vec<serde_json::Value> = all
            .split("---\n")
            .filter(|d| !d.trim().is_empty())
            .map(|d| serde_yaml::from_str(d).unwrap())
            .collect();
        assert_eq!(docs.len(), 2);
        for doc in docs {
            assert_eq!(doc["metadata"]["ownerReferences"][0]["name"], "t1");
        }
    }

    #[test]
    fn test_empty_documents_dropped() {
        let result = render_files(vec![
            ("empty.yaml", "\n# nothing here\n"),
            ("svc.yaml", "kind: Service\nmetadata:\n  name: svc\n"),
        ]);

        assert!(!result.manifests.contains_key("empty.yaml"));
        assert!(result.manifests.contains_key("svc.yaml"));
    }

    #[test]
    fn test_non_yaml_passthrough() {
        let result = render_files(vec![("README.txt", "plain text")]);
        assert_eq!(
            result.manifests.get("README.txt").map(String::as_str),
            Some("plain text")
        );
    }

    #[test]
    fn test_parse_error_names_file() {
        let (_tmp, chart) = fixture_chart();
        let ctx = context(&chart);
        let inner = StaticRenderer {
            files: [(
                "broken.yaml".to_string(),
                "kind: [unclosed".to_string(),
            )]
            .into_iter()
            .collect(),
        };

        let err = OwnerRefRenderer::new(inner, owner())
            .render(&chart, &ctx)
            .unwrap_err();
        match err {
            EngineError::InvalidManifest { file, .. } => assert_eq!(file, "broken.yaml"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scalar_document_rejected() {
        let (_tmp, chart) = fixture_chart();
        let ctx = context(&chart);
        let inner = StaticRenderer {
            files: [("scalar.yaml".to_string(), "just a string".to_string())]
                .into_iter()
                .collect(),
        };

        let err = OwnerRefRenderer::new(inner, owner())
            .render(&chart, &ctx)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidManifest { .. }));
    }
}
