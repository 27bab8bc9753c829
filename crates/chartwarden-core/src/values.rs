//! Values handling with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::Result;

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        // An empty document parses as null; normalize to an empty mapping
        if value.is_null() {
            return Ok(Self::new());
        }
        Ok(Self(value))
    }

    /// Serialize values to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Get a value by dotted path (e.g. "image.tag")
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let mut current = &self.0;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to the inner JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Resolve the values a subchart renders with
    ///
    /// The subchart starts from its own defaults; the parent contributes
    /// its `global` block unchanged plus the section named after the
    /// subchart, lifted to the subchart's root. Parent entries win over
    /// defaults, and sibling sections stay invisible.
    pub fn for_subchart(
        subchart_defaults: Values,
        parent_values: &Values,
        subchart_name: &str,
    ) -> Values {
        let mut resolved = subchart_defaults;

        let JsonValue::Object(parent) = parent_values.inner() else {
            return resolved;
        };

        let mut overlay = serde_json::Map::new();
        if let Some(global) = parent.get("global") {
            overlay.insert("global".to_string(), global.clone());
        }
        if let Some(JsonValue::Object(section)) = parent.get(subchart_name) {
            overlay.extend(section.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        resolved.merge(&Values(JsonValue::Object(overlay)));
        resolved
    }

    /// Import a dotted path from subchart values into the parent scope
    ///
    /// The imported subtree lands at the same path of the parent, below the
    /// subchart's name, and only fills holes: values the parent already set
    /// win over the import.
    pub fn import_from_subchart(&mut self, subchart_name: &str, path: &str, child: &Values) {
        let Some(imported) = child.get(path) else {
            return;
        };

        // Build {subchart_name: {path...: imported}} and merge it underneath
        let mut wrapped = imported.clone();
        for part in path.split('.').rev() {
            let mut map = serde_json::Map::new();
            map.insert(part.to_string(), wrapped);
            wrapped = JsonValue::Object(map);
        }
        let mut map = serde_json::Map::new();
        map.insert(subchart_name.to_string(), wrapped);

        let mut base = Values(JsonValue::Object(map));
        base.merge(self);
        *self = base;
    }
}

/// Deep merge implementation
///
/// Only object-into-object recurses; any other combination replaces the
/// base wholesale.
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    use serde_json::map::Entry;

    let JsonValue::Object(incoming) = overlay else {
        *base = overlay.clone();
        return;
    };
    let JsonValue::Object(target) = base else {
        *base = overlay.clone();
        return;
    };

    for (key, value) in incoming {
        match target.entry(key.clone()) {
            Entry::Occupied(slot) => deep_merge(slot.into_mut(), value),
            Entry::Vacant(slot) => {
                slot.insert(value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_scalars_replace() {
        let mut base = Values(json!({"replicas": 1, "name": "a"}));
        base.merge(&Values(json!({"replicas": 3})));

        assert_eq!(base.get("replicas"), Some(&json!(3)));
        assert_eq!(base.get("name"), Some(&json!("a")));
    }

    #[test]
    fn test_merge_objects_recursive() {
        let mut base = Values(json!({"image": {"repository": "nginx", "tag": "1.0"}}));
        base.merge(&Values(json!({"image": {"tag": "2.0"}})));

        assert_eq!(base.get("image.repository"), Some(&json!("nginx")));
        assert_eq!(base.get("image.tag"), Some(&json!("2.0")));
    }

    #[test]
    fn test_merge_arrays_replace() {
        let mut base = Values(json!({"ports": [80, 443]}));
        base.merge(&Values(json!({"ports": [8080]})));

        assert_eq!(base.get("ports"), Some(&json!([8080])));
    }

    #[test]
    fn test_from_yaml_empty_document() {
        let values = Values::from_yaml("").unwrap();
        assert!(values.is_empty());
        assert!(values.inner().is_object());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let values = Values::from_yaml("replicas: 3\nimage:\n  tag: latest\n").unwrap();
        let yaml = values.to_yaml().unwrap();
        let reparsed = Values::from_yaml(&yaml).unwrap();
        assert_eq!(values, reparsed);
    }

    #[test]
    fn test_for_subchart_lifts_section_and_globals() {
        let parent = Values(json!({
            "global": {"imageRegistry": "docker.io"},
            "redis": {"enabled": true, "replicas": 3},
            "postgresql": {"enabled": false}
        }));

        let resolved = Values::for_subchart(Values::new(), &parent, "redis");
        assert_eq!(
            resolved.get("global.imageRegistry"),
            Some(&json!("docker.io"))
        );
        assert_eq!(resolved.get("replicas"), Some(&json!(3)));
        // Sibling sections do not leak into the subchart
        assert!(resolved.get("postgresql").is_none());
    }

    #[test]
    fn test_for_subchart_defaults_lose_to_parent() {
        let defaults = Values(json!({"replicas": 1, "port": 6379}));
        let parent = Values(json!({"redis": {"replicas": 5}}));

        let resolved = Values::for_subchart(defaults, &parent, "redis");
        assert_eq!(resolved.get("replicas"), Some(&json!(5)));
        assert_eq!(resolved.get("port"), Some(&json!(6379)));
    }

    #[test]
    fn test_for_subchart_without_parent_section() {
        let defaults = Values(json!({"port": 6379}));
        let parent = Values(json!({"app": {"name": "web"}}));

        let resolved = Values::for_subchart(defaults, &parent, "redis");
        assert_eq!(resolved.get("port"), Some(&json!(6379)));
        assert!(resolved.get("app").is_none());
    }

    #[test]
    fn test_import_from_subchart() {
        let mut parent = Values(json!({"app": {"name": "web"}}));
        let child = Values(json!({"service": {"port": 6379}}));

        parent.import_from_subchart("redis", "service.port", &child);
        assert_eq!(parent.get("redis.service.port"), Some(&json!(6379)));
        assert_eq!(parent.get("app.name"), Some(&json!("web")));
    }

    #[test]
    fn test_import_does_not_override_parent() {
        let mut parent = Values(json!({"redis": {"service": {"port": 7000}}}));
        let child = Values(json!({"service": {"port": 6379}}));

        parent.import_from_subchart("redis", "service.port", &child);
        assert_eq!(parent.get("redis.service.port"), Some(&json!(7000)));
    }
}
