//! Template engine based on MiniJinja
//!
//! Renders all templates of a chart, recursing into enabled subcharts with
//! properly scoped values. Requirements processing (conditions and value
//! imports) happens here, so every render starts from a pristine on-disk
//! chart.

use indexmap::IndexMap;
use minijinja::Environment;
use tracing::debug;

use chartwarden_core::{LoadedChart, TemplateContext, Values};

use crate::error::{EngineError, Result};
use crate::filters;
use crate::functions;

/// Prefix character for helper templates (skipped during rendering)
const HELPER_TEMPLATE_PREFIX: char = '_';

/// Pattern to identify NOTES templates
const NOTES_TEMPLATE_PATTERN: &str = "notes";

/// Maximum nesting depth for subcharts
const MAX_SUBCHART_DEPTH: usize = 10;

/// Result of rendering a chart
#[derive(Debug)]
pub struct RenderedChart {
    /// Rendered manifests by filename (IndexMap preserves insertion order).
    /// Subchart manifests are prefixed: "redis/deployment.yaml"
    pub manifests: IndexMap<String, String>,

    /// Post-install notes (from the parent chart only)
    pub notes: Option<String>,
}

/// Rendering capability
///
/// The seam that lets wrappers (like the owner-reference injector) compose
/// over the base engine and stay independently testable.
pub trait Renderer: Send + Sync {
    fn render(&self, chart: &LoadedChart, context: &TemplateContext) -> Result<RenderedChart>;
}

/// The template engine
pub struct Engine {
    strict_mode: bool,
}

impl Engine {
    /// Create a strict mode engine (recommended)
    ///
    /// Uses `UndefinedBehavior::Chainable`, which allows accessing
    /// properties on undefined values and returns undefined instead of an
    /// error, so optional value paths stay usable.
    #[must_use]
    pub fn strict() -> Self {
        Self { strict_mode: true }
    }

    /// Create a lenient mode engine (empty strings for undefined values)
    #[must_use]
    pub fn lenient() -> Self {
        Self { strict_mode: false }
    }

    /// Create a configured MiniJinja environment
    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Chainable);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("sha256", filters::sha256sum);

        env.add_function("fail", functions::fail);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);

        env
    }

    /// Render all templates of a single chart level (no subchart recursion)
    fn render_templates(
        &self,
        chart: &LoadedChart,
        context: &TemplateContext,
    ) -> Result<RenderedChart> {
        let mut manifests = IndexMap::new();
        let mut notes = None;

        let template_files = chart.template_files()?;
        let mut env = self.create_environment();
        let mut template_names: Vec<String> = Vec::with_capacity(template_files.len());

        for file_path in &template_files {
            let rel_path = file_path
                .strip_prefix(&chart.templates_dir)
                .unwrap_or(file_path);
            let template_name = rel_path.to_string_lossy().into_owned();

            let content = std::fs::read_to_string(file_path)?;
            env.add_template_owned(template_name.clone(), content)
                .map_err(|e| EngineError::from_minijinja(e, &template_name))?;
            template_names.push(template_name);
        }

        // Globals so imported macros see the context too
        env.add_global("values", minijinja::Value::from_serialize(&context.values));
        env.add_global(
            "release",
            minijinja::Value::from_serialize(&context.release),
        );
        env.add_global("chart", minijinja::Value::from_serialize(&context.chart));

        let ctx = minijinja::context! {
            values => &context.values,
            release => &context.release,
            chart => &context.chart,
        };

        for template_name in &template_names {
            let file_stem = template_name
                .rsplit('/')
                .next()
                .unwrap_or(template_name.as_str());
            if file_stem.starts_with(HELPER_TEMPLATE_PREFIX) {
                continue;
            }

            let tmpl = env
                .get_template(template_name)
                .map_err(|e| EngineError::from_minijinja(e, template_name))?;
            let rendered = tmpl
                .render(&ctx)
                .map_err(|e| EngineError::from_minijinja(e, template_name))?;

            if template_name.to_lowercase().contains(NOTES_TEMPLATE_PATTERN) {
                notes = Some(rendered);
                continue;
            }

            let trimmed = rendered.trim();
            if trimmed.is_empty() || trimmed == "---" {
                debug!(template = %template_name, "skipping empty rendered template");
                continue;
            }

            let output_name = template_name
                .trim_end_matches(".j2")
                .trim_end_matches(".jinja2");
            manifests.insert(output_name.to_string(), rendered);
        }

        Ok(RenderedChart { manifests, notes })
    }

    /// Render a chart and all enabled subcharts
    fn render_recursive(
        &self,
        chart: &LoadedChart,
        context: &TemplateContext,
        depth: usize,
    ) -> Result<RenderedChart> {
        if depth > MAX_SUBCHART_DEPTH {
            return Err(EngineError::Template {
                template: "<subcharts>".to_string(),
                message: format!("maximum subchart depth ({}) exceeded", MAX_SUBCHART_DEPTH),
            });
        }

        let mut all_manifests = IndexMap::new();

        // Discover subcharts and load their defaults up front: value imports
        // must land in the parent values before anything renders.
        let mut subcharts: Vec<(String, LoadedChart, Values)> = Vec::new();
        let mut parent_values = Values(context.values.clone());

        for dir in chart.subchart_dirs() {
            let dir_name = match dir.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };

            let dependency = chart.dependency_for(&dir_name);
            let name = dependency
                .and_then(|d| d.alias.clone())
                .unwrap_or_else(|| dir_name.clone());

            // No dependency declaration means always enabled
            let enabled = dependency
                .map(|d| d.is_enabled(&parent_values.0))
                .unwrap_or(true);
            if !enabled {
                debug!(subchart = %name, "subchart disabled by condition");
                continue;
            }

            let subchart = LoadedChart::load(&dir)?;
            let defaults = subchart.default_values()?;

            if let Some(dep) = dependency {
                for path in &dep.import_values {
                    parent_values.import_from_subchart(&name, path, &defaults);
                }
            }

            subcharts.push((name, subchart, defaults));
        }

        let parent_context = TemplateContext {
            values: parent_values.0.clone(),
            release: context.release.clone(),
            chart: context.chart.clone(),
        };

        for (name, subchart, defaults) in subcharts {
            let scoped = Values::for_subchart(defaults, &parent_values, &name);
            let sub_context = parent_context.for_subchart(scoped, &subchart.chart.metadata);

            let sub_result = self.render_recursive(&subchart, &sub_context, depth + 1)?;
            for (file, manifest) in sub_result.manifests {
                all_manifests.insert(format!("{}/{}", name, file), manifest);
            }
            // Subchart notes are not surfaced; only the parent's notes are.
        }

        let parent_result = self.render_templates(chart, &parent_context)?;
        all_manifests.extend(parent_result.manifests);

        Ok(RenderedChart {
            manifests: all_manifests,
            notes: parent_result.notes,
        })
    }
}

impl Renderer for Engine {
    fn render(&self, chart: &LoadedChart, context: &TemplateContext) -> Result<RenderedChart> {
        self.render_recursive(chart, context, 0)
    }
}
