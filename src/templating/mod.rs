//! Template analysis and resolution
//!
//! SQL and YAML properties may embed templates. One parsing primitive is used
//! in two explicit configurations:
//!
//! - **Static analysis** ([`analyze_template`]): function calls are bound to
//!   recorders that note which resources the template depends on and which
//!   configuration it declares, and free variables are replaced with placeholders.
//!   Nothing is resolved and undefined variables never fail the analysis.
//! - **Resolve** ([`resolve_template`]): functions are bound to real resolvers and
//!   variables to the caller's data.
//!
//! Actions use the positional form below; they are rewritten into tera syntax
//! before parsing, so native tera statements work alongside them.
//!
//! # Template functions
//!
//! ```text
//! {{ ref "orders" }}                       dependency, kind inferred later
//! {{ ref "metrics_view" "orders" }}        dependency with explicit kind
//! {{ dependency "orders" }}                dependency, renders nothing
//! {{ lookup "model" "orders" }}            dependency, value at resolve time
//! {{ configure "materialize" true }}       configuration
//! {{ configure `output: {connector: ch}` }}
//! {{ .env.partner_id }}                    variable
//! {{ if dev }} ... {{ else }} ... {{ end }}
//! ```
//!
//! # Examples
//!
//! ```rust
//! use rill_graph::templating::analyze_template;
//!
//! let meta = analyze_template(
//!     r#"{{ configure "materialize" true }}SELECT * FROM {{ ref "orders" }} WHERE id = {{ .env.partner }}"#,
//! ).unwrap();
//!
//! assert!(meta.uses_templating);
//! assert_eq!(meta.refs.len(), 1);
//! assert_eq!(meta.config["materialize"], serde_json::json!(true));
//! assert!(meta.variables.contains("env.partner"));
//! assert_eq!(meta.resolved_with_placeholders, "SELECT * FROM orders WHERE id = ");
//! ```

mod error;
mod functions;
mod syntax;
mod variables;

pub use error::TemplateError;
pub use variables::NAMESPACES;

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tera::{Context, Tera};
use tracing::trace;

use crate::core::ResourceName;
use error::TEMPLATE_NAME;
use functions::{Recorder, register_resolve, register_static};
use syntax::normalize;
use variables::scan_variables;

/// Resolves a `ref` call to the text it should render as.
pub type RefResolver = Arc<dyn Fn(&ResourceName) -> Result<String, String> + Send + Sync>;

/// Resolves a `lookup` call to a value.
pub type LookupResolver = Arc<dyn Fn(&ResourceName) -> Result<Value, String> + Send + Sync>;

/// Result of statically analyzing a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateMetadata {
    /// Resources referenced through `ref`, `dependency` or `lookup`
    pub refs: BTreeSet<ResourceName>,
    /// Keys declared through `configure`; later calls overwrite earlier keys
    pub config: BTreeMap<String, Value>,
    /// Free variable paths such as `env.partner_id`
    pub variables: BTreeSet<String>,
    /// `false` only for plain text
    pub uses_templating: bool,
    /// The template rendered with placeholders for refs and variables
    pub resolved_with_placeholders: String,
}

/// Returns `true` if `text` contains any template control sequence.
#[must_use]
pub fn uses_templating(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}

fn new_engine(text: &str) -> Result<Tera, TemplateError> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_template(TEMPLATE_NAME, text)
        .map_err(|e| TemplateError::syntax(&e))?;
    Ok(tera)
}

/// Statically analyzes a template without resolving anything.
///
/// Fails on malformed template syntax and on template calls with invalid
/// arguments. Deterministic: identical input yields identical output.
pub fn analyze_template(text: &str) -> Result<TemplateMetadata, TemplateError> {
    if !uses_templating(text) {
        return Ok(TemplateMetadata {
            resolved_with_placeholders: text.to_string(),
            ..TemplateMetadata::default()
        });
    }

    let normalized = normalize(text)?;
    let mut tera = new_engine(&normalized.text)?;
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    register_static(&mut tera, &recorder);

    let scanned = scan_variables(&normalized.text);
    let paths: BTreeSet<String> = normalized.paths.union(&scanned.paths).cloned().collect();
    let iterated: BTreeSet<String> =
        normalized.iterated.union(&scanned.iterated).cloned().collect();
    let context = placeholder_context(&paths, &iterated);
    let resolved = tera
        .render(TEMPLATE_NAME, &context)
        .map_err(|e| TemplateError::render(&e))?;

    let recorded = std::mem::take(&mut *recorder.lock().unwrap_or_else(|p| p.into_inner()));
    trace!(
        refs = recorded.refs.len(),
        config = recorded.config.len(),
        variables = scanned.paths.len(),
        "Analyzed template"
    );

    Ok(TemplateMetadata {
        refs: recorded.refs,
        config: recorded.config,
        variables: scanned.paths,
        uses_templating: true,
        resolved_with_placeholders: resolved,
    })
}

/// Builds a context where every discovered variable exists with an empty value.
///
/// Iterated paths become empty lists so loops over them render nothing.
fn placeholder_context(paths: &BTreeSet<String>, iterated: &BTreeSet<String>) -> Context {
    let mut root = Map::new();
    for ns in NAMESPACES {
        let empty = if ns == "environment" {
            Value::String(String::new())
        } else {
            Value::Object(Map::new())
        };
        root.insert(ns.to_string(), empty);
    }
    for path in paths {
        let leaf = if iterated.contains(path) {
            Value::Array(Vec::new())
        } else {
            Value::String(String::new())
        };
        insert_path(&mut root, path, leaf);
    }
    Context::from_value(Value::Object(root)).unwrap_or_default()
}

/// Inserts `leaf` at a dotted path, never replacing an existing object.
fn insert_path(root: &mut Map<String, Value>, path: &str, leaf: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(map) = entry else { return };
        current = map;
    }
    if !matches!(current.get(*last), Some(Value::Object(_))) {
        current.insert((*last).to_string(), leaf);
    }
}

/// Data bound when resolving a template.
#[derive(Clone, Default)]
pub struct TemplateData {
    /// Active environment name (`dev`, `prod`, ...)
    pub environment: String,
    /// Project variables; dotted names become nested maps under `env`/`vars`
    pub variables: BTreeMap<String, String>,
    /// User attributes available under `user`
    pub user: Map<String, Value>,
    /// Resource state available under `state`
    pub state: Map<String, Value>,
    /// The resource's own properties available under `self`
    pub self_props: Map<String, Value>,
    pub resolver: Option<RefResolver>,
    pub lookup: Option<LookupResolver>,
}

impl std::fmt::Debug for TemplateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateData")
            .field("environment", &self.environment)
            .field("variables", &self.variables)
            .field("user", &self.user)
            .field("state", &self.state)
            .field("self_props", &self.self_props)
            .field("resolver", &self.resolver.is_some())
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

impl TemplateData {
    fn context(&self) -> Context {
        let mut vars = Map::new();
        for (name, value) in &self.variables {
            insert_path(&mut vars, name, Value::String(value.clone()));
        }
        let mut root = Map::new();
        root.insert(
            "environment".to_string(),
            Value::String(self.environment.clone()),
        );
        root.insert("env".to_string(), Value::Object(vars.clone()));
        root.insert("vars".to_string(), Value::Object(vars));
        root.insert("user".to_string(), Value::Object(self.user.clone()));
        root.insert("state".to_string(), Value::Object(self.state.clone()));
        root.insert("self".to_string(), Value::Object(self.self_props.clone()));
        Context::from_value(Value::Object(root)).unwrap_or_default()
    }
}

/// Renders a template with real bindings.
///
/// Missing variables are errors. `configure` and `dependency` calls render
/// nothing; `ref` renders the resolver's output, or the bare name when no
/// resolver is set.
pub fn resolve_template(text: &str, data: &TemplateData) -> Result<String, TemplateError> {
    if !uses_templating(text) {
        return Ok(text.to_string());
    }
    let normalized = normalize(text)?;
    let mut tera = new_engine(&normalized.text)?;
    register_resolve(
        &mut tera,
        &data.environment,
        data.resolver.clone(),
        data.lookup.clone(),
    );
    tera.render(TEMPLATE_NAME, &data.context())
        .map_err(|e| TemplateError::render(&e))
}
