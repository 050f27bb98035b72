//! Tool Registry
//!
//! An explicit registration table mapping namespaced tool names to
//! (parameter schema, handler) pairs, built once at startup with no runtime
//! introspection. The registry is the boundary to whatever actually
//! executes tools; handlers may block on I/O and are invoked from a
//! blocking worker by the dispatch job.
//!
//! Call names are namespaced `toolset.tool`; the registry resolves the
//! toolset, the toolset resolves the tool.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between toolset id and tool id in a namespaced call name
pub const TOOL_NAME_SEPARATOR: char = '.';

/// Errors from the tool-registry boundary
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool id does not resolve inside its toolset
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The handler failed (execution or transport); fed back to the model
    #[error("{0}")]
    Failed(String),
}

/// One typed part of a tool's output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text output
    Text {
        /// The text
        text: String,
    },
}

/// Result of invoking a tool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Ordered output parts
    pub content: Vec<ContentPart>,
    /// Whether the tool reports a (recoverable) execution error
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful single-text output
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Error-flagged single-text output
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Concatenate the text parts, one per line
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            let ContentPart::Text { text } = part;
            out.push_str(text);
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// Handler invoked with the call's argument map
pub type ToolHandler = Arc<
    dyn Fn(&serde_json::Map<String, serde_json::Value>) -> Result<ToolOutput, ToolError>
        + Send
        + Sync,
>;

/// Declarative description of one tool, advertised to the model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool id (bare inside a toolset; namespaced when advertised)
    pub name: String,
    /// Human/model-readable description
    pub description: String,
    /// JSON-schema of the argument object
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    /// Create a spec
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

struct ToolEntry {
    spec: ToolSpec,
    handler: ToolHandler,
}

/// A named group of tools
pub struct Toolset {
    id: String,
    tools: HashMap<String, ToolEntry>,
}

impl Toolset {
    /// Start building a toolset
    #[must_use]
    pub fn builder(id: impl Into<String>) -> ToolsetBuilder {
        ToolsetBuilder {
            id: id.into(),
            tools: HashMap::new(),
        }
    }

    /// The toolset id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invoke a tool with the given argument map
    ///
    /// An unknown tool id is a resolution failure ([`ToolError::NotFound`]);
    /// handler failures come back as [`ToolError::Failed`].
    pub fn call(
        &self,
        tool: &str,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolOutput, ToolError> {
        let entry = self
            .tools
            .get(tool)
            .ok_or_else(|| ToolError::NotFound(format!("{}{TOOL_NAME_SEPARATOR}{tool}", self.id)))?;
        (entry.handler)(args)
    }

    /// Specs of every tool in this set, in unspecified order
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values().map(|e| &e.spec)
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set has no tools
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Builder for [`Toolset`]
pub struct ToolsetBuilder {
    id: String,
    tools: HashMap<String, ToolEntry>,
}

impl ToolsetBuilder {
    /// Register one tool: its spec and its handler
    #[must_use]
    pub fn tool<F>(mut self, spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(&serde_json::Map<String, serde_json::Value>) -> Result<ToolOutput, ToolError>
            + Send
            + Sync
            + 'static,
    {
        self.tools.insert(
            spec.name.clone(),
            ToolEntry {
                spec,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Finish the toolset
    #[must_use]
    pub fn build(self) -> Toolset {
        Toolset {
            id: self.id,
            tools: self.tools,
        }
    }
}

/// The registration table the dispatch job resolves against
///
/// Built once at startup; immutable afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    toolsets: HashMap<String, Arc<Toolset>>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a toolset; replaces any previous set with the same id
    pub fn register(&mut self, toolset: Toolset) {
        self.toolsets.insert(toolset.id.clone(), Arc::new(toolset));
    }

    /// Resolve a toolset by id
    #[must_use]
    pub fn resolve(&self, toolset_id: &str) -> Option<Arc<Toolset>> {
        self.toolsets.get(toolset_id).cloned()
    }

    /// Specs of every tool, with namespaced names, sorted for stable requests
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .toolsets
            .values()
            .flat_map(|set| {
                set.specs().map(|spec| {
                    let mut namespaced = spec.clone();
                    namespaced.name = format!("{}{TOOL_NAME_SEPARATOR}{}", set.id, spec.name);
                    namespaced
                })
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Number of registered toolsets
    #[must_use]
    pub fn len(&self) -> usize {
        self.toolsets.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.toolsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(pairs: &[(&str, &str)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::String((*v).to_string())))
            .collect()
    }

    fn fs_toolset() -> Toolset {
        Toolset::builder("fs")
            .tool(
                ToolSpec::new(
                    "read",
                    "Read a file",
                    serde_json::json!({
                        "type": "object",
                        "properties": { "path": { "type": "string" } },
                        "required": ["path"]
                    }),
                ),
                |args| {
                    let path = args
                        .get("path")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| ToolError::Failed("missing path".into()))?;
                    Ok(ToolOutput::text(format!("contents of {path}")))
                },
            )
            .build()
    }

    #[test]
    fn test_resolve_and_call() {
        let mut registry = ToolRegistry::new();
        registry.register(fs_toolset());

        let toolset = registry.resolve("fs").unwrap();
        let output = toolset.call("read", &args(&[("path", "a.txt")])).unwrap();
        assert_eq!(output.text_content(), "contents of a.txt");
        assert!(!output.is_error);
    }

    #[test]
    fn test_unknown_toolset() {
        let registry = ToolRegistry::new();
        assert!(registry.resolve("fs").is_none());
    }

    #[test]
    fn test_unknown_tool_in_resolved_set() {
        let mut registry = ToolRegistry::new();
        registry.register(fs_toolset());

        let toolset = registry.resolve("fs").unwrap();
        let err = toolset.call("write", &args(&[])).unwrap_err();
        assert!(matches!(err, ToolError::NotFound(ref name) if name == "fs.write"));
    }

    #[test]
    fn test_handler_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(fs_toolset());

        let toolset = registry.resolve("fs").unwrap();
        let err = toolset.call("read", &args(&[])).unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[test]
    fn test_namespaced_specs() {
        let mut registry = ToolRegistry::new();
        registry.register(fs_toolset());
        registry.register(
            Toolset::builder("time")
                .tool(
                    ToolSpec::new("now", "Current time", serde_json::json!({"type": "object"})),
                    |_| Ok(ToolOutput::text("12:00")),
                )
                .build(),
        );

        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["fs.read", "time.now"]);
    }

    #[test]
    fn test_output_text_concatenation() {
        let output = ToolOutput {
            content: vec![
                ContentPart::Text { text: "one".into() },
                ContentPart::Text { text: "two".into() },
            ],
            is_error: false,
        };
        assert_eq!(output.text_content(), "one\ntwo");
    }

    #[test]
    fn test_content_part_wire_shape() {
        let json = serde_json::to_value(ContentPart::Text { text: "hi".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hi"}));
    }
}
