//! The component registry: tools, prompts, and resources.
//!
//! Components are enumerated in registration order, which pagination
//! preserves. The registry is populated through the server builder and
//! read-only once the server starts serving.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::RwLock;
use serde_json::Value;

use duplexmcp_protocol::Error as ProtocolError;
use duplexmcp_protocol::schema::{OutputValidator, Schema, SchemaValidator};
use duplexmcp_protocol::types::{Prompt, Resource, ResourceTemplate, Tool};
use duplexmcp_protocol::uri_template::UriTemplate;

use crate::error::{ServerError, ServerResult};
use crate::handlers::{PromptHandler, ResourceHandler, ToolHandler};

/// Page size applied when a listing names no limit.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A registered tool: wire definition, compiled validators, handler.
pub struct ToolEntry {
    /// The definition advertised in `tools/list`
    pub tool: Tool,
    /// Compiled input validator
    pub input: SchemaValidator,
    /// Compiled output validator, when the tool declares an output schema
    pub output: Option<Arc<OutputValidator>>,
    /// The handler invoked by `tools/call`
    pub handler: Arc<dyn ToolHandler>,
}

/// A registered prompt.
pub struct PromptEntry {
    /// The definition advertised in `prompts/list`
    pub prompt: Prompt,
    /// The handler invoked by `prompts/get`
    pub handler: Arc<dyn PromptHandler>,
}

/// A registered resource: static URI or URI template, never both.
pub enum ResourceEntry {
    /// Static resource
    Static {
        /// The definition advertised in `resources/list`
        resource: Resource,
        /// The handler invoked by `resources/read`
        handler: Arc<dyn ResourceHandler>,
    },
    /// Templated resource
    Template {
        /// The definition advertised in `resources/templates/list`
        template: ResourceTemplate,
        /// The compiled matcher
        matcher: UriTemplate,
        /// The handler invoked with the full URI on a template match
        handler: Arc<dyn ResourceHandler>,
    },
}

impl ResourceEntry {
    fn name(&self) -> &str {
        match self {
            Self::Static { resource, .. } => &resource.name,
            Self::Template { template, .. } => &template.name,
        }
    }
}

/// In-memory catalog of registered components.
#[derive(Default)]
pub struct ComponentRegistry {
    tools: RwLock<Vec<Arc<ToolEntry>>>,
    prompts: RwLock<Vec<Arc<PromptEntry>>>,
    resources: RwLock<Vec<Arc<ResourceEntry>>>,
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("tools", &self.tools.read().len())
            .field("prompts", &self.prompts.read().len())
            .field("resources", &self.resources.read().len())
            .finish()
    }
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool built from a declarative input schema.
    pub fn register_tool(
        &self,
        mut tool: Tool,
        input: &Schema,
        handler: Arc<dyn ToolHandler>,
    ) -> ServerResult<()> {
        let mut tools = self.tools.write();
        if tools.iter().any(|t| t.tool.name == tool.name) {
            return Err(ServerError::Registry(format!(
                "tool {} is already registered",
                tool.name
            )));
        }
        tool.input_schema = input.to_json_schema();
        let output = match &tool.output_schema {
            Some(schema) => Some(Arc::new(
                OutputValidator::compile(schema)
                    .map_err(|e| ServerError::Registry(e.to_string()))?,
            )),
            None => None,
        };
        let input = input
            .validator()
            .map_err(|e| ServerError::Registry(e.to_string()))?;
        tools.push(Arc::new(ToolEntry {
            tool,
            input,
            output,
            handler,
        }));
        Ok(())
    }

    /// Register a prompt.
    pub fn register_prompt(
        &self,
        prompt: Prompt,
        handler: Arc<dyn PromptHandler>,
    ) -> ServerResult<()> {
        let mut prompts = self.prompts.write();
        if prompts.iter().any(|p| p.prompt.name == prompt.name) {
            return Err(ServerError::Registry(format!(
                "prompt {} is already registered",
                prompt.name
            )));
        }
        prompts.push(Arc::new(PromptEntry { prompt, handler }));
        Ok(())
    }

    /// Register a static resource.
    pub fn register_resource(
        &self,
        resource: Resource,
        handler: Arc<dyn ResourceHandler>,
    ) -> ServerResult<()> {
        self.push_resource(ResourceEntry::Static { resource, handler })
    }

    /// Register a templated resource.
    pub fn register_resource_template(
        &self,
        template: ResourceTemplate,
        handler: Arc<dyn ResourceHandler>,
    ) -> ServerResult<()> {
        let matcher = UriTemplate::parse(&template.uri_template)
            .map_err(|e| ServerError::Registry(e.to_string()))?;
        self.push_resource(ResourceEntry::Template {
            template,
            matcher,
            handler,
        })
    }

    fn push_resource(&self, entry: ResourceEntry) -> ServerResult<()> {
        let mut resources = self.resources.write();
        if resources.iter().any(|r| r.name() == entry.name()) {
            return Err(ServerError::Registry(format!(
                "resource {} is already registered",
                entry.name()
            )));
        }
        resources.push(Arc::new(entry));
        Ok(())
    }

    /// Look up a tool by name.
    pub fn find_tool(&self, name: &str) -> Option<Arc<ToolEntry>> {
        self.tools.read().iter().find(|t| t.tool.name == name).cloned()
    }

    /// Look up a prompt by name.
    pub fn find_prompt(&self, name: &str) -> Option<Arc<PromptEntry>> {
        self.prompts
            .read()
            .iter()
            .find(|p| p.prompt.name == name)
            .cloned()
    }

    /// Look up a static resource by exact URI.
    pub fn find_resource_by_uri(&self, uri: &str) -> Option<Arc<ResourceEntry>> {
        self.resources
            .read()
            .iter()
            .find(|r| matches!(r.as_ref(), ResourceEntry::Static { resource, .. } if resource.uri == uri))
            .cloned()
    }

    /// Templates matching `uri`, in registration order.
    pub fn match_resource_templates(&self, uri: &str) -> Vec<Arc<ResourceEntry>> {
        self.resources
            .read()
            .iter()
            .filter(|r| matches!(r.as_ref(), ResourceEntry::Template { matcher, .. } if matcher.matches(uri)))
            .cloned()
            .collect()
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.read().len()
    }

    /// Number of registered prompts.
    pub fn prompt_count(&self) -> usize {
        self.prompts.read().len()
    }

    /// Number of registered resources (static and templated).
    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }

    /// One page of tool definitions.
    pub fn list_tools(
        &self,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(Vec<Tool>, Option<String>), ProtocolError> {
        let tools = self.tools.read();
        paginate(&tools, |t| &t.tool.name, cursor, limit)
            .map(|(page, next)| (page.iter().map(|t| t.tool.clone()).collect(), next))
    }

    /// One page of prompt definitions.
    pub fn list_prompts(
        &self,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(Vec<Prompt>, Option<String>), ProtocolError> {
        let prompts = self.prompts.read();
        paginate(&prompts, |p| &p.prompt.name, cursor, limit)
            .map(|(page, next)| (page.iter().map(|p| p.prompt.clone()).collect(), next))
    }

    /// One page of static resource definitions.
    pub fn list_resources(
        &self,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(Vec<Resource>, Option<String>), ProtocolError> {
        let resources = self.resources.read();
        let statics: Vec<Resource> = resources
            .iter()
            .filter_map(|r| match r.as_ref() {
                ResourceEntry::Static { resource, .. } => Some(resource.clone()),
                ResourceEntry::Template { .. } => None,
            })
            .collect();
        paginate(&statics, |r| &r.name, cursor, limit)
            .map(|(page, next)| (page.to_vec(), next))
    }

    /// One page of resource template definitions.
    pub fn list_resource_templates(
        &self,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(Vec<ResourceTemplate>, Option<String>), ProtocolError> {
        let resources = self.resources.read();
        let templates: Vec<ResourceTemplate> = resources
            .iter()
            .filter_map(|r| match r.as_ref() {
                ResourceEntry::Template { template, .. } => Some(template.clone()),
                ResourceEntry::Static { .. } => None,
            })
            .collect();
        paginate(&templates, |t| &t.name, cursor, limit)
            .map(|(page, next)| (page.to_vec(), next))
    }
}

/// Slice one page out of `items`.
///
/// A cursor is `base64url(last_item_name)`; `next_cursor` is present exactly
/// when items remain past the page. An undecodable cursor, or one naming an
/// unknown item, is `invalid_params`.
fn paginate<'i, T>(
    items: &'i [T],
    name_of: impl Fn(&T) -> &str,
    cursor: Option<&str>,
    limit: Option<usize>,
) -> Result<(&'i [T], Option<String>), ProtocolError> {
    let start = match cursor {
        None => 0,
        Some(cursor) => {
            let decoded = URL_SAFE_NO_PAD
                .decode(cursor)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| ProtocolError::InvalidParams("invalid cursor".to_string()))?;
            let position = items
                .iter()
                .position(|item| name_of(item) == decoded)
                .ok_or_else(|| ProtocolError::InvalidParams("invalid cursor".to_string()))?;
            position + 1
        }
    };

    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    let end = (start + limit).min(items.len());
    let page = &items[start..end];
    let next_cursor = if end < items.len() {
        page.last()
            .map(|item| URL_SAFE_NO_PAD.encode(name_of(item).as_bytes()))
    } else {
        None
    };
    Ok((page, next_cursor))
}

/// Extract `cursor` and `limit` from raw list params.
pub fn page_params(params: Option<&Value>) -> (Option<String>, Option<usize>) {
    let cursor = params
        .and_then(|p| p.get("cursor"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let limit = params
        .and_then(|p| p.get("limit"))
        .and_then(Value::as_u64)
        .map(|n| n as usize);
    (cursor, limit)
}
