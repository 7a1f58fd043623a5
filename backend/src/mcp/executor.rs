//! The request executor seam.
//!
//! The transport never looks inside tool, resource or elicitation
//! requests; it hands them to a [`RequestExecutor`] and relays whatever
//! comes back. Executors report progress through a [`ProgressReporter`],
//! which is wired to the session's task tracker and SSE stream when the
//! call is streamed and discards updates otherwise.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::protocol::JsonRpcRequest;

/// One progress report from an executor.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Progress in `[0, 1]`
    pub progress: f64,
    pub phase: String,
    pub data: Value,
}

/// Handle an executor uses to report progress.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressReporter {
    /// Reporter wired to a streaming task.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Reporter for calls answered with a single JSON response.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Whether updates reach a client.
    pub fn is_streaming(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Report progress. Never blocks and never fails.
    pub fn report(&self, progress: f64, phase: impl Into<String>, data: Value) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressUpdate {
                progress,
                phase: phase.into(),
                data,
            });
        }
    }
}

/// Executes the business logic behind a JSON-RPC request.
///
/// Returns the `result` value of the JSON-RPC response. Any error is turned
/// into an InternalError response by the transport.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &JsonRpcRequest,
        progress: &ProgressReporter,
    ) -> anyhow::Result<Value>;
}

/// Tool call parameters from MCP.
#[derive(Debug, serde::Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Phases reported by a long-running catalog tool.
struct ToolPhases {
    name: &'static str,
    description: &'static str,
    phases: &'static [(f64, &'static str)],
}

const CATALOG: &[ToolPhases] = &[
    ToolPhases {
        name: "analyze_project",
        description: "Analyze a project directory and report its structure",
        phases: &[(0.1, "scanning"), (0.5, "classifying"), (0.8, "summarizing")],
    },
    ToolPhases {
        name: "generate_project",
        description: "Generate a new project from a template",
        phases: &[(0.1, "resolving template"), (0.6, "rendering"), (0.9, "writing files")],
    },
    ToolPhases {
        name: "compose_features",
        description: "Add features to an existing project",
        phases: &[(0.2, "planning"), (0.7, "merging")],
    },
    ToolPhases {
        name: "configure_deployment",
        description: "Produce deployment configuration for a project",
        phases: &[(0.3, "detecting platform"), (0.8, "rendering manifests")],
    },
];

/// Reference executor shipped with the server binary.
///
/// Tools walk through fixed phases and echo their arguments; it stands in
/// for a real backend and keeps the transport exercisable end to end.
#[derive(Debug, Clone)]
pub struct CatalogExecutor {
    phase_delay: Duration,
}

impl CatalogExecutor {
    pub fn new(phase_delay: Duration) -> Self {
        Self { phase_delay }
    }

    fn list_tools() -> Value {
        let mut tools: Vec<Value> = CATALOG
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "path": {
                                "type": "string",
                                "description": "Project path"
                            }
                        },
                        "required": []
                    }
                })
            })
            .collect();
        tools.push(json!({
            "name": "list_templates",
            "description": "List available project templates",
            "inputSchema": { "type": "object", "properties": {}, "required": [] }
        }));
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Value, progress: &ProgressReporter) -> anyhow::Result<Value> {
        let tool_params: ToolCallParams = serde_json::from_value(params)?;
        let args = tool_params.arguments.unwrap_or(json!({}));

        let result = if tool_params.name == "list_templates" {
            json!({ "templates": ["library", "cli", "service"] })
        } else {
            let tool = CATALOG
                .iter()
                .find(|t| t.name == tool_params.name)
                .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", tool_params.name))?;
            info!("MCP: Running tool {}", tool.name);
            for (fraction, phase) in tool.phases {
                progress.report(*fraction, *phase, json!({ "tool": tool.name }));
                tokio::time::sleep(self.phase_delay).await;
            }
            json!({ "tool": tool.name, "arguments": args, "status": "done" })
        };

        // Wrap result in MCP content format
        Ok(json!({
            "content": [{
                "type": "text",
                "text": serde_json::to_string_pretty(&result)?
            }]
        }))
    }

    fn list_resources() -> Value {
        json!({
            "resources": [{
                "uri": "tether://server/info",
                "name": "Server info",
                "mimeType": "application/json"
            }]
        })
    }

    fn read_resource(params: &Value) -> anyhow::Result<Value> {
        let uri = params["uri"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("uri is required"))?;
        if uri != "tether://server/info" {
            return Err(anyhow::anyhow!("Resource not found: {}", uri));
        }
        let info = json!({
            "name": "tether",
            "version": env!("CARGO_PKG_VERSION"),
            "streamingTools": CATALOG.iter().map(|t| t.name).collect::<Vec<_>>(),
        });
        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": info.to_string()
            }]
        }))
    }
}

impl Default for CatalogExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

#[async_trait]
impl RequestExecutor for CatalogExecutor {
    async fn execute(
        &self,
        request: &JsonRpcRequest,
        progress: &ProgressReporter,
    ) -> anyhow::Result<Value> {
        debug!("MCP: Executing {}", request.method);
        let params = request.params.clone().unwrap_or(json!({}));
        match request.method.as_str() {
            "tools/list" => Ok(Self::list_tools()),
            "tools/call" => self.call_tool(params, progress).await,
            "resources/list" => Ok(Self::list_resources()),
            "resources/read" => Self::read_resource(&params),
            // No human in the loop here
            "elicitation/request" => Ok(json!({ "action": "decline" })),
            other => Err(anyhow::anyhow!("Unsupported method: {}", other)),
        }
    }
}

/// Names of the catalog tools that report progress.
pub fn catalog_streaming_tools() -> Vec<String> {
    CATALOG.iter().map(|t| t.name.to_string()).collect()
}
