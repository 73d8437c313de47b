use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::AgentConfig;
use crate::knowledge::{format_references, KnowledgeBase};
use crate::ollama::{Message, OllamaClient};

pub const SEARCH_TOOL: &str = "search_knowledge_base";

const MAX_TOOL_ROUNDS: usize = 3;

/// A chat model bound to one knowledge base.
pub struct Agent {
    ollama: OllamaClient,
    model: String,
    knowledge: KnowledgeBase,
    config: AgentConfig,
    search_limit: usize,
}

impl Agent {
    pub fn new(
        ollama: OllamaClient,
        model: impl Into<String>,
        knowledge: KnowledgeBase,
        config: AgentConfig,
        search_limit: usize,
    ) -> Self {
        Self {
            ollama,
            model: model.into(),
            knowledge,
            config,
            search_limit: search_limit.max(1),
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub async fn run(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            anyhow::bail!("question must not be empty");
        }

        if self.config.search_knowledge {
            self.run_with_search_tool(question).await
        } else {
            self.run_with_references(question).await
        }
    }

    async fn run_with_search_tool(&self, question: &str) -> Result<String> {
        let tools = vec![search_tool_definition()];
        let mut messages = vec![
            Message::system(self.instructions()),
            Message::user(question),
        ];

        for round in 0..MAX_TOOL_ROUNDS {
            let reply = self.ollama.chat(&self.model, &messages, &tools).await?;
            if reply.tool_calls.is_empty() {
                return Ok(reply.content.trim().to_string());
            }

            tracing::debug!(
                "model requested {} tool call(s) in round {}",
                reply.tool_calls.len(),
                round + 1
            );

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in calls {
                let result = if call.function.name == SEARCH_TOOL {
                    let query = call
                        .function
                        .arguments
                        .get("query")
                        .and_then(|v| v.as_str())
                        .unwrap_or(question);
                    let hits = self.knowledge.search(query, self.search_limit).await?;
                    format_references(&hits)
                } else {
                    format!("unknown tool: {}", call.function.name)
                };
                messages.push(Message::tool(result));
            }
        }

        // Out of tool rounds: force a plain answer from what was gathered.
        let reply = self.ollama.chat(&self.model, &messages, &[]).await?;
        Ok(reply.content.trim().to_string())
    }

    async fn run_with_references(&self, question: &str) -> Result<String> {
        let hits = self.knowledge.search(question, self.search_limit).await?;
        let prompt = format!(
            "Use the following references from the knowledge base if they help answer the question.\n\n\
             <references>\n{}\n</references>\n\n\
             Question: {question}",
            format_references(&hits)
        );

        let messages = vec![Message::system(self.instructions()), Message::user(prompt)];
        let reply = self.ollama.chat(&self.model, &messages, &[]).await?;
        Ok(reply.content.trim().to_string())
    }

    fn instructions(&self) -> String {
        let mut lines = vec![format!(
            "You answer questions about the uploaded PDF document \"{}\".",
            self.knowledge.document()
        )];

        if self.config.search_knowledge {
            lines.push(format!(
                "Call the `{SEARCH_TOOL}` tool to look up passages from the document before answering \
                 questions about its contents."
            ));
        }
        lines.push(
            "If the document does not contain the answer, say so instead of guessing.".to_string(),
        );
        if self.config.markdown {
            lines.push("Format your answer using markdown.".to_string());
        }

        lines.join("\n")
    }
}

fn search_tool_definition() -> serde_json::Value {
    json!({
        "type": "function",
        "function": {
            "name": SEARCH_TOOL,
            "description": "Search the uploaded PDF for passages relevant to a query.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look for in the document."
                    }
                },
                "required": ["query"]
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentScope {
    Shared,
    Client(String),
}

impl AgentScope {
    pub fn from_client_id(client_id: Option<&str>) -> Self {
        match client_id.map(str::trim) {
            Some(id) if !id.is_empty() => AgentScope::Client(id.to_string()),
            _ => AgentScope::Shared,
        }
    }

    /// Owner key stored with every point uploaded under this scope.
    pub fn owner(&self) -> String {
        match self {
            AgentScope::Shared => "shared".to_string(),
            AgentScope::Client(id) => format!("client:{id}"),
        }
    }
}

/// Current agent per scope. Installing replaces only that scope's agent; readers keep
/// whatever `Arc` they already cloned.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<AgentScope, Arc<Agent>>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn install(&self, scope: AgentScope, agent: Agent) -> Option<Arc<Agent>> {
        self.agents.write().await.insert(scope, Arc::new(agent))
    }

    pub async fn get(&self, scope: &AgentScope) -> Option<Arc<Agent>> {
        self.agents.read().await.get(scope).cloned()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
