use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub answer_model: String,
    pub embedding_model: String,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub chunk_target_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub search_limit: usize,
    /// Replace the uploading scope's earlier points on every upload instead of adding to them.
    pub recreate_collection: bool,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Let the model decide whether to search the knowledge base via a tool call.
    pub search_knowledge: bool,
    pub markdown: bool,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub ui_bind_addr: String,
    pub backend_url: String,
    pub data_dir: PathBuf,
    pub ollama_base_url: String,
    pub qdrant_base_url: String,
    pub qdrant_collection: String,
    pub models: ModelConfig,
    pub knowledge: KnowledgeConfig,
    pub agent: AgentConfig,
    /// Sidebar history size, always at least one entry.
    pub history_limit: u32,
    pub max_upload_bytes: usize,
    pub backend_timeout: Duration,
    pub session_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("PDFCHAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Self {
            bind_addr: env::var("PDFCHAT_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            ui_bind_addr: env::var("PDFCHAT_UI_BIND")
                .unwrap_or_else(|_| "127.0.0.1:8501".to_string()),
            backend_url: env::var("PDFCHAT_BACKEND_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
            data_dir,
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            qdrant_base_url: env::var("QDRANT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            qdrant_collection: env::var("QDRANT_COLLECTION")
                .unwrap_or_else(|_| "pdf_chatbot".to_string()),
            models: ModelConfig {
                answer_model: env::var("ANSWER_MODEL").unwrap_or_else(|_| "llama3.2".to_string()),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "openhermes".to_string()),
            },
            knowledge: KnowledgeConfig {
                chunk_target_tokens: parse_env("CHUNK_TARGET_TOKENS", 400),
                chunk_overlap_tokens: parse_env("CHUNK_OVERLAP_TOKENS", 50),
                search_limit: parse_env("PDFCHAT_SEARCH_LIMIT", 5),
                recreate_collection: flag_env("PDFCHAT_RECREATE_COLLECTION", false),
            },
            agent: AgentConfig {
                search_knowledge: flag_env("PDFCHAT_SEARCH_KNOWLEDGE", true),
                markdown: flag_env("PDFCHAT_MARKDOWN", true),
            },
            history_limit: history_limit(env::var("PDFCHAT_HISTORY_LIMIT").ok().as_deref()),
            max_upload_bytes: parse_env::<usize>("PDFCHAT_MAX_UPLOAD_MB", 50) * 1024 * 1024,
            backend_timeout: Duration::from_secs(parse_env("PDFCHAT_BACKEND_TIMEOUT_SECS", 300)),
            session_ttl: Duration::from_secs(parse_env("PDFCHAT_SESSION_TTL_SECS", 86_400)),
        }
    }

    pub fn users_dsn(&self) -> String {
        format!("sqlite://{}", self.data_dir.join("users.sqlite3").display())
    }

    pub fn history_dsn(&self) -> String {
        format!(
            "sqlite://{}",
            self.data_dir.join("chat_history.sqlite3").display()
        )
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn history_limit(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(20)
        .max(1)
}

fn flag_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => parse_flag(&value).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
