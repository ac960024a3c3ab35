use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::{ModelId, DEFAULT_MODEL};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8787";

/// Malformed frames a client tolerates per stream before giving up.
pub const DEFAULT_MALFORMED_FRAME_BUDGET: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible gateway
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default = "default_context_paths")]
    pub context_paths: Vec<String>,

    #[serde(default)]
    pub debug: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_context_paths() -> Vec<String> {
    vec!["AGENTS.md".into(), "relay.md".into()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            api_key: None,
            base_url: default_base_url(),
            agent: AgentConfig::default(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            context_paths: default_context_paths(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: ModelId,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    /// Upper bound on tool-call rounds within one turn sequence
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

fn default_model() -> ModelId {
    ModelId(DEFAULT_MODEL.into())
}

fn default_max_tokens() -> u64 {
    16_384
}

fn default_max_turns() -> u32 {
    50
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

fn default_addr() -> String {
    DEFAULT_ADDR.into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_malformed_budget")]
    pub malformed_frame_budget: usize,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.into()
}

fn default_malformed_budget() -> usize {
    DEFAULT_MALFORMED_FRAME_BUDGET
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            malformed_frame_budget: default_malformed_budget(),
        }
    }
}

pub fn load_config(working_dir: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let wd = working_dir.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let mut config = AppConfig::default();
    config.working_dir = wd.clone();

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("relay").join("config.json");
        if let Some(file_config) = read_config_file(&global_path)? {
            merge_config(&mut config, file_config);
        }
    }

    if let Some(file_config) = read_config_file(&wd.join("relay.json"))? {
        merge_config(&mut config, file_config);
    }

    apply_env(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File(e.to_string()))?;
    let parsed: AppConfig = serde_json::from_str(&content)
        .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(Some(parsed))
}

fn merge_config(base: &mut AppConfig, overlay: AppConfig) {
    if overlay.api_key.is_some() {
        base.api_key = overlay.api_key;
    }
    if overlay.base_url != default_base_url() {
        base.base_url = overlay.base_url;
    }
    if overlay.agent.model != default_model() {
        base.agent.model = overlay.agent.model;
    }
    if overlay.agent.max_tokens != default_max_tokens() {
        base.agent.max_tokens = overlay.agent.max_tokens;
    }
    if overlay.agent.max_turns != default_max_turns() {
        base.agent.max_turns = overlay.agent.max_turns;
    }
    if overlay.server.addr != default_addr() {
        base.server.addr = overlay.server.addr;
    }
    if overlay.client.server_url != default_server_url() {
        base.client.server_url = overlay.client.server_url;
    }
    if overlay.client.malformed_frame_budget != default_malformed_budget() {
        base.client.malformed_frame_budget = overlay.client.malformed_frame_budget;
    }
    if overlay.context_paths != default_context_paths() {
        base.context_paths = overlay.context_paths;
    }
    if overlay.debug {
        base.debug = true;
    }
}

/// Environment overrides; `lookup` is injected so tests need not touch the
/// process environment.
pub fn apply_env(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if config.api_key.is_none() {
        config.api_key = ["RELAY_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .find_map(|key| non_empty(key));
    }
    if let Some(url) = non_empty("RELAY_BASE_URL") {
        config.base_url = url;
    }
    if let Some(model) = non_empty("RELAY_MODEL") {
        config.agent.model = ModelId(model);
    }
    if let Some(addr) = non_empty("RELAY_ADDR") {
        config.server.addr = addr;
    }
    if let Some(url) = non_empty("RELAY_SERVER_URL") {
        config.client.server_url = url;
    }
}

impl AppConfig {
    pub fn get_api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.is_empty())
    }
}
