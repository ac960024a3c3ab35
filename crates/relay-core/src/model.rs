use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelId(pub String);

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        ModelId(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub display_name: String,
    pub context_window: u64,
    pub max_output_tokens: u64,
    pub supports_thinking: bool,
}

impl Model {
    fn new(id: &str, display_name: &str, context_window: u64, max_output_tokens: u64) -> Self {
        Self {
            id: ModelId(id.into()),
            display_name: display_name.into(),
            context_window,
            max_output_tokens,
            supports_thinking: false,
        }
    }

    fn thinking(mut self) -> Self {
        self.supports_thinking = true;
        self
    }
}

/// Models reachable through an OpenAI-compatible chat completions endpoint.
pub fn builtin_models() -> HashMap<ModelId, Model> {
    [
        Model::new("gpt-4o", "GPT-4o", 128_000, 16_384),
        Model::new("gpt-4.1", "GPT-4.1", 1_047_576, 32_768),
        Model::new("o4-mini", "o4-mini", 200_000, 100_000).thinking(),
        Model::new("deepseek/deepseek-v3.2", "DeepSeek V3.2", 163_840, 65_536).thinking(),
        Model::new("z-ai/glm-5", "GLM-5", 202_752, 131_072).thinking(),
        Model::new("Qwen/Qwen3-Coder", "Qwen3 Coder", 262_144, 65_536),
    ]
    .into_iter()
    .map(|m| (m.id.clone(), m))
    .collect()
}

pub fn get_model(id: &ModelId) -> Option<Model> {
    builtin_models().remove(id)
}

pub const DEFAULT_MODEL: &str = "gpt-4o";
