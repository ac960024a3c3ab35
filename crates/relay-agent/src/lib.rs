pub mod agent;
pub mod prompt;

pub use agent::{Agent, AgentSession};
pub use prompt::{build_system_prompt, AgentMode};
