//! Agent side: the chat model client, the tool-calling loop, the registry
//! that wires sub-agents under a manager, and the tools they use.

pub mod agent;
pub mod model;
pub mod registry;
pub mod team;
pub mod tool;
pub mod tools;

pub use agent::{Agent, AgentError, RunResult, RunState, StepLog, ToolFailure};
pub use model::{ChatMessage, ChatModel, InferenceClient, ModelError, Role};
pub use registry::{AgentAnswer, AgentRegistry, RegistryError};
pub use team::{build_agent_team, web_client};
pub use tool::{Tool, ToolError};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{ChatMessage, ChatModel, ModelError, Tool, ToolError};

    /// Replies with canned completions in order and records every request.
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::Unreachable("script exhausted".to_string()))
        }
    }

    pub struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeats its text argument."
        }

        fn parameters(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }

        async fn call(&self, arguments: Value) -> Result<String, ToolError> {
            let text = super::tool::required_str("echo", &arguments, "text")?;
            Ok(format!("echo: {}", text))
        }
    }

    /// Always fails with the configured message and status.
    pub struct FailingTool {
        name: String,
        error: ToolError,
    }

    impl FailingTool {
        pub fn new(name: &str, message: &str, status: Option<u16>) -> Self {
            Self {
                name: name.to_string(),
                error: ToolError {
                    message: message.to_string(),
                    status,
                },
            }
        }
    }

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "Always fails."
        }

        fn parameters(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }

        async fn call(&self, _arguments: Value) -> Result<String, ToolError> {
            Err(self.error.clone())
        }
    }
}
