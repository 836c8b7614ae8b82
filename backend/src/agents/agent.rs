use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::model::{ChatMessage, ChatModel, ModelError};
use super::tool::{Tool, ToolError, FINAL_ANSWER};
use crate::metrics;

const FINAL_ANSWER_DESCRIPTION: &str = "Provides the final answer to the task and ends the run.";

const MAX_STEPS_PROMPT: &str = "You have used all of your steps. Reply now with your best final \
answer to the task as plain text, without JSON. Mention any errors that tools or agents reported.";

const PLANNING_PROMPT: &str = "Before continuing, write a short numbered plan for the remaining \
work based on what you know so far. Do not call any tool in this reply.";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Success,
    MaxStepsReached,
}

/// A downstream failure observed during a run, including inside managed agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub agent: String,
    pub tool: String,
    pub message: String,
    pub status: Option<u16>,
}

impl ToolFailure {
    pub fn describe(&self) -> String {
        let mut text = format!("{} ({}): {}", self.tool, self.agent, self.message);
        if let Some(status) = self.status {
            text.push_str(&format!(" [status {}]", status));
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub step: usize,
    pub tool: Option<String>,
    pub arguments: Value,
    pub observation: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub output: String,
    pub state: RunState,
    pub steps: Vec<StepLog>,
    pub plans: Vec<String>,
    pub errors: Vec<ToolFailure>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    thought: Option<String>,
    tool: String,
    #[serde(default)]
    arguments: Value,
}

/// A named reasoning unit with a toolset and a step budget.
pub struct Agent {
    name: String,
    description: String,
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    max_steps: usize,
    planning_interval: Option<usize>,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            model,
            tools: Vec::new(),
            max_steps: 2,
            planning_interval: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_planning_interval(mut self, interval: usize) -> Self {
        self.planning_interval = Some(interval).filter(|interval| *interval > 0);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Runs the tool-calling loop on `task`. Agents in `managed` can be
    /// delegated to as if they were tools.
    pub fn run<'a>(
        &'a self,
        task: &'a str,
        managed: &'a [&'a Agent],
    ) -> BoxFuture<'a, Result<RunResult, AgentError>> {
        async move {
            info!("Agent '{}' starting (max {} steps)", self.name, self.max_steps);

            let mut messages = vec![
                ChatMessage::system(self.system_prompt(managed)),
                ChatMessage::user(format!("New task:\n{}", task)),
            ];
            let mut steps = Vec::new();
            let mut plans = Vec::new();
            let mut errors = Vec::new();

            for step in 1..=self.max_steps {
                if self.is_planning_step(step) {
                    let plan = self.plan(&messages).await?;
                    messages.push(ChatMessage::assistant(format!("Plan:\n{}", plan)));
                    plans.push(plan);
                }

                let reply = self.model.complete(&messages).await?;
                messages.push(ChatMessage::assistant(reply.clone()));

                let call = match parse_tool_call(&reply) {
                    Ok(call) => call,
                    Err(reason) => {
                        warn!("Agent '{}' step {}: unparsable reply", self.name, step);
                        let observation = format!(
                            "Error: could not read a tool call from your reply ({}). Reply with \
                             exactly one JSON object with \"tool\" and \"arguments\".",
                            reason
                        );
                        messages.push(ChatMessage::user(observation.clone()));
                        steps.push(StepLog {
                            step,
                            tool: None,
                            arguments: Value::Null,
                            observation,
                            error: Some(reason),
                        });
                        continue;
                    }
                };

                if let Some(thought) = &call.thought {
                    debug!("Agent '{}' step {} thought: {}", self.name, step, thought);
                }

                if call.tool == FINAL_ANSWER {
                    let output = final_answer_text(&call.arguments);
                    steps.push(StepLog {
                        step,
                        tool: Some(call.tool),
                        arguments: call.arguments,
                        observation: output.clone(),
                        error: None,
                    });
                    info!("Agent '{}' finished after {} steps", self.name, step);
                    return Ok(RunResult {
                        output,
                        state: RunState::Success,
                        steps,
                        plans,
                        errors,
                    });
                }

                let outcome = self.invoke(&call, managed, &mut errors).await;
                let (observation, error) = match outcome {
                    Ok(output) => (format!("Observation:\n{}", output), None),
                    Err(err) => (format!("Error:\n{}", err.report()), Some(err.report())),
                };
                messages.push(ChatMessage::user(observation.clone()));
                steps.push(StepLog {
                    step,
                    tool: Some(call.tool),
                    arguments: call.arguments,
                    observation,
                    error,
                });
            }

            warn!(
                "Agent '{}' reached its step budget of {}",
                self.name, self.max_steps
            );
            messages.push(ChatMessage::user(MAX_STEPS_PROMPT));
            let output = self.model.complete(&messages).await?;
            Ok(RunResult {
                output: output.trim().to_string(),
                state: RunState::MaxStepsReached,
                steps,
                plans,
                errors,
            })
        }
        .boxed()
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        managed: &[&Agent],
        errors: &mut Vec<ToolFailure>,
    ) -> Result<String, ToolError> {
        if let Some(tool) = self.tools.iter().find(|tool| tool.name() == call.tool) {
            debug!("Agent '{}' calling tool '{}'", self.name, call.tool);
            return match tool.call(call.arguments.clone()).await {
                Ok(output) => Ok(output),
                Err(err) => {
                    error!("❗ Tool '{}' failed: {}", call.tool, err.report());
                    metrics::TOOL_FAILURES.with_label_values(&[call.tool.as_str()]).inc();
                    errors.push(ToolFailure {
                        agent: self.name.clone(),
                        tool: call.tool.clone(),
                        message: err.message.clone(),
                        status: err.status,
                    });
                    Err(err)
                }
            };
        }

        if let Some(agent) = managed.iter().find(|agent| agent.name == call.tool) {
            let task = call
                .arguments
                .get("task")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| call.arguments.to_string());
            debug!("Agent '{}' delegating to '{}'", self.name, agent.name);

            return match agent.run(&delegated_task(agent, &task), &[]).await {
                Ok(result) => {
                    errors.extend(result.errors);
                    Ok(result.output)
                }
                Err(err) => {
                    error!("❗ Managed agent '{}' failed: {}", agent.name, err);
                    metrics::TOOL_FAILURES.with_label_values(&[agent.name.as_str()]).inc();
                    let failure = ToolFailure {
                        agent: self.name.clone(),
                        tool: agent.name.clone(),
                        message: err.to_string(),
                        status: None,
                    };
                    errors.push(failure);
                    Err(ToolError::new(format!("agent '{}' failed: {}", agent.name, err)))
                }
            };
        }

        let mut available = self.tool_names();
        available.extend(managed.iter().map(|agent| agent.name()));
        available.push(FINAL_ANSWER);
        Err(ToolError::new(format!(
            "unknown tool '{}'. Available tools: {}",
            call.tool,
            available.join(", ")
        )))
    }

    async fn plan(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let mut request = messages.to_vec();
        request.push(ChatMessage::user(PLANNING_PROMPT));
        let plan = self.model.complete(&request).await?;
        debug!("Agent '{}' plan: {}", self.name, plan);
        Ok(plan.trim().to_string())
    }

    fn is_planning_step(&self, step: usize) -> bool {
        self.planning_interval
            .map(|interval| (step - 1) % interval == 0)
            .unwrap_or(false)
    }

    fn system_prompt(&self, managed: &[&Agent]) -> String {
        let mut prompt = format!(
            "You are {}: {}\n\
             Solve the task step by step. At every step reply with exactly one JSON object and \
             nothing else:\n\
             {{\"thought\": \"<your reasoning>\", \"tool\": \"<tool name>\", \"arguments\": {{...}}}}\n\
             Each tool result comes back to you as an observation. When you know the answer, \
             call {}.\n\nTools:\n",
            self.name, self.description, FINAL_ANSWER
        );
        for tool in &self.tools {
            prompt.push_str(&format!(
                "- {}: {}\n  arguments: {}\n",
                tool.name(),
                tool.description(),
                tool.parameters()
            ));
        }
        prompt.push_str(&format!(
            "- {}: {}\n  arguments: {{\"answer\": \"<final answer>\"}}\n",
            FINAL_ANSWER, FINAL_ANSWER_DESCRIPTION
        ));

        if !managed.is_empty() {
            prompt.push_str(
                "\nTeam members you can delegate to, called like tools with arguments \
                 {\"task\": \"<detailed task>\"}:\n",
            );
            for agent in managed {
                prompt.push_str(&format!("- {}: {}\n", agent.name, agent.description));
            }
        }
        prompt
    }
}

fn delegated_task(agent: &Agent, task: &str) -> String {
    format!(
        "You are '{}', a member of a team. Your manager gave you this task:\n---\n{}\n---\n\
         Give a detailed answer, not a one-liner. If any tool fails, include its error in your \
         answer.",
        agent.name, task
    )
}

fn final_answer_text(arguments: &Value) -> String {
    match arguments {
        Value::String(answer) => answer.clone(),
        other => match other.get("answer") {
            Some(Value::String(answer)) => answer.clone(),
            Some(value) => value.to_string(),
            None => other.to_string(),
        },
    }
}

/// Extracts the JSON object from a model reply, tolerating code fences and prose.
fn parse_tool_call(reply: &str) -> Result<ToolCall, String> {
    let start = reply.find('{').ok_or("no JSON object found")?;
    let end = reply.rfind('}').ok_or("no JSON object found")?;
    if end < start {
        return Err("no JSON object found".to_string());
    }
    serde_json::from_str::<ToolCall>(&reply[start..=end]).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{EchoTool, FailingTool, ScriptedModel};
    use serde_json::json;

    #[test]
    fn parses_fenced_tool_calls() {
        let reply = "Sure:\n```json\n{\"thought\": \"look\", \"tool\": \"echo\", \"arguments\": {\"text\": \"hi\"}}\n```";
        let call = parse_tool_call(reply).unwrap();
        assert_eq!(call.tool, "echo");
        assert_eq!(call.arguments, json!({ "text": "hi" }));
        assert!(parse_tool_call("no json here").is_err());
    }

    #[test]
    fn final_answer_accepts_several_shapes() {
        assert_eq!(final_answer_text(&json!({ "answer": "42" })), "42");
        assert_eq!(final_answer_text(&json!("plain")), "plain");
        assert_eq!(final_answer_text(&json!({ "answer": 7 })), "7");
    }

    #[tokio::test]
    async fn runs_tools_until_final_answer() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"tool": "echo", "arguments": {"text": "ping"}}"#,
            r#"{"tool": "final_answer", "arguments": {"answer": "pong"}}"#,
        ]));
        let agent = Agent::new(model.clone(), "worker", "echoes things")
            .with_tools(vec![Arc::new(EchoTool)])
            .with_max_steps(3);

        let result = agent.run("say ping", &[]).await.unwrap();
        assert_eq!(result.output, "pong");
        assert_eq!(result.state, RunState::Success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].observation, "Observation:\necho: ping");
        assert!(result.errors.is_empty());

        // the observation is fed back to the model
        let last_request = model.requests().pop().unwrap();
        assert!(last_request
            .iter()
            .any(|m| m.content == "Observation:\necho: ping"));
    }

    #[tokio::test]
    async fn tool_failures_are_observations_not_crashes() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"tool": "flaky", "arguments": {}}"#,
            r#"{"tool": "final_answer", "arguments": {"answer": "the tool failed"}}"#,
        ]));
        let agent = Agent::new(model, "worker", "uses a flaky tool")
            .with_tools(vec![Arc::new(FailingTool::new(
                "flaky",
                "Vector DB is currently unavailable",
                Some(503),
            ))])
            .with_max_steps(3);

        let result = agent.run("try it", &[]).await.unwrap();
        assert_eq!(result.state, RunState::Success);
        assert_eq!(
            result.steps[0].error.as_deref(),
            Some("Vector DB is currently unavailable (status 503)")
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].tool, "flaky");
        assert_eq!(result.errors[0].status, Some(503));
    }

    #[tokio::test]
    async fn step_budget_forces_a_final_answer() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"tool": "echo", "arguments": {"text": "1"}}"#,
            r#"{"tool": "echo", "arguments": {"text": "2"}}"#,
            "best effort answer",
        ]));
        let agent = Agent::new(model, "worker", "loops")
            .with_tools(vec![Arc::new(EchoTool)])
            .with_max_steps(2);

        let result = agent.run("loop", &[]).await.unwrap();
        assert_eq!(result.state, RunState::MaxStepsReached);
        assert_eq!(result.output, "best effort answer");
        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn unknown_tools_and_garbage_consume_steps() {
        let model = Arc::new(ScriptedModel::new([
            "I think I should search",
            r#"{"tool": "nope", "arguments": {}}"#,
            r#"{"tool": "final_answer", "arguments": {"answer": "done"}}"#,
        ]));
        let agent = Agent::new(model, "worker", "confused").with_max_steps(3);

        let result = agent.run("task", &[]).await.unwrap();
        assert_eq!(result.output, "done");
        assert!(result.steps[0].error.is_some());
        assert!(result.steps[1]
            .error
            .as_deref()
            .unwrap()
            .contains("unknown tool 'nope'"));
        // the model's own mistakes are not downstream errors
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn delegates_to_managed_agents_and_collects_their_errors() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"tool": "helper", "arguments": {"task": "find docs"}}"#,
            r#"{"tool": "flaky", "arguments": {}}"#,
            r#"{"tool": "final_answer", "arguments": {"answer": "helper could not reach the DB"}}"#,
            r#"{"tool": "final_answer", "arguments": {"answer": "summary"}}"#,
        ]));
        let helper = Agent::new(model.clone(), "helper", "fetches documents")
            .with_tools(vec![Arc::new(FailingTool::new("flaky", "down", Some(503)))])
            .with_max_steps(2);
        let manager = Agent::new(model.clone(), "manager", "delegates").with_max_steps(3);

        let result = manager.run("question", &[&helper]).await.unwrap();
        assert_eq!(result.output, "summary");
        assert_eq!(
            result.steps[0].observation,
            "Observation:\nhelper could not reach the DB"
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].agent, "helper");

        // the helper sees the delegated task, not the manager's prompt
        let helper_request = &model.requests()[1];
        assert!(helper_request[1].content.contains("find docs"));
    }

    #[tokio::test]
    async fn plans_on_the_configured_interval() {
        let model = Arc::new(ScriptedModel::new([
            "1. echo\n2. answer",
            r#"{"tool": "echo", "arguments": {"text": "a"}}"#,
            r#"{"tool": "echo", "arguments": {"text": "b"}}"#,
            "1. answer now",
            r#"{"tool": "final_answer", "arguments": {"answer": "ok"}}"#,
        ]));
        let agent = Agent::new(model, "planner", "plans")
            .with_tools(vec![Arc::new(EchoTool)])
            .with_max_steps(5)
            .with_planning_interval(2);

        let result = agent.run("task", &[]).await.unwrap();
        assert_eq!(result.output, "ok");
        assert_eq!(result.plans, vec!["1. echo\n2. answer", "1. answer now"]);
    }

    #[tokio::test]
    async fn model_failure_aborts_the_run() {
        let model = Arc::new(ScriptedModel::new(Vec::<&str>::new()));
        let agent = Agent::new(model, "worker", "no backend");
        assert!(matches!(
            agent.run("task", &[]).await,
            Err(AgentError::Model(_))
        ));
    }
}
