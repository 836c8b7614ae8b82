use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::agent::{Agent, AgentError, RunResult, ToolFailure};
use super::tool::Tool;

const QUERY_TEMPLATE: &str = "Answer the following query using your team members and tools.\n\
If a tool or a team member reports an error, state the error clearly in your final answer \
instead of guessing.\n\nQuery: ";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("agent name must not be empty")]
    MissingName,

    #[error("a manager agent is already set")]
    ManagerAlreadySet,

    #[error("no sub-agents registered yet")]
    NoSubAgents,

    #[error("agent name not found: {0}")]
    UnknownAgent(String),

    #[error("no manager agent set")]
    ManagerNotSet,

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// What `run` hands back: the final text, or the whole run on request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AgentAnswer {
    Text(String),
    Full(RunResult),
}

/// Holds the sub-agents and the single manager that coordinates them.
#[derive(Default)]
pub struct AgentRegistry {
    sub_agents: BTreeMap<String, Agent>,
    manager: Option<Agent>,
    managed: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sub_agent(&mut self, agent: Agent) -> Result<(), RegistryError> {
        if agent.name().trim().is_empty() {
            return Err(RegistryError::MissingName);
        }
        if self.sub_agents.contains_key(agent.name()) {
            warn!("Replacing sub-agent '{}'", agent.name());
        }
        info!("Registered sub-agent '{}'", agent.name());
        self.sub_agents.insert(agent.name().to_string(), agent);
        Ok(())
    }

    /// Sets the manager. An empty `managed_names` manages every registered sub-agent.
    pub fn add_manager(
        &mut self,
        agent: Agent,
        managed_names: &[&str],
    ) -> Result<(), RegistryError> {
        if self.manager.is_some() {
            return Err(RegistryError::ManagerAlreadySet);
        }
        if self.sub_agents.is_empty() {
            return Err(RegistryError::NoSubAgents);
        }

        let managed: Vec<String> = if managed_names.is_empty() {
            self.sub_agents.keys().cloned().collect()
        } else {
            managed_names
                .iter()
                .map(|name| {
                    if self.sub_agents.contains_key(*name) {
                        Ok(name.to_string())
                    } else {
                        Err(RegistryError::UnknownAgent(name.to_string()))
                    }
                })
                .collect::<Result<_, _>>()?
        };

        info!(
            "Manager '{}' coordinates: {}",
            agent.name(),
            managed.join(", ")
        );
        self.manager = Some(agent);
        self.managed = managed;
        Ok(())
    }

    /// Adds `tool` to the sub-agent or manager called `agent_name`.
    pub fn inject_tool(
        &mut self,
        agent_name: &str,
        tool: Arc<dyn Tool>,
    ) -> Result<(), RegistryError> {
        let target = match self.sub_agents.get_mut(agent_name) {
            Some(agent) => agent,
            None => match self.manager.as_mut() {
                Some(manager) if manager.name() == agent_name => manager,
                _ => return Err(RegistryError::UnknownAgent(agent_name.to_string())),
            },
        };
        info!("Injected tool '{}' into '{}'", tool.name(), agent_name);
        target.add_tool(tool);
        Ok(())
    }

    pub fn sub_agent(&self, name: &str) -> Option<&Agent> {
        self.sub_agents.get(name)
    }

    pub fn manager(&self) -> Option<&Agent> {
        self.manager.as_ref()
    }

    pub fn managed_names(&self) -> &[String] {
        &self.managed
    }

    /// Runs the manager on `query`. Downstream errors the final answer does not
    /// mention are appended to it.
    pub async fn run(
        &self,
        query: &str,
        return_full_result: bool,
    ) -> Result<AgentAnswer, RegistryError> {
        let manager = self.manager.as_ref().ok_or(RegistryError::ManagerNotSet)?;
        let managed: Vec<&Agent> = self
            .managed
            .iter()
            .filter_map(|name| self.sub_agents.get(name))
            .collect();

        let task = format!("{}{}", QUERY_TEMPLATE, query);
        let mut result = manager.run(&task, &managed).await?;
        surface_errors(&mut result);

        if return_full_result {
            Ok(AgentAnswer::Full(result))
        } else {
            Ok(AgentAnswer::Text(result.output))
        }
    }
}

fn surface_errors(result: &mut RunResult) {
    let missing: Vec<&ToolFailure> = result
        .errors
        .iter()
        .filter(|failure| !result.output.contains(&failure.message))
        .collect();
    if missing.is_empty() {
        return;
    }

    let mut appendix = String::from("\n\nErrors reported while answering:");
    for failure in missing {
        appendix.push_str("\n- ");
        appendix.push_str(&failure.describe());
    }
    result.output.push_str(&appendix);
}
