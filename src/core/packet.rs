//! Streamed execution events and the task status they project to.

use serde::{Deserialize, Serialize};

/// How bad an `error` packet is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warn,
    Human,
    #[default]
    Fatal,
}

/// One event in a task's packet log.
///
/// The tag and variant names match the execution service's wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentPacket {
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "working")]
    Working,
    #[serde(rename = "token")]
    Token { token: String },
    #[serde(rename = "handleLLMStart")]
    LlmStart,
    #[serde(rename = "handleChainStart")]
    ChainStart,
    #[serde(rename = "handleToolStart")]
    ToolStart {
        #[serde(default)]
        tool: String,
        #[serde(default)]
        input: String,
    },
    #[serde(rename = "handleToolEnd")]
    ToolEnd {
        #[serde(default)]
        output: String,
    },
    #[serde(rename = "handleAgentAction")]
    AgentAction {
        #[serde(default)]
        tool: String,
        #[serde(default)]
        input: String,
        #[serde(default)]
        log: String,
    },
    #[serde(rename = "handleAgentEnd")]
    AgentEnd { value: String },
    #[serde(rename = "requestHumanInput")]
    RequestHumanInput {
        #[serde(default)]
        prompt: String,
    },
    #[serde(rename = "done")]
    Done { value: String },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        severity: Severity,
        message: String,
    },
    #[serde(rename = "handleToolError")]
    ToolError { message: String },
    #[serde(rename = "handleChainError")]
    ChainError { message: String },
    #[serde(rename = "handleLLMError")]
    LlmError { message: String },
}

impl AgentPacket {
    pub fn done(value: impl Into<String>) -> Self {
        AgentPacket::Done {
            value: value.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        AgentPacket::Error {
            severity: Severity::Fatal,
            message: message.into(),
        }
    }

    /// Wire name of the packet type.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentPacket::Starting => "starting",
            AgentPacket::Working => "working",
            AgentPacket::Token { .. } => "token",
            AgentPacket::LlmStart => "handleLLMStart",
            AgentPacket::ChainStart => "handleChainStart",
            AgentPacket::ToolStart { .. } => "handleToolStart",
            AgentPacket::ToolEnd { .. } => "handleToolEnd",
            AgentPacket::AgentAction { .. } => "handleAgentAction",
            AgentPacket::AgentEnd { .. } => "handleAgentEnd",
            AgentPacket::RequestHumanInput { .. } => "requestHumanInput",
            AgentPacket::Done { .. } => "done",
            AgentPacket::Error { .. } => "error",
            AgentPacket::ToolError { .. } => "handleToolError",
            AgentPacket::ChainError { .. } => "handleChainError",
            AgentPacket::LlmError { .. } => "handleLLMError",
        }
    }

    /// `done` and `error` end an execution stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentPacket::Done { .. } | AgentPacket::Error { .. })
    }

    pub fn is_error(&self) -> bool {
        status_for(Some(self)) == TaskStatus::Error
    }

    /// The value a terminal packet carries: the result or the error message.
    pub fn terminal_value(&self) -> Option<&str> {
        match self {
            AgentPacket::Done { value } | AgentPacket::AgentEnd { value } => Some(value),
            AgentPacket::Error { message, .. }
            | AgentPacket::ToolError { message }
            | AgentPacket::ChainError { message }
            | AgentPacket::LlmError { message } => Some(message),
            _ => None,
        }
    }
}

/// Derived status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Starting,
    Working,
    Done,
    Wait,
    Error,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Starting => "starting",
            TaskStatus::Working => "working",
            TaskStatus::Done => "done",
            TaskStatus::Wait => "wait",
            TaskStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Project the last received packet onto a status.
pub fn status_for(last: Option<&AgentPacket>) -> TaskStatus {
    match last {
        Some(AgentPacket::Starting) => TaskStatus::Starting,
        Some(
            AgentPacket::Working
            | AgentPacket::Token { .. }
            | AgentPacket::LlmStart
            | AgentPacket::ChainStart
            | AgentPacket::ToolStart { .. }
            | AgentPacket::AgentAction { .. },
        ) => TaskStatus::Working,
        Some(AgentPacket::Done { .. } | AgentPacket::AgentEnd { .. }) => TaskStatus::Done,
        Some(
            AgentPacket::Error { .. }
            | AgentPacket::ToolError { .. }
            | AgentPacket::ChainError { .. }
            | AgentPacket::LlmError { .. },
        ) => TaskStatus::Error,
        Some(AgentPacket::RequestHumanInput { .. }) => TaskStatus::Wait,
        Some(AgentPacket::ToolEnd { .. }) | None => TaskStatus::Idle,
    }
}
