//! Terminal results of a command invocation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::params::Parameters;

/// Outcome of a single command invocation.
///
/// Cancellation and timeouts are distinct variants so callers can tell them
/// apart from ordinary failures without inspecting messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResult {
    /// The command completed.
    Success {
        message: Option<String>,
        data: Option<Parameters>,
    },

    /// The command failed.
    Failure {
        message: String,
        cause: Option<String>,
    },

    /// The invocation was cancelled before completing.
    Cancelled { reason: Option<String> },

    /// The invocation exceeded its timeout and was cancelled.
    TimedOut {
        #[serde(with = "duration_ms")]
        after: Duration,
    },
}

impl CommandResult {
    /// Success without message or payload.
    pub fn ok() -> Self {
        Self::Success {
            message: None,
            data: None,
        }
    }

    /// Success with a message.
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
            data: None,
        }
    }

    /// Failure with a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            cause: None,
        }
    }

    /// Failure with a message and an underlying cause.
    pub fn failure_with_cause(message: impl Into<String>, cause: impl ToString) -> Self {
        Self::Failure {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    /// Cancellation outcome.
    pub fn cancelled() -> Self {
        Self::Cancelled { reason: None }
    }

    /// Cancellation outcome with a reason.
    pub fn cancelled_because(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: Some(reason.into()),
        }
    }

    /// Attach a payload to a success result. Other variants are returned unchanged.
    pub fn with_data(self, data: Parameters) -> Self {
        match self {
            Self::Success { message, .. } => Self::Success {
                message,
                data: Some(data),
            },
            other => other,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Short status label used in logs.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Cancelled { .. } => "cancelled",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    /// Human-readable message for this outcome.
    pub fn message(&self) -> String {
        match self {
            Self::Success { message, .. } => message.clone().unwrap_or_else(|| "OK".to_string()),
            Self::Failure { message, cause } => match cause {
                Some(cause) => format!("{message}: {cause}"),
                None => message.clone(),
            },
            Self::Cancelled { reason } => match reason {
                Some(reason) => format!("Cancelled: {reason}"),
                None => "Cancelled".to_string(),
            },
            Self::TimedOut { after } => format!("Timed out after {} ms", after.as_millis()),
        }
    }

    /// Payload of a success result.
    pub fn data(&self) -> Option<&Parameters> {
        match self {
            Self::Success { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
