use serde::{Deserialize, Serialize};
use std::fmt;

/// Runnable states as observed by the hosting worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnableStatus {
    /// Not running; initial state
    Stopped,
    /// Procedure is executing in the background
    Running,
    /// Procedure exited with an unrecovered failure; terminal until restarted
    Crashed,
}

impl RunnableStatus {
    /// Check if the runnable is currently executing
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if this is a failure state that requires an explicit restart
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Crashed)
    }

    /// Check if a start command is accepted from this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }
}

impl fmt::Display for RunnableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

impl std::str::FromStr for RunnableStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            "crashed" => Ok(Self::Crashed),
            _ => Err(format!("Invalid runnable status: {s}")),
        }
    }
}

impl Default for RunnableStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Advisory progress reported while a runnable is running.
///
/// Non-decreasing by convention only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current_step: String,
    pub progress: u8,
}

impl Progress {
    /// Build a progress report, clamping the percentage to 0-100
    pub fn new(current_step: impl Into<String>, progress: u32) -> Self {
        Self {
            current_step: current_step.into(),
            progress: progress.min(100) as u8,
        }
    }
}
