//! Core data model.
//!
//! A worker is registered once by name and receives a store-assigned id.
//! Everything logged afterwards (lifecycle actions, completed tasks) refers
//! to that id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Store-assigned identifier of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub i64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A known worker. Created once at registration, never renamed or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Operator-requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Stop,
    Restart,
    Register,
    Test,
}

impl Action {
    /// The lifecycle subset, if this action drives a daemon.
    pub fn lifecycle(self) -> Option<LifecycleAction> {
        match self {
            Action::Start => Some(LifecycleAction::Start),
            Action::Stop => Some(LifecycleAction::Stop),
            Action::Restart => Some(LifecycleAction::Restart),
            Action::Register | Action::Test => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Register => "register",
            Action::Test => "test",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            "register" => Ok(Action::Register),
            "test" => Ok(Action::Test),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

/// Actions that change a daemon's run state and appear in the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Restart => "restart",
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LifecycleAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<Action>()?
            .lifecycle()
            .ok_or_else(|| Error::Other(format!("'{s}' is not a lifecycle action")))
    }
}

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

/// One lifecycle transition recorded against a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub worker_id: WorkerId,
    pub action: LifecycleAction,
    pub created_at: DateTime<Utc>,
}

/// One completed unit of work reported by a running worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub worker_id: WorkerId,
    pub task_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_known_actions() {
        for action in [
            Action::Start,
            Action::Stop,
            Action::Restart,
            Action::Register,
            Action::Test,
        ] {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn unknown_action_is_an_error() {
        let err = "reload".parse::<Action>().unwrap_err();
        assert!(matches!(err, Error::UnknownAction(ref a) if a == "reload"));
    }

    #[test]
    fn only_start_stop_restart_are_lifecycle_actions() {
        assert_eq!(Action::Stop.lifecycle(), Some(LifecycleAction::Stop));
        assert_eq!(Action::Register.lifecycle(), None);
        assert_eq!(Action::Test.lifecycle(), None);
        assert!("register".parse::<LifecycleAction>().is_err());
    }
}
