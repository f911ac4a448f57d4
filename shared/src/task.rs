//! Task model and lifecycle state machine
//!
//! This module defines the task and task-event value types carried end-to-end
//! on the wire, together with the state machine both the manager and the
//! worker consult before acting on a task. The transition table below is the
//! single source of truth; no other component encodes its own copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a task.
///
/// Serialized as an integer (Pending=0 .. Failed=4) on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

/// Allowed transitions out of each state.
///
/// Self-loops on `Scheduled` and `Running` make retried or duplicated events
/// in the same state permitted no-ops. `Completed` is terminal and `Failed ->
/// Scheduled` is the restart edge.
pub fn transitions(state: State) -> &'static [State] {
    match state {
        State::Pending => &[State::Scheduled],
        State::Scheduled => &[State::Scheduled, State::Running, State::Failed],
        State::Running => &[State::Running, State::Completed, State::Failed],
        State::Completed => &[],
        State::Failed => &[State::Scheduled],
    }
}

/// Returns true if `state` is a member of `states`.
pub fn contains(states: &[State], state: State) -> bool {
    states.contains(&state)
}

/// Returns true if the transition `current -> next` is allowed.
pub fn validate_transition(current: State, next: State) -> bool {
    contains(transitions(current), next)
}

impl State {
    /// Integer wire representation of this state.
    pub fn as_u8(self) -> u8 {
        match self {
            State::Pending => 0,
            State::Scheduled => 1,
            State::Running => 2,
            State::Completed => 3,
            State::Failed => 4,
        }
    }
}

impl TryFrom<u8> for State {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(State::Pending),
            1 => Ok(State::Scheduled),
            2 => Ok(State::Running),
            3 => Ok(State::Completed),
            4 => Ok(State::Failed),
            other => Err(format!("unknown task state {}", other)),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Pending => "Pending",
            State::Scheduled => "Scheduled",
            State::Running => "Running",
            State::Completed => "Completed",
            State::Failed => "Failed",
        };
        f.write_str(name)
    }
}

// The wire contract serializes states as integers, so the serde
// implementations are written by hand instead of derived.
impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        State::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// A unit of work: a container spec plus lifecycle state.
///
/// Tasks are authored externally by a client, owned by the manager after
/// admission, and copied to the worker that hosts them. The UUID is immutable
/// and unique across the cluster; the record is mutated in place under that
/// key as the task moves through its lifecycle.
///
/// Field names follow the established wire contract (`ID`, `ContainerID`,
/// `HostPorts`, ...) so existing client payloads decode unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct Task {
    #[serde(rename = "ID")]
    pub id: Uuid,
    #[serde(rename = "ContainerID")]
    pub container_id: String,
    pub name: String,
    pub state: State,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    /// Container ports exposed by the image, e.g. `"7777/tcp"`.
    #[serde(rename = "ExposedPort")]
    pub exposed_ports: Vec<String>,
    /// Declared container-port to host-port bindings.
    pub port_bindings: HashMap<String, String>,
    pub network_mode: String,
    pub restart_policy: String,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    /// Effective host-port bindings, discovered from the runtime after start.
    pub host_ports: HashMap<String, String>,
    /// HTTP path probed by the manager's health-check loop.
    pub health_check: String,
    pub restart_count: u32,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            container_id: String::new(),
            name: String::new(),
            state: State::Pending,
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            exposed_ports: Vec::new(),
            port_bindings: HashMap::new(),
            network_mode: String::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
            host_ports: HashMap::new(),
            health_check: String::new(),
            restart_count: 0,
        }
    }
}

impl Task {
    /// Creates a new pending task for the given image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            image: image.into(),
            ..Self::default()
        }
    }

    /// First discovered host port, if the runtime has reported any.
    /// Used by the health-check loop to build the probe URL.
    pub fn first_host_port(&self) -> Option<&str> {
        self.host_ports.values().next().map(String::as_str)
    }
}

/// A unit of intent: a request to move a task into a target state.
///
/// Events are the only thing clients and the manager exchange for lifecycle
/// changes. Once persisted in the event store an event is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct TaskEvent {
    #[serde(rename = "ID")]
    pub id: Uuid,
    pub state: State,
    pub timestamp: Option<DateTime<Utc>>,
    pub task: Task,
}

impl Default for TaskEvent {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            state: State::Pending,
            timestamp: None,
            task: Task::default(),
        }
    }
}

impl TaskEvent {
    /// Creates a new event carrying `task` with a fresh UUID and the current
    /// time.
    pub fn new(state: State, task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            timestamp: Some(Utc::now()),
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_representation() {
        let json = serde_json::to_string(&State::Running).unwrap();
        assert_eq!(json, "2");

        let state: State = serde_json::from_str("4").unwrap();
        assert_eq!(state, State::Failed);

        assert!(serde_json::from_str::<State>("5").is_err());
    }

    #[test]
    fn test_completed_is_terminal() {
        assert!(transitions(State::Completed).is_empty());
    }

    #[test]
    fn test_restart_edge() {
        assert!(validate_transition(State::Failed, State::Scheduled));
        assert!(!validate_transition(State::Failed, State::Running));
    }
}
