use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent
///
/// # Status Transitions
/// ```text
/// Idle <-> Active <-> Busy
///   ^        |         |
///   |        v         |
///   +----- Error <-----+
///
/// every non-terminal status -> Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Created or resting, not accepting work yet
    Idle,
    /// Ready to execute a task
    Active,
    /// Executing a task
    Busy,
    /// Last task failed; needs an explicit recovery
    Error,
    /// Shut down; absorbing
    Terminated,
}

impl AgentStatus {
    /// Statuses reachable from this one in a single step
    pub fn allowed_transitions(&self) -> &'static [AgentStatus] {
        use AgentStatus::*;
        match self {
            Idle => &[Active, Terminated],
            Active => &[Idle, Busy, Error, Terminated],
            Busy => &[Active, Error, Terminated],
            Error => &[Idle, Terminated],
            Terminated => &[],
        }
    }

    /// Checks if a transition from current status to next status is valid
    ///
    /// # Example
    /// ```
    /// use swarm_runtime::agents::state::AgentStatus;
    ///
    /// assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Active));
    /// assert!(!AgentStatus::Idle.can_transition_to(AgentStatus::Busy));
    /// ```
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Terminated)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Terminated => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentStatus::*;

    const ALL: [AgentStatus; 5] = [Idle, Active, Busy, Error, Terminated];

    #[test]
    fn valid_transition_idle_to_active() {
        assert!(Idle.can_transition_to(Active));
    }

    #[test]
    fn valid_transition_active_to_busy() {
        assert!(Active.can_transition_to(Busy));
    }

    #[test]
    fn valid_transition_busy_to_error() {
        assert!(Busy.can_transition_to(Error));
    }

    #[test]
    fn valid_transition_error_to_idle() {
        assert!(Error.can_transition_to(Idle));
    }

    #[test]
    fn invalid_transition_idle_to_busy() {
        assert!(!Idle.can_transition_to(Busy));
        assert_eq!(Idle.allowed_transitions(), &[Active, Terminated]);
    }

    #[test]
    fn invalid_transition_busy_to_idle() {
        assert!(!Busy.can_transition_to(Idle));
    }

    #[test]
    fn invalid_transition_error_to_active() {
        assert!(!Error.can_transition_to(Active));
    }

    #[test]
    fn terminated_is_absorbing() {
        for next in ALL {
            assert!(!Terminated.can_transition_to(next));
        }
        assert!(Terminated.is_terminal());
    }

    #[test]
    fn every_live_status_can_terminate() {
        for from in [Idle, Active, Busy, Error] {
            assert!(from.can_transition_to(Terminated), "{} -> terminated", from);
        }
    }

    #[test]
    fn no_self_transitions() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn status_display() {
        assert_eq!(Idle.to_string(), "idle");
        assert_eq!(Active.to_string(), "active");
        assert_eq!(Busy.to_string(), "busy");
        assert_eq!(Error.to_string(), "error");
        assert_eq!(Terminated.to_string(), "terminated");
    }
}
