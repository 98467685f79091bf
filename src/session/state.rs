use std::fmt;

/// Lifecycle of a voice session.
///
/// `Created → Initializing → Active → CleaningUp → Closed`, with `Failed`
/// reachable from `Initializing` or `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Active,
    CleaningUp,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::CleaningUp => "cleaning_up",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Initializing)
                | (Created, CleaningUp)
                | (Initializing, Active)
                | (Initializing, Failed)
                | (Active, CleaningUp)
                | (Active, Failed)
                | (CleaningUp, Closed)
        )
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(SessionState::Created.can_transition_to(SessionState::Initializing));
        assert!(SessionState::Initializing.can_transition_to(SessionState::Active));
        assert!(SessionState::Active.can_transition_to(SessionState::CleaningUp));
        assert!(SessionState::CleaningUp.can_transition_to(SessionState::Closed));
    }

    #[test]
    fn test_failed_only_from_initializing_or_active() {
        assert!(SessionState::Initializing.can_transition_to(SessionState::Failed));
        assert!(SessionState::Active.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Created.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Closed.can_transition_to(SessionState::Failed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Active.is_terminal());
        assert!(!SessionState::Closed.can_transition_to(SessionState::Active));
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::CleaningUp.to_string(), "cleaning_up");
        assert_eq!(SessionState::Active.to_string(), "active");
    }
}
