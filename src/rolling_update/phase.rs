//! Per-member replacement state machine and prompt session state

use std::fmt;

use tracing::debug;

/// Phase of one member's replacement
///
/// ```text
/// Pending -> Draining -> NodeDeleting -> Terminating -> Terminated -> Validating -> Validated -> Done
///    \_______________________________/                      \______________________________/
///     bastion / cloud-only / no node                          bastion / cloud-only
/// ```
///
/// Every non-terminal phase may move to `Aborted` on a fatal error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberPhase {
    /// Not yet touched
    Pending,
    /// Cordoning and evicting workloads
    Draining,
    /// Removing the Node object from the API
    NodeDeleting,
    /// Terminating the cloud instance
    Terminating,
    /// Instance terminated, pacing delay in progress
    Terminated,
    /// Waiting for the cluster to validate
    Validating,
    /// Validation finished, passed or tolerated
    Validated,
    /// Replacement complete
    Done,
    /// A fatal error halted the group
    Aborted,
}

impl MemberPhase {
    /// Returns true if no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Returns true if the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: MemberPhase) -> bool {
        use MemberPhase::*;

        if next == Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Draining)
                | (Pending, Terminating)
                | (Draining, NodeDeleting)
                | (NodeDeleting, Terminating)
                | (Terminating, Terminated)
                | (Terminated, Validating)
                | (Terminated, Done)
                | (Validating, Validated)
                | (Validated, Done)
        )
    }
}

impl fmt::Display for MemberPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks one member through its replacement, logging every transition
pub(crate) struct MemberProgress<'a> {
    instance: &'a str,
    node: Option<&'a str>,
    phase: MemberPhase,
}

impl<'a> MemberProgress<'a> {
    pub(crate) fn new(instance: &'a str, node: Option<&'a str>) -> Self {
        Self {
            instance,
            node,
            phase: MemberPhase::Pending,
        }
    }

    pub(crate) fn phase(&self) -> MemberPhase {
        self.phase
    }

    pub(crate) fn advance(&mut self, next: MemberPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid member transition {} -> {}",
            self.phase,
            next
        );
        debug!(
            instance = %self.instance,
            node = ?self.node,
            from = %self.phase,
            to = %next,
            "Member phase transition"
        );
        self.phase = next;
    }

    /// Move to `Aborted` and hand back the error that caused it
    pub(crate) fn abort(&mut self, err: crate::Error) -> crate::Error {
        self.advance(MemberPhase::Aborted);
        err
    }
}

/// Whether the operator is still asked between instances
///
/// Prompting can be switched off ("always yes") but never back on, so a
/// session that stopped asking stays that way for the rest of the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSession {
    interactive: bool,
}

impl PromptSession {
    /// Create a session; `interactive` enables prompting
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    /// Returns true while the operator is still being asked
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Stop asking for the rest of the run
    pub fn disable_prompting(&mut self) {
        self.interactive = false;
    }
}
