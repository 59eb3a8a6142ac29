use crate::types::{
    Architecture, GuestEnvironment, HarnessError, ResolvedKernel, Result, SessionState,
    VmResources,
};
use log::debug;

/// One guest boot, created per run and discarded after reaching a terminal state
#[derive(Debug, Clone)]
pub struct VmSession {
    pub kernel: ResolvedKernel,
    pub environment: GuestEnvironment,
    /// Command the guest executes; its exit status is the session's
    pub guest_command: Vec<String>,
    pub resources: VmResources,
    pub architecture: Architecture,
    state: SessionState,
}

impl VmSession {
    pub fn new(
        kernel: ResolvedKernel,
        environment: GuestEnvironment,
        guest_command: Vec<String>,
        resources: VmResources,
        architecture: Architecture,
    ) -> Self {
        Self {
            kernel,
            environment,
            guest_command,
            resources,
            architecture,
            state: SessionState::Provisioning,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(HarnessError::SessionTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("VM session {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }
}
