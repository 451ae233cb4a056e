/*!
Acquisition mode state machine.

`Idle → Armed → Acquiring → (Completing | Aborting) → Idle`. The machine
only validates and records transitions; the controller performs the side
effects that go with them.
*/

use shared::{AcqError, AcquisitionMode, Result};
use tracing::{debug, info};

/// Lifecycle state of the active acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    /// No mode armed, configuration may change
    Idle,
    /// Buffers committed and callbacks registered, hardware not started
    Armed(AcquisitionMode),
    /// Hardware running, callbacks delivering data
    Acquiring(AcquisitionMode),
    /// Final bundle flushed, hardware being told to stop
    Completing(AcquisitionMode),
    /// Explicit stop or callback failure, partial buffers being discarded
    Aborting(AcquisitionMode),
}

impl AcqState {
    pub fn mode(&self) -> Option<AcquisitionMode> {
        match self {
            Self::Idle => None,
            Self::Armed(mode) | Self::Acquiring(mode) | Self::Completing(mode) | Self::Aborting(mode) => Some(*mode),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Armed(_) => "armed",
            Self::Acquiring(_) => "acquiring",
            Self::Completing(_) => "completing",
            Self::Aborting(_) => "aborting",
        }
    }
}

impl std::fmt::Display for AcqState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode() {
            Some(mode) => write!(f, "{} ({})", self.name(), mode),
            None => f.write_str(self.name()),
        }
    }
}

#[derive(Debug)]
pub struct ModeMachine {
    state: AcqState,
    idle_entries: u64,
}

impl ModeMachine {
    pub fn new() -> Self {
        Self {
            state: AcqState::Idle,
            idle_entries: 0,
        }
    }

    pub fn state(&self) -> AcqState {
        self.state
    }

    /// Times the machine settled back into `Idle`
    pub fn idle_entries(&self) -> u64 {
        self.idle_entries
    }

    pub fn arm(&mut self, mode: AcquisitionMode) -> Result<()> {
        match self.state {
            AcqState::Idle => self.enter(AcqState::Armed(mode)),
            state => Err(AcqError::transition("arm", state)),
        }
    }

    /// Hardware start call succeeded
    pub fn started(&mut self) -> Result<AcquisitionMode> {
        match self.state {
            AcqState::Armed(mode) => {
                self.enter(AcqState::Acquiring(mode))?;
                Ok(mode)
            }
            state => Err(AcqError::transition("start", state)),
        }
    }

    /// Hardware start call failed; straight back to `Idle`
    pub fn start_failed(&mut self) -> Result<()> {
        match self.state {
            AcqState::Armed(_) => self.settle(),
            state => Err(AcqError::transition("fail a start", state)),
        }
    }

    /// Every required channel arrived for the final cycle, or the scan ended
    pub fn complete(&mut self) -> Result<()> {
        match self.state {
            AcqState::Acquiring(mode) => self.enter(AcqState::Completing(mode)),
            state => Err(AcqError::transition("complete", state)),
        }
    }

    /// Enter `Aborting` from any non-idle state; `false` when already idle
    pub fn abort(&mut self) -> bool {
        match self.state {
            AcqState::Idle => false,
            AcqState::Aborting(_) => true,
            AcqState::Armed(mode) | AcqState::Acquiring(mode) | AcqState::Completing(mode) => {
                self.state = AcqState::Aborting(mode);
                info!("🛑 Aborting {}", mode);
                true
            }
        }
    }

    /// Return to `Idle` from `Completing`, `Aborting` or a failed start
    pub fn settle(&mut self) -> Result<()> {
        match self.state {
            AcqState::Idle => Ok(()),
            AcqState::Acquiring(_) => Err(AcqError::transition("settle", self.state)),
            _ => {
                self.state = AcqState::Idle;
                self.idle_entries += 1;
                info!("💤 Acquisition idle");
                Ok(())
            }
        }
    }

    fn enter(&mut self, next: AcqState) -> Result<()> {
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }
}

impl Default for ModeMachine {
    fn default() -> Self {
        Self::new()
    }
}
