use vmkit_common::InstanceState;

/// Map a remote status code onto our lifecycle enum.
///
/// Pure: callers decide whether to commit the result. Unrecognized codes are
/// logged once with the raw values so new daemon releases are diagnosable,
/// then degraded to `Unknown`.
pub fn state_for_status_code(name: &str, status_code: i64, raw_status: &str) -> InstanceState {
    match status_code {
        101 | 103 | 107 | 111 => InstanceState::Running, // Started, Running, Stopping, Thawed
        102 => InstanceState::Stopped,
        106 => InstanceState::Starting,
        109 => InstanceState::Suspending,
        110 => InstanceState::Suspended,
        104 | 108 => InstanceState::Unknown, // Cancelling, Aborting
        _ => {
            tracing::error!(
                "{}: got unexpected remote state: {} ({})",
                name,
                raw_status,
                status_code
            );
            InstanceState::Unknown
        }
    }
}

/// Locally cached view of an instance's state.
///
/// `observed` is the last state mapped from an authoritative remote read;
/// `requested` is a controller-initiated transition still settling. Keeping
/// them apart makes the read-precedence rule a single function instead of a
/// scattering of flag checks.
#[derive(Debug, Clone, Copy)]
pub struct StateCell {
    pub observed: InstanceState,
    pub requested: Option<InstanceState>,
}

impl StateCell {
    pub fn new(observed: InstanceState) -> Self {
        Self {
            observed,
            requested: None,
        }
    }

    /// The state callers see: a settling transition wins over the last
    /// observation.
    pub fn effective(&self) -> InstanceState {
        self.requested.unwrap_or(self.observed)
    }

    /// Commit a fresh remote observation.
    ///
    /// While a start we issued is settling, the remote is not consulted; a
    /// scheduled delayed shutdown is not flapped back to `Running` by a
    /// remote that has not converged yet. Every other observation overwrites
    /// the cell and settles any request. Returns the state to report and
    /// whether the cell was overwritten (i.e. whether this was an
    /// authoritative change to persist).
    pub fn commit(&mut self, remote: InstanceState) -> (InstanceState, bool) {
        match self.requested {
            Some(InstanceState::Starting) => (InstanceState::Starting, false),
            Some(InstanceState::DelayedShutdown) if remote == InstanceState::Running => {
                (InstanceState::DelayedShutdown, false)
            }
            _ => {
                self.requested = None;
                self.observed = remote;
                (remote, true)
            }
        }
    }
}
