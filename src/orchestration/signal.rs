//! The per-run abort signal.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::Error;

/// Why a run was aborted. The first recorded reason wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// User stop, or superseded by a newer run.
    Cancelled,
    TaskFailed { node_id: String, message: String },
    PlanningFailed(String),
}

/// One shared abort signal per run.
///
/// The scheduling loop, the plan stream reader and every in-flight task
/// execution select on [`AbortSignal::cancelled`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort with a reason. Returns `true` if this call set the signal.
    pub fn abort(&self, reason: AbortReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    /// User-initiated stop.
    pub fn cancel(&self) -> bool {
        self.abort(AbortReason::Cancelled)
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<&AbortReason> {
        self.reason.get()
    }

    /// Resolves once the signal is set.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The error a run reports for this abort.
    pub fn to_error(&self) -> Error {
        match self.reason() {
            None | Some(AbortReason::Cancelled) => Error::Cancelled,
            Some(AbortReason::TaskFailed { node_id, message }) => Error::TaskFailed {
                node_id: node_id.clone(),
                message: message.clone(),
            },
            Some(AbortReason::PlanningFailed(message)) => Error::Planning(message.clone()),
        }
    }
}
