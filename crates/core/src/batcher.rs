//! Candidate batching
//!
//! Locally discovered candidates are held back until the connection first
//! reaches a stable negotiation point, then released as one batch. After that
//! every new candidate is released immediately as a batch of one.

use tracing::{debug, warn};

use crate::engine::TransportHandle;
use crate::types::{IceCandidate, PeerId};

/// Per-peer candidate gate and pending list
#[derive(Debug, Default)]
pub struct CandidateBatcher {
    can_flush: bool,
    pending: Vec<IceCandidate>,
}

impl CandidateBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the gate has opened
    pub fn can_flush(&self) -> bool {
        self.can_flush
    }

    /// Candidates waiting for the gate
    pub fn pending(&self) -> &[IceCandidate] {
        &self.pending
    }

    /// Record a discovered candidate
    ///
    /// Returns a batch to send when the gate is already open.
    pub fn push(&mut self, candidate: IceCandidate) -> Option<Vec<IceCandidate>> {
        self.pending.push(candidate);
        if self.can_flush {
            self.flush()
        } else {
            None
        }
    }

    /// Open the gate and release everything held so far
    ///
    /// The gate opens once; later calls return None.
    pub fn open_gate(&mut self) -> Option<Vec<IceCandidate>> {
        if self.can_flush {
            return None;
        }
        self.can_flush = true;
        self.flush()
    }

    fn flush(&mut self) -> Option<Vec<IceCandidate>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Outcome of applying a received batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub failed: usize,
}

/// Apply remote candidates in order, skipping the ones the engine rejects
pub async fn apply_remote_candidates(
    handle: &dyn TransportHandle,
    peer_id: &PeerId,
    candidates: Vec<IceCandidate>,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for candidate in candidates {
        match handle.add_ice_candidate(candidate).await {
            Ok(()) => report.applied += 1,
            Err(e) => {
                let err = crate::Error::CandidateApplyFailure {
                    peer_id: peer_id.clone(),
                    reason: e.to_string(),
                };
                warn!(peer_id = %peer_id, "{}", err);
                report.failed += 1;
            }
        }
    }

    debug!(
        peer_id = %peer_id,
        applied = report.applied,
        failed = report.failed,
        "Applied remote candidates"
    );
    report
}
