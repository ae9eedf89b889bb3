use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use types::wallet::{CosignerStatus, WalletDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Collecting,
    Aggregating,
    Complete,
    Failed,
    Canceled,
}

/// One in-flight signature-collection process for one payload. Mutated only
/// through the coordinator; transitions are one-directional.
#[derive(Debug)]
pub struct SigningSession {
    pub session_id: String,
    pub wallet_id: String,
    pub payload: String,
    pub threshold_m: u16,
    pub total_n: u16,
    pub statuses: BTreeMap<String, CosignerStatus>,
    pub partial_sigs: BTreeMap<String, String>,
    pub collected: u16,
    pub state: SessionState,
    /// Local co-signers whose prompt decision is still outstanding.
    pub awaiting_prompt: BTreeSet<String>,
    pub started_at: Instant,
}

impl SigningSession {
    #[must_use]
    pub fn new(session_id: String, wallet: &WalletDefinition, payload: &str) -> Self {
        let statuses = wallet
            .cosigners
            .iter()
            .map(|cs| (cs.identity.clone(), CosignerStatus::Pending))
            .collect();
        Self {
            session_id,
            wallet_id: wallet.wallet_id.clone(),
            payload: payload.to_string(),
            threshold_m: wallet.threshold_m,
            total_n: wallet.n(),
            statuses,
            partial_sigs: BTreeMap::new(),
            collected: 0,
            state: SessionState::Collecting,
            awaiting_prompt: BTreeSet::new(),
            started_at: Instant::now(),
        }
    }

    /// Record a collected signature. Returns `false` for an unknown signer or
    /// one already in a terminal status, which makes duplicate deliveries
    /// idempotent.
    pub fn record_signature(&mut self, signer: &str, signature: String) -> bool {
        let Some(status) = self.statuses.get_mut(signer) else {
            return false;
        };
        if !status.can_sign() {
            return false;
        }
        *status = CosignerStatus::Signed;
        self.partial_sigs.insert(signer.to_string(), signature);
        self.collected += 1;
        true
    }

    /// Record a non-signature status change. Terminal statuses stick; the
    /// only repeatable transition is into `Requested`.
    pub fn record_status(&mut self, signer: &str, status: CosignerStatus) -> bool {
        let Some(current) = self.statuses.get_mut(signer) else {
            return false;
        };
        if current.is_terminal() {
            return false;
        }
        *current = status;
        true
    }

    /// Co-signers that can no longer reach `Signed`.
    #[must_use]
    pub fn unreachable_count(&self) -> u16 {
        let n = self
            .statuses
            .values()
            .filter(|s| s.is_terminal() && **s != CosignerStatus::Signed)
            .count();
        u16::try_from(n).unwrap_or(u16::MAX)
    }

    /// Quorum is mathematically unreachable once more than `n - m` co-signers
    /// are lost. Checked after every terminal status change so sessions fail
    /// early instead of waiting out the stragglers.
    #[must_use]
    pub fn quorum_unreachable(&self) -> bool {
        self.unreachable_count() > self.total_n - self.threshold_m
    }

    #[must_use]
    pub fn quorum_met(&self) -> bool {
        self.collected >= self.threshold_m
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            SessionState::Complete | SessionState::Failed | SessionState::Canceled
        )
    }

    /// Invariant: `collected` always equals the number of `Signed` statuses.
    #[must_use]
    pub fn collected_matches_statuses(&self) -> bool {
        let signed = self
            .statuses
            .values()
            .filter(|s| **s == CosignerStatus::Signed)
            .count();
        usize::from(self.collected) == signed && self.partial_sigs.len() == signed
    }
}
