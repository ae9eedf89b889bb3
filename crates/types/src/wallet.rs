use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::SignerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CosignerKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosignerDescriptor {
    /// Stable public identifier (npub).
    pub identity: String,
    pub kind: CosignerKind,
    pub label: Option<String>,
    /// Pairing URI; present once a remote co-signer has been paired.
    pub bunker_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletDefinition {
    pub wallet_id: String,
    pub name: String,
    pub cosigners: Vec<CosignerDescriptor>,
    pub threshold_m: u16,
}

impl WalletDefinition {
    #[must_use]
    pub fn n(&self) -> u16 {
        u16::try_from(self.cosigners.len()).unwrap_or(u16::MAX)
    }

    pub fn validate(&self) -> Result<(), SignerError> {
        if self.cosigners.is_empty() {
            return Err(SignerError::InvalidConfig(format!(
                "wallet {} has no co-signers",
                self.wallet_id
            )));
        }
        if self.threshold_m == 0 || self.threshold_m > self.n() {
            return Err(SignerError::InvalidConfig(format!(
                "wallet {} has threshold {} of {} co-signers",
                self.wallet_id,
                self.threshold_m,
                self.n()
            )));
        }
        // Per-signer statuses are keyed by identity, so duplicates would
        // silently shrink the quorum pool below n.
        let mut seen = HashSet::new();
        for cs in &self.cosigners {
            if !seen.insert(cs.identity.as_str()) {
                return Err(SignerError::InvalidConfig(format!(
                    "duplicate co-signer {} in wallet {}",
                    cs.identity, self.wallet_id
                )));
            }
            if cs.kind == CosignerKind::Remote && cs.bunker_uri.is_none() {
                return Err(SignerError::InvalidConfig(format!(
                    "remote co-signer {} is not paired",
                    cs.identity
                )));
            }
        }
        Ok(())
    }
}

/// Per-session progress of one co-signer. Transitions only move forward;
/// `Pending -> Requested` may repeat on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CosignerStatus {
    Pending,
    Requested,
    Signed,
    Rejected,
    Timeout,
    Error,
}

impl CosignerStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Signed | Self::Rejected | Self::Timeout | Self::Error
        )
    }

    /// Whether this co-signer can still contribute a signature.
    #[must_use]
    pub const fn can_sign(self) -> bool {
        matches!(self, Self::Pending | Self::Requested)
    }
}
