use std::collections::BTreeMap;

use types::errors::SignerError;
use types::events::PromptDecision;
use types::wallet::WalletDefinition;

pub trait WalletStore: Send + Sync {
    fn get(&self, wallet_id: &str) -> Result<WalletDefinition, SignerError>;
}

/// Local key custody. Returns a complete signature or an error, never
/// partial data.
pub trait LocalSigner: Send + Sync {
    fn sign(&self, identity: &str, payload: &str) -> Result<String, SignerError>;
}

/// Combines the collected partial signatures into the final artifact. Called
/// exactly once per session, after the threshold is met. Any combination
/// scheme can sit behind this seam without touching session logic.
pub trait SignatureAggregator: Send + Sync {
    fn aggregate(
        &self,
        session_id: &str,
        wallet_id: &str,
        partials: &BTreeMap<String, String>,
    ) -> Result<String, SignerError>;
}

/// User-approval surface for local co-signers when auto-sign is off. A
/// `Deferred` decision is resolved later through `approve_local` /
/// `reject_local`.
pub trait SigningPrompt: Send + Sync {
    fn prompt(&self, session_id: &str, payload: &str, signer: &str) -> PromptDecision;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub success: bool,
    pub aggregated_signature: Option<String>,
    pub error: Option<String>,
}

impl SessionOutcome {
    #[must_use]
    pub const fn success(aggregated_signature: String) -> Self {
        Self {
            success: true,
            aggregated_signature: Some(aggregated_signature),
            error: None,
        }
    }

    #[must_use]
    pub const fn failure(error: String) -> Self {
        Self {
            success: false,
            aggregated_signature: None,
            error: Some(error),
        }
    }
}

/// Progress and completion notifications for the caller (typically a UI
/// layer). `on_complete` fires exactly once per session.
pub trait SessionObserver: Send + Sync {
    fn on_progress(&self, session_id: &str, collected: u16, required: u16, signer: &str);
    fn on_complete(&self, session_id: &str, outcome: &SessionOutcome);
}

/// Default aggregation delegate: returns the first collected partial. The
/// other partials acted as approval gating only. A genuine MuSig2 or FROST
/// combiner replaces this behind the same trait.
pub struct FirstSignatureAggregator;

impl SignatureAggregator for FirstSignatureAggregator {
    fn aggregate(
        &self,
        session_id: &str,
        _wallet_id: &str,
        partials: &BTreeMap<String, String>,
    ) -> Result<String, SignerError> {
        partials.values().next().cloned().ok_or_else(|| {
            SignerError::Backend(format!("no partial signatures for session {session_id}"))
        })
    }
}
