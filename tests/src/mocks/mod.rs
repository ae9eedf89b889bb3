use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use coordinator::traits::{
    LocalSigner, SessionObserver, SessionOutcome, SigningPrompt, WalletStore,
};
use remote_signer::{BunkerUri, ProtocolSession, ProtocolSessionFactory};
use types::errors::SignerError;
use types::events::PromptDecision;
use types::wallet::{CosignerDescriptor, CosignerKind, WalletDefinition};

/// Console logging for test runs, honoring `RUST_LOG`. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}

pub struct MemoryWalletStore {
    wallets: HashMap<String, WalletDefinition>,
}

impl MemoryWalletStore {
    #[must_use]
    pub fn new(wallets: Vec<WalletDefinition>) -> Self {
        Self {
            wallets: wallets
                .into_iter()
                .map(|w| (w.wallet_id.clone(), w))
                .collect(),
        }
    }
}

impl WalletStore for MemoryWalletStore {
    fn get(&self, wallet_id: &str) -> Result<WalletDefinition, SignerError> {
        self.wallets
            .get(wallet_id)
            .cloned()
            .ok_or_else(|| SignerError::NotFound(format!("wallet {wallet_id}")))
    }
}

/// Signs with a canned per-identity signature; identities listed as failing
/// return a backend error instead.
pub struct MapLocalSigner {
    signatures: HashMap<String, String>,
    failing: Vec<String>,
}

impl MapLocalSigner {
    #[must_use]
    pub fn new(signatures: Vec<(String, String)>) -> Self {
        Self {
            signatures: signatures.into_iter().collect(),
            failing: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_failing(mut self, identity: &str) -> Self {
        self.failing.push(identity.to_string());
        self
    }
}

impl LocalSigner for MapLocalSigner {
    fn sign(&self, identity: &str, _payload: &str) -> Result<String, SignerError> {
        if self.failing.iter().any(|id| id == identity) {
            return Err(SignerError::Backend(format!(
                "key unavailable for {identity}"
            )));
        }
        self.signatures
            .get(identity)
            .cloned()
            .ok_or_else(|| SignerError::Backend(format!("no key for {identity}")))
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub progress: Mutex<Vec<(String, u16, u16, String)>>,
    pub completions: Mutex<Vec<(String, SessionOutcome)>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn completions_for(&self, session_id: &str) -> Vec<SessionOutcome> {
        self.completions
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == session_id)
            .map(|(_, outcome)| outcome.clone())
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_progress(&self, session_id: &str, collected: u16, required: u16, signer: &str) {
        self.progress.lock().unwrap().push((
            session_id.to_string(),
            collected,
            required,
            signer.to_string(),
        ));
    }

    fn on_complete(&self, session_id: &str, outcome: &SessionOutcome) {
        self.completions
            .lock()
            .unwrap()
            .push((session_id.to_string(), outcome.clone()));
    }
}

pub struct ScriptedPrompt {
    decision: PromptDecision,
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedPrompt {
    #[must_use]
    pub fn new(decision: PromptDecision) -> Self {
        Self {
            decision,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl SigningPrompt for ScriptedPrompt {
    fn prompt(&self, session_id: &str, _payload: &str, signer: &str) -> PromptDecision {
        self.prompts
            .lock()
            .unwrap()
            .push((session_id.to_string(), signer.to_string()));
        self.decision
    }
}

/// Protocol session that records everything sent and never does real I/O.
/// Responses are injected through `ConnectionManager::handle_response`.
pub struct MockProtocolSession {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<usize>>,
    fail_connect: bool,
    fail_send: bool,
}

#[async_trait::async_trait]
impl ProtocolSession for MockProtocolSession {
    async fn connect(
        &mut self,
        _uri: &BunkerUri,
        _local_identity: Option<&str>,
    ) -> Result<(), SignerError> {
        if self.fail_connect {
            return Err(SignerError::RemoteFailed("relay refused".to_string()));
        }
        Ok(())
    }

    async fn send_sign_request(&mut self, payload: &str) -> Result<(), SignerError> {
        if self.fail_send {
            return Err(SignerError::RemoteFailed("send failed".to_string()));
        }
        self.sent.lock().unwrap().push(payload.to_string());
        Ok(())
    }

    async fn close(&mut self) {
        *self.closed.lock().unwrap() += 1;
    }
}

#[derive(Default)]
pub struct MockSessionFactory {
    pub sent: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<usize>>,
    pub opened: Mutex<usize>,
    pub fail_open: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_send: AtomicBool,
}

impl MockSessionFactory {
    #[must_use]
    pub fn sent_payloads(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    #[must_use]
    pub fn opened_count(&self) -> usize {
        *self.opened.lock().unwrap()
    }

    #[must_use]
    pub fn closed_count(&self) -> usize {
        *self.closed.lock().unwrap()
    }
}

impl ProtocolSessionFactory for MockSessionFactory {
    fn open(&self) -> Result<Box<dyn ProtocolSession>, SignerError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SignerError::Backend("no session backend".to_string()));
        }
        *self.opened.lock().unwrap() += 1;
        Ok(Box::new(MockProtocolSession {
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.closed),
            fail_connect: self.fail_connect.load(Ordering::SeqCst),
            fail_send: self.fail_send.load(Ordering::SeqCst),
        }))
    }
}

pub fn local_cosigner(identity: &str) -> CosignerDescriptor {
    CosignerDescriptor {
        identity: identity.to_string(),
        kind: CosignerKind::Local,
        label: None,
        bunker_uri: None,
    }
}

/// Remote co-signer paired through a bunker URI whose pubkey is `seed`
/// repeated. The descriptor identity matches what the connection manager
/// derives from the URI.
pub fn remote_cosigner(seed: u8, relays: &[&str]) -> CosignerDescriptor {
    let uri = bunker_uri(seed, relays);
    CosignerDescriptor {
        identity: remote_identity(seed),
        kind: CosignerKind::Remote,
        label: None,
        bunker_uri: Some(uri),
    }
}

#[must_use]
pub fn remote_identity(seed: u8) -> String {
    remote_signer::encode_npub(&[seed; 32]).unwrap()
}

#[must_use]
pub fn bunker_uri(seed: u8, relays: &[&str]) -> String {
    let mut uri = format!("bunker://{}", hex::encode([seed; 32]));
    for (i, relay) in relays.iter().enumerate() {
        uri.push(if i == 0 { '?' } else { '&' });
        uri.push_str("relay=");
        uri.push_str(relay);
    }
    uri
}

#[must_use]
pub fn wallet(wallet_id: &str, m: u16, cosigners: Vec<CosignerDescriptor>) -> WalletDefinition {
    WalletDefinition {
        wallet_id: wallet_id.to_string(),
        name: wallet_id.to_string(),
        cosigners,
        threshold_m: m,
    }
}

#[must_use]
pub fn signed_event_json(sig: &str) -> String {
    serde_json::json!({ "id": "event-1", "kind": 1, "sig": sig }).to_string()
}

#[must_use]
pub fn valid_sig(seed: u8) -> String {
    hex::encode([seed; 64])
}
