pub mod coordinator;
pub mod session;
pub mod traits;

pub use coordinator::SigningCoordinator;
pub use session::{SessionState, SigningSession};
pub use traits::{
    FirstSignatureAggregator, LocalSigner, SessionObserver, SessionOutcome, SignatureAggregator,
    SigningPrompt, WalletStore,
};
