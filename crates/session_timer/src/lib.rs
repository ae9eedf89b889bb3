use std::time::Duration;

use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle, time::interval};
use tracing::warn;

use types::events::SignerEvent;

/// Spawn the periodic tick driving request deadlines and session expiry.
/// The task runs until every receiver of `sender` is dropped.
pub fn start_session_timer(
    sender: broadcast::Sender<SignerEvent>,
    tick_interval: Duration,
) -> JoinHandle<()> {
    Handle::current().spawn(async move {
        let mut ticker = interval(tick_interval);
        loop {
            ticker.tick().await;
            if let Err(broadcast::error::SendError(_)) = sender.send(SignerEvent::Tick) {
                warn!("Session timer stopping. No receivers alive");
                break;
            }
        }
    })
}
