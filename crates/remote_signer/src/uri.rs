use bech32::{Bech32, Hrp};
use types::errors::SignerError;

const BUNKER_SCHEME: &str = "bunker://";

/// Parsed pairing URI:
/// `bunker://<64-hex-pubkey>[?relay=<url>&relay=<url>&secret=<token>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunkerUri {
    /// Canonical text identity (npub) of the remote signer.
    pub remote_identity: String,
    pub pubkey_hex: String,
    /// Relay URLs in the order they appear in the URI.
    pub relays: Vec<String>,
    /// Bearer token used only during the connection handshake.
    pub secret: Option<String>,
}

pub fn encode_npub(pubkey: &[u8; 32]) -> Result<String, SignerError> {
    let hrp = Hrp::parse("npub").map_err(|e| SignerError::Backend(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, pubkey).map_err(|e| SignerError::Backend(e.to_string()))
}

pub fn parse_bunker_uri(uri: &str) -> Result<BunkerUri, SignerError> {
    let rest = uri.strip_prefix(BUNKER_SCHEME).ok_or_else(|| {
        SignerError::InvalidSigner(format!("not a {BUNKER_SCHEME} URI: {uri}"))
    })?;

    let (pubkey_hex, query) = match rest.split_once('?') {
        Some((pk, q)) => (pk, Some(q)),
        None => (rest, None),
    };

    if pubkey_hex.len() != 64 {
        return Err(SignerError::InvalidSigner(format!(
            "pubkey in bunker URI must be 64 hex chars, got {}",
            pubkey_hex.len()
        )));
    }

    let bytes = hex::decode(pubkey_hex)
        .map_err(|e| SignerError::InvalidSigner(format!("bad hex in bunker URI: {e}")))?;
    let pubkey: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SignerError::InvalidSigner("pubkey is not 32 bytes".to_string()))?;

    let mut relays = Vec::new();
    let mut secret = None;
    if let Some(query) = query {
        for param in query.split('&') {
            if let Some(relay) = param.strip_prefix("relay=") {
                relays.push(relay.to_string());
            } else if let Some(token) = param.strip_prefix("secret=") {
                secret = Some(token.to_string());
            }
            // Unknown parameters are ignored for forward compatibility.
        }
    }

    Ok(BunkerUri {
        remote_identity: encode_npub(&pubkey)?,
        pubkey_hex: pubkey_hex.to_string(),
        relays,
        secret,
    })
}
