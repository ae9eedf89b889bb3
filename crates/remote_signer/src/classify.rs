use serde_json::Value;

/// What a protocol response for a pending signing request turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A well-formed 128-hex-char Schnorr signature.
    Signature(String),
    /// An explicit error field; the signer rejected or failed the request.
    Rejection(String),
    /// Neither a usable signature nor an explicit error. The pending request
    /// stays armed until its deadline fires.
    Unrecognized,
}

#[must_use]
pub fn classify_response(raw: &str) -> Classification {
    if let Some(sig) = extract_signature(raw) {
        return Classification::Signature(sig);
    }
    extract_error(raw).map_or(Classification::Unrecognized, Classification::Rejection)
}

/// Pull the `sig` field out of a signing response and validate it as exactly
/// 128 hex characters. Any other length or charset is a hard rejection, not
/// an error: the response came over the network and is untrusted.
#[must_use]
pub fn extract_signature(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    sig_from_value(&value).filter(|sig| is_valid_sig_hex(sig))
}

fn sig_from_value(value: &Value) -> Option<String> {
    if let Some(sig) = value.get("sig").and_then(Value::as_str) {
        return Some(sig.to_string());
    }
    // NIP-46 RPC envelope: the result is the signed event as a JSON string.
    let result = value.get("result")?.as_str()?;
    let event: Value = serde_json::from_str(result).ok()?;
    event
        .get("sig")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[must_use]
pub fn extract_error(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value.get("error")? {
        Value::String(msg) => Some(msg.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn is_valid_sig_hex(sig: &str) -> bool {
    sig.len() == 128 && sig.bytes().all(|b| b.is_ascii_hexdigit())
}
