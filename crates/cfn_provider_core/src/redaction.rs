use url::Url;

use crate::contract::StatusPayload;

/// Token that replaces every result-data value in logged payloads.
pub const REDACTED_VALUE: &str = "*****";

/// Returns a copy of `payload` with every `Data` value masked. Keys are kept
/// so the log still shows which attributes were returned.
pub fn redact_data_from_payload(payload: &StatusPayload) -> StatusPayload {
    let mut redacted = payload.clone();
    if let Some(data) = redacted.data.as_mut() {
        for value in data.values_mut() {
            *value = REDACTED_VALUE.into();
        }
    }
    redacted
}

/// Renders a pre-signed callback URL without its credentials: the query
/// string becomes `***` and any userinfo or fragment is dropped.
pub fn logging_safe_url(raw: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(raw)?;
    if url.query().is_some() {
        url.set_query(Some("***"));
    }
    url.set_fragment(None);
    // Both setters only fail for URLs that cannot carry credentials at all.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Ok(url.to_string())
}
