//! Encoding helpers: JSON, form/query strings, base64, and digests

use crate::error::UptredError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Encode string pairs as a flat JSON object
pub fn json_encode<'a, I>(parameters: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let object: Map<String, Value> = parameters
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    Value::Object(object).to_string()
}

pub fn json_encode_value(value: &Value) -> String {
    value.to_string()
}

pub fn json_decode(text: &str) -> Result<Value, UptredError> {
    Ok(serde_json::from_str(text)?)
}

/// Percent-encode everything outside `A-Z a-z 0-9 - _ . ~`
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// `k=v&k=v` with both sides percent-encoded, in iteration order
pub fn key_value_to_string<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Query pairs of `url`, taken between `?` and `#`.
///
/// Values are returned as they appear, without decoding. A pair without
/// `=` maps to an empty value.
pub fn query_parameters_from_url(url: &str) -> Vec<(String, String)> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    let query = query.split('#').next().unwrap_or_default();

    query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (kv.to_string(), String::new()),
        })
        .collect()
}

pub fn to_base64(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Digest algorithms accepted by [`compute_hash`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

/// Base64 digest of `data`; empty input is rejected
pub fn compute_hash(algorithm: HashAlgorithm, data: &[u8]) -> Result<String, UptredError> {
    if data.is_empty() {
        return Err(UptredError::InvalidInput("no data to hash".to_string()));
    }
    let digest = match algorithm {
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    };
    Ok(STANDARD.encode(digest))
}
