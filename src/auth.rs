//! AWS Signature Version 4 request signing.
//!
//! Signs outgoing listing requests with the caller's credentials:
//! 1. Build a canonical request
//! 2. Build a string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Compute the signature and assemble the `Authorization` header

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

use crate::errors::SyncError;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty string, the payload hash of every GET.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Headers covered by the signature, lowercase and sorted.
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Everything except the SigV4 unreserved set `A-Z a-z 0-9 - _ . ~`.
const S3_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// ── Credentials ─────────────────────────────────────────────────────

/// Access key pair used for signing.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// `x-amz-date` value (`YYYYMMDDTHHMMSSZ`).
    pub amz_date: String,
    /// `x-amz-content-sha256` value.
    pub content_sha256: String,
    /// Full `Authorization` header value.
    pub authorization: String,
}

// ── Canonical request ───────────────────────────────────────────────

/// Build the canonical request.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
///
/// `headers` must already be lowercase-named and sorted by name.
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    canonical_query: &str,
    headers: &[(&str, &str)],
    payload_hash: &str,
) -> String {
    // For S3 the canonical URI is the path as sent, with no normalization.
    let canonical_uri = if uri.is_empty() { "/" } else { uri };

    let mut canonical_headers = String::new();
    for (name, value) in headers {
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(value.trim());
        canonical_headers.push('\n');
    }
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    )
}

/// Build a canonical query string from decoded `(name, value)` pairs.
///
/// Pairs are encoded with S3 rules and sorted by name, then value. The
/// same string is used on the wire so the signed and sent queries match.
pub fn build_canonical_query_string(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (s3_uri_encode(k), s3_uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

// ── String to sign ──────────────────────────────────────────────────

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("AWS4-HMAC-SHA256\n{timestamp}\n{credential_scope}\n{hash}")
}

// ── Signing key derivation ──────────────────────────────────────────

/// Derive the signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, "s3")
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SyncError> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Compute HMAC-SHA256.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SyncError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SyncError::Signing(format!("HMAC key error: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Compute the signature: HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> Result<String, SyncError> {
    Ok(hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes())?))
}

// ── Full signing ────────────────────────────────────────────────────

/// Sign a body-less request against the `s3` service.
///
/// `canonical_query` must be the exact query string that will be sent.
pub fn sign_request(
    credentials: &Credentials,
    region: &str,
    method: &str,
    host: &str,
    uri: &str,
    canonical_query: &str,
    now: DateTime<Utc>,
) -> Result<SignedHeaders, SyncError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = &amz_date[..8];
    let credential_scope = format!("{date_stamp}/{region}/s3/aws4_request");

    let headers = [
        ("host", host),
        ("x-amz-content-sha256", EMPTY_SHA256),
        ("x-amz-date", amz_date.as_str()),
    ];
    let canonical_request =
        build_canonical_request(method, uri, canonical_query, &headers, EMPTY_SHA256);
    let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
    let signing_key = derive_signing_key(&credentials.secret_key, date_stamp, region, "s3")?;
    let signature = compute_signature(&signing_key, &string_to_sign)?;

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        credentials.access_key
    );

    Ok(SignedHeaders {
        amz_date,
        content_sha256: EMPTY_SHA256.to_string(),
        authorization,
    })
}

// ── URI encoding ────────────────────────────────────────────────────

/// URI-encode a string per S3 rules: unreserved characters pass through,
/// everything else (including `/`) becomes uppercase `%XX` per UTF-8 byte.
pub fn s3_uri_encode(input: &str) -> String {
    utf8_percent_encode(input, S3_ENCODE_SET).to_string()
}

// ── Tests ───────────────────────────────────────────────────────────
