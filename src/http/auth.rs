//! `Authorization` header parsing and verification for HTTP Basic (RFC
//! 7617) and Digest (RFC 7616) authentication.
//!
//! Neither scheme is wired into request processing automatically — a
//! [`Handler`](crate::Handler) reads the `authorization` header itself
//! and calls into this module, then decides what a missing or failed
//! credential means for that particular route.

use base64::Engine;
use std::{error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The header value didn't start with a recognized scheme token.
    MissingScheme,
    UnsupportedScheme,
    /// `Basic` payload wasn't valid base64, or didn't contain a `:`.
    MalformedBasic,
    /// A `Digest` parameter was malformed (unterminated quote, no `=`).
    MalformedDigest,
    /// A required `Digest` parameter (`username` or `response`) was absent.
    MissingDigestField(&'static str),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingScheme => write!(f, "Authorization header has no scheme"),
            Error::UnsupportedScheme => write!(f, "unsupported Authorization scheme"),
            Error::MalformedBasic => write!(f, "malformed Basic credentials"),
            Error::MalformedDigest => write!(f, "malformed Digest parameters"),
            Error::MissingDigestField(field) => write!(f, "Digest response missing `{field}`"),
        }
    }
}

/// Decoded `Basic` credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

/// Parses an `Authorization: Basic <base64>` header value.
pub fn parse_basic(header_value: &[u8]) -> Result<BasicCredentials, Error> {
    let payload = strip_scheme(header_value, b"Basic")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| Error::MalformedBasic)?;

    let colon = memchr::memchr(b':', &decoded).ok_or(Error::MalformedBasic)?;
    Ok(BasicCredentials {
        username: decoded[..colon].to_vec(),
        password: decoded[colon + 1..].to_vec(),
    })
}

/// Builds the `WWW-Authenticate` challenge value for a `401` response.
pub fn basic_challenge(realm: &str) -> String {
    format!("Basic realm=\"{realm}\"")
}

/// Decoded `Digest` parameters (RFC 7616 §3.4).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestParams {
    pub username: Vec<u8>,
    pub realm: Vec<u8>,
    pub nonce: Vec<u8>,
    pub uri: Vec<u8>,
    pub response: Vec<u8>,
    pub algorithm: Vec<u8>,
    pub qop: Option<Vec<u8>>,
    pub nc: Option<Vec<u8>>,
    pub cnonce: Option<Vec<u8>>,
    pub opaque: Option<Vec<u8>>,
}

/// Parses an `Authorization: Digest ...` header value.
pub fn parse_digest(header_value: &[u8]) -> Result<DigestParams, Error> {
    let payload = strip_scheme(header_value, b"Digest")?;
    let mut params = DigestParams::default();

    for part in split_params(payload) {
        let (key, value) = split_kv(part).ok_or(Error::MalformedDigest)?;
        let value = unquote(value).to_vec();

        match key {
            b"username" => params.username = value,
            b"realm" => params.realm = value,
            b"nonce" => params.nonce = value,
            b"uri" => params.uri = value,
            b"response" => params.response = value,
            b"algorithm" => params.algorithm = value,
            b"qop" => params.qop = Some(value),
            b"nc" => params.nc = Some(value),
            b"cnonce" => params.cnonce = Some(value),
            b"opaque" => params.opaque = Some(value),
            _ => {}
        }
    }

    if params.username.is_empty() {
        return Err(Error::MissingDigestField("username"));
    }
    if params.response.is_empty() {
        return Err(Error::MissingDigestField("response"));
    }

    Ok(params)
}

/// Builds a `WWW-Authenticate: Digest ...` challenge value.
pub fn digest_challenge(realm: &str, nonce: &str) -> String {
    format!("Digest realm=\"{realm}\", qop=\"auth\", nonce=\"{nonce}\", algorithm=SHA-256")
}

/// Produces the hex-encoded one-way hash digest authentication is built
/// on. The crate only ships a default implementation over SHA-256 (RFC
/// 7616's modernized `algorithm=SHA-256`, gated behind the
/// `digest-auth-default` feature) rather than the original RFC 2617 MD5
/// variant, since MD5 would need its own extra dependency. Callers who
/// need MD5 interop implement this trait themselves.
pub trait DigestHasher {
    fn hash_hex(&self, input: &[u8]) -> String;
}

#[cfg(feature = "digest-auth-default")]
pub struct Sha256Hasher;

#[cfg(feature = "digest-auth-default")]
impl DigestHasher for Sha256Hasher {
    fn hash_hex(&self, input: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(input);
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

/// Recomputes the expected digest `response` per RFC 7616 §3.4.2 and
/// checks it against what the client sent.
///
/// `password` is the plaintext credential for `params.username`, looked
/// up by the caller; this function never stores or transmits it.
pub fn verify_digest_response(hasher: &impl DigestHasher, params: &DigestParams, password: &[u8], method: &[u8]) -> bool {
    let ha1 = hasher.hash_hex(&join(&[&params.username, b":", &params.realm, b":", password]));
    let ha2 = hasher.hash_hex(&join(&[method, b":", &params.uri]));

    let expected = match (&params.qop, &params.nc, &params.cnonce) {
        (Some(qop), Some(nc), Some(cnonce)) => hasher.hash_hex(&join(&[
            ha1.as_bytes(),
            b":",
            &params.nonce,
            b":",
            nc,
            b":",
            cnonce,
            b":",
            qop,
            b":",
            ha2.as_bytes(),
        ])),
        _ => hasher.hash_hex(&join(&[ha1.as_bytes(), b":", &params.nonce, b":", ha2.as_bytes()])),
    };

    expected.as_bytes() == params.response.as_slice()
}

fn join(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

fn strip_scheme<'a>(header_value: &'a [u8], scheme: &[u8]) -> Result<&'a [u8], Error> {
    let space = memchr::memchr(b' ', header_value).ok_or(Error::MissingScheme)?;
    let (token, rest) = (&header_value[..space], trim(&header_value[space + 1..]));

    if token.eq_ignore_ascii_case(scheme) {
        Ok(rest)
    } else {
        Err(Error::UnsupportedScheme)
    }
}

/// Splits `Digest`'s comma-separated `key=value` parameters, respecting
/// commas inside quoted values.
fn split_params(value: &[u8]) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, &byte) in value.iter().enumerate() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                parts.push(trim(&value[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(trim(&value[start..]));
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn split_kv(part: &[u8]) -> Option<(&[u8], &[u8])> {
    let eq = memchr::memchr(b'=', part)?;
    Some((trim(&part[..eq]), trim(&part[eq + 1..])))
}

fn unquote(value: &[u8]) -> &[u8] {
    if value.len() >= 2 && value.first() == Some(&b'"') && value.last() == Some(&b'"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn trim(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|b| !b.is_ascii_whitespace());
    let Some(start) = start else { return b"" };
    let end = value.iter().rposition(|b| !b.is_ascii_whitespace()).unwrap();
    &value[start..=end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn parse_basic_header() {
        // "alice:wonderland" in base64
        let creds = parse_basic(b"Basic YWxpY2U6d29uZGVybGFuZA==").unwrap();
        assert_eq!(str(Some(&creds.username)), Some("alice"));
        assert_eq!(str(Some(&creds.password)), Some("wonderland"));
    }

    #[test]
    fn parse_basic_wrong_scheme() {
        assert_eq!(parse_basic(b"Bearer abc123"), Err(Error::UnsupportedScheme));
    }

    #[test]
    fn parse_basic_bad_base64() {
        assert_eq!(parse_basic(b"Basic ###"), Err(Error::MalformedBasic));
    }

    #[test]
    fn basic_challenge_format() {
        assert_eq!(basic_challenge("api"), "Basic realm=\"api\"");
    }

    #[test]
    fn parse_digest_header() {
        let header = br#"Digest username="alice", realm="api", nonce="n1", uri="/secret", response="deadbeef", qop="auth", nc=00000001, cnonce="c1""#;
        let params = parse_digest(header).unwrap();
        assert_eq!(params.username, b"alice");
        assert_eq!(params.realm, b"api");
        assert_eq!(params.nonce, b"n1");
        assert_eq!(params.uri, b"/secret");
        assert_eq!(params.response, b"deadbeef");
        assert_eq!(params.qop.as_deref(), Some(b"auth".as_slice()));
        assert_eq!(params.nc.as_deref(), Some(b"00000001".as_slice()));
        assert_eq!(params.cnonce.as_deref(), Some(b"c1".as_slice()));
    }

    #[test]
    fn parse_digest_missing_response() {
        let header = br#"Digest username="alice", realm="api", nonce="n1", uri="/secret""#;
        assert_eq!(parse_digest(header), Err(Error::MissingDigestField("response")));
    }

    #[cfg(feature = "digest-auth-default")]
    #[test]
    fn verify_digest_round_trip() {
        let username = b"alice";
        let realm = b"api";
        let password = b"wonderland";
        let nonce = b"server-nonce";
        let uri = b"/secret";
        let nc = b"00000001";
        let cnonce = b"client-nonce";
        let qop = b"auth";
        let method = b"GET";

        let hasher = Sha256Hasher;
        let ha1 = hasher.hash_hex(&join(&[username, b":", realm, b":", password]));
        let ha2 = hasher.hash_hex(&join(&[method, b":", uri]));
        let response = hasher.hash_hex(&join(&[ha1.as_bytes(), b":", nonce, b":", nc, b":", cnonce, b":", qop, b":", ha2.as_bytes()]));

        let params = DigestParams {
            username: username.to_vec(),
            realm: realm.to_vec(),
            nonce: nonce.to_vec(),
            uri: uri.to_vec(),
            response: response.into_bytes(),
            algorithm: b"SHA-256".to_vec(),
            qop: Some(qop.to_vec()),
            nc: Some(nc.to_vec()),
            cnonce: Some(cnonce.to_vec()),
            opaque: None,
        };

        assert!(verify_digest_response(&hasher, &params, password, method));
        assert!(!verify_digest_response(&hasher, &params, b"wrong-password", method));
    }
}
