//! POST body decoding: `application/x-www-form-urlencoded`,
//! `multipart/form-data`, and `text/plain`.
//!
//! The urlencoded path reuses [`Query::parse_into`](crate::query::Query::parse_into)
//! for the `&`/`=` splitting and layers RFC 3986 percent-decoding on top —
//! genuinely new behavior `Query` deliberately does not provide, so this
//! module allocates decoded output rather than reusing `Query`'s zero-copy
//! contract.

use crate::query::Query;
use memchr::memmem;
use std::{error, fmt};

/// One decoded field from a POST body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    /// Present only for `multipart/form-data` parts carrying a `filename=`.
    pub filename: Option<Vec<u8>>,
    /// Part-level `Content-Type`, present only for `multipart/form-data`.
    pub content_type: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `multipart/form-data` with no `boundary=` parameter.
    MissingBoundary,
    /// `Content-Type` did not match urlencoded, multipart, or text/plain.
    UnsupportedContentType,
    /// A multipart part was missing its `Content-Disposition: form-data` header
    /// or the part boundary sequence was malformed.
    MalformedMultipart,
    /// Total decoded field bytes exceeded `limit`.
    TooLarge,
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingBoundary => write!(f, "multipart/form-data with no boundary parameter"),
            Error::UnsupportedContentType => write!(f, "unsupported POST content type"),
            Error::MalformedMultipart => write!(f, "malformed multipart/form-data body"),
            Error::TooLarge => write!(f, "POST body exceeded the configured size limit"),
        }
    }
}

/// The three content types this module understands, plus the `boundary`
/// parameter when the body is multipart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    UrlEncoded,
    Multipart { boundary: Vec<u8> },
    TextPlain,
}

impl Encoding {
    /// Parses a `Content-Type` header value and picks the matching decoder.
    pub fn detect(content_type: &[u8]) -> Result<Self, Error> {
        let (mime, params) = split_params(content_type);

        match mime {
            b"application/x-www-form-urlencoded" => Ok(Encoding::UrlEncoded),
            b"text/plain" => Ok(Encoding::TextPlain),
            b"multipart/form-data" => {
                let boundary = find_param(params, b"boundary").ok_or(Error::MissingBoundary)?;
                Ok(Encoding::Multipart {
                    boundary: unquote(boundary).to_vec(),
                })
            }
            _ => Err(Error::UnsupportedContentType),
        }
    }
}

/// Picks the decoder via [`Encoding::detect`] and parses `body` into fields
/// in one call, for callers (e.g. [`Action::PostParse`](crate::server::action::Action::PostParse))
/// that don't need to inspect the encoding themselves.
pub fn parse(
    content_type: &[u8],
    body: &[u8],
    field_limit: usize,
    byte_limit: usize,
) -> Result<Vec<Field>, Error> {
    match Encoding::detect(content_type)? {
        Encoding::UrlEncoded => parse_urlencoded(body, field_limit, byte_limit),
        Encoding::Multipart { boundary } => parse_multipart(body, &boundary, byte_limit),
        Encoding::TextPlain => Ok(vec![parse_text_plain(body)]),
    }
}

fn split_params(content_type: &[u8]) -> (&[u8], &[u8]) {
    match memchr::memchr(b';', content_type) {
        Some(pos) => (trim(&content_type[..pos]), &content_type[pos + 1..]),
        None => (trim(content_type), b""),
    }
}

fn find_param<'a>(params: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    for part in params.split(|&b| b == b';') {
        let part = trim(part);
        let eq = memchr::memchr(b'=', part)?;
        if trim(&part[..eq]).eq_ignore_ascii_case(name) {
            return Some(trim(&part[eq + 1..]));
        }
    }
    None
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

/// Decodes `%XX` escapes and `+` (space) per RFC 3986 / the `application/
/// x-www-form-urlencoded` convention.
fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter().copied();

    while let Some(byte) = iter.next() {
        match byte {
            b'+' => out.push(b' '),
            b'%' => {
                let hi = iter.next().and_then(|b| (b as char).to_digit(16));
                let lo = iter.next().and_then(|b| (b as char).to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(((hi << 4) | lo) as u8),
                    _ => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
    }

    out
}

/// Parses an `application/x-www-form-urlencoded` body into decoded fields.
pub fn parse_urlencoded(body: &[u8], field_limit: usize, byte_limit: usize) -> Result<Vec<Field>, Error> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<(&[u8], &[u8])> =
        Query::parse(body, field_limit).map_err(|_| Error::UnsupportedContentType)?;

    let mut total = 0;
    let mut fields = Vec::with_capacity(raw.len());
    for (name, value) in raw {
        let name = percent_decode(name);
        let value = percent_decode(value);
        total += name.len() + value.len();
        if total > byte_limit {
            return Err(Error::TooLarge);
        }
        fields.push(Field {
            name,
            value,
            filename: None,
            content_type: None,
        });
    }

    Ok(fields)
}

/// Wraps a whole `text/plain` body as a single unnamed field.
pub fn parse_text_plain(body: &[u8]) -> Field {
    Field {
        name: Vec::new(),
        value: body.to_vec(),
        filename: None,
        content_type: None,
    }
}

/// Parses a `multipart/form-data` body delimited by `boundary`.
///
/// Each part's headers are scanned for `Content-Disposition: form-data;
/// name="..."` (and optional `filename="..."`) and `Content-Type`; the part
/// body runs until the next `--boundary` marker. The body is NOT
/// percent-decoded (multipart parts carry raw bytes per RFC 7578).
pub fn parse_multipart(body: &[u8], boundary: &[u8], byte_limit: usize) -> Result<Vec<Field>, Error> {
    let mut delimiter = Vec::with_capacity(boundary.len() + 2);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary);

    let mut fields = Vec::new();
    let mut total = 0;
    let mut cursor = memmem::find(body, &delimiter).ok_or(Error::MalformedMultipart)?;

    loop {
        let part_start = cursor + delimiter.len();
        match body.get(part_start..part_start + 2) {
            Some(b"--") => break,
            _ => {}
        }
        let part_start = part_start + 2; // CRLF after the boundary marker

        let next = memmem::find(&body[part_start..], &delimiter)
            .ok_or(Error::MalformedMultipart)?;
        let part_end = part_start + next;
        // strip the CRLF that precedes the next boundary marker
        let part_end = part_end.saturating_sub(2).max(part_start);

        let part = &body[part_start..part_end];
        let header_end = memmem::find(part, b"\r\n\r\n").ok_or(Error::MalformedMultipart)?;
        let headers = &part[..header_end];
        let data = &part[header_end + 4..];

        let (name, filename) = parse_content_disposition(headers).ok_or(Error::MalformedMultipart)?;
        let content_type = parse_header_value(headers, b"content-type").map(<[u8]>::to_vec);

        total += name.len() + data.len();
        if total > byte_limit {
            return Err(Error::TooLarge);
        }

        fields.push(Field {
            name,
            value: data.to_vec(),
            filename,
            content_type,
        });

        cursor = part_end + 2;
    }

    Ok(fields)
}

fn parse_header_value<'a>(headers: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    for line in headers.split(|&b| b == b'\n') {
        let line = trim(line);
        let colon = memchr::memchr(b':', line)?;
        if trim(&line[..colon]).eq_ignore_ascii_case(name) {
            return Some(trim(&line[colon + 1..]));
        }
    }
    None
}

fn parse_content_disposition(headers: &[u8]) -> Option<(Vec<u8>, Option<Vec<u8>>)> {
    let value = parse_header_value(headers, b"content-disposition")?;
    let (kind, params) = split_params(value);
    if !kind.eq_ignore_ascii_case(b"form-data") {
        return None;
    }

    let name = find_param(params, b"name").map(|v| unquote(v).to_vec())?;
    let filename = find_param(params, b"filename").map(|v| unquote(v).to_vec());
    Some((name, filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn detect_urlencoded() {
        assert_eq!(
            Encoding::detect(b"application/x-www-form-urlencoded"),
            Ok(Encoding::UrlEncoded)
        );
    }

    #[test]
    fn detect_multipart_boundary() {
        let enc = Encoding::detect(b"multipart/form-data; boundary=\"abc123\"").unwrap();
        assert_eq!(enc, Encoding::Multipart { boundary: b"abc123".to_vec() });
    }

    #[test]
    fn detect_missing_boundary() {
        assert_eq!(
            Encoding::detect(b"multipart/form-data"),
            Err(Error::MissingBoundary)
        );
    }

    #[test]
    fn detect_unsupported() {
        assert_eq!(
            Encoding::detect(b"application/json"),
            Err(Error::UnsupportedContentType)
        );
    }

    #[test]
    fn urlencoded_percent_decode() {
        let fields = parse_urlencoded(b"email=user%40example.com&name=John+Doe", 10, 1024).unwrap();
        assert_eq!(str(Some(&fields[0].name)), Some("email"));
        assert_eq!(str(Some(&fields[0].value)), Some("user@example.com"));
        assert_eq!(str(Some(&fields[1].name)), Some("name"));
        assert_eq!(str(Some(&fields[1].value)), Some("John Doe"));
    }

    #[test]
    fn urlencoded_empty_body() {
        assert_eq!(parse_urlencoded(b"", 10, 1024).unwrap(), Vec::new());
    }

    #[test]
    fn text_plain_passthrough() {
        let field = parse_text_plain(b"raw body bytes");
        assert_eq!(field.value, b"raw body bytes");
        assert!(field.name.is_empty());
    }

    #[test]
    fn multipart_single_field() {
        let body = b"--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
hello world\r\n\
--XBOUNDARY--\r\n";

        let fields = parse_multipart(body, b"XBOUNDARY", 1024).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, b"title");
        assert_eq!(fields[0].value, b"hello world");
        assert!(fields[0].filename.is_none());
    }

    #[test]
    fn multipart_file_field() {
        let body = b"--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
file contents\r\n\
--XBOUNDARY--\r\n";

        let fields = parse_multipart(body, b"XBOUNDARY", 1024).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].filename.as_deref(), Some(b"a.txt".as_slice()));
        assert_eq!(fields[0].content_type.as_deref(), Some(b"text/plain".as_slice()));
    }

    #[test]
    fn multipart_too_large() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\n1234567890\r\n--B--\r\n";
        assert_eq!(parse_multipart(body, b"B", 4), Err(Error::TooLarge));
    }

    #[test]
    fn multipart_missing_delimiter() {
        assert_eq!(
            parse_multipart(b"not a multipart body", b"B", 1024),
            Err(Error::MalformedMultipart)
        );
    }

    #[test]
    fn parse_dispatches_on_content_type() {
        let fields = parse(b"application/x-www-form-urlencoded", b"a=1&b=2", 10, 1024).unwrap();
        assert_eq!(fields.len(), 2);

        let fields = parse(b"text/plain", b"raw", 10, 1024).unwrap();
        assert_eq!(fields[0].value, b"raw");

        assert_eq!(parse(b"application/json", b"{}", 10, 1024), Err(Error::UnsupportedContentType));
    }
}
