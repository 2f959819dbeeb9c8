use crate::{http::post, query, Version};
use std::{error, fmt, io};

/// Process-wide error/status taxonomy.
///
/// Every fallible entry point in this crate returns `Result<_, ErrorKind>`
/// rather than a raw `io::Error` or a bare `bool`, so a caller can always
/// recover a precise client-facing status code via [`ErrorKind::as_http`].
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),

    /// `Transfer-Encoding: chunked` together with an explicit `Content-Length`.
    ChunkedWithContentLength,
    /// A chunk-size line did not parse as hex, or exceeded the configured
    /// strictness level's hex-digit limit.
    InvalidChunkSize,
    /// Trailers following the terminating `0`-chunk were malformed.
    InvalidTrailer,
    /// A chunk boundary (size line, chunk data, or terminator) was not
    /// fully present in the buffer yet; the caller should read more from
    /// the socket and retry rather than treat this as malformed input.
    /// Never reaches `as_http` in practice since the connection loop keeps
    /// retrying internally until it resolves to `Ok` or a real error.
    IncompleteChunkedBody,

    /// `multipart/form-data` with no `boundary=` parameter.
    MissingBoundary,
    /// A POST field exceeded the daemon's large-shared-buffer cap
    /// (`NO_LARGE_BUF_MEM` in the source design).
    MultipartTooLarge,
    /// `Content-Type` did not match any of urlencoded/multipart/text-plain.
    UnsupportedContentType,
    #[allow(dead_code)]
    Post(post::Error),

    /// The per-connection [`MemoryPool`](crate::pool::MemoryPool) could not
    /// satisfy an allocation request.
    PoolExhausted,
    /// The daemon-wide connection (or per-worker-pool-bucket) limit was
    /// reached; admission control rejects the connection with `503`.
    ConnectionLimitReached,

    /// A request-introspection query (`Request::info`) was made outside the
    /// stage range where the requested field is available.
    InfoTooEarly,
    InfoTooLate,
    InfoBufferTooSmall,
    InfoTypeUnknown,
    InfoTypeNotApplicable,

    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* _ => b"HTTP/1.1 500 Internal Server Error\r\nconnection: close\r\ncontent-length: 0\r\n\r\n" }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;

        ChunkedWithContentLength: "400 Bad Request", "72"
            => r#"{"error":"Content-Length with chunked encoding","code":"CHUNKED_CONTENT_LENGTH"}"#;
        InvalidChunkSize: "400 Bad Request", "59"
            => r#"{"error":"Invalid chunk size line","code":"INVALID_CHUNK_SIZE"}"#;
        InvalidTrailer: "400 Bad Request", "54"
            => r#"{"error":"Invalid chunk trailer","code":"INVALID_TRAILER"}"#;
        IncompleteChunkedBody: "400 Bad Request", "57"
            => r#"{"error":"Incomplete chunked body","code":"INCOMPLETE_CHUNK"}"#;

        MissingBoundary: "400 Bad Request", "65"
            => r#"{"error":"Missing multipart boundary","code":"MISSING_BOUNDARY"}"#;
        MultipartTooLarge: "413 Payload Too Large", "59"
            => r#"{"error":"Multipart field too large","code":"MULTIPART_TOO_LARGE"}"#;
        UnsupportedContentType: "415 Unsupported Media Type", "60"
            => r#"{"error":"Unsupported content type","code":"UNSUPPORTED_CONTENT_TYPE"}"#;
        Post: "400 Bad Request", "52"
            => r#"{"error":"Malformed POST body","code":"INVALID_POST"}"#;

        PoolExhausted: "507 Insufficient Storage", "55"
            => r#"{"error":"Connection memory pool exhausted","code":"POOL_EXHAUSTED"}"#;
        ConnectionLimitReached: "503 Service Unavailable", "63"
            => r#"{"error":"Connection limit reached","code":"CONNECTION_LIMIT"}"#;

        InfoTooEarly: "500 Internal Server Error", "52"
            => r#"{"error":"Field not available yet","code":"INFO_TOO_EARLY"}"#;
        InfoTooLate: "500 Internal Server Error", "47"
            => r#"{"error":"Field no longer available","code":"INFO_TOO_LATE"}"#;
        InfoBufferTooSmall: "500 Internal Server Error", "44"
            => r#"{"error":"Info buffer too small","code":"INFO_BUFFER"}"#;
        InfoTypeUnknown: "500 Internal Server Error", "42"
            => r#"{"error":"Unknown info tag","code":"INFO_UNKNOWN"}"#;
        InfoTypeNotApplicable: "500 Internal Server Error", "46"
            => r#"{"error":"Info tag not applicable","code":"INFO_NOT_APPLICABLE"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}
impl From<post::Error> for ErrorKind {
    fn from(err: post::Error) -> Self {
        ErrorKind::Post(err)
    }
}

#[derive(Debug)]
pub struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Error returned by [`Request::info`](crate::Request::info).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoError {
    TooEarly,
    TooLate,
    BufferTooSmall,
    TypeUnknown,
    TypeNotApplicable,
}

impl From<InfoError> for ErrorKind {
    fn from(err: InfoError) -> Self {
        match err {
            InfoError::TooEarly => ErrorKind::InfoTooEarly,
            InfoError::TooLate => ErrorKind::InfoTooLate,
            InfoError::BufferTooSmall => ErrorKind::InfoBufferTooSmall,
            InfoError::TypeUnknown => ErrorKind::InfoTypeUnknown,
            InfoError::TypeNotApplicable => ErrorKind::InfoTypeNotApplicable,
        }
    }
}

impl fmt::Display for InfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl error::Error for InfoError {}
