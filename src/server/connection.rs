use crate::{
    clock::MonoClock,
    errors::ErrorKind,
    http::{
        post,
        request::{ChunkCursor, Parser, Request},
        response::Response,
        types::{CloseReason, Stage, StatusCode, Version},
    },
    itc::Itc,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::{
        action::{validate_action, Action, UploadAction},
        server_impl::{AllLimits, Handler},
    },
    Handled,
};
use std::{future::Future, io, net::SocketAddr, pin::Pin, sync::Arc};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::sleep};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) chunk_cursor: Option<ChunkCursor>,
    pub(crate) stage: Stage,
    pub(crate) close_reason: Option<CloseReason>,
    itc: Itc,
    upload_pending: bool,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),
            chunk_cursor: None,
            stage: Stage::Init,
            close_reason: None,
            itc: Itc::new(),
            upload_pending: false,

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
        self.chunk_cursor = None;
        self.stage = Stage::Init;
        self.upload_pending = false;
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        let _ = server_addr;
        self.request.set_peer_address(client_addr);

        match self.impl_run(stream).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                self.conn_limits
                    .send_error(
                        stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired()? {
            self.reset_request_response();
            self.request.request_count = self.connection.request_count as u64;
            self.stage = Stage::RequestLineReceiving;

            if self
                .parser
                .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                .await?
                == 0
            {
                self.close_reason = Some(CloseReason::ClientShutdownEarly);
                break;
            }

            self.response.version = match self.parse() {
                Err(ErrorKind::IncompleteChunkedBody) => {
                    self.finish_chunked_body(stream).await?;
                    self.request.version()
                }
                result => result?,
            };
            self.stage = Stage::RequestReceived;
            self.stage = Stage::StartReply;

            if self.drive_action(stream).await? {
                // The connection was handed off to an upgrade handler,
                // which now owns the socket for the rest of its life.
                self.stage = Stage::Closed;
                return Ok(());
            }

            self.stage = Stage::BodySending;
            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;
            self.stage = Stage::FullReplySent;

            if !self.response.keep_alive {
                self.close_reason = Some(CloseReason::HttpCompleted);
                break;
            }

            self.connection.request_count += 1;
        }

        self.stage = Stage::Closed;
        Ok(())
    }

    /// Maximum number of times a suspended request is retried before the
    /// connection gives up and returns `503`.
    const MAX_SUSPEND_ATTEMPTS: usize = 8;

    /// Calls the handler and keeps retrying while it returns
    /// [`Action::Suspend`], then resolves whatever [`Action`] it settles
    /// on. Returns `Ok(true)` if the connection was handed off to an
    /// upgrade handler.
    async fn drive_action(&mut self, stream: &mut TcpStream) -> Result<bool, ErrorKind> {
        let mut action = self
            .handler
            .on_request(&mut self.connection_data, &self.request, &mut self.response)
            .await;

        for _ in 0..Self::MAX_SUSPEND_ATTEMPTS {
            if !matches!(action, Action::Suspend) {
                break;
            }

            tokio::select! {
                _ = self.itc.wait() => {},
                _ = sleep(self.conn_limits.socket_read_timeout) => {},
            }

            action = self
                .handler
                .on_request(&mut self.connection_data, &self.request, &mut self.response)
                .await;
        }

        self.resolve_action(action, stream).await
    }

    /// Interprets a fully-settled [`Action`] (no more `Suspend` retries
    /// left in it). Boxed because [`Action::PostParse`]'s `done` callback
    /// and [`Action::Upload`]'s outcome both recurse back into this same
    /// resolution step.
    fn resolve_action<'a>(
        &'a mut self,
        action: Action,
        stream: &'a mut TcpStream,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ErrorKind>> + Send + 'a>> {
        Box::pin(async move {
            validate_action(&action, self.upload_pending).map_err(|_| ErrorKind::ServiceUnavailable)?;

            match action {
                Action::Response(_handled) => Ok(false),

                // A request that is still `Suspend`ed after the retry
                // budget, or a handler that never decided, both fall
                // back to the same overload response.
                Action::NoAction | Action::Suspend => {
                    if !self.response.is_complete() {
                        self.response.status(StatusCode::ServiceUnavailable).body("");
                    }
                    Ok(false)
                }

                Action::Upload(spec) => {
                    self.upload_pending = true;
                    // The body is already fully buffered by the time the
                    // handler runs, so there is exactly one "chunk" to
                    // deliver rather than a true incremental stream.
                    let outcome = {
                        let body = self.request.body().unwrap_or(&[]);
                        if spec.large_buffer_size == 0 {
                            (spec.on_chunk)(body)
                        } else {
                            (spec
                                .on_full
                                .as_ref()
                                .expect("validate_action enforces on_full is set here"))(
                                body
                            )
                        }
                    };
                    self.upload_pending = false;

                    let mapped = match outcome {
                        UploadAction::NoAction | UploadAction::Continue => Action::NoAction,
                        UploadAction::Response(handled) => Action::Response(handled),
                        UploadAction::Suspend => Action::Suspend,
                        UploadAction::Upgrade(handler) => Action::Upgrade(handler),
                    };
                    self.resolve_action(mapped, stream).await
                }

                Action::PostParse(config) => {
                    const FIELD_LIMIT: usize = 128;

                    let content_type = config
                        .content_type_override
                        .map(str::as_bytes)
                        .or_else(|| self.request.header(b"content-type"))
                        .unwrap_or(b"");
                    let body = self.request.body().unwrap_or(&[]);
                    let fields =
                        post::parse(content_type, body, FIELD_LIMIT, self.req_limits.body_size)?;

                    let next = (config.done)(&fields);
                    self.resolve_action(next, stream).await
                }

                Action::Upgrade(handler) => {
                    // Only a fully finished response (e.g. a `101
                    // Switching Protocols` built with `.body()`) is safe
                    // to flush before handing the socket off; anything
                    // half-built is dropped rather than sent malformed.
                    if self.response.is_complete() {
                        self.conn_limits
                            .write_bytes(stream, self.response.buffer())
                            .await?;
                    }
                    handler.upgrade(stream).await;
                    Ok(true)
                }
            }
        })
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> Result<bool, ErrorKind> {
        Ok(!self.response.keep_alive
            || self.connection.request_count >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime)
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: MonoClock,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: MonoClock::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = MonoClock::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use embermhd::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
///
/// Check out a [real-world example
/// ](https://github.com/AmakeSashaDev/embermhd/blob/main/examples/request_counter.rs)
/// (well, almost)
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use embermhd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use embermhd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use embermhd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds.Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),
                chunk_cursor: None,
                stage: Stage::Init,
                close_reason: None,
                itc: Itc::new(),
                upload_pending: false,

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
            }
        }
    }
}
