//! TLS bridge: opaque handshake + encrypted recv/send vtable. The core
//! never depends on a concrete TLS stack; it calls through [`TlsSession`]
//! (init/handshake/recv/send/shutdown, plus ALPN/SNI accessors).
//! Implementing a TLS stack is out of scope for this module by default —
//! the `tls` Cargo feature adds one optional bridge to `tokio-rustls`.

use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// The narrow interface the connection-processing core talks
/// to. A `Box<dyn TlsSession>` is stored per connection alongside the raw
/// socket; plaintext `Connection` never has to know which concrete TLS
/// library produced it.
pub trait TlsSession: Send {
    /// Drives the handshake forward by one step. Returns `Ok(true)` once
    /// the handshake is complete and application data can flow.
    fn handshake_step(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<bool>>;

    /// Decrypts into `buf`, the same contract as `AsyncRead::poll_read`.
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>>;

    /// Encrypts and sends `buf`, the same contract as
    /// `AsyncWrite::poll_write`.
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>>;

    /// Sends a `close_notify` alert (graceful TLS-level close; distinct
    /// from the underlying TCP `shutdown(WR)`).
    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>>;

    /// Negotiated ALPN protocol, if any, once the handshake has completed.
    fn alpn_protocol(&self) -> Option<&[u8]>;

    /// Client-presented SNI hostname, if any, once the handshake has
    /// completed.
    fn sni_hostname(&self) -> Option<&str>;
}

/// Narrow configuration the daemon needs to accept TLS connections: a
/// session factory, invoked once per accepted socket. Kept generic over
/// `TlsSession` rather than hard-coding a TLS library, so swapping the
/// backing implementation never touches connection-handling code.
pub struct TlsConfig {
    pub(crate) make_session:
        Box<dyn Fn() -> Box<dyn TlsSession> + Send + Sync>,
}

impl TlsConfig {
    /// Builds a `TlsConfig` from a session factory. The factory is called
    /// once per accepted connection, mirroring the source's
    /// one-`TlsSession`-per-connection lifetime.
    pub fn new(make_session: impl Fn() -> Box<dyn TlsSession> + Send + Sync + 'static) -> Self {
        Self {
            make_session: Box::new(make_session),
        }
    }
}

#[cfg(feature = "tls")]
pub mod rustls_bridge {
    //! Optional bridge to `tokio-rustls`, gated behind the `tls` feature
    //! so the core crate never pulls in a concrete TLS stack by default.

    use super::TlsSession;
    use std::future::Future;
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::TcpStream;
    use tokio_rustls::server::TlsStream;
    use tokio_rustls::TlsAcceptor;

    /// A handshaking-or-established `rustls` server session, implementing
    /// [`TlsSession`] by delegating to `tokio_rustls`'s own `AsyncRead`/
    /// `AsyncWrite` implementation once the handshake future resolves.
    pub struct RustlsSession {
        state: State,
    }

    enum State {
        Handshaking(TlsAcceptor, Option<TcpStream>),
        Established(TlsStream<TcpStream>),
    }

    impl RustlsSession {
        pub fn new(acceptor: Arc<rustls::ServerConfig>, stream: TcpStream) -> Self {
            Self {
                state: State::Handshaking(TlsAcceptor::from(acceptor), Some(stream)),
            }
        }
    }

    impl TlsSession for RustlsSession {
        fn handshake_step(
            mut self: Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<bool>> {
            match &mut self.state {
                State::Established(_) => std::task::Poll::Ready(Ok(true)),
                State::Handshaking(acceptor, stream_slot) => {
                    let stream = stream_slot
                        .take()
                        .expect("handshake polled again after completion");
                    let mut fut = Box::pin(acceptor.accept(stream));
                    match fut.as_mut().poll(cx) {
                        std::task::Poll::Ready(Ok(established)) => {
                            self.state = State::Established(established);
                            std::task::Poll::Ready(Ok(true))
                        }
                        std::task::Poll::Ready(Err(e)) => std::task::Poll::Ready(Err(e)),
                        std::task::Poll::Pending => std::task::Poll::Pending,
                    }
                }
            }
        }

        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            match &mut self.state {
                State::Established(s) => Pin::new(s).poll_read(cx, buf),
                State::Handshaking(..) => {
                    std::task::Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "TLS handshake not complete",
                    )))
                }
            }
        }

        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            match &mut self.state {
                State::Established(s) => Pin::new(s).poll_write(cx, buf),
                State::Handshaking(..) => {
                    std::task::Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "TLS handshake not complete",
                    )))
                }
            }
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            match &mut self.state {
                State::Established(s) => Pin::new(s).poll_shutdown(cx),
                State::Handshaking(..) => std::task::Poll::Ready(Ok(())),
            }
        }

        fn alpn_protocol(&self) -> Option<&[u8]> {
            match &self.state {
                State::Established(s) => {
                    let (_, conn) = s.get_ref();
                    conn.alpn_protocol()
                }
                State::Handshaking(..) => None,
            }
        }

        fn sni_hostname(&self) -> Option<&str> {
            match &self.state {
                State::Established(s) => {
                    let (_, conn) = s.get_ref();
                    conn.server_name()
                }
                State::Handshaking(..) => None,
            }
        }
    }
}
