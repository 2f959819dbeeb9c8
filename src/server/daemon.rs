//! Threading-mode layer built on top of [`Server`]/[`ServerBuilder`].
//!
//! [`Server`] already implements the default [`ThreadingMode::ListenerWorkerPool`]
//! layout directly: a fixed set of worker tasks, each pulling accepted
//! sockets off a shared queue and running one [`HttpConnection`] at a
//! time. [`Daemon`] keeps that exact per-connection processing (`serve_one`
//! below) and wraps it with the other three [`ThreadingMode`] layouts,
//! rather than replacing the working facade.
//!
//! Connection membership inside a `ListenerWorkerPool` bucket is tracked
//! with [`ConnArena`]/[`IntrusiveList`] — the same index-based intrusive
//! list used for the source design's `all_conn` bookkeeping — so a full
//! bucket makes new connections wait on [`Itc`] for a slot to free up
//! instead of growing without bound.

use crate::{
    dllist::{ConnArena, ConnId, IntrusiveList, Links},
    itc::Itc,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::{
        connection::{ConnectionData, HttpConnection},
        event_loop::ReadyFlags,
        server_impl::{AllLimits, Handler},
    },
    ConnectionFilter, EventLoopBackend, ThreadingMode,
};
use std::{
    marker::PhantomData,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::net::{TcpListener, TcpStream};

/// A daemon ties one [`Handler`] and [`ConnectionFilter`] to one of the
/// four [`ThreadingMode`] layouts.
///
/// Use [`Server`] directly for the common `ListenerWorkerPool` case; reach
/// for `Daemon` when a different threading layout (or caller-driven event
/// loop) is needed.
pub struct Daemon<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: TcpListener,
    handler: Arc<H>,
    filter: Arc<F>,
    limits: AllLimits,
    threading_mode: ThreadingMode,
    // Kept for `build()`'s validation and for callers introspecting their
    // own config; `SelectPoll`/`Epoll` don't otherwise change daemon
    // behavior (see the module doc on `event_loop`).
    #[allow(dead_code)]
    event_loop_backend: EventLoopBackend,
    _marker: PhantomData<S>,
}

impl<H, S, F> Daemon<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    #[inline]
    pub fn builder() -> DaemonBuilder<H, S, ()> {
        DaemonBuilder {
            listener: None,
            handler: None,
            connection_filter: Arc::new(()),
            threading_mode: ThreadingMode::default(),
            event_loop_backend: EventLoopBackend::default(),
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
        }
    }

    /// Runs the daemon under its configured [`ThreadingMode`].
    ///
    /// Never returns under [`ThreadingMode::Worker`],
    /// [`ThreadingMode::ListenerWorkerPool`] or
    /// [`ThreadingMode::ThreadPerConnection`]. Under
    /// [`ThreadingMode::SingleThreadExternal`] it returns immediately —
    /// that mode is driven entirely through
    /// [`process_external_event`](Self::process_external_event), called
    /// directly from the embedder's own event loop.
    pub async fn launch(self) {
        match self.threading_mode {
            ThreadingMode::SingleThreadExternal => {}
            ThreadingMode::Worker => self.launch_worker().await,
            ThreadingMode::ListenerWorkerPool { pool_size } => {
                self.launch_listener_worker_pool(pool_size).await
            }
            ThreadingMode::ThreadPerConnection => self.launch_thread_per_connection().await,
        }
    }

    /// Entry point for [`ThreadingMode::SingleThreadExternal`] (and for
    /// [`EventLoopBackend::External`] under the other modes): hands one
    /// already-accepted connection to the daemon along with the readiness
    /// the caller's own event loop observed for it.
    ///
    /// A fatal `flags` (a read or write error already seen by the
    /// caller) drops the connection without attempting to serve it; a
    /// non-actionable `flags` is a no-op.
    pub async fn process_external_event(&self, flags: ReadyFlags, stream: TcpStream, addr: SocketAddr) {
        if flags.is_fatal() || !flags.is_actionable() {
            return;
        }

        Self::serve_one(stream, addr, self.handler.clone(), self.filter.clone(), self.limits.clone()).await;
    }

    /// [`ThreadingMode::Worker`]: one task runs the accept loop and every
    /// connection, reusing a single [`HttpConnection`] across accepts the
    /// same way each [`Server`] worker reuses its own.
    async fn launch_worker(self) {
        let mut conn = HttpConnection::new(self.handler.clone(), self.limits.clone());

        loop {
            let Ok((mut stream, addr)) = self.listener.accept().await else {
                continue;
            };
            let Ok(local_addr) = stream.local_addr() else {
                continue;
            };

            if Self::rejected(&self.filter, addr, local_addr, &mut conn).await {
                let _ = conn
                    .conn_limits
                    .write_bytes(&mut stream, conn.response.buffer())
                    .await;
                conn.response.reset(&conn.resp_limits);
                continue;
            }

            let _ = conn.run(&mut stream, addr, local_addr).await;
        }
    }

    /// [`ThreadingMode::ThreadPerConnection`]: every accepted connection
    /// gets its own task and its own fresh [`HttpConnection`], with no
    /// shared bucket admission limit beyond the OS's own backlog.
    async fn launch_thread_per_connection(self) {
        loop {
            let Ok((stream, addr)) = self.listener.accept().await else {
                continue;
            };

            let handler = self.handler.clone();
            let filter = self.filter.clone();
            let limits = self.limits.clone();

            tokio::spawn(async move {
                Self::serve_one(stream, addr, handler, filter, limits).await;
            });
        }
    }

    /// [`ThreadingMode::ListenerWorkerPool`]: the listener hands each
    /// accepted socket to one of `pool_size` buckets (round-robin), each
    /// capped at `max_connections` live members; a full bucket makes the
    /// next connection assigned to it wait for a slot instead of growing
    /// without bound.
    async fn launch_listener_worker_pool(self, pool_size: usize) {
        let capacity = self.limits.0.max_connections.max(1);
        let buckets: Vec<Arc<Bucket>> = (0..pool_size.max(1)).map(|_| Arc::new(Bucket::new(capacity))).collect();
        let mut next = 0usize;

        loop {
            let Ok((stream, addr)) = self.listener.accept().await else {
                continue;
            };

            let bucket = buckets[next % buckets.len()].clone();
            next = next.wrapping_add(1);

            let handler = self.handler.clone();
            let filter = self.filter.clone();
            let limits = self.limits.clone();

            tokio::spawn(async move {
                let membership = bucket.join().await;
                Self::serve_one(stream, addr, handler, filter, limits).await;
                bucket.leave(membership);
            });
        }
    }

    #[inline]
    async fn serve_one(mut stream: TcpStream, addr: SocketAddr, handler: Arc<H>, filter: Arc<F>, limits: AllLimits) {
        let Ok(local_addr) = stream.local_addr() else {
            return;
        };
        let mut conn = HttpConnection::new(handler, limits);

        if Self::rejected(&filter, addr, local_addr, &mut conn).await {
            let _ = conn
                .conn_limits
                .write_bytes(&mut stream, conn.response.buffer())
                .await;
            return;
        }

        let _ = conn.run(&mut stream, addr, local_addr).await;
    }

    #[inline]
    async fn rejected(filter: &F, client_addr: SocketAddr, server_addr: SocketAddr, conn: &mut HttpConnection<H, S>) -> bool {
        filter.filter(client_addr, server_addr, &mut conn.response).is_err()
            || filter
                .filter_async(client_addr, server_addr, &mut conn.response)
                .await
                .is_err()
    }
}

/// A slab of live connection memberships inside one
/// [`ThreadingMode::ListenerWorkerPool`] bucket, plus the intrusive list
/// giving O(1) admit/release.
struct Bucket {
    members: Mutex<(ConnArena<Links>, IntrusiveList<Links>)>,
    capacity: usize,
    slot_freed: Itc,
}

fn identity_links(links: &mut Links) -> &mut Links {
    links
}

impl Bucket {
    fn new(capacity: usize) -> Self {
        Self {
            members: Mutex::new((ConnArena::default(), IntrusiveList::default())),
            capacity,
            slot_freed: Itc::new(),
        }
    }

    /// Waits for a free membership slot and reserves it.
    async fn join(&self) -> ConnId {
        loop {
            {
                let mut guard = self.members.lock().expect("bucket mutex poisoned");
                if guard.1.len() < self.capacity {
                    let (arena, order) = &mut *guard;
                    let id = arena.insert(Links::default());
                    order.push_front(arena.inner_mut(), id, identity_links);
                    return id;
                }
            }
            self.slot_freed.wait().await;
        }
    }

    fn leave(&self, id: ConnId) {
        {
            let mut guard = self.members.lock().expect("bucket mutex poisoned");
            let (arena, order) = &mut *guard;
            order.remove(arena.inner_mut(), id, identity_links);
            arena.remove(id);
        }
        self.slot_freed.notify();
    }
}

/// Builder for [`Daemon`], mirroring [`ServerBuilder`]'s API with the
/// addition of [`threading_mode`](Self::threading_mode) and
/// [`event_loop_backend`](Self::event_loop_backend).
pub struct DaemonBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    threading_mode: ThreadingMode,
    event_loop_backend: EventLoopBackend,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
}

impl<H, S, F> DaemonBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[inline(always)]
    pub fn conn_filter<NewF: ConnectionFilter>(self, filter: NewF) -> DaemonBuilder<H, S, NewF> {
        DaemonBuilder {
            listener: self.listener,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            threading_mode: self.threading_mode,
            event_loop_backend: self.event_loop_backend,
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
        }
    }

    /// Selects one of the four threading/lifecycle layouts (default:
    /// [`ThreadingMode::ListenerWorkerPool`]).
    #[inline(always)]
    pub fn threading_mode(mut self, mode: ThreadingMode) -> Self {
        self.threading_mode = mode;
        self
    }

    /// Selects the readiness backend (default: [`EventLoopBackend::Epoll`]).
    #[inline(always)]
    pub fn event_loop_backend(mut self, backend: EventLoopBackend) -> Self {
        self.event_loop_backend = backend;
        self
    }

    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Daemon`] instance.
    ///
    /// # Panics
    ///
    /// - The `listener` method must be called to create (except when
    ///   `threading_mode` is [`ThreadingMode::SingleThreadExternal`],
    ///   where the listener is never used and is still required only to
    ///   keep the builder's shape uniform across modes).
    /// - The `handler` method must be called to create.
    /// - `event_loop_backend` is [`EventLoopBackend::External`] while
    ///   `threading_mode` is not [`ThreadingMode::SingleThreadExternal`]
    ///   (externally-driven readiness has no self-running accept loop to
    ///   attach to in the other three modes).
    #[inline]
    #[track_caller]
    pub fn build(self) -> Daemon<H, S, F> {
        assert!(
            self.event_loop_backend != EventLoopBackend::External
                || matches!(self.threading_mode, ThreadingMode::SingleThreadExternal),
            "EventLoopBackend::External requires ThreadingMode::SingleThreadExternal"
        );

        Daemon {
            listener: self.listener.expect("The `listener` method must be called to create"),
            handler: self.handler.expect("The `handler` method must be called to create"),
            filter: self.connection_filter,
            limits: (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
                self.request_limits.unwrap_or_default().precalculate(),
                self.response_limits.unwrap_or_default(),
            ),
            threading_mode: self.threading_mode,
            event_loop_backend: self.event_loop_backend,
            _marker: PhantomData,
        }
    }
}
