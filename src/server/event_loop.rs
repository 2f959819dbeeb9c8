//! Readiness bookkeeping for the event-loop backends a
//! [`Daemon`](crate::server::daemon::Daemon) can be configured with.
//!
//! [`crate::config::EventLoopBackend::SelectPoll`] and
//! [`crate::config::EventLoopBackend::Epoll`] both resolve to `tokio`'s own
//! reactor underneath — there is no separate select/poll/epoll
//! implementation to choose between at this layer, since rebuilding one
//! under an async runtime that already multiplexes readiness would fight
//! the runtime rather than use it. The distinction that matters in this
//! crate is [`crate::config::EventLoopBackend::External`]: every other
//! backend lets [`Daemon`](crate::server::daemon::Daemon) drive its own
//! accept loop, while `External` hands readiness to the daemon one event
//! at a time through
//! [`Daemon::process_external_event`](crate::server::daemon::Daemon::process_external_event)
//! instead.
//!
//! Extending this down to per-byte, externally-driven resumption of a
//! single request (rather than handing over one already-accepted
//! connection at a time) would mean turning [`HttpConnection`
//! ](crate::server::connection::HttpConnection)'s read/write calls into a
//! non-blocking step function the caller re-invokes on every readiness
//! event. That's a much larger change to the connection's I/O model than
//! this crate takes on; `External` mode here operates at the
//! connection-handoff granularity instead.

/// Which directions (and error conditions) a socket was reported ready
/// for, as observed by whatever is driving the event loop.
///
/// Constructed by the embedder and passed to
/// [`Daemon::process_external_event`](crate::server::daemon::Daemon::process_external_event)
/// under [`EventLoopBackend::External`](crate::EventLoopBackend::External)
/// or [`ThreadingMode::SingleThreadExternal`](crate::ThreadingMode::SingleThreadExternal).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadyFlags {
    pub(crate) recv_ready: bool,
    pub(crate) send_ready: bool,
    pub(crate) recv_error: bool,
    pub(crate) send_error: bool,
    pub(crate) remote_shut_wr: bool,
}

impl ReadyFlags {
    pub const fn none() -> Self {
        Self {
            recv_ready: false,
            send_ready: false,
            recv_error: false,
            send_error: false,
            remote_shut_wr: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        recv_ready: bool,
        send_ready: bool,
        recv_error: bool,
        send_error: bool,
        remote_shut_wr: bool,
    ) -> Self {
        Self {
            recv_ready,
            send_ready,
            recv_error,
            send_error,
            remote_shut_wr,
        }
    }

    /// Whether this event is worth handing to the connection at all, as
    /// opposed to a stale or empty notification.
    pub(crate) fn is_actionable(&self) -> bool {
        self.recv_ready || self.send_ready || self.recv_error || self.send_error || self.remote_shut_wr
    }

    /// Whether the event represents a dead socket that should be dropped
    /// without attempting to process it.
    pub(crate) fn is_fatal(&self) -> bool {
        self.recv_error || self.send_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_flags_are_not_actionable() {
        assert!(!ReadyFlags::none().is_actionable());
    }

    #[test]
    fn recv_ready_is_actionable_and_not_fatal() {
        let flags = ReadyFlags {
            recv_ready: true,
            ..ReadyFlags::none()
        };
        assert!(flags.is_actionable());
        assert!(!flags.is_fatal());
    }

    #[test]
    fn recv_error_is_fatal() {
        let flags = ReadyFlags {
            recv_error: true,
            ..ReadyFlags::none()
        };
        assert!(flags.is_fatal());
    }
}
