//! Daemon-wide configuration knobs that do not fit the per-subsystem
//! `*Limits` structs in [`crate::limits`]: RFC-interpretation strictness,
//! event loop backend selection, threading layout, and per-connection
//! pool sizing.

use std::time::Duration;

/// Centralizes every RFC-interpretation knob the parser consults into a
/// single config record read once per parser step, rather than scattering
/// conditional checks across the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictnessLevel {
    /// Accept bare LF everywhere, bare CR in header values, unlimited
    /// leading empty lines, obsolete line folding collapsed rather than
    /// rejected. For talking to known-broken clients only.
    Loose,
    /// RFC 9112 with the handful of deviations real clients rely on
    /// (bare LF line endings, one leading empty line).
    #[default]
    Default,
    /// RFC 9112 to the letter: CRLF only, no leading empty lines, line
    /// folding rejected.
    Strict,
    /// Strict, plus additional defense-in-depth limits (shorter chunk-size
    /// hex-digit runs, single `Host` header only).
    Paranoid,
}

impl StrictnessLevel {
    /// Maximum number of leading empty request-line CRLF/LF pairs skipped
    /// before giving up (RFC 9112 §2.2 recommends tolerating at least one).
    pub(crate) const fn max_leading_empty_lines(self) -> usize {
        match self {
            StrictnessLevel::Loose => 64,
            StrictnessLevel::Default => 1,
            StrictnessLevel::Strict | StrictnessLevel::Paranoid => 0,
        }
    }

    /// Whether a bare `LF` (no preceding `CR`) terminates a line.
    pub(crate) const fn allows_bare_lf(self) -> bool {
        !matches!(self, StrictnessLevel::Strict | StrictnessLevel::Paranoid)
    }

    /// Whether a bare `CR` inside a header value is substituted for space
    /// rather than rejected outright.
    pub(crate) const fn substitutes_bare_cr(self) -> bool {
        matches!(self, StrictnessLevel::Loose)
    }

    /// Whether obsolete header line-folding (a continuation line starting
    /// with SP/HT) is collapsed into the previous value instead of being a
    /// parse error.
    pub(crate) const fn collapses_line_folding(self) -> bool {
        matches!(self, StrictnessLevel::Loose | StrictnessLevel::Default)
    }

    /// Maximum hex-digit run length accepted in a chunk-size line, bounding
    /// the magnitude of an attacker-supplied chunk size before overflow
    /// checks even run.
    pub(crate) const fn max_chunk_size_hex_digits(self) -> usize {
        match self {
            StrictnessLevel::Loose => 16,
            StrictnessLevel::Default => 12,
            StrictnessLevel::Strict => 8,
            StrictnessLevel::Paranoid => 6,
        }
    }

    /// Whether more than one `Host` header is tolerated (RFC 9112 §3.2
    /// requires exactly one; paranoid mode enforces this, the rest keep
    /// the first and ignore duplicates for compatibility).
    pub(crate) const fn rejects_duplicate_host(self) -> bool {
        matches!(self, StrictnessLevel::Paranoid)
    }
}

/// Selects which event-loop backend a [`Daemon`](crate::Daemon)
/// drives connections with. All three variants are implemented over
/// `tokio`'s reactor (itself an epoll/kqueue/IOCP multiplexer); they differ
/// in how the daemon's own bookkeeping is presented, not in raw readiness
/// polling, since rebuilding select/poll/epoll underneath an async runtime
/// that already multiplexes them would fight the runtime rather than use
/// it idiomatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventLoopBackend {
    /// Level-triggered readiness rebuilt from `readable()`/`writable()`
    /// each tick. Matches the source's `select`/`poll` backend semantics.
    SelectPoll,
    /// Edge-triggered readiness, connections registered once. Matches the
    /// source's `epoll` backend semantics (Linux only at the syscall
    /// level; this crate's realization is backend-neutral since `tokio`
    /// already uses epoll/kqueue/IOCP as appropriate per platform).
    #[default]
    Epoll,
    /// Readiness driven by caller-supplied events through
    /// [`Daemon::process_external_event`](crate::Daemon::process_external_event)
    /// rather than this crate's own reactor loop.
    External,
}

/// Selects one of the four threading/lifecycle layouts a [`Daemon`](crate::Daemon)
/// can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadingMode {
    /// The embedding application drives the event loop itself by calling
    /// [`Daemon::process_external_event`](crate::Daemon::process_external_event).
    SingleThreadExternal,
    /// One task runs the accept loop and all connection processing.
    Worker,
    /// One listener task hands accepted sockets to a fixed pool of worker
    /// tasks, each owning its own bucket of connections.
    #[default]
    ListenerWorkerPool {
        /// Number of worker buckets; each owns its own connection arena
        /// and admission limit.
        pool_size: usize,
    },
    /// One task per accepted connection, with no shared worker-pool
    /// bucketing.
    ThreadPerConnection,
}

/// Per-connection bump-arena sizing, independent of the
/// request/response field-count limits in [`crate::limits::ReqLimits`] /
/// [`crate::limits::RespLimits`] (which describe *shape*; this describes
/// the raw byte budget the pool is carved from).
#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    /// Total bytes available to the bump arena for one connection.
    pub capacity: usize,
    /// Bytes of the capacity reserved at the back for the growable write
    /// buffer / response body staging (the "tail" allocation region).
    pub tail_reserve: usize,

    #[doc(hidden)]
    pub _priv: (),
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            capacity: 16 * 1024,
            tail_reserve: 8 * 1024,
            _priv: (),
        }
    }
}

/// Socket read/write timeouts shared by every threading mode; split out
/// from [`crate::limits::ConnLimits`] only where a non-connection-bound
/// default (e.g. the listener's `accept()` has no per-connection timeout)
/// is needed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeoutDefaults {
    pub(crate) idle: Duration,
}

impl Default for TimeoutDefaults {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(120),
        }
    }
}
