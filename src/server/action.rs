//! Response-protocol enum returned from request handling.
//!
//! Most handlers only ever produce [`Action::Response`] — the common case
//! already covered by [`Handler::handle`](crate::Handler::handle) returning
//! [`Handled`]. The richer variants here exist for the handlers that need
//! to park a request, take over body delivery chunk-by-chunk, hand a POST
//! body to the structured parser, or switch the connection to another
//! protocol entirely.
//!
//! Unlike a synchronous callback API, an `async fn handle` can already
//! await arbitrary work before producing a response, so `Suspend` here
//! is narrower than it would be in a callback-driven server: it means
//! "don't have a response yet, wake me again once the external resume
//! signal fires", not "block the thread".

use crate::{http::post, Handled};
use std::{cell::Cell, future::Future, pin::Pin};
use tokio::net::TcpStream;

/// What the connection should do once a handler call returns.
pub enum Action {
    /// Nothing decided; fall back to the default full-body-then-respond
    /// behavior.
    NoAction,
    /// The response is fully built; write it and continue (or close, per
    /// [`Response::close`](crate::Response::close)).
    Response(Handled),
    /// Park the request. The connection waits for the daemon's resume
    /// signal and calls the handler again, up to a bounded number of
    /// attempts.
    Suspend,
    /// Take over body delivery: `on_chunk` is invoked with each piece of
    /// the body as it becomes available instead of the body being
    /// buffered whole.
    Upload(UploadSpec),
    /// Hand the request body to [`post::parse`] and invoke `done` with
    /// the resulting fields.
    PostParse(PostParseConfig),
    /// Switch the connection to `handler` once any response already
    /// queued (e.g. a `101 Switching Protocols`) is flushed. Rejected by
    /// [`validate_action`] while an upload is still pending.
    Upgrade(Box<dyn UpgradeHandler>),
}

/// Callback invoked per delivered chunk (or, in this crate's current
/// buffered-body pipeline, once with the whole body — see
/// `DESIGN.md` for why true incremental delivery is deferred).
pub type UploadCallback = Box<dyn Fn(&[u8]) -> UploadAction + Send + Sync>;

/// Parameters for [`Action::Upload`].
///
/// `large_buffer_size` mirrors the source design's shared large-buffer
/// cap: `0` means every chunk is handled by `on_chunk` directly and
/// `on_full` is unused; a non-zero value means chunks are accumulated up
/// to that many bytes and `on_full` (required in that case) is invoked
/// once the accumulation completes or the body ends.
pub struct UploadSpec {
    pub large_buffer_size: usize,
    pub on_chunk: UploadCallback,
    pub on_full: Option<UploadCallback>,
}

/// What an upload callback wants to happen next.
pub enum UploadAction {
    NoAction,
    Response(Handled),
    Suspend,
    /// Keep delivering chunks.
    Continue,
    Upgrade(Box<dyn UpgradeHandler>),
}

/// Configuration for [`Action::PostParse`].
pub struct PostParseConfig {
    /// Overrides the `Content-Type` used to pick a decoder, for bodies
    /// whose real content type isn't in the request headers (e.g. a
    /// fixed-format internal endpoint).
    pub content_type_override: Option<&'static str>,
    pub done: Box<dyn Fn(&[post::Field]) -> Action + Send + Sync>,
}

/// Takes over the raw connection after an [`Action::Upgrade`].
///
/// Implementations get exclusive access to the socket until `upgrade`
/// returns; the connection is closed (not kept alive for another HTTP
/// request) once it does.
pub trait UpgradeHandler: Send + Sync {
    fn upgrade<'a>(
        self: Box<Self>,
        stream: &'a mut TcpStream,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Why an [`Action`] was rejected by [`validate_action`].
///
/// `Upload`'s `on_chunk` and `PostParse`'s `done` can't be missing — both
/// are non-`Option` fields, so the type system rules those legality
/// checks out at construction time instead of at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionError {
    /// `large_buffer_size != 0` but `on_full` was `None`.
    MissingFullCallback,
    /// An `Upgrade` action was produced while an upload was still being
    /// accumulated on this connection.
    UpgradeWhilePending,
}

/// Enforces the legality rules an [`Action`] must satisfy before the
/// connection acts on it.
pub(crate) fn validate_action(action: &Action, upload_pending: bool) -> Result<(), ActionError> {
    match action {
        Action::Upload(spec) if spec.large_buffer_size != 0 && spec.on_full.is_none() => {
            Err(ActionError::MissingFullCallback)
        }
        Action::Upgrade(_) if upload_pending => Err(ActionError::UpgradeWhilePending),
        _ => Ok(()),
    }
}

/// One-shot guard for action-producing callbacks.
///
/// [`Handled`] already enforces "exactly one response" by being consumed
/// by value inside a single `async fn handle` call. Upload/PostParse
/// callbacks are `Fn(&self, ...)` rather than `FnOnce`, so a misbehaving
/// callback could otherwise be invoked more than once per request and
/// produce two actions; this makes a second call a no-op instead.
///
/// Not yet wired into the connection loop: today's body is fully
/// buffered before a handler ever sees it, so `Upload`'s callback is
/// only ever invoked once per request already. This guard is ready for
/// when the body pipeline delivers true incremental chunks.
#[allow(dead_code)]
pub(crate) struct ActionSlot(Cell<bool>);

impl ActionSlot {
    pub(crate) fn new() -> Self {
        Self(Cell::new(false))
    }

    /// Returns `true` the first time it's called for this request, `false`
    /// on every subsequent call.
    pub(crate) fn take(&self) -> bool {
        !self.0.replace(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_requires_full_callback_above_zero() {
        let spec = UploadSpec {
            large_buffer_size: 1024,
            on_chunk: Box::new(|_| UploadAction::Continue),
            on_full: None,
        };
        assert_eq!(
            validate_action(&Action::Upload(spec), false),
            Err(ActionError::MissingFullCallback)
        );
    }

    #[test]
    fn upload_zero_buffer_does_not_need_full_callback() {
        let spec = UploadSpec {
            large_buffer_size: 0,
            on_chunk: Box::new(|_| UploadAction::Continue),
            on_full: None,
        };
        assert_eq!(validate_action(&Action::Upload(spec), false), Ok(()));
    }

    struct NoopUpgrade;
    impl UpgradeHandler for NoopUpgrade {
        fn upgrade<'a>(
            self: Box<Self>,
            _stream: &'a mut TcpStream,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async {})
        }
    }

    #[test]
    fn upgrade_rejected_while_upload_pending() {
        assert_eq!(
            validate_action(&Action::Upgrade(Box::new(NoopUpgrade)), true),
            Err(ActionError::UpgradeWhilePending)
        );
        assert_eq!(
            validate_action(&Action::Upgrade(Box::new(NoopUpgrade)), false),
            Ok(())
        );
    }

    #[test]
    fn action_slot_fires_once() {
        let slot = ActionSlot::new();
        assert!(slot.take());
        assert!(!slot.take());
        assert!(!slot.take());
    }
}
