//! Synchronous call gate.
//!
//! AMQP lets a peer have at most one synchronous request outstanding. The
//! observed broker behavior is stricter than the per-class rule in the
//! protocol text: once *any* synchronous class is outstanding, *all*
//! subsequent synchronous sends are deferred until it completes. The gate
//! preserves that behavior rather than relaxing it, which also means at most
//! one pending call can exist at a time.
//!
//! The gate is a pure state machine in the action style: callers pass frames
//! in, and the frames that may actually be transmitted now come back out.
//! "Waiting" for a reply is modeled as deferred batches, never a blocked
//! call.

use std::collections::VecDeque;

use crate::protocol::{Frame, FramePayload, MethodKind};

/// Per-submission options.
#[derive(Default)]
pub struct SubmitOptions {
    /// Invoked exactly once when a synchronous request in the submission
    /// completes.
    pub on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl SubmitOptions {
    /// Options with no completion callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying a completion callback.
    pub fn with_on_complete(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_complete: Some(Box::new(f)),
        }
    }
}

impl std::fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// A submission parked while a synchronous call is outstanding.
struct DeferredBatch {
    options: SubmitOptions,
    frames: Vec<Frame>,
}

/// State for the one outstanding synchronous call.
struct PendingCall {
    /// Type tag of the outbound request.
    request: MethodKind,
    /// Method tags that satisfy this call.
    responses: &'static [MethodKind],
    /// Caller's completion callback, invoked exactly once.
    on_complete: Option<Box<dyn FnOnce() + Send>>,
    /// Submissions deferred while this call was outstanding, FIFO.
    deferred: VecDeque<DeferredBatch>,
}

/// Gate enforcing the one-outstanding-synchronous-call rule.
#[derive(Default)]
pub struct SyncGate {
    pending: Option<PendingCall>,
}

impl SyncGate {
    /// Create an idle gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a synchronous call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Submit an ordered batch of frames for transmission.
    ///
    /// Returns the frames to transmit now, in order. If a synchronous frame
    /// is reached while a call is outstanding, that frame and everything
    /// after it is deferred as one batch (with `options`) and nothing more is
    /// returned from this submission. Non-method frames in the batch are
    /// logged and skipped; the rest of the batch still goes out.
    pub fn submit(&mut self, mut options: SubmitOptions, frames: Vec<Frame>) -> Vec<Frame> {
        let mut out = Vec::with_capacity(frames.len());
        let mut iter = frames.into_iter();

        while let Some(frame) = iter.next() {
            let method = match &frame.payload {
                FramePayload::Method(method) => method,
                _ => {
                    tracing::error!(
                        channel = frame.channel,
                        "cannot send non-method frame through the gate, skipping"
                    );
                    continue;
                }
            };

            let kind = method.kind();
            let spec = kind.spec();

            if spec.synchronous {
                if let Some(pending) = self.pending.as_mut() {
                    // Any outstanding class blocks all synchronous sends,
                    // same-class or not. Park this frame and the rest of the
                    // submission as one batch.
                    tracing::debug!(
                        outstanding = ?pending.request,
                        deferred = ?kind,
                        "synchronous call outstanding, deferring remainder of submission"
                    );
                    let mut rest = vec![frame];
                    rest.extend(iter);
                    pending.deferred.push_back(DeferredBatch {
                        options,
                        frames: rest,
                    });
                    return out;
                }

                if !spec.responses.is_empty() {
                    tracing::trace!(request = ?kind, "registering pending synchronous call");
                    self.pending = Some(PendingCall {
                        request: kind,
                        responses: spec.responses,
                        on_complete: options.on_complete.take(),
                        deferred: VecDeque::new(),
                    });
                }
            }

            out.push(frame);
        }

        out
    }

    /// Offer an inbound frame to the gate before routing it.
    ///
    /// If the frame completes the outstanding call, the call's completion
    /// callback runs and its deferred submissions are replayed in FIFO order
    /// through [`submit`](Self::submit), so a deferred synchronous call can
    /// become the new outstanding one. Returns the flushed frames to
    /// transmit. A synchronous reply matching no outstanding call is ignored.
    pub fn on_inbound(&mut self, frame: &Frame) -> Vec<Frame> {
        let Some(kind) = frame.method_kind() else {
            return Vec::new();
        };
        if !kind.spec().synchronous {
            return Vec::new();
        }

        let pending = match self.pending.take() {
            Some(pending) if pending.responses.contains(&kind) => pending,
            other => {
                // Not a reply to the outstanding call (or nothing is
                // outstanding); leave the gate untouched.
                self.pending = other;
                return Vec::new();
            }
        };

        tracing::trace!(request = ?pending.request, reply = ?kind, "synchronous call completed");

        if let Some(on_complete) = pending.on_complete {
            on_complete();
        }

        let mut out = Vec::new();
        for batch in pending.deferred {
            out.extend(self.submit(batch.options, batch.frames));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn connection_open() -> Frame {
        Frame::method(
            0,
            Method::ConnectionOpen {
                virtual_host: "/".to_string(),
                capabilities: String::new(),
                insist: true,
            },
        )
    }

    fn connection_open_ok() -> Frame {
        Frame::method(
            0,
            Method::ConnectionOpenOk {
                known_hosts: String::new(),
            },
        )
    }

    fn channel_open(channel: u16) -> Frame {
        Frame::method(
            channel,
            Method::ChannelOpen {
                out_of_band: String::new(),
            },
        )
    }

    fn channel_open_ok(channel: u16) -> Frame {
        Frame::method(
            channel,
            Method::ChannelOpenOk {
                channel_id: Vec::new(),
            },
        )
    }

    #[test]
    fn test_idle_gate_passes_frames_through() {
        let mut gate = SyncGate::new();

        let sent = gate.submit(SubmitOptions::new(), vec![connection_open()]);
        assert_eq!(sent, vec![connection_open()]);
        assert!(gate.is_busy());
    }

    #[test]
    fn test_second_synchronous_send_deferred_until_reply() {
        let mut gate = SyncGate::new();

        let sent = gate.submit(SubmitOptions::new(), vec![connection_open()]);
        assert_eq!(sent.len(), 1);

        // Different class, still blocked by the outstanding call.
        let sent = gate.submit(SubmitOptions::new(), vec![channel_open(1)]);
        assert!(sent.is_empty());

        let flushed = gate.on_inbound(&connection_open_ok());
        assert_eq!(flushed, vec![channel_open(1)]);
        // The flushed channel.open is now the outstanding call.
        assert!(gate.is_busy());
    }

    #[test]
    fn test_deferred_batches_flush_fifo() {
        let mut gate = SyncGate::new();

        gate.submit(SubmitOptions::new(), vec![channel_open(1)]);
        assert!(gate.submit(SubmitOptions::new(), vec![channel_open(2)]).is_empty());
        assert!(gate.submit(SubmitOptions::new(), vec![channel_open(3)]).is_empty());

        // Reply to channel 1: channel 2's open goes out and becomes
        // outstanding; channel 3 is re-deferred behind it.
        let flushed = gate.on_inbound(&channel_open_ok(1));
        assert_eq!(flushed, vec![channel_open(2)]);

        let flushed = gate.on_inbound(&channel_open_ok(2));
        assert_eq!(flushed, vec![channel_open(3)]);

        let flushed = gate.on_inbound(&channel_open_ok(3));
        assert!(flushed.is_empty());
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_deferral_splits_batch_at_first_synchronous_frame() {
        let mut gate = SyncGate::new();

        gate.submit(SubmitOptions::new(), vec![connection_open()]);

        // Whole remaining submission defers as one batch, preserving order.
        let sent = gate.submit(
            SubmitOptions::new(),
            vec![channel_open(1), channel_open(2)],
        );
        assert!(sent.is_empty());

        let flushed = gate.on_inbound(&connection_open_ok());
        // channel 1 transmits and becomes outstanding; channel 2 stays
        // deferred within the same replayed batch.
        assert_eq!(flushed, vec![channel_open(1)]);

        let flushed = gate.on_inbound(&channel_open_ok(1));
        assert_eq!(flushed, vec![channel_open(2)]);
    }

    #[test]
    fn test_on_complete_invoked_exactly_once() {
        let mut gate = SyncGate::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        gate.submit(
            SubmitOptions::with_on_complete(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            vec![connection_open()],
        );

        assert_eq!(calls.load(Ordering::SeqCst), 0);

        gate.on_inbound(&connection_open_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A duplicate reply matches nothing and must not re-fire.
        gate.on_inbound(&connection_open_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deferred_batch_keeps_its_callback() {
        let mut gate = SyncGate::new();
        let calls = Arc::new(AtomicUsize::new(0));

        gate.submit(SubmitOptions::new(), vec![connection_open()]);

        let counter = calls.clone();
        gate.submit(
            SubmitOptions::with_on_complete(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            vec![channel_open(1)],
        );

        gate.on_inbound(&connection_open_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        gate.on_inbound(&channel_open_ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unmatched_reply_ignored() {
        let mut gate = SyncGate::new();

        gate.submit(SubmitOptions::new(), vec![connection_open()]);

        // channel.open-ok does not complete connection.open.
        let flushed = gate.on_inbound(&channel_open_ok(1));
        assert!(flushed.is_empty());
        assert!(gate.is_busy());
    }

    #[test]
    fn test_non_method_frame_skipped_rest_of_batch_sent() {
        let mut gate = SyncGate::new();

        let tune_ok = Frame::method(
            0,
            Method::ConnectionTuneOk {
                channel_max: 0,
                frame_max: 131072,
                heartbeat: 0,
            },
        );

        let sent = gate.submit(
            SubmitOptions::new(),
            vec![tune_ok.clone(), Frame::heartbeat(), connection_open()],
        );

        assert_eq!(sent, vec![tune_ok, connection_open()]);
    }

    #[test]
    fn test_reply_without_responses_creates_no_pending() {
        let mut gate = SyncGate::new();

        let tune_ok = Frame::method(
            0,
            Method::ConnectionTuneOk {
                channel_max: 0,
                frame_max: 131072,
                heartbeat: 0,
            },
        );

        let sent = gate.submit(SubmitOptions::new(), vec![tune_ok.clone()]);
        assert_eq!(sent, vec![tune_ok]);
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_inbound_non_method_frames_ignored() {
        let mut gate = SyncGate::new();
        gate.submit(SubmitOptions::new(), vec![connection_open()]);

        assert!(gate.on_inbound(&Frame::heartbeat()).is_empty());
        assert!(gate.is_busy());
    }
}
