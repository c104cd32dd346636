//! Channel registry - maps channel ids to collaborator routing targets.
//!
//! Each registered channel has a routing target: an unbounded sender the
//! dispatcher pushes inbound frames into, fire-and-forget. The matching
//! [`ChannelHandle`] is what a channel collaborator holds to receive those
//! frames.
//!
//! Two creation paths, deliberately asymmetric:
//! - [`ChannelRegistry::open`] (explicit) creates the entry *and* returns the
//!   `channel.open` frame to issue on its behalf.
//! - [`ChannelRegistry::route`] (inbound lookup) creates the entry silently;
//!   the remote already knows the channel id or it would not be sending
//!   frames on it. The receiver is parked until a later `open` claims it.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::protocol::{Frame, Method};

/// Handle held by a channel collaborator.
///
/// Receives every inbound frame addressed to this channel, in arrival order.
#[derive(Debug)]
pub struct ChannelHandle {
    id: u16,
    frames: mpsc::UnboundedReceiver<Frame>,
}

impl ChannelHandle {
    /// Channel id this handle is bound to.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Receive the next inbound frame for this channel.
    ///
    /// Returns `None` once the connection engine is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }
}

struct ChannelEntry {
    target: mpsc::UnboundedSender<Frame>,
    /// Receiver side of an implicitly-created channel, waiting to be claimed.
    parked: Option<mpsc::UnboundedReceiver<Frame>>,
}

impl ChannelEntry {
    fn new() -> Self {
        let (target, receiver) = mpsc::unbounded_channel();
        Self {
            target,
            parked: Some(receiver),
        }
    }
}

/// Registry of channel routing targets, owned by the connection engine.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<u16, ChannelEntry>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channels are registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Explicitly obtain the handle for `id`, creating the channel on first
    /// reference.
    ///
    /// Returns the handle (or `None` if a handle for this id was already
    /// claimed) and, only when this call created the entry, the
    /// `channel.open` frame to submit on the new channel's behalf. Claiming a
    /// channel that inbound routing created implicitly issues no open: the
    /// remote already knows the id.
    pub fn open(&mut self, id: u16) -> (Option<ChannelHandle>, Option<Frame>) {
        let mut open_frame = None;

        let entry = self.channels.entry(id).or_insert_with(|| {
            open_frame = Some(Frame::method(
                id,
                Method::ChannelOpen {
                    out_of_band: String::new(),
                },
            ));
            ChannelEntry::new()
        });

        let handle = entry
            .parked
            .take()
            .map(|frames| ChannelHandle { id, frames });
        if handle.is_none() {
            tracing::warn!(channel = id, "channel handle already claimed");
        }

        (handle, open_frame)
    }

    /// Route an inbound frame to the channel's target, creating the channel
    /// silently if it is unknown. Fire-and-forget: a collaborator that has
    /// dropped its handle just loses the frame (logged).
    pub fn route(&mut self, id: u16, frame: Frame) {
        let entry = self.channels.entry(id).or_insert_with(|| {
            tracing::debug!(channel = id, "creating channel from inbound frame");
            ChannelEntry::new()
        });

        if entry.target.send(frame).is_err() {
            tracing::warn!(channel = id, "channel collaborator gone, dropping frame");
        }
    }
}
