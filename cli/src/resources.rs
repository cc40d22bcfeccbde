use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Opaque reference to audio held by a [`ResourcePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayableHandle(u64);

impl fmt::Display for PlayableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audio#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Audio returned by the backend for a track.
    Generated(Arc<[u8]>),
    /// A file the user supplied for remixing.
    Uploaded { name: String, bytes: Arc<[u8]> },
}

impl AudioSource {
    pub fn bytes(&self) -> &Arc<[u8]> {
        match self {
            Self::Generated(bytes) => bytes,
            Self::Uploaded { bytes, .. } => bytes,
        }
    }
}

/// Owns every locally playable buffer of the session.
///
/// Handles are never reused, so a stale handle can only ever miss.
#[derive(Debug, Default)]
pub struct ResourcePool {
    next: u64,
    live: HashMap<PlayableHandle, AudioSource>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, source: AudioSource) -> PlayableHandle {
        self.next += 1;
        let handle = PlayableHandle(self.next);
        debug!("acquired {handle} ({} bytes)", source.bytes().len());
        self.live.insert(handle, source);
        handle
    }

    /// Releasing an unknown or already released handle does nothing.
    pub fn release(&mut self, handle: PlayableHandle) {
        if self.live.remove(&handle).is_some() {
            debug!("released {handle}");
        }
    }

    pub fn resolve(&self, handle: PlayableHandle) -> Option<&AudioSource> {
        self.live.get(&handle)
    }

    #[cfg(test)]
    pub fn is_live(&self, handle: PlayableHandle) -> bool {
        self.live.contains_key(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    #[cfg(test)]
    pub fn live_handles(&self) -> impl Iterator<Item = PlayableHandle> + '_ {
        self.live.keys().copied()
    }

    pub fn release_all(&mut self) {
        let count = self.live.len();
        self.live.clear();
        if count > 0 {
            debug!("released {count} remaining handles");
        }
    }
}
