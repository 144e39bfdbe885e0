//! Size-change notification between a grid and its subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Broadcasts "geometry changed" to every connected [`SizeChangeSlot`].
///
/// Slots hold the only strong reference to their flag, so dropping a
/// subscriber disconnects it.
#[derive(Debug, Default)]
pub struct SizeChangeSignal {
    slots: Mutex<Vec<Weak<AtomicBool>>>,
}

/// Subscriber side of a [`SizeChangeSignal`].
#[derive(Debug)]
pub struct SizeChangeSlot {
    flag: Arc<AtomicBool>,
}

impl SizeChangeSignal {
    /// Create a signal with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe. The returned slot starts lowered.
    pub fn connect(&self) -> SizeChangeSlot {
        let flag = Arc::new(AtomicBool::new(false));
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.push(Arc::downgrade(&flag));
        SizeChangeSlot { flag }
    }

    /// Raise every live slot and forget the dead ones.
    pub fn emit(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|w| match w.upgrade() {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        });
    }
}

impl SizeChangeSlot {
    /// Whether a change was signalled since the last [`SizeChangeSlot::take`].
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Read and lower the flag.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}
