//! Fixed-capacity arena of command slots.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::transaction::CommandError;

/// Upper bound on pool capacity; slot indices fit in a `u16`.
pub const MAX_SLOTS: usize = u16::MAX as usize;

/// Lease on a pool slot. Stale once the slot is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SlotHandle {
    index: u16,
    generation: u32,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Free,
    Queued,
    Active,
    Completed,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no command slots available (capacity {capacity})")]
    Exhausted { capacity: usize },
}

/// Transaction record owned by the pool.
#[derive(Debug)]
pub struct CommandSlot {
    state: SlotState,
    generation: u32,
    command_code: u8,
    request: Option<Bytes>,
    response: Option<Result<Bytes, CommandError>>,
    waker: Option<oneshot::Sender<()>>,
}

impl CommandSlot {
    fn empty() -> Self {
        Self {
            state: SlotState::Free,
            generation: 0,
            command_code: 0,
            request: None,
            response: None,
            waker: None,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn command_code(&self) -> u8 {
        self.command_code
    }

    pub fn request(&self) -> Option<&Bytes> {
        self.request.as_ref()
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Register the single waiter for this slot, replacing any previous one.
    pub fn set_waker(&mut self, waker: oneshot::Sender<()>) {
        self.waker = Some(waker);
    }

    pub(crate) fn activate(&mut self) -> Option<Bytes> {
        debug_assert_eq!(self.state, SlotState::Queued);
        self.state = SlotState::Active;
        self.request.clone()
    }

    /// Attach the outcome and wake the waiter. Returns false if the slot was
    /// already completed or is not leased.
    pub(crate) fn complete(&mut self, outcome: Result<Bytes, CommandError>) -> bool {
        if matches!(self.state, SlotState::Free | SlotState::Completed) {
            return false;
        }
        self.state = SlotState::Completed;
        self.response = Some(outcome);
        if let Some(waker) = self.waker.take() {
            // Waiter may already be gone (handle dropped mid-wait).
            let _ = waker.send(());
        }
        true
    }

    pub(crate) fn take_response(&mut self) -> Option<Result<Bytes, CommandError>> {
        self.response.take()
    }
}

/// Preallocated slots indexed by [`SlotHandle`].
///
/// The pool never grows. Callers serialize access; the transaction manager
/// keeps it behind the same lock as its pending queue and active pointer.
#[derive(Debug)]
pub struct CommandPool {
    slots: Vec<CommandSlot>,
    available: usize,
}

impl CommandPool {
    /// Capacity is clamped to `1..=MAX_SLOTS`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_SLOTS);
        Self {
            slots: (0..capacity).map(|_| CommandSlot::empty()).collect(),
            available: capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.available
    }

    /// Lease a free slot and fill its request. The slot starts `Queued`.
    pub fn acquire(&mut self, command_code: u8, request: Bytes) -> Result<SlotHandle, PoolError> {
        let Some(index) = self.slots.iter().position(|s| s.state == SlotState::Free) else {
            return Err(PoolError::Exhausted {
                capacity: self.capacity(),
            });
        };

        let slot = &mut self.slots[index];
        slot.state = SlotState::Queued;
        slot.command_code = command_code;
        slot.request = Some(request);
        slot.response = None;
        slot.waker = None;
        self.available -= 1;

        Ok(SlotHandle {
            index: index as u16,
            generation: slot.generation,
        })
    }

    /// Return a slot to the free set, dropping both payloads.
    ///
    /// Returns false for a stale handle or a slot that is already free.
    pub fn release(&mut self, handle: SlotHandle) -> bool {
        let Some(slot) = self.get_mut(handle) else {
            return false;
        };
        if slot.state == SlotState::Free {
            return false;
        }

        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        slot.request = None;
        slot.response = None;
        slot.waker = None;
        self.available += 1;
        true
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&CommandSlot> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut CommandSlot> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
    }

    /// State of the leased slot, or `None` if the handle is stale.
    pub fn state(&self, handle: SlotHandle) -> Option<SlotState> {
        self.get(handle).map(CommandSlot::state)
    }

    pub fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }
}
