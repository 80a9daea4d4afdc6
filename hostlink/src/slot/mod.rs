//! Command slot pool.
//!
//! Slots are preallocated when the pool is created and leased by handle.
//! Each slot carries an explicit lifecycle state:
//! - `Free` → `Queued` via `acquire()`
//! - `Queued` → `Active` when the transaction manager promotes it
//! - `Active` → `Completed` when a response (or failure) is attached
//! - any state → `Free` via `release()`, which clears both payloads
//!
//! Handles carry a generation so a handle to a released slot never aliases
//! the slot's next lease.

mod pool;

pub use pool::{CommandPool, CommandSlot, MAX_SLOTS, PoolError, SlotHandle, SlotState};
