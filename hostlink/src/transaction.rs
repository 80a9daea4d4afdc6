//! Controller-side transaction manager.
//!
//! Owns the slot pool, the FIFO pending queue and the single active command.
//! All three live behind one lock; the lock is never held across an await.
//!
//! Responses carry no transaction id. A command-response frame completes
//! whichever slot is active, so only one command may be in flight at a time.
//! A response that arrives after its command timed out is discarded if no
//! command is active or if its message type does not answer the active
//! command. A late response of the same type as the next active command
//! cannot be told apart from that command's own response.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::bridge::envelope::{EnvelopeError, answers_command, peek_msg_type};
use crate::bridge::frame::Frame;
use crate::bridge::protocol::FailureStatus;
use crate::slot::{CommandPool, PoolError, SlotHandle, SlotState};

/// Outcome delivered to a waiting caller when its command does not produce a
/// usable response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("no command slots available (capacity {capacity})")]
    PoolExhausted { capacity: usize },
    #[error("command {code:#04x} timed out after {after:?}")]
    Timeout { code: u8, after: Duration },
    #[error("link to peripheral closed")]
    LinkClosed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("peripheral reported {status}: {message}")]
    Failed {
        status: FailureStatus,
        message: String,
    },
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl From<PoolError> for CommandError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { capacity } => Self::PoolExhausted { capacity },
        }
    }
}

/// Why an inbound command-response frame was not matched to a slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnmatchedResponse {
    #[error("no command is active")]
    NoActiveCommand,
    #[error("response type {response:#04x} does not answer active command {command:#04x}")]
    Mismatch { command: u8, response: u8 },
    #[error("empty response payload")]
    Empty,
}

/// Point-in-time view of the manager, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSnapshot {
    pub capacity: usize,
    pub available: usize,
    pub queued: usize,
    pub active: Option<SlotHandle>,
    pub completed: usize,
}

struct Inner {
    pool: CommandPool,
    pending: VecDeque<SlotHandle>,
    active: Option<SlotHandle>,
    closed: bool,
}

struct Shared {
    state: StdMutex<Inner>,
    transmit: mpsc::UnboundedSender<Frame>,
}

/// Submit/await front end over the slot pool. Cheap to clone.
#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<Shared>,
}

impl TransactionManager {
    /// `transmit` receives each request frame at the moment its slot becomes active.
    pub fn new(capacity: usize, transmit: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: StdMutex::new(Inner {
                    pool: CommandPool::new(capacity),
                    pending: VecDeque::new(),
                    active: None,
                    closed: false,
                }),
                transmit,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Transaction state mutex poisoned - recovering");
            poisoned.into_inner()
        })
    }

    /// Lease a slot for `request` and queue it. The command is transmitted
    /// immediately if nothing else is active.
    ///
    /// `request` must be an encoded envelope whose message type is `code`;
    /// the peripheral answers the type it decodes, and any other reply could
    /// never complete this command.
    pub fn submit(&self, code: u8, request: Bytes) -> Result<CommandHandle, CommandError> {
        match peek_msg_type(&request) {
            Some(msg_type) if msg_type == code => {}
            found => {
                tracing::warn!(code, ?found, "Rejecting request with mismatched message type");
                return Err(CommandError::Protocol(match found {
                    Some(msg_type) => format!(
                        "request message type {msg_type:#04x} does not match command {code:#04x}"
                    ),
                    None => "empty request payload".to_string(),
                }));
            }
        }

        let (waker, waiter) = oneshot::channel();

        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.closed {
            return Err(CommandError::LinkClosed);
        }

        let slot = match inner.pool.acquire(code, request) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(code, error = %e, "Rejecting command");
                return Err(e.into());
            }
        };
        if let Some(record) = inner.pool.get_mut(slot) {
            record.set_waker(waker);
        }
        inner.pending.push_back(slot);
        tracing::debug!(%slot, code, pending = inner.pending.len(), "Command queued");

        if inner.active.is_none() {
            self.promote_next(inner);
        }
        drop(guard);

        Ok(CommandHandle {
            slot,
            code,
            manager: self.clone(),
            waiter: Some(waiter),
            settled: false,
        })
    }

    /// Submit and wait in one call.
    pub async fn execute(
        &self,
        code: u8,
        request: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, CommandError> {
        self.submit(code, request)?.wait(timeout).await
    }

    /// Promote pending slots until one is active or the queue is empty.
    fn promote_next(&self, inner: &mut Inner) {
        while inner.active.is_none() {
            let Some(slot) = inner.pending.pop_front() else {
                return;
            };
            let Some(record) = inner.pool.get_mut(slot) else {
                tracing::error!(%slot, "Stale handle in pending queue");
                continue;
            };

            let request = record.activate().unwrap_or_default();
            let code = record.command_code();

            // Unbounded send never blocks, so it is safe under the lock and
            // keeps transmit order equal to promotion order.
            if self.shared.transmit.send(Frame::command(request)).is_err() {
                tracing::warn!(%slot, code, "Transmit channel closed - failing command");
                record.complete(Err(CommandError::LinkClosed));
                continue;
            }

            tracing::debug!(%slot, code, "Command active");
            inner.active = Some(slot);
        }
    }

    /// Attach `response` to the active slot and advance the queue.
    ///
    /// A response that cannot be matched leaves all state untouched.
    pub fn complete_active(&self, response: Bytes) -> Result<SlotHandle, UnmatchedResponse> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let Some(slot) = inner.active else {
            return Err(UnmatchedResponse::NoActiveCommand);
        };
        let Some(record) = inner.pool.get_mut(slot) else {
            tracing::error!(%slot, "Active handle is stale - clearing");
            inner.active = None;
            self.promote_next(inner);
            return Err(UnmatchedResponse::NoActiveCommand);
        };

        let Some(msg_type) = peek_msg_type(&response) else {
            return Err(UnmatchedResponse::Empty);
        };
        let code = record.command_code();
        if !answers_command(&response, code) {
            return Err(UnmatchedResponse::Mismatch {
                command: code,
                response: msg_type,
            });
        }

        record.complete(Ok(response));
        inner.active = None;
        tracing::debug!(%slot, code, "Command completed");
        self.promote_next(inner);
        Ok(slot)
    }

    /// Fail the active and every queued command, and refuse new submissions.
    pub fn fail_all(&self, error: CommandError) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.closed = true;

        let mut failed = 0;
        for slot in inner.active.take().into_iter().chain(inner.pending.drain(..)) {
            if let Some(record) = inner.pool.get_mut(slot)
                && record.complete(Err(error.clone()))
            {
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::warn!(failed, error = %error, "Failed outstanding commands");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn state(&self, slot: SlotHandle) -> Option<SlotState> {
        self.lock().pool.state(slot)
    }

    pub fn active(&self) -> Option<SlotHandle> {
        self.lock().active
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn available(&self) -> usize {
        self.lock().pool.available()
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        let inner = self.lock();
        TransactionSnapshot {
            capacity: inner.pool.capacity(),
            available: inner.pool.available(),
            queued: inner.pending.len(),
            active: inner.active,
            completed: inner.pool.count(SlotState::Completed),
        }
    }

    /// Take a completed outcome and free the slot, or register `rearm` as the
    /// slot's waker if it is still outstanding.
    fn collect(
        &self,
        slot: SlotHandle,
        rearm: oneshot::Sender<()>,
    ) -> Option<Result<Bytes, CommandError>> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let Some(record) = inner.pool.get_mut(slot) else {
            return Some(Err(CommandError::Protocol(format!(
                "command slot {slot} was released"
            ))));
        };
        if record.state() != SlotState::Completed {
            record.set_waker(rearm);
            return None;
        }

        let outcome = record
            .take_response()
            .unwrap_or_else(|| Err(CommandError::Protocol("completed without response".into())));
        inner.pool.release(slot);
        Some(outcome)
    }

    /// Pull a slot out of the pipeline whatever its state, free it, and
    /// promote the next command if the slot was active. Returns the outcome
    /// if the slot had already completed.
    fn retire(&self, slot: SlotHandle) -> Option<Result<Bytes, CommandError>> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let outcome = match inner.pool.state(slot) {
            None | Some(SlotState::Free) => return None,
            Some(SlotState::Completed) => inner.pool.get_mut(slot).and_then(|r| r.take_response()),
            Some(SlotState::Queued) => {
                inner.pending.retain(|queued| *queued != slot);
                None
            }
            Some(SlotState::Active) => {
                inner.active = None;
                None
            }
        };

        inner.pool.release(slot);
        if inner.active.is_none() {
            self.promote_next(inner);
        }
        outcome
    }
}

/// Deadline used when `now + timeout` does not fit in an `Instant`.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

/// A submitted command. Dropping it without waiting frees the slot.
#[must_use = "dropping a CommandHandle abandons the command"]
pub struct CommandHandle {
    slot: SlotHandle,
    code: u8,
    manager: TransactionManager,
    waiter: Option<oneshot::Receiver<()>>,
    settled: bool,
}

impl CommandHandle {
    pub fn slot(&self) -> SlotHandle {
        self.slot
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn state(&self) -> Option<SlotState> {
        self.manager.state(self.slot)
    }

    /// Block until the response arrives or `timeout` elapses.
    ///
    /// On timeout the slot is recycled and the next pending command is
    /// promoted. Wakeups are re-checked against the slot state.
    pub async fn wait(mut self, timeout: Duration) -> Result<Bytes, CommandError> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        let mut waiter = self.waiter.take();

        loop {
            let rx = match waiter.take() {
                Some(rx) => rx,
                None => {
                    let (tx, rx) = oneshot::channel();
                    if let Some(outcome) = self.manager.collect(self.slot, tx) {
                        self.settled = true;
                        return outcome;
                    }
                    rx
                }
            };

            if tokio::time::timeout_at(deadline, rx).await.is_err() {
                self.settled = true;
                return match self.manager.retire(self.slot) {
                    Some(outcome) => outcome,
                    None => {
                        tracing::warn!(
                            slot = %self.slot,
                            code = self.code,
                            after = ?timeout,
                            "Command timed out"
                        );
                        Err(CommandError::Timeout {
                            code: self.code,
                            after: timeout,
                        })
                    }
                };
            }
        }
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(slot = %self.slot, code = self.code, "Command abandoned");
            self.manager.retire(self.slot);
        }
    }
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("slot", &self.slot)
            .field("code", &self.code)
            .field("settled", &self.settled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn manager(capacity: usize) -> (TransactionManager, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TransactionManager::new(capacity, tx), rx)
    }

    /// Minimal request envelope for `code`.
    fn request_for(code: u8) -> Bytes {
        Bytes::from(vec![code, 0, 0])
    }

    /// Request for `code` whose one-byte body tells it apart on the wire.
    fn tagged(code: u8, tag: u8) -> Bytes {
        Bytes::from(vec![code, 1, 0, tag])
    }

    /// Minimal response envelope answering `code`.
    fn response_for(code: u8) -> Bytes {
        Bytes::from(vec![code + 1, 0, 0])
    }

    #[tokio::test]
    async fn submit_transmits_and_wait_returns_response() {
        let (mgr, mut wire) = manager(2);

        let handle = mgr.submit(0, tagged(0, 7)).unwrap();
        assert_eq!(handle.state(), Some(SlotState::Active));

        let frame = wire.recv().await.unwrap();
        assert_eq!(frame.payload, tagged(0, 7));

        mgr.complete_active(response_for(0)).unwrap();
        assert_eq!(handle.wait(TIMEOUT).await.unwrap(), response_for(0));
        assert_eq!(mgr.available(), 2);
    }

    #[tokio::test]
    async fn exhausted_pool_rejects_without_loss() {
        let (mgr, _wire) = manager(1);

        let first = mgr.submit(0, request_for(0)).unwrap();
        let err = mgr.submit(2, request_for(2)).unwrap_err();
        assert_eq!(err, CommandError::PoolExhausted { capacity: 1 });

        mgr.complete_active(response_for(0)).unwrap();
        first.wait(TIMEOUT).await.unwrap();
        assert!(mgr.submit(2, request_for(2)).is_ok());
    }

    #[tokio::test]
    async fn queued_command_is_promoted_in_order() {
        let (mgr, mut wire) = manager(2);

        let first = mgr.submit(0, tagged(0, 1)).unwrap();
        let second = mgr.submit(2, tagged(2, 2)).unwrap();
        assert_eq!(second.state(), Some(SlotState::Queued));
        assert_eq!(mgr.pending_len(), 1);

        assert_eq!(wire.recv().await.unwrap().payload, tagged(0, 1));
        assert!(wire.try_recv().is_err());

        mgr.complete_active(response_for(0)).unwrap();
        assert_eq!(second.state(), Some(SlotState::Active));
        assert_eq!(wire.recv().await.unwrap().payload, tagged(2, 2));

        mgr.complete_active(response_for(2)).unwrap();
        assert_eq!(first.wait(TIMEOUT).await.unwrap(), response_for(0));
        assert_eq!(second.wait(TIMEOUT).await.unwrap(), response_for(2));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_recycles_slot_and_advances_queue() {
        let (mgr, mut wire) = manager(2);

        let stuck = mgr.submit(6, request_for(6)).unwrap();
        let next = mgr.submit(0, tagged(0, 9)).unwrap();
        wire.recv().await.unwrap();

        let err = stuck.wait(Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(
            err,
            CommandError::Timeout {
                code: 6,
                after: Duration::from_millis(100)
            }
        );

        assert_eq!(next.state(), Some(SlotState::Active));
        assert_eq!(wire.recv().await.unwrap().payload, tagged(0, 9));
        assert_eq!(mgr.available(), 1);

        // Late answer to the timed-out command does not match the new one.
        assert_eq!(
            mgr.complete_active(response_for(6)),
            Err(UnmatchedResponse::Mismatch {
                command: 0,
                response: 7
            })
        );
        mgr.complete_active(response_for(0)).unwrap();
        next.wait(TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn response_without_active_command_is_discarded() {
        let (mgr, _wire) = manager(2);
        let before = mgr.snapshot();

        assert_eq!(
            mgr.complete_active(response_for(0)),
            Err(UnmatchedResponse::NoActiveCommand)
        );
        assert_eq!(mgr.snapshot(), before);
    }

    #[tokio::test]
    async fn empty_response_is_discarded() {
        let (mgr, _wire) = manager(1);
        let handle = mgr.submit(0, request_for(0)).unwrap();

        assert_eq!(mgr.complete_active(Bytes::new()), Err(UnmatchedResponse::Empty));
        assert_eq!(handle.state(), Some(SlotState::Active));
    }

    #[tokio::test]
    async fn failure_response_answers_active_command() {
        let (mgr, _wire) = manager(1);
        let handle = mgr.submit(14, request_for(14)).unwrap();

        let failure = Bytes::from(vec![0xFF, 0x03, 0x00, 14, 2, 0]);
        mgr.complete_active(failure.clone()).unwrap();
        assert_eq!(handle.wait(TIMEOUT).await.unwrap(), failure);
    }

    #[tokio::test]
    async fn dropped_handles_free_their_slots() {
        let (mgr, mut wire) = manager(3);

        let active = mgr.submit(0, request_for(0)).unwrap();
        let queued = mgr.submit(2, request_for(2)).unwrap();
        let last = mgr.submit(4, tagged(4, 3)).unwrap();
        wire.recv().await.unwrap();

        drop(queued);
        assert_eq!(mgr.pending_len(), 1);

        drop(active);
        assert_eq!(last.state(), Some(SlotState::Active));
        assert_eq!(wire.recv().await.unwrap().payload, tagged(4, 3));
        assert_eq!(mgr.available(), 2);
    }

    #[tokio::test]
    async fn fail_all_completes_every_waiter() {
        let (mgr, _wire) = manager(2);

        let first = mgr.submit(0, request_for(0)).unwrap();
        let second = mgr.submit(2, request_for(2)).unwrap();
        mgr.fail_all(CommandError::LinkClosed);

        assert_eq!(first.wait(TIMEOUT).await, Err(CommandError::LinkClosed));
        assert_eq!(second.wait(TIMEOUT).await, Err(CommandError::LinkClosed));
        assert_eq!(mgr.available(), 2);
        assert_eq!(mgr.submit(0, request_for(0)).unwrap_err(), CommandError::LinkClosed);
    }

    #[tokio::test]
    async fn closed_transmit_channel_fails_command() {
        let (mgr, wire) = manager(1);
        drop(wire);

        let handle = mgr.submit(0, request_for(0)).unwrap();
        assert_eq!(handle.wait(TIMEOUT).await, Err(CommandError::LinkClosed));
        assert_eq!(mgr.active(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submitters_see_single_active_command() {
        const CALLERS: usize = 16;
        let (mgr, mut wire) = manager(4);

        let responder = {
            let mgr = mgr.clone();
            tokio::spawn(async move {
                let mut served = 0;
                while let Some(frame) = wire.recv().await {
                    let snapshot = mgr.snapshot();
                    assert!(snapshot.active.is_some());
                    assert!(snapshot.queued + 1 + snapshot.completed <= snapshot.capacity);

                    tokio::task::yield_now().await;
                    mgr.complete_active(response_for(frame.payload[0])).unwrap();
                    served += 1;
                    if served == CALLERS {
                        break;
                    }
                }
                served
            })
        };

        let mut callers = Vec::new();
        for i in 0..CALLERS {
            let mgr = mgr.clone();
            callers.push(tokio::spawn(async move {
                let code = (i % 8 * 2) as u8;
                loop {
                    match mgr.submit(code, request_for(code)) {
                        Ok(handle) => return handle.wait(TIMEOUT).await,
                        Err(CommandError::PoolExhausted { .. }) => tokio::task::yield_now().await,
                        Err(e) => return Err(e),
                    }
                }
            }));
        }

        for (i, caller) in callers.into_iter().enumerate() {
            let code = (i % 8 * 2) as u8;
            assert_eq!(caller.await.unwrap().unwrap(), response_for(code));
        }
        assert_eq!(responder.await.unwrap(), CALLERS);
        assert_eq!(mgr.available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_wait_returns_response() {
        let (mgr, _wire) = manager(1);
        let handle = mgr.submit(0, request_for(0)).unwrap();

        let responder = {
            let mgr = mgr.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                mgr.complete_active(response_for(0)).unwrap();
            })
        };

        assert_eq!(handle.wait(Duration::MAX).await.unwrap(), response_for(0));
        responder.await.unwrap();
        assert_eq!(mgr.available(), 1);
    }

    #[tokio::test]
    async fn request_must_carry_its_command_code() {
        let (mgr, mut wire) = manager(2);

        let err = mgr.submit(4, request_for(2)).unwrap_err();
        assert_eq!(
            err,
            CommandError::Protocol(
                "request message type 0x02 does not match command 0x04".to_string()
            )
        );
        let err = mgr.submit(0, Bytes::new()).unwrap_err();
        assert_eq!(err, CommandError::Protocol("empty request payload".to_string()));

        // Nothing was leased or transmitted.
        assert_eq!(mgr.available(), 2);
        assert!(wire.try_recv().is_err());

        let handle = mgr.submit(2, request_for(2)).unwrap();
        assert_eq!(wire.recv().await.unwrap().payload, request_for(2));
        mgr.complete_active(response_for(2)).unwrap();
        assert_eq!(handle.wait(TIMEOUT).await.unwrap(), response_for(2));
    }
}
