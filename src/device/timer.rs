use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use tokio::spawn;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::types::DeviceIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    AdvertisementLiveness,
    ConnectTimeout,
    WriteResponse,
}

/// Posted into the event sequence when a timer elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub device: DeviceIdentity,
    pub kind: TimerKind,
    pub id: u64,
}

/**
 * Arms one-shot timers on the tokio runtime.
 *
 * A timer does not call back into its owner. It posts a `TimerFired` into a channel, which the
 * owner of the receiver feeds back into the device the timer belongs to. Because a firing can
 * already be queued when its timer is cancelled, owners compare `TimerFired::id` with the handle
 * they currently hold (see `TimerHandle::is_firing`).
 */
#[derive(Debug, Clone)]
pub struct TimerScheduler {
    sender: UnboundedSender<TimerFired>,
    next_id: Arc<AtomicU64>,
}

impl TimerScheduler {
    pub fn new() -> (Self, UnboundedReceiver<TimerFired>) {
        let (sender, receiver) = unbounded::<TimerFired>();
        let scheduler = TimerScheduler {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (scheduler, receiver)
    }

    pub fn schedule(&self, device: &DeviceIdentity, kind: TimerKind, after: Duration) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let sender = self.sender.clone();
        let fired = TimerFired { device: device.clone(), kind, id };
        let deadline = Instant::now() + after;

        spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {},
                _ = sleep_until(deadline) => {
                    // the receiver is gone when the coordinator shut down
                    let _ = sender.unbounded_send(fired);
                },
            }
        });

        TimerHandle { id, kind, cancel }
    }
}

/// Owns an armed timer; cancelling or dropping the handle stops the timer.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    kind: TimerKind,
    cancel: CancellationToken,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_firing(&self, fired: &TimerFired) -> bool {
        self.id == fired.id && self.kind == fired.kind
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// True if `fired` belongs to the timer currently held in `slot`.
pub fn is_current(slot: &Option<TimerHandle>, fired: &TimerFired) -> bool {
    slot.as_ref().map_or(false, |handle| handle.is_firing(fired))
}
