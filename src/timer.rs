//! One-shot timers, integrated with the event loop.
//!
//! The wheel holds callbacks keyed by deadline; the event loop asks for
//! the next deadline to bound its wait and pops due entries after a
//! timer wake. The handle returned to the caller owns the registration:
//! dropping it before the timer fires cancels the callback.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::time::Instant;

use crate::command::TimerCallback;

type TimerKey = (Instant, u64);

#[derive(Default)]
pub(crate) struct TimerWheel {
    entries: BTreeMap<TimerKey, TimerCallback>,
    next_seq: u64,
}

impl TimerWheel {
    pub(crate) fn insert(&mut self, deadline: Instant, cb: TimerCallback) -> TimerKey {
        let key = (deadline, self.next_seq);
        self.next_seq += 1;
        self.entries.insert(key, cb);
        key
    }

    fn remove(&mut self, key: TimerKey) {
        self.entries.remove(&key);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Pop the earliest entry whose deadline has passed, if any.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerCallback> {
        let key = *self.entries.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.entries.remove(&key)
    }
}

/// Owns a scheduled timer. Drop before firing to cancel; call
/// [`TimerHandle::detach`] to let the timer run unowned.
pub struct TimerHandle {
    wheel: Weak<Mutex<TimerWheel>>,
    key: TimerKey,
    detached: bool,
}

impl TimerHandle {
    pub(crate) fn new(wheel: &Arc<Mutex<TimerWheel>>, key: TimerKey) -> Self {
        Self {
            wheel: Arc::downgrade(wheel),
            key,
            detached: false,
        }
    }

    /// Give up ownership: the registration stays in the wheel and fires
    /// on schedule with nobody able to cancel it.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(wheel) = self.wheel.upgrade() {
            wheel.lock().unwrap().remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn noop() -> TimerCallback {
        Box::new(|plugin| Ok(plugin.timer_complete()))
    }

    #[tokio::test]
    async fn due_entries_pop_in_deadline_order() {
        let mut wheel = TimerWheel::default();
        let now = Instant::now();
        wheel.insert(now + Duration::from_millis(20), noop());
        wheel.insert(now + Duration::from_millis(10), noop());

        assert_eq!(wheel.next_deadline(), Some(now + Duration::from_millis(10)));
        assert!(wheel.pop_due(now).is_none(), "nothing is due yet");
        assert!(wheel.pop_due(now + Duration::from_millis(15)).is_some());
        assert_eq!(wheel.next_deadline(), Some(now + Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels() {
        let wheel = Arc::new(Mutex::new(TimerWheel::default()));
        let key = wheel
            .lock()
            .unwrap()
            .insert(Instant::now() + Duration::from_millis(5), noop());
        let handle = TimerHandle::new(&wheel, key);
        drop(handle);
        assert!(wheel.lock().unwrap().next_deadline().is_none());
    }

    #[tokio::test]
    async fn detached_handles_leave_the_registration() {
        let wheel = Arc::new(Mutex::new(TimerWheel::default()));
        let key = wheel
            .lock()
            .unwrap()
            .insert(Instant::now() + Duration::from_millis(5), noop());
        TimerHandle::new(&wheel, key).detach();
        assert!(wheel.lock().unwrap().next_deadline().is_some());
    }
}
