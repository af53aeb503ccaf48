//! State shared between producers and the worker thread.
//!
//! Two locks, always taken in the order mailbox → lifecycle:
//! - the mailbox lock covers the channel sender and the set of pending
//!   delayed-flush tags, so a duplicate check and its send are one step;
//! - the lifecycle lock covers `Alive`/`Dead`. The worker takes it alone
//!   and never reaches for the mailbox lock while holding it.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::types::Lifecycle;

use super::command::{Command, FlushTag};

struct Mailbox {
    tx: Option<UnboundedSender<Command>>,
    delayed: HashSet<FlushTag>,
}

pub(crate) struct Shared {
    mailbox: Mutex<Mailbox>,
    lifecycle: Mutex<Lifecycle>,
}

/// Latest deadline a delayed flush is armed for
const MAX_FLUSH_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_FLUSH_DELAY)).unwrap_or(now)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn new() -> (Self, UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Self {
            mailbox: Mutex::new(Mailbox {
                tx: Some(tx),
                delayed: HashSet::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::Alive),
        };
        (shared, rx)
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        *lock(&self.lifecycle)
    }

    /// Hand a command to the worker. Returns false if it was dropped.
    pub(crate) fn deliver(&self, command: Command) -> bool {
        let mailbox = lock(&self.mailbox);
        Self::send(&mailbox, self.lifecycle(), command)
    }

    /// Hand a delayed flush to the worker unless one with `tag` is pending.
    pub(crate) fn deliver_delayed(&self, tag: FlushTag, delay: Duration) -> bool {
        let mut mailbox = lock(&self.mailbox);
        if mailbox.delayed.contains(&tag) {
            tracing::trace!(%tag, "Delayed flush already pending; coalesced");
            return false;
        }
        let command = Command::FlushDelayed {
            tag,
            fire_at: deadline_after(Instant::now(), delay),
        };
        let sent = Self::send(&mailbox, self.lifecycle(), command);
        if sent {
            mailbox.delayed.insert(tag);
        }
        sent
    }

    fn send(mailbox: &Mailbox, lifecycle: Lifecycle, command: Command) -> bool {
        if lifecycle == Lifecycle::Dead {
            tracing::debug!(command = command.kind(), "Dead worker dropping a command");
            return false;
        }
        let Some(tx) = mailbox.tx.as_ref() else {
            tracing::debug!(command = command.kind(), "Mailbox closed; dropping a command");
            return false;
        };
        match tx.send(command) {
            Ok(()) => true,
            Err(rejected) => {
                tracing::debug!(
                    command = rejected.0.kind(),
                    "Worker gone; dropping a command"
                );
                false
            }
        }
    }

    /// A delayed flush timer fired; later requests for `tag` schedule anew.
    pub(crate) fn fire(&self, tag: FlushTag) {
        lock(&self.mailbox).delayed.remove(&tag);
    }

    /// Transition to `Dead`, running `last_rites` under the lifecycle lock.
    pub(crate) fn mark_dead_with<R>(&self, last_rites: impl FnOnce() -> R) -> R {
        let mut lifecycle = lock(&self.lifecycle);
        let result = last_rites();
        *lifecycle = Lifecycle::Dead;
        result
    }

    pub(crate) fn mark_dead(&self) {
        self.mark_dead_with(|| ());
    }

    /// Stop accepting commands. Already queued commands stay in the channel.
    pub(crate) fn close(&self) {
        let mut mailbox = lock(&self.mailbox);
        mailbox.tx = None;
        mailbox.delayed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::command::AUTO_FLUSH;

    #[test]
    fn test_delayed_flushes_coalesce_until_fired() {
        let (shared, mut rx) = Shared::new();
        assert!(shared.deliver_delayed(AUTO_FLUSH, Duration::from_millis(50)));
        assert!(!shared.deliver_delayed(AUTO_FLUSH, Duration::from_millis(50)));
        assert!(!shared.deliver_delayed(AUTO_FLUSH, Duration::from_millis(10)));

        assert!(matches!(
            rx.try_recv(),
            Ok(Command::FlushDelayed { tag, .. }) if tag == AUTO_FLUSH
        ));
        assert!(rx.try_recv().is_err());

        shared.fire(AUTO_FLUSH);
        assert!(shared.deliver_delayed(AUTO_FLUSH, Duration::from_millis(50)));
    }

    #[test]
    fn test_huge_delay_is_clamped() {
        let (shared, mut rx) = Shared::new();
        let before = Instant::now();
        assert!(shared.deliver_delayed(AUTO_FLUSH, Duration::MAX));
        assert!(!shared.deliver_delayed(AUTO_FLUSH, Duration::MAX));

        match rx.try_recv() {
            Ok(Command::FlushDelayed { fire_at, .. }) => {
                assert!(fire_at > before);
                assert!(fire_at <= Instant::now() + MAX_FLUSH_DELAY);
            }
            other => panic!("expected a delayed flush, got {:?}", other),
        }
    }

    #[test]
    fn test_tags_coalesce_independently() {
        let (shared, _rx) = Shared::new();
        assert!(shared.deliver_delayed(AUTO_FLUSH, Duration::from_secs(1)));
        assert!(shared.deliver_delayed(FlushTag::new("session_end"), Duration::from_secs(1)));
    }

    #[test]
    fn test_immediate_flushes_never_coalesce() {
        let (shared, mut rx) = Shared::new();
        for _ in 0..3 {
            assert!(shared.deliver(Command::FlushNow));
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[test]
    fn test_dead_mailbox_drops_everything() {
        let (shared, mut rx) = Shared::new();
        shared.mark_dead();
        assert_eq!(shared.lifecycle(), Lifecycle::Dead);
        assert!(!shared.deliver(Command::FlushNow));
        assert!(!shared.deliver_delayed(AUTO_FLUSH, Duration::from_millis(5)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_mailbox_drops_commands() {
        let (shared, _rx) = Shared::new();
        shared.close();
        assert_eq!(shared.lifecycle(), Lifecycle::Alive);
        assert!(!shared.deliver(Command::KillWorker));
    }

    #[test]
    fn test_last_rites_run_before_death_is_visible() {
        let (shared, _rx) = Shared::new();
        let seen = shared.mark_dead_with(|| 7);
        assert_eq!(seen, 7);
        assert_eq!(shared.lifecycle(), Lifecycle::Dead);
    }
}
