use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use crate::sync;

/// Kind of change a listener subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Pixel data or stack geometry changed.
    Image,
    /// A region-of-interest set changed.
    Roi,
    /// Any change.
    Both,
}

impl EventKind {
    fn matches(self, event: EventKind) -> bool {
        self == Self::Both || event == Self::Both || self == event
    }
}

/// Handle returned by [`ListenerRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub type Callback = Arc<dyn Fn(EventKind) + Send + Sync>;

/// Tracks in-flight invocations of one callback so deletion can wait for them.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    running: Vec<ThreadId>,
}

struct Running<'a> {
    gate: &'a Gate,
    thread: ThreadId,
}

impl Gate {
    fn enter(&self) -> Option<Running<'_>> {
        let mut state = sync::lock(&self.state);
        if state.closed {
            return None;
        }
        let thread = thread::current().id();
        state.running.push(thread);
        Some(Running { gate: self, thread })
    }

    /// Close the gate and wait until invocations on other threads have returned.
    /// An invocation on the calling thread (a callback deleting itself) is not awaited.
    fn close(&self) {
        let me = thread::current().id();
        let mut state = sync::lock(&self.state);
        state.closed = true;
        while state.running.iter().any(|&t| t != me) {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let mut state = sync::lock(&self.gate.state);
        if let Some(pos) = state.running.iter().position(|&t| t == self.thread) {
            state.running.swap_remove(pos);
        }
        self.gate.idle.notify_all();
    }
}

struct Registration {
    id: ListenerId,
    kind: EventKind,
    callback: Callback,
    gate: Gate,
}

/// Instance-scoped observer list.
///
/// Notification iterates over a snapshot of the registrations taken at
/// notify time, so callbacks may register or delete listeners (including
/// themselves) without disturbing the ongoing notification.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Arc<Registration>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: impl Fn(EventKind) + Send + Sync + 'static, kind: EventKind) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        sync::lock(&self.entries).push(Arc::new(Registration {
            id,
            kind,
            callback: Arc::new(callback),
            gate: Gate::default(),
        }));
        id
    }

    /// Remove a registration. Once this returns, the callback never fires
    /// again; invocations already running on other threads are awaited.
    ///
    /// That wait can deadlock: do not delete while holding a lock the
    /// callback takes, and do not let callbacks on different threads delete
    /// each other.
    pub fn delete(&self, id: ListenerId) -> bool {
        let removed = {
            let mut entries = sync::lock(&self.entries);
            entries
                .iter()
                .position(|r| r.id == id)
                .map(|pos| entries.remove(pos))
        };
        match removed {
            Some(registration) => {
                registration.gate.close();
                true
            }
            None => false,
        }
    }

    /// Synchronously invoke, in registration order, every callback
    /// subscribed to `event`.
    pub fn notify(&self, event: EventKind) {
        let snapshot: Vec<Arc<Registration>> = sync::lock(&self.entries)
            .iter()
            .filter(|r| r.kind.matches(event))
            .cloned()
            .collect();

        for registration in snapshot {
            if let Some(_running) = registration.gate.enter() {
                (registration.callback)(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        sync::lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_kind_filtering() {
        let registry = ListenerRegistry::new();
        let image = Arc::new(AtomicUsize::new(0));
        let roi = Arc::new(AtomicUsize::new(0));
        let both = Arc::new(AtomicUsize::new(0));

        for (counter, kind) in [
            (&image, EventKind::Image),
            (&roi, EventKind::Roi),
            (&both, EventKind::Both),
        ] {
            let counter = Arc::clone(counter);
            registry.register(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                kind,
            );
        }

        registry.notify(EventKind::Image);
        registry.notify(EventKind::Roi);
        registry.notify(EventKind::Both);

        assert_eq!(image.load(Ordering::SeqCst), 2);
        assert_eq!(roi.load(Ordering::SeqCst), 2);
        assert_eq!(both.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_registration_order_and_delete() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c1 = Arc::clone(&calls);
        let first = registry.register(move |_| c1.lock().unwrap().push(1), EventKind::Roi);
        let c2 = Arc::clone(&calls);
        registry.register(move |_| c2.lock().unwrap().push(2), EventKind::Roi);

        registry.notify(EventKind::Roi);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);

        assert!(registry.delete(first));
        assert!(!registry.delete(first));
        registry.notify(EventKind::Roi);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2, 2]);
    }

    #[test]
    fn test_self_delete_during_notify() {
        let registry = Arc::new(ListenerRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let id_slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let reg = Arc::clone(&registry);
        let slot = Arc::clone(&id_slot);
        let counter = Arc::clone(&calls);
        let id = registry.register(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *slot.lock().unwrap() {
                    reg.delete(id);
                }
            },
            EventKind::Image,
        );
        *id_slot.lock().unwrap() = Some(id);

        registry.notify(EventKind::Image);
        registry.notify(EventKind::Image);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delete_waits_for_callback_running_elsewhere() {
        use std::sync::atomic::AtomicBool;
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let registry = Arc::new(ListenerRegistry::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let id = registry.register(
            move |_| {
                entered_tx.lock().unwrap().send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            },
            EventKind::Image,
        );

        let notifier = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.notify(EventKind::Image))
        };
        entered_rx.recv().unwrap();

        let deleted = Arc::new(AtomicBool::new(false));
        let deleter = {
            let registry = Arc::clone(&registry);
            let deleted = Arc::clone(&deleted);
            thread::spawn(move || {
                assert!(registry.delete(id));
                deleted.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!deleted.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        notifier.join().unwrap();
        deleter.join().unwrap();
        assert!(deleted.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_during_notify_not_called_in_same_round() {
        let registry = Arc::new(ListenerRegistry::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let reg = Arc::clone(&registry);
        let late = Arc::clone(&late_calls);
        registry.register(
            move |_| {
                let late = Arc::clone(&late);
                reg.register(
                    move |_| {
                        late.fetch_add(1, Ordering::SeqCst);
                    },
                    EventKind::Image,
                );
            },
            EventKind::Image,
        );

        registry.notify(EventKind::Image);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        registry.notify(EventKind::Image);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }
}
