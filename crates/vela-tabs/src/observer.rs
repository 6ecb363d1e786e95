//! Observer fan-out
//!
//! Listeners implement `TabObserver`, overriding only the callbacks they
//! consume. The registry holds them in an arena of flagged slots: `attach`
//! returns an opaque `Subscription` handle, `detach` flags the slot dead,
//! and `sweep` compacts flagged-dead slots. All payloads are passed by
//! value so a listener living on another context never shares the store's
//! arrays.

use std::sync::Arc;

use crate::tab::{ContentType, Tab, TabId};

/// Listener for tab-list and selection changes. Every method defaults to a
/// no-op.
pub trait TabObserver: Send + Sync {
    /// Full snapshot replay, delivered on attach with `notify_immediately`.
    fn initialize(&self, _tabs: Vec<Tab>) {}

    fn count_changed(&self, _count: usize) {}

    fn tab_added(&self, _tab: Tab, _index: usize) {}

    fn tab_selected(&self, _index: usize, _content: ContentType, _id: TabId) {}

    fn tab_replaced(&self, _tab: Tab, _index: usize) {}
}

/// Opaque handle identifying one attachment. Detaching with a stale handle
/// is a harmless no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct Slot {
    id: u64,
    alive: bool,
    observer: Arc<dyn TabObserver>,
}

#[derive(Default)]
pub struct ObserverRegistry {
    slots: Vec<Slot>,
    next_id: u64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.alive).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count including flagged-dead entries awaiting a sweep.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Registers `observer`, deduplicating by identity: attaching the same
    /// `Arc` twice returns the existing subscription.
    pub fn attach(&mut self, observer: Arc<dyn TabObserver>) -> Subscription {
        if let Some(slot) = self
            .slots
            .iter()
            .find(|s| s.alive && Arc::ptr_eq(&s.observer, &observer))
        {
            tracing::debug!(subscription = slot.id, "observer already attached");
            return Subscription(slot.id);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.slots.push(Slot {
            id,
            alive: true,
            observer,
        });
        tracing::debug!(subscription = id, live = self.len(), "observer attached");
        Subscription(id)
    }

    /// Flags the slot dead. The slot is reclaimed by the next `sweep`.
    pub fn detach(&mut self, subscription: Subscription) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.alive && s.id == subscription.0)
        {
            slot.alive = false;
            tracing::debug!(subscription = subscription.0, "observer detached");
        }
    }

    /// Compacts flagged-dead slots: scan forward, swapping a live entry
    /// from the tail into each dead slot, then truncate. When no live entry
    /// exists at all, the pass is skipped; the slots stay until a later
    /// sweep finds something live to keep. Returns the number of slots
    /// reclaimed.
    pub fn sweep(&mut self) -> usize {
        if !self.slots.iter().any(|s| s.alive) {
            return 0;
        }

        let before = self.slots.len();
        let mut end = before;
        let mut i = 0;
        while i < end {
            if self.slots[i].alive {
                i += 1;
                continue;
            }
            // walk the tail back to the nearest live entry
            while end > i + 1 && !self.slots[end - 1].alive {
                end -= 1;
            }
            if end == i + 1 {
                // nothing live at or beyond this slot
                end = i;
                break;
            }
            self.slots.swap(i, end - 1);
            end -= 1;
            i += 1;
        }
        self.slots.truncate(end);

        let reclaimed = before - end;
        if reclaimed > 0 {
            tracing::debug!(reclaimed, live = self.len(), "swept dead observer slots");
        }
        reclaimed
    }

    /// Runs `f` for every live observer.
    pub fn for_each(&self, mut f: impl FnMut(&dyn TabObserver)) {
        for slot in self.slots.iter().filter(|s| s.alive) {
            f(slot.observer.as_ref());
        }
    }

    pub fn notify_count_changed(&self, count: usize) {
        self.for_each(|o| o.count_changed(count));
    }

    pub fn notify_tab_added(&self, tab: &Tab, index: usize) {
        self.for_each(|o| o.tab_added(tab.clone(), index));
    }

    pub fn notify_tab_selected(&self, index: usize, content: &ContentType, id: TabId) {
        self.for_each(|o| o.tab_selected(index, content.clone(), id));
    }

    pub fn notify_tab_replaced(&self, tab: &Tab, index: usize) {
        self.for_each(|o| o.tab_replaced(tab.clone(), index));
    }
}
