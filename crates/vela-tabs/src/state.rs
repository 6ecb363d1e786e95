//! In-memory tab list state
//!
//! `TabList` owns the tab array and the selected id. It is a pure data
//! structure: every mutation is synchronous and infallible or indexed, and
//! the store above it decides when persistence and notification happen.
//!
//! Invariants maintained here:
//! - tab ids are unique within the array
//! - the selected id, once initialized, refers to a tab in the array
//! - array order is insertion/removal order only
//!
//! The selected tab is always resolved by identity scan rather than by a
//! stored index, because indices shift on every insert and remove.

use crate::tab::{Tab, TabId};

#[derive(Debug, Clone)]
pub struct TabList {
    tabs: Vec<Tab>,
    selected_id: TabId,
    sentinel: TabId,
}

impl TabList {
    /// Empty list in the bootstrap state: no tabs, selection at `sentinel`.
    pub fn new(sentinel: TabId) -> Self {
        Self {
            tabs: Vec::new(),
            selected_id: sentinel,
            sentinel,
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    /// Owned copy of the array, for handing across context boundaries.
    pub fn snapshot(&self) -> Vec<Tab> {
        self.tabs.clone()
    }

    pub fn selected_id(&self) -> TabId {
        self.selected_id
    }

    /// False while the selection is still the bootstrap sentinel.
    pub fn is_initialized(&self) -> bool {
        self.selected_id != self.sentinel
    }

    pub fn set_selected(&mut self, id: TabId) {
        self.selected_id = id;
    }

    pub fn get(&self, index: usize) -> Option<&Tab> {
        self.tabs.get(index)
    }

    pub fn index_of(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|t| t.id == id)
    }

    pub fn find(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    /// Index of the selected tab, or `None` when the selection is stale
    /// or still the sentinel.
    pub fn selected_index(&self) -> Option<usize> {
        if !self.is_initialized() {
            return None;
        }
        self.index_of(self.selected_id)
    }

    pub fn selected_tab(&self) -> Option<&Tab> {
        self.selected_index().map(|i| &self.tabs[i])
    }

    /// Inserts at `index`, clamping to the array end. A duplicate id is a
    /// caller bug; it is logged and the insert is refused.
    pub fn insert(&mut self, index: usize, tab: Tab) -> usize {
        if self.index_of(tab.id).is_some() {
            tracing::warn!(tab_id = %tab.id, "refusing to insert duplicate tab id");
            return self.tabs.len();
        }
        let index = index.min(self.tabs.len());
        self.tabs.insert(index, tab);
        index
    }

    pub fn push(&mut self, tab: Tab) -> usize {
        self.insert(self.tabs.len(), tab)
    }

    pub fn remove(&mut self, index: usize) -> Option<Tab> {
        if index < self.tabs.len() {
            Some(self.tabs.remove(index))
        } else {
            None
        }
    }

    /// Replaces the tab at `index` in place. The replacement keeps the
    /// slot's array position; its id must match the outgoing tab's id.
    pub fn replace(&mut self, index: usize, tab: Tab) -> Option<Tab> {
        let slot = self.tabs.get_mut(index)?;
        debug_assert_eq!(slot.id, tab.id, "replace must not change a tab's id");
        Some(std::mem::replace(slot, tab))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Tab> {
        self.tabs.get_mut(index)
    }

    /// Clears all tabs and resets the selection to the bootstrap sentinel.
    pub fn clear(&mut self) {
        self.tabs.clear();
        self.selected_id = self.sentinel;
    }
}
