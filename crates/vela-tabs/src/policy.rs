//! Insertion and selection policies
//!
//! `PositioningPolicy` is pure configuration: where new tabs land, whether
//! they become selected, and with what content and delay. `SelectionStrategy`
//! decides which tab takes over the selection after the selected tab is
//! removed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tab::{ContentType, Tab, TabId};

/// Where a newly added tab is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddPosition {
    /// Append to the end of the list.
    ListEnd,
    /// Insert immediately after the currently selected tab; appends when
    /// the selection is stale.
    AfterSelected,
}

/// When the notify-and-select step of an `add` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddSpeed {
    Immediate,
    After(Duration),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositioningPolicy {
    pub add_position: AddPosition,
    pub add_speed: AddSpeed,
    /// Whether a newly added tab becomes the selected tab.
    pub make_active: bool,
    /// Content for synthesized default tabs.
    pub default_content: ContentType,
    /// Sentinel selection id used before any real tab exists. Must never
    /// collide with a generated tab id.
    pub default_selected_id: TabId,
}

impl Default for PositioningPolicy {
    fn default() -> Self {
        Self {
            add_position: AddPosition::ListEnd,
            add_speed: AddSpeed::Immediate,
            make_active: true,
            default_content: ContentType::Blank,
            default_selected_id: TabId::bootstrap(),
        }
    }
}

/// Policy for picking the next selection after the selected tab is removed.
///
/// Invoked only when the removed tab was the selected one. `tabs` is the
/// post-removal array and `removed_index` the slot the tab occupied before
/// removal. `None` means the strategy found no sensible neighbor; the store
/// falls back to index 0.
pub trait SelectionStrategy: Send + Sync {
    fn next_selected_index(&self, tabs: &[Tab], removed_index: usize) -> Option<usize>;
}

/// Reference strategy: prefer the tab that shifted into the removed slot
/// (the old next-sibling); when the removed tab was last, take the new last.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearbySelection;

impl SelectionStrategy for NearbySelection {
    fn next_selected_index(&self, tabs: &[Tab], removed_index: usize) -> Option<usize> {
        if tabs.is_empty() {
            return None;
        }
        if removed_index < tabs.len() {
            Some(removed_index)
        } else {
            Some(tabs.len() - 1)
        }
    }
}
