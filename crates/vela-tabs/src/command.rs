//! Command and result surface
//!
//! Mutating or reading the tab list happens exclusively by submitting a
//! `Command` to the store. Each submission is tracked as an `Execution`
//! record; callers only ever observe the `Finished` state, the earlier
//! states exist for the store's own bookkeeping and tracing.

use serde::{Deserialize, Serialize};

use crate::error::TabError;
use crate::tab::{ContentType, Tab, TabId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Number of open tabs.
    GetCount,
    /// Id of the selected tab.
    GetSelectedId,
    /// Snapshot of the full tab list.
    GetAll,
    /// Insert a tab per the positioning policy and persist it.
    Add { tab: Tab },
    /// Remove a tab, recomputing the selection if it was selected.
    Close { tab: Tab },
    /// Resolve an id and close it; absent ids succeed as a no-op.
    CloseById { id: TabId },
    /// Remove every tab and recreate a single default tab.
    CloseAll,
    /// Make a tab the selected one.
    Select { tab: Tab },
    /// Swap the selected tab's content.
    ReplaceContent { content: ContentType },
    /// Update the selected tab's preview image.
    UpdatePreview { image: Option<Vec<u8>> },
}

impl Command {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetCount => "get_count",
            Command::GetSelectedId => "get_selected_id",
            Command::GetAll => "get_all",
            Command::Add { .. } => "add",
            Command::Close { .. } => "close",
            Command::CloseById { .. } => "close_by_id",
            Command::CloseAll => "close_all",
            Command::Select { .. } => "select",
            Command::ReplaceContent { .. } => "replace_content",
            Command::UpdatePreview { .. } => "update_preview",
        }
    }
}

/// Success value of a finished command, one variant per command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Count(usize),
    SelectedId(TabId),
    Tabs(Vec<Tab>),
    /// The index the tab was inserted at.
    Added { index: usize },
    /// The id selected after the close, or `None` when the selection was
    /// untouched.
    Closed { new_selected: Option<TabId> },
    /// `CloseById` target was already gone.
    AlreadyAbsent,
    /// The synthesized replacement tab after `CloseAll`.
    ClosedAll { default_tab: Tab },
    Selected,
    Replaced,
    PreviewUpdated,
}

/// Execution record of one submitted command.
///
/// Created `NotStarted` when the command is enqueued, moved to `Started`
/// when the store dequeues it, and returned to the caller as `Finished`.
#[derive(Debug)]
pub enum Execution {
    NotStarted,
    Started(Option<Command>),
    Finished(Result<Outcome, TabError>),
}

impl Execution {
    pub fn is_finished(&self) -> bool {
        matches!(self, Execution::Finished(_))
    }

    /// Unwraps the finished result. A record that never finished means the
    /// store went away before replying.
    pub fn into_result(self) -> Result<Outcome, TabError> {
        match self {
            Execution::Finished(result) => result,
            Execution::NotStarted | Execution::Started(_) => Err(TabError::StoreClosed),
        }
    }
}
