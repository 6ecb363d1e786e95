//! Tab core error types

use thiserror::Error;

use crate::repository::RepositoryError;

#[derive(Error, Debug)]
pub enum TabError {
    #[error("Selection not initialized: still at the bootstrap sentinel")]
    NotInitialized,

    #[error("Selected tab not found in the tab list")]
    SelectedNotFound,

    #[error("Tab list is empty")]
    NoTabs,

    #[error("Selected tab already has this content")]
    ContentAlreadySet,

    #[error("Site tabs must carry a preview image")]
    WrongTabContent,

    #[error("Tab index {0} is out of range")]
    WrongTabIndex(usize),

    #[error("Repository failure: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to add a default tab")]
    FailToAddDefaultTab,

    #[error("Cannot close a tab that is not in the list")]
    ClosingNonexistentTab,

    #[error("Failed to find the newly selected tab")]
    FailToFindNewSelected,

    #[error("Tab store has shut down")]
    StoreClosed,
}
