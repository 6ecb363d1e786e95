//! Abstract persistence boundary
//!
//! The store persists through this trait and never assumes anything about
//! the engine behind it. Every call is independently failable; no atomicity
//! is assumed across calls.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::tab::{Tab, TabId};

/// Opaque persistence failure. The engine's concrete error is carried as
/// the source so callers can log it without depending on the engine crate.
#[derive(Debug, thiserror::Error)]
#[error("tab repository failure: {0}")]
pub struct RepositoryError(#[from] pub anyhow::Error);

impl RepositoryError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(err.into())
    }

    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Self(anyhow::anyhow!("{msg}"))
    }
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Async persistence contract for the tab list.
///
/// `add` and `update` return the stored tab so the engine may fill in
/// repository-assigned fields; `remove` returns the tabs actually removed
/// so callers can recover canonical instances. `fetch_selected_id` returns
/// the bootstrap sentinel when no selection was ever persisted.
#[async_trait]
pub trait TabRepository: Send + Sync {
    async fn fetch_all(&self) -> RepositoryResult<Vec<Tab>>;

    async fn fetch_selected_id(&self) -> RepositoryResult<TabId>;

    async fn add(&self, tab: Tab, select: bool) -> RepositoryResult<Tab>;

    async fn update(&self, tab: Tab) -> RepositoryResult<Tab>;

    async fn remove(&self, tabs: Vec<Tab>) -> RepositoryResult<Vec<Tab>>;

    async fn select(&self, tab: Tab) -> RepositoryResult<TabId>;
}

/// Process-local repository backed by a mutex-guarded vec. Used by tests
/// and by embedders that do not want durable tab persistence.
#[derive(Debug, Default)]
pub struct InMemoryTabRepository {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    tabs: Vec<Tab>,
    selected: TabId,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            tabs: Vec::new(),
            selected: TabId::bootstrap(),
        }
    }
}

impl InMemoryTabRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-populated with `tabs`, selecting the first one.
    pub fn seeded(tabs: Vec<Tab>) -> Self {
        let selected = tabs.first().map(|t| t.id).unwrap_or_else(TabId::bootstrap);
        Self {
            inner: Mutex::new(Inner { tabs, selected }),
        }
    }
}

#[async_trait]
impl TabRepository for InMemoryTabRepository {
    async fn fetch_all(&self) -> RepositoryResult<Vec<Tab>> {
        Ok(self.inner.lock().tabs.clone())
    }

    async fn fetch_selected_id(&self) -> RepositoryResult<TabId> {
        Ok(self.inner.lock().selected)
    }

    async fn add(&self, tab: Tab, select: bool) -> RepositoryResult<Tab> {
        let mut inner = self.inner.lock();
        inner.tabs.push(tab.clone());
        if select {
            inner.selected = tab.id;
        }
        Ok(tab)
    }

    async fn update(&self, tab: Tab) -> RepositoryResult<Tab> {
        let mut inner = self.inner.lock();
        match inner.tabs.iter_mut().find(|t| t.id == tab.id) {
            Some(slot) => {
                *slot = tab.clone();
                Ok(tab)
            }
            None => Err(RepositoryError::msg(format!("unknown tab {}", tab.id))),
        }
    }

    async fn remove(&self, tabs: Vec<Tab>) -> RepositoryResult<Vec<Tab>> {
        let mut inner = self.inner.lock();
        let mut removed = Vec::new();
        for tab in tabs {
            if let Some(pos) = inner.tabs.iter().position(|t| t.id == tab.id) {
                removed.push(inner.tabs.remove(pos));
            }
        }
        Ok(removed)
    }

    async fn select(&self, tab: Tab) -> RepositoryResult<TabId> {
        let mut inner = self.inner.lock();
        inner.selected = tab.id;
        Ok(tab.id)
    }
}
