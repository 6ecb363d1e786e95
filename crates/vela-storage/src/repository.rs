//! SQLite-backed tab repository
//!
//! Implements `vela_tabs::TabRepository` over the `Database` wrapper. The
//! tab array's order authority lives in the store; this adapter persists an
//! append-only `sort_order` so hydration replays tabs in the order they
//! were added. All rusqlite work runs on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use vela_tabs::{ContentType, RepositoryError, RepositoryResult, Tab, TabId, TabRepository};

use crate::database::Database;
use crate::error::StorageError;
use crate::Result;

const META_SELECTED: &str = "selected_tab";

#[derive(Clone)]
pub struct SqliteTabRepository {
    db: Database,
}

impl SqliteTabRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }
}

async fn run_blocking<T, F>(f: F) -> RepositoryResult<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(RepositoryError::new)?
        .map_err(RepositoryError::new)
}

#[async_trait]
impl TabRepository for SqliteTabRepository {
    async fn fetch_all(&self) -> RepositoryResult<Vec<Tab>> {
        let db = self.db.clone();
        run_blocking(move || fetch_all_blocking(&db)).await
    }

    async fn fetch_selected_id(&self) -> RepositoryResult<TabId> {
        let db = self.db.clone();
        run_blocking(move || {
            let Some(raw) = db.get_meta(META_SELECTED)? else {
                return Ok(TabId::bootstrap());
            };
            raw.parse()
                .map_err(|_| StorageError::Corrupt(format!("bad selected id {raw}")))
        })
        .await
    }

    async fn add(&self, tab: Tab, select: bool) -> RepositoryResult<Tab> {
        let db = self.db.clone();
        run_blocking(move || add_blocking(&db, tab, select)).await
    }

    async fn update(&self, tab: Tab) -> RepositoryResult<Tab> {
        let db = self.db.clone();
        run_blocking(move || update_blocking(&db, tab)).await
    }

    async fn remove(&self, tabs: Vec<Tab>) -> RepositoryResult<Vec<Tab>> {
        let db = self.db.clone();
        run_blocking(move || remove_blocking(&db, tabs)).await
    }

    async fn select(&self, tab: Tab) -> RepositoryResult<TabId> {
        let db = self.db.clone();
        run_blocking(move || {
            db.set_meta(META_SELECTED, &tab.id.to_string())?;
            tracing::debug!(tab_id = %tab.id, "persisted selection");
            Ok(tab.id)
        })
        .await
    }
}

/// Raw row image, converted to a `Tab` outside the rusqlite closure so
/// payload errors surface as `StorageError` rather than panics.
struct TabRow {
    id: String,
    kind: String,
    site: Option<String>,
    title: String,
    preview: Option<Vec<u8>>,
    created_at: String,
}

const TAB_COLUMNS: &str = "id, kind, site, title, preview, created_at";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TabRow> {
    Ok(TabRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        site: row.get(2)?,
        title: row.get(3)?,
        preview: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn tab_from_row(row: TabRow) -> Result<Tab> {
    let id: TabId = row
        .id
        .parse()
        .map_err(|_| StorageError::Corrupt(format!("bad tab id {}", row.id)))?;
    let content = content_from_columns(&row.kind, row.site)?;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Tab {
        id,
        content,
        title: row.title,
        preview: row.preview,
        created_at,
    })
}

fn content_columns(content: &ContentType) -> Result<(String, Option<String>)> {
    let site = match content {
        ContentType::Site(page) => Some(serde_json::to_string(page)?),
        _ => None,
    };
    Ok((content.kind().to_string(), site))
}

fn content_from_columns(kind: &str, site: Option<String>) -> Result<ContentType> {
    match kind {
        "blank" => Ok(ContentType::Blank),
        "favorites" => Ok(ContentType::Favorites),
        "top_sites" => Ok(ContentType::TopSites),
        "homepage" => Ok(ContentType::Homepage),
        "site" => {
            let raw =
                site.ok_or_else(|| StorageError::Corrupt("site tab without payload".into()))?;
            Ok(ContentType::Site(serde_json::from_str(&raw)?))
        }
        other => Err(StorageError::Corrupt(format!("unknown content kind {other}"))),
    }
}

fn fetch_all_blocking(db: &Database) -> Result<Vec<Tab>> {
    let rows = db.with_connection(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {TAB_COLUMNS} FROM tabs ORDER BY sort_order ASC"
        ))?;
        let rows: Vec<TabRow> = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    })?;

    rows.into_iter().map(tab_from_row).collect()
}

fn add_blocking(db: &Database, tab: Tab, select: bool) -> Result<Tab> {
    let (kind, site) = content_columns(&tab.content)?;
    db.transaction(|conn| {
        let next: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM tabs",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO tabs (id, kind, site, title, preview, sort_order, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                tab.id.to_string(),
                kind,
                site,
                tab.title,
                tab.preview,
                next,
                tab.created_at.to_rfc3339(),
            ],
        )?;
        if select {
            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![META_SELECTED, tab.id.to_string(), Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    })?;

    tracing::debug!(tab_id = %tab.id, select, "persisted tab");
    Ok(tab)
}

fn update_blocking(db: &Database, tab: Tab) -> Result<Tab> {
    let (kind, site) = content_columns(&tab.content)?;
    let changed = db.with_connection(|conn| {
        Ok(conn.execute(
            "UPDATE tabs SET kind = ?2, site = ?3, title = ?4, preview = ?5 WHERE id = ?1",
            rusqlite::params![tab.id.to_string(), kind, site, tab.title, tab.preview],
        )?)
    })?;

    if changed == 0 {
        return Err(StorageError::UnknownTab(tab.id.to_string()));
    }
    Ok(tab)
}

fn remove_blocking(db: &Database, tabs: Vec<Tab>) -> Result<Vec<Tab>> {
    let rows = db.transaction(|conn| {
        let mut rows = Vec::new();
        for tab in &tabs {
            let id = tab.id.to_string();
            let row = conn
                .query_row(
                    &format!("SELECT {TAB_COLUMNS} FROM tabs WHERE id = ?1"),
                    [&id],
                    read_row,
                )
                .optional()?;
            if let Some(row) = row {
                conn.execute("DELETE FROM tabs WHERE id = ?1", [&id])?;
                rows.push(row);
            }
        }
        Ok(rows)
    })?;

    rows.into_iter().map(tab_from_row).collect()
}
