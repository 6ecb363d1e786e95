//! Tab data structures
//!
//! A tab is a browsing-session entry with a stable identity, a content
//! variant, a title, and an optional preview image. Display order is the
//! tab's position in the store's array, never a field on the tab itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Stable tab identifier.
///
/// Generated ids are random v4 UUIDs. The bootstrap sentinel is the nil
/// UUID, which `Uuid::new_v4` can never produce, so it is guaranteed never
/// to collide with a real tab id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Sentinel id marking the selection before any real tab exists.
    pub fn bootstrap() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_bootstrap(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TabId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Payload of a `site` tab: the navigated URL plus per-site settings.
/// The settings blob is opaque to the tab core; it is carried, persisted,
/// and compared by value, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitePage {
    pub url: Url,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl SitePage {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            settings: serde_json::Value::Null,
        }
    }
}

/// What a tab displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "site")]
pub enum ContentType {
    Blank,
    Favorites,
    TopSites,
    Homepage,
    Site(SitePage),
}

impl ContentType {
    pub fn is_site(&self) -> bool {
        matches!(self, ContentType::Site(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ContentType::Blank => "blank",
            ContentType::Favorites => "favorites",
            ContentType::TopSites => "top_sites",
            ContentType::Homepage => "homepage",
            ContentType::Site(_) => "site",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Site(page) => write!(f, "site({})", page.url),
            other => write!(f, "{}", other.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    /// Unique identifier, stable for the tab's lifetime
    pub id: TabId,
    /// What the tab displays
    pub content: ContentType,
    /// Page title (may be empty until the page reports one)
    pub title: String,
    /// Preview image bytes, if one has been captured
    pub preview: Option<Vec<u8>>,
    /// When the tab was created
    pub created_at: DateTime<Utc>,
}

impl Tab {
    pub fn new(content: ContentType) -> Self {
        Self {
            id: TabId::new(),
            content,
            title: String::new(),
            preview: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_title(content: ContentType, title: impl Into<String>) -> Self {
        let mut tab = Self::new(content);
        tab.title = title.into();
        tab
    }

    /// Copy of this tab with its content swapped out. The preview is
    /// cleared because it depicts the old content.
    pub fn with_content(&self, content: ContentType) -> Self {
        Self {
            id: self.id,
            content,
            title: self.title.clone(),
            preview: None,
            created_at: self.created_at,
        }
    }

    /// Title for display, with a fallback when the page never reported one.
    pub fn display_title(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        match &self.content {
            ContentType::Site(page) => page.url.to_string(),
            other => other.kind().to_string(),
        }
    }
}
