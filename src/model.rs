//! Records and views exchanged with the service.

use serde::Deserialize;

/// A remote account. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Actor {
    /// `did handle -- display name`, the line format `add` reads back.
    pub fn summary(&self) -> String {
        format!(
            "{} {} -- {}",
            self.did,
            self.handle,
            self.display_name.as_deref().unwrap_or("")
        )
    }
}

/// A list view as returned by `app.bsky.graph.getList(s)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationList {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    pub creator: Actor,
    #[serde(default)]
    pub list_item_count: Option<u64>,
}

/// One membership of a subject in a list, as found in `getList` output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListItem {
    pub uri: String,
    pub subject: Actor,
}

/// One like of a post.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub actor: Actor,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// The reply to `com.atproto.repo.createRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedRecord {
    pub uri: String,
    pub cid: String,
}

/// One page of a cursor-paginated listing. A missing or empty cursor marks the last page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, cursor: Option<String>) -> Self {
        Self { items, cursor }
    }

    /// The cursor to request the following page with, if there is one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|cursor| !cursor.is_empty())
    }
}

/// Record bodies written by this crate.
pub mod record {
    use chrono::{SecondsFormat, Utc};
    use serde::Serialize;

    pub const LIST: &str = "app.bsky.graph.list";
    pub const LIST_ITEM: &str = "app.bsky.graph.listitem";
    pub const MODLIST_PURPOSE: &str = "app.bsky.graph.defs#modlist";

    pub fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct List {
        #[serde(rename = "$type")]
        pub kind: &'static str,
        pub created_at: String,
        pub name: String,
        pub description: String,
        pub purpose: &'static str,
    }

    impl List {
        pub fn modlist(name: &str, description: &str) -> Self {
            Self {
                kind: LIST,
                created_at: now(),
                name: name.to_string(),
                description: description.to_string(),
                purpose: MODLIST_PURPOSE,
            }
        }
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListItem {
        #[serde(rename = "$type")]
        pub kind: &'static str,
        pub created_at: String,
        pub list: String,
        pub subject: String,
    }

    impl ListItem {
        pub fn new(list: &str, subject: &str) -> Self {
            Self {
                kind: LIST_ITEM,
                created_at: now(),
                list: list.to_string(),
                subject: subject.to_string(),
            }
        }
    }
}
