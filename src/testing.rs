//! In-memory [`Session`] used by unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use tokio::sync::watch;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use crate::api::Session;
use crate::model::{record, Actor, CreatedRecord, Like, ListItem, ModerationList, Page};
use crate::{Error, Result};

pub const ME: &str = "did:plc:meeeeeeeeeeeeeeeeeeeeeee";

pub fn actor(n: usize) -> Actor {
    Actor {
        did: format!("did:plc:{n:0>24}"),
        handle: format!("user{n}.bsky.social"),
        display_name: Some(format!("User {n}")),
    }
}

pub fn list(uri: &str, name: &str) -> ModerationList {
    ModerationList {
        uri: uri.to_string(),
        name: name.to_string(),
        description: Some(format!("{name} description")),
        purpose: Some(record::MODLIST_PURPOSE.to_string()),
        creator: Actor {
            did: ME.to_string(),
            handle: "me.bsky.social".to_string(),
            display_name: None,
        },
        list_item_count: Some(0),
    }
}

/// Log lines written while the returned guard is alive, on this thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

/// Splits `items` into pages whose cursors are the index of the next page.
pub fn paged<T>(items: Vec<T>, per_page: usize) -> Vec<Page<T>> {
    let mut pages = Vec::new();
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        let chunk: Vec<T> = items.by_ref().take(per_page).collect();
        pages.push(Page::new(chunk, None));
    }
    let count = pages.len();
    for (index, page) in pages.iter_mut().enumerate() {
        if index + 1 < count {
            page.cursor = Some((index + 1).to_string());
        }
    }
    pages
}

fn page_at<T: Clone>(pages: &[Page<T>], cursor: Option<&str>) -> Page<T> {
    let index = cursor.map_or(0, |cursor| cursor.parse::<usize>().unwrap_or(usize::MAX));
    pages
        .get(index)
        .cloned()
        .unwrap_or_else(|| Page::new(Vec::new(), None))
}

#[derive(Default)]
pub struct FakeSession {
    pub actors: Vec<Page<Actor>>,
    pub lists: HashMap<String, ModerationList>,
    pub members: Vec<Page<ListItem>>,
    pub likes: Vec<Page<Like>>,
    /// Subjects whose list item creation is rejected.
    pub rejected_subjects: HashSet<String>,
    /// Every remote call in order, as `method arg`.
    pub calls: RefCell<Vec<String>>,
    pub created: RefCell<Vec<(String, serde_json::Value)>>,
    /// Raises the cancel flag once a call (as logged in `calls`) or a list
    /// item subject equal to the key goes through.
    pub cancel_on: Option<(String, watch::Sender<bool>)>,
}

impl FakeSession {
    fn record_call(&self, call: String) {
        self.trip(&call);
        self.calls.borrow_mut().push(call);
    }

    fn trip(&self, key: &str) {
        if let Some((on, cancel)) = &self.cancel_on {
            if on == key {
                cancel.send_replace(true);
            }
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Session for FakeSession {
    fn did(&self) -> &str {
        ME
    }

    async fn search_actors(
        &self,
        query: &str,
        _limit: u8,
        cursor: Option<&str>,
    ) -> Result<Page<Actor>> {
        self.record_call(format!("searchActors {query} {cursor:?}"));
        Ok(page_at(&self.actors, cursor))
    }

    async fn create_record(
        &self,
        collection: &str,
        record: &serde_json::Value,
    ) -> Result<CreatedRecord> {
        self.record_call(format!("createRecord {collection}"));
        let subject = record["subject"].as_str().unwrap_or_default();
        if self.rejected_subjects.contains(subject) {
            return Err(Error::Api {
                method: "com.atproto.repo.createRecord".into(),
                status: StatusCode::BAD_REQUEST,
                error: "InvalidRequest".into(),
                message: format!("bad subject {subject}"),
            });
        }
        self.trip(subject);
        let mut created = self.created.borrow_mut();
        created.push((collection.to_string(), record.clone()));
        Ok(CreatedRecord {
            uri: format!("at://{ME}/{collection}/rkey{}", created.len()),
            cid: format!("cid{}", created.len()),
        })
    }

    async fn get_list(
        &self,
        uri: &str,
        _limit: u8,
        cursor: Option<&str>,
    ) -> Result<(ModerationList, Page<ListItem>)> {
        self.record_call(format!("getList {uri}"));
        let list = self.lists.get(uri).cloned().ok_or_else(|| Error::Api {
            method: "app.bsky.graph.getList".into(),
            status: StatusCode::BAD_REQUEST,
            error: "InvalidRequest".into(),
            message: "List not found".into(),
        })?;
        Ok((list, page_at(&self.members, cursor)))
    }

    async fn get_lists(
        &self,
        actor: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<Page<ModerationList>> {
        self.record_call(format!("getLists {actor} {cursor:?}"));
        let mut lists: Vec<ModerationList> = self.lists.values().cloned().collect();
        lists.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(page_at(&paged(lists, usize::from(limit)), cursor))
    }

    async fn get_likes(&self, uri: &str, _limit: u8, cursor: Option<&str>) -> Result<Page<Like>> {
        self.record_call(format!("getLikes {uri} {cursor:?}"));
        Ok(page_at(&self.likes, cursor))
    }
}
