//! The authenticated client boundary every remote operation goes through.

use crate::model::{Actor, CreatedRecord, Like, ListItem, ModerationList, Page};
use crate::Result;

/// Page size requested from every paginated endpoint.
pub const PAGE_SIZE: u8 = 100;

/// An authenticated session with a personal data server.
///
/// Transport failures worth retrying surface as [`crate::Error::Transient`].
/// Implementations are constructed once and passed by reference to the
/// components that issue remote calls.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// DID of the logged-in account.
    fn did(&self) -> &str;

    /// `app.bsky.actor.searchActors`
    async fn search_actors(
        &self,
        query: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<Page<Actor>>;

    /// `com.atproto.repo.createRecord` in the session's own repo.
    async fn create_record(
        &self,
        collection: &str,
        record: &serde_json::Value,
    ) -> Result<CreatedRecord>;

    /// `app.bsky.graph.getList`: list metadata plus one page of its items.
    async fn get_list(
        &self,
        uri: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<(ModerationList, Page<ListItem>)>;

    /// `app.bsky.graph.getLists`
    async fn get_lists(
        &self,
        actor: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<Page<ModerationList>>;

    /// `app.bsky.feed.getLikes`
    async fn get_likes(&self, uri: &str, limit: u8, cursor: Option<&str>) -> Result<Page<Like>>;
}
