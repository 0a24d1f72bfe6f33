//! Lookups composed from [`drain`] and [`Retry`].

use std::pin::pin;

use futures_util::stream::{Stream, TryStreamExt};
use tracing::debug;

use crate::api::{Session, PAGE_SIZE};
use crate::identity::{ActorRef, AtUri, PostUrl};
use crate::model::{Actor, Like, ListItem, ModerationList};
use crate::paginate::drain;
use crate::retry::Retry;
use crate::{Error, Result};

/// Every actor the free-text search returns for `query`.
pub fn search_actors<'a, S: Session>(
    session: &'a S,
    retry: &'a Retry,
    query: &'a str,
) -> impl Stream<Item = Result<Actor>> + 'a {
    drain(move |cursor: Option<String>| async move {
        retry
            .call("app.bsky.actor.searchActors", || {
                session.search_actors(query, PAGE_SIZE, cursor.as_deref())
            })
            .await
    })
}

/// The first actor whose handle is exactly `handle`.
///
/// The search is fuzzy, so this reads every result until a match turns up.
/// Cancellation is checked before every result, so an interrupt stops the
/// scan without requesting another page.
pub async fn find_actor_by_handle<S: Session>(
    session: &S,
    retry: &Retry,
    handle: &str,
) -> Result<Option<Actor>> {
    let mut actors = pin!(search_actors(session, retry, handle));
    let mut scanned = 0usize;
    loop {
        if retry.is_cancelled() {
            debug!(handle, scanned, "handle search interrupted");
            return Err(Error::Interrupted("handle search"));
        }
        let Some(actor) = actors.try_next().await? else {
            break;
        };
        if actor.handle == handle {
            debug!(handle, did = %actor.did, scanned, "handle matched");
            return Ok(Some(actor));
        }
        scanned += 1;
    }
    debug!(handle, scanned, "no exact handle match");
    Ok(None)
}

/// The `at://` reference of the post a URL points at.
pub async fn resolve_post<S: Session>(session: &S, retry: &Retry, post: &PostUrl) -> Result<AtUri> {
    let did = match &post.actor {
        ActorRef::Did(did) => did.clone(),
        ActorRef::Handle(handle) => find_actor_by_handle(session, retry, handle)
            .await?
            .map(|actor| actor.did)
            .ok_or_else(|| Error::NotFound(format!("no account with handle {handle}")))?,
    };
    Ok(AtUri::post(&did, &post.rkey))
}

/// One of the caller's own lists, by record key.
pub async fn get_list_by_key<S: Session>(
    session: &S,
    retry: &Retry,
    key: &str,
) -> Result<ModerationList> {
    let uri = AtUri::list(session.did(), key).to_string();
    let (list, _) = retry
        .call("app.bsky.graph.getList", || session.get_list(&uri, 1, None))
        .await?;
    Ok(list)
}

/// Every list the caller owns.
pub fn own_lists<'a, S: Session>(
    session: &'a S,
    retry: &'a Retry,
) -> impl Stream<Item = Result<ModerationList>> + 'a {
    drain(move |cursor: Option<String>| async move {
        retry
            .call("app.bsky.graph.getLists", || {
                session.get_lists(session.did(), PAGE_SIZE, cursor.as_deref())
            })
            .await
    })
}

/// Every item of the list at `uri`.
pub fn list_members<'a, S: Session>(
    session: &'a S,
    retry: &'a Retry,
    uri: &'a str,
) -> impl Stream<Item = Result<ListItem>> + 'a {
    drain(move |cursor: Option<String>| async move {
        let (_, items) = retry
            .call("app.bsky.graph.getList", || {
                session.get_list(uri, PAGE_SIZE, cursor.as_deref())
            })
            .await?;
        Ok(items)
    })
}

/// Every actor who liked the post at `post`.
pub fn likers<'a, S: Session>(
    session: &'a S,
    retry: &'a Retry,
    post: &AtUri,
) -> impl Stream<Item = Result<Actor>> + 'a {
    let uri = post.to_string();
    drain(move |cursor: Option<String>| {
        let uri = uri.clone();
        async move {
            retry
                .call("app.bsky.feed.getLikes", || {
                    session.get_likes(&uri, PAGE_SIZE, cursor.as_deref())
                })
                .await
        }
    })
    .map_ok(|like: Like| like.actor)
}
