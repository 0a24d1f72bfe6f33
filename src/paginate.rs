//! Drains a cursor-paginated listing into one lazy stream of items.

use std::future::Future;

use futures_util::stream::{self, Stream, TryStreamExt};

use crate::model::Page;
use crate::{Error, Result};

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Turns `fetch(cursor)` into a stream of every item on every page.
///
/// The first page is requested with `None`, each following page with the
/// cursor of the page before it, until a page comes back without one. Items
/// keep server order across page boundaries. Nothing is fetched until the
/// stream is polled, and a page is only requested once every item of the
/// previous page has been taken, so dropping the stream early skips the rest.
/// Each call to `drain` starts over from the first page.
///
/// A server that never stops returning cursors makes the stream endless.
pub fn drain<'a, T, F, Fut>(mut fetch: F) -> impl Stream<Item = Result<T>> + 'a
where
    T: 'a,
    F: FnMut(Option<String>) -> Fut + 'a,
    Fut: Future<Output = Result<Page<T>>> + 'a,
{
    stream::try_unfold(Cursor::Start, move |cursor| {
        let request = match cursor {
            Cursor::Start => Some(fetch(None)),
            Cursor::Next(cursor) => Some(fetch(Some(cursor))),
            Cursor::Done => None,
        };
        async move {
            let Some(request) = request else {
                return Ok::<_, Error>(None);
            };
            let page = request.await?;
            let next = match page.next_cursor() {
                Some(cursor) => Cursor::Next(cursor.to_string()),
                None => Cursor::Done,
            };
            Ok(Some((page.items, next)))
        }
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
}
