//! [`Session`] over XRPC/HTTP using reqwest.
//!
//! Only connection setup has a deadline. Once a request is on the wire the
//! reply is awaited however long it takes: giving up on a `createRecord` that
//! the server may still apply and retrying it would add the item twice.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::Session;
use crate::model::{Actor, CreatedRecord, Like, ListItem, ModerationList, Page};
use crate::{Error, Result};

pub const DEFAULT_SERVICE: &str = "https://bsky.social";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct XrpcSession {
    client: Client,
    service: String,
    tokens: RwLock<Tokens>,
    did: String,
    handle: String,
}

struct Tokens {
    access_jwt: String,
    refresh_jwt: String,
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Tokens { .. }")
    }
}

/// Reply to both `createSession` and `refreshSession`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionOutput {
    access_jwt: String,
    refresh_jwt: String,
    did: String,
    handle: String,
}

#[derive(Deserialize, Default)]
struct XrpcErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SearchActorsOutput {
    actors: Vec<Actor>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct GetListOutput {
    list: ModerationList,
    items: Vec<ListItem>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct GetListsOutput {
    lists: Vec<ModerationList>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct GetLikesOutput {
    likes: Vec<Like>,
    cursor: Option<String>,
}

impl XrpcSession {
    /// Logs in with `com.atproto.server.createSession`.
    pub async fn login(service: &str, identifier: &str, password: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Self::login_with(client, service, identifier, password).await
    }

    /// [`login`](Self::login) through an already configured client.
    pub async fn login_with(
        client: Client,
        service: &str,
        identifier: &str,
        password: &str,
    ) -> Result<Self> {
        let service = service.trim_end_matches('/').to_string();
        let method = "com.atproto.server.createSession";
        let response = client
            .post(format!("{service}/xrpc/{method}"))
            .json(&json!({ "identifier": identifier, "password": password }))
            .send()
            .await?;
        let output: SessionOutput = decode(method, response).await?;
        info!(did = %output.did, handle = %output.handle, "logged in");
        Ok(Self {
            client,
            service,
            tokens: RwLock::new(Tokens {
                access_jwt: output.access_jwt,
                refresh_jwt: output.refresh_jwt,
            }),
            did: output.did,
            handle: output.handle,
        })
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    fn url(&self, method: &str) -> String {
        format!("{}/xrpc/{method}", self.service)
    }

    async fn query<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        debug!(method, ?params, "query");
        let url = self.url(method);
        self.send(method, |token| {
            self.client.get(&url).bearer_auth(token).query(params)
        })
        .await
    }

    async fn procedure<B: Serialize, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T> {
        debug!(method, "procedure");
        let url = self.url(method);
        self.send(method, |token| {
            self.client.post(&url).bearer_auth(token).json(body)
        })
        .await
    }

    /// Sends `request(access token)`. An expired token is refreshed once and
    /// the request replayed with the new one; the server rejected the first
    /// attempt outright, so nothing is applied twice.
    async fn send<T, F>(&self, method: &str, request: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.tokens.read().await.access_jwt.clone();
        match decode(method, request(&token).send().await?).await {
            Err(err) if err.is_expired_token() => {
                debug!(method, "access token expired");
                self.refresh(&token).await?;
                let token = self.tokens.read().await.access_jwt.clone();
                decode(method, request(&token).send().await?).await
            }
            result => result,
        }
    }

    /// `com.atproto.server.refreshSession`, unless another call already
    /// replaced `stale`.
    async fn refresh(&self, stale: &str) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        if tokens.access_jwt != stale {
            return Ok(());
        }
        let method = "com.atproto.server.refreshSession";
        let response = self
            .client
            .post(self.url(method))
            .bearer_auth(&tokens.refresh_jwt)
            .send()
            .await?;
        let output: SessionOutput = decode(method, response).await?;
        info!(did = %output.did, "session refreshed");
        *tokens = Tokens {
            access_jwt: output.access_jwt,
            refresh_jwt: output.refresh_jwt,
        };
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|source| {
            if source.is_decode() {
                Error::Decode {
                    method: method.to_string(),
                    source,
                }
            } else {
                source.into()
            }
        });
    }
    let body: XrpcErrorBody = response.json().await.unwrap_or_default();
    Err(Error::from_status(method, status, body.error, body.message))
}

fn paging<'a>(limit: &'a str, cursor: Option<&'a str>) -> Vec<(&'static str, &'a str)> {
    let mut params = vec![("limit", limit)];
    if let Some(cursor) = cursor {
        params.push(("cursor", cursor));
    }
    params
}

impl Session for XrpcSession {
    fn did(&self) -> &str {
        &self.did
    }

    async fn search_actors(
        &self,
        query: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<Page<Actor>> {
        let limit = limit.to_string();
        let mut params = vec![("q", query)];
        params.extend(paging(&limit, cursor));
        let output: SearchActorsOutput = self.query("app.bsky.actor.searchActors", &params).await?;
        Ok(Page::new(output.actors, output.cursor))
    }

    async fn create_record(
        &self,
        collection: &str,
        record: &serde_json::Value,
    ) -> Result<CreatedRecord> {
        let body = json!({
            "repo": self.did,
            "collection": collection,
            "record": record,
        });
        self.procedure("com.atproto.repo.createRecord", &body).await
    }

    async fn get_list(
        &self,
        uri: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<(ModerationList, Page<ListItem>)> {
        let limit = limit.to_string();
        let mut params = vec![("list", uri)];
        params.extend(paging(&limit, cursor));
        let output: GetListOutput = self.query("app.bsky.graph.getList", &params).await?;
        Ok((output.list, Page::new(output.items, output.cursor)))
    }

    async fn get_lists(
        &self,
        actor: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<Page<ModerationList>> {
        let limit = limit.to_string();
        let mut params = vec![("actor", actor)];
        params.extend(paging(&limit, cursor));
        let output: GetListsOutput = self.query("app.bsky.graph.getLists", &params).await?;
        Ok(Page::new(output.lists, output.cursor))
    }

    async fn get_likes(&self, uri: &str, limit: u8, cursor: Option<&str>) -> Result<Page<Like>> {
        let limit = limit.to_string();
        let mut params = vec![("uri", uri)];
        params.extend(paging(&limit, cursor));
        let output: GetLikesOutput = self.query("app.bsky.feed.getLikes", &params).await?;
        Ok(Page::new(output.likes, output.cursor))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    /// What the stub saw: the XRPC method and the bearer token, if any.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Seen {
        method: String,
        token: Option<String>,
    }

    struct Reply {
        delay: Duration,
        status: u16,
        body: Value,
    }

    fn ok(body: Value) -> Reply {
        Reply {
            delay: Duration::ZERO,
            status: 200,
            body,
        }
    }

    fn expired() -> Reply {
        Reply {
            delay: Duration::ZERO,
            status: 400,
            body: json!({ "error": "ExpiredToken", "message": "Token has expired" }),
        }
    }

    fn session_body(access: &str, refresh: &str) -> Value {
        json!({
            "accessJwt": access,
            "refreshJwt": refresh,
            "did": "did:plc:meeeeeeeeeeeeeeeeeeeeeee",
            "handle": "me.bsky.social",
        })
    }

    type Route = dyn Fn(&Seen) -> Reply + Send + Sync;

    /// Serves one request per connection on a loopback port. Returns the
    /// service URL and the log of requests seen.
    async fn serve(
        route: impl Fn(&Seen) -> Reply + Send + Sync + 'static,
    ) -> (String, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let route: Arc<Route> = Arc::new(route);
        let log = seen.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.expect("accept");
                tokio::spawn(answer(stream, route.clone(), log.clone()));
            }
        });
        (format!("http://{addr}"), seen)
    }

    async fn answer(stream: tokio::net::TcpStream, route: Arc<Route>, log: Arc<Mutex<Vec<Seen>>>) {
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.expect("request line");
        let mut token = None;
        let mut length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.expect("header");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                match name.to_ascii_lowercase().as_str() {
                    "authorization" => {
                        token = value.trim().strip_prefix("Bearer ").map(str::to_string)
                    }
                    "content-length" => length = value.trim().parse().expect("length"),
                    _ => {}
                }
            }
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).await.expect("body");

        let path = request_line.split_whitespace().nth(1).unwrap_or_default();
        let method = path
            .trim_start_matches("/xrpc/")
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        let seen = Seen { method, token };
        let reply = route(&seen);
        log.lock().unwrap().push(seen);

        tokio::time::sleep(reply.delay).await;
        let body = reply.body.to_string();
        let response = format!(
            "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            reply.status,
            body.len()
        );
        let mut stream = reader.into_inner();
        stream.write_all(response.as_bytes()).await.expect("write");
        let _ = stream.shutdown().await;
    }

    fn client() -> Client {
        Client::builder().no_proxy().build().expect("client")
    }

    fn seen(method: &str, token: Option<&str>) -> Seen {
        Seen {
            method: method.to_string(),
            token: token.map(str::to_string),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reply_is_waited_for() {
        let (service, _) = serve(|_: &Seen| Reply {
            delay: Duration::from_secs(120),
            ..ok(session_body("access-1", "refresh-1"))
        })
        .await;
        let started = tokio::time::Instant::now();
        let session = XrpcSession::login_with(client(), &service, "me", "app-password")
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert_eq!(session.handle(), "me.bsky.social");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_the_call_replayed() {
        let (service, log) = serve(|seen: &Seen| match (seen.method.as_str(), seen.token.as_deref()) {
            ("com.atproto.server.createSession", _) => ok(session_body("access-1", "refresh-1")),
            ("com.atproto.server.refreshSession", Some("refresh-1")) => {
                ok(session_body("access-2", "refresh-2"))
            }
            ("com.atproto.repo.createRecord", Some("access-2")) => ok(json!({
                "uri": "at://did:plc:meeeeeeeeeeeeeeeeeeeeeee/app.bsky.graph.listitem/3k",
                "cid": "bafy",
            })),
            _ => expired(),
        })
        .await;
        let session = XrpcSession::login_with(client(), &service, "me", "app-password")
            .await
            .unwrap();
        let created = session
            .create_record("app.bsky.graph.listitem", &json!({ "subject": "did:plc:x" }))
            .await
            .unwrap();
        assert!(created.uri.ends_with("/app.bsky.graph.listitem/3k"));
        assert_eq!(
            *log.lock().unwrap(),
            [
                seen("com.atproto.server.createSession", None),
                seen("com.atproto.repo.createRecord", Some("access-1")),
                seen("com.atproto.server.refreshSession", Some("refresh-1")),
                seen("com.atproto.repo.createRecord", Some("access-2")),
            ]
        );

        // later calls keep the refreshed token
        let _ = session
            .create_record("app.bsky.graph.listitem", &json!({ "subject": "did:plc:y" }))
            .await
            .unwrap();
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&seen("com.atproto.repo.createRecord", Some("access-2")))
        );
    }

    #[tokio::test]
    async fn token_still_expired_after_refresh_is_an_error() {
        let (service, log) = serve(|seen: &Seen| match seen.method.as_str() {
            "com.atproto.server.createSession" | "com.atproto.server.refreshSession" => {
                ok(session_body("access", "refresh"))
            }
            _ => expired(),
        })
        .await;
        let session = XrpcSession::login_with(client(), &service, "me", "app-password")
            .await
            .unwrap();
        let err = session
            .search_actors("spam", 100, None)
            .await
            .unwrap_err();
        assert!(err.is_expired_token());
        let methods: Vec<String> = log.lock().unwrap().iter().map(|s| s.method.clone()).collect();
        assert_eq!(
            methods,
            [
                "com.atproto.server.createSession",
                "app.bsky.actor.searchActors",
                "com.atproto.server.refreshSession",
                "app.bsky.actor.searchActors",
            ]
        );
    }

    #[tokio::test]
    async fn error_body_is_classified() {
        let (service, _) = serve(|seen: &Seen| match seen.method.as_str() {
            "com.atproto.server.createSession" => ok(session_body("access-1", "refresh-1")),
            _ => Reply {
                delay: Duration::ZERO,
                status: 502,
                body: json!({}),
            },
        })
        .await;
        let session = XrpcSession::login_with(client(), &service, "me", "app-password")
            .await
            .unwrap();
        let err = session.get_likes("at://x", 100, None).await.unwrap_err();
        assert!(err.is_transient());
    }
}
