//! Turning user input into identifiers the service understands.
//!
//! Input lines feeding a bulk add are accepted on a best-effort basis: an
//! identifier that does not look right is still used and the caller decides
//! how loudly to warn. Post URLs are all-or-nothing: anything malformed is an
//! [`Error::InvalidPostUrl`].

use std::fmt;
use std::str::FromStr;

use crate::model::record;
use crate::{Error, Result};

pub const DID_PREFIX: &str = "did:plc:";
/// Width of a `did:plc:` identifier, which is also how much of a line is read.
pub const DID_WIDTH: usize = 32;
pub const HANDLE_SUFFIXES: &[&str] = &[".bsky.social"];
pub const RECORD_KEY_LEN: usize = 13;
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// An identifier cut from an input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Did(String),
    /// Does not carry [`DID_PREFIX`]; still worth a try.
    Unrecognized(String),
}

impl Extracted {
    pub fn value(&self) -> &str {
        match self {
            Extracted::Did(value) | Extracted::Unrecognized(value) => value,
        }
    }

    pub fn into_value(self) -> String {
        match self {
            Extracted::Did(value) | Extracted::Unrecognized(value) => value,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Extracted::Did(_))
    }
}

/// The first [`DID_WIDTH`] characters of `line`, whitespace and all.
pub fn extract_did(line: &str) -> Extracted {
    let value: String = line.chars().take(DID_WIDTH).collect();
    if value.starts_with(DID_PREFIX) {
        Extracted::Did(value)
    } else {
        Extracted::Unrecognized(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorRef {
    Did(String),
    Handle(String),
}

impl ActorRef {
    fn parse(value: &str) -> Option<Self> {
        if value.starts_with(DID_PREFIX) {
            Some(ActorRef::Did(value.to_string()))
        } else if HANDLE_SUFFIXES.iter().any(|suffix| value.ends_with(suffix)) {
            Some(ActorRef::Handle(value.to_string()))
        } else {
            None
        }
    }
}

/// `https://<host>/profile/<actor>/post/<record key>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostUrl {
    pub actor: ActorRef,
    pub rkey: String,
}

impl PostUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPostUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let rest = url
            .strip_prefix("https://")
            .ok_or_else(|| invalid("expected an https:// url"))?;
        let segments: Vec<&str> = rest.split('/').collect();
        let [host, "profile", actor, "post", rkey] = segments.as_slice() else {
            return Err(invalid("expected https://<host>/profile/<actor>/post/<key>"));
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let actor = ActorRef::parse(actor).ok_or_else(|| {
            invalid(&format!(
                "profile must be a {DID_PREFIX} identifier or a handle ending in one of {HANDLE_SUFFIXES:?}"
            ))
        })?;
        if rkey.chars().count() != RECORD_KEY_LEN {
            return Err(invalid(&format!(
                "post key must be {RECORD_KEY_LEN} characters"
            )));
        }
        Ok(Self {
            actor,
            rkey: rkey.to_string(),
        })
    }
}

impl FromStr for PostUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// `at://<authority>/<collection>/<record key>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    pub authority: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn new(authority: &str, collection: &str, rkey: &str) -> Self {
        Self {
            authority: authority.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        }
    }

    pub fn post(did: &str, rkey: &str) -> Self {
        Self::new(did, POST_COLLECTION, rkey)
    }

    pub fn list(did: &str, rkey: &str) -> Self {
        Self::new(did, record::LIST, rkey)
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.authority, self.collection, self.rkey)
    }
}
