//! Bulk-adding identities to a moderation list.
//!
//! The target list is resolved first (created or looked up), then each input
//! line becomes one list item, strictly in input order. A failed item is logged
//! and skipped; it never stops the batch.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::api::Session;
use crate::identity::{extract_did, DID_PREFIX};
use crate::lookup::get_list_by_key;
use crate::model::record;
use crate::retry::Retry;
use crate::{Error, Result};

/// Which list the items go into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListTarget {
    Create { name: String, description: String },
    Existing { key: String },
}

impl ListTarget {
    /// Exactly one of `name` and `key` must be set. `description` defaults to
    /// the name.
    pub fn from_options(
        name: Option<String>,
        description: Option<String>,
        key: Option<String>,
    ) -> Result<Self> {
        match (name, key) {
            (Some(name), None) => Ok(ListTarget::Create {
                description: description.unwrap_or_else(|| name.clone()),
                name,
            }),
            (None, Some(key)) => Ok(ListTarget::Existing { key }),
            (Some(_), Some(_)) => Err(Error::ListTarget(
                "--list-name and --list-key cannot be used together".into(),
            )),
            (None, None) => Err(Error::ListTarget(
                "either --list-name or --list-key is required".into(),
            )),
        }
    }
}

/// Where input lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    /// `-` or nothing means standard input.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None | Some("-") => InputSource::Stdin,
            Some(path) => InputSource::File(PathBuf::from(path)),
        }
    }

    pub fn read_lines(&self) -> Result<Vec<String>> {
        match self {
            InputSource::Stdin => read_lines(io::stdin().lock()),
            InputSource::File(path) => read_lines(BufReader::new(File::open(path)?)),
        }
    }
}

fn read_lines(reader: impl BufRead) -> Result<Vec<String>> {
    Ok(reader.lines().collect::<io::Result<_>>()?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub list_uri: String,
    /// Lines taken from the input, whether or not their item was created.
    pub processed: usize,
    /// Identifiers whose item could not be created, in input order.
    pub failed: Vec<String>,
    /// Stopped by cancellation before the input ran out.
    pub interrupted: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.processed - self.failed.len()
    }
}

/// Returns the URI of the list `target` names, creating it if asked to.
pub async fn resolve_target<S: Session>(
    session: &S,
    retry: &Retry,
    target: &ListTarget,
) -> Result<String> {
    match target {
        ListTarget::Create { name, description } => {
            let list = serde_json::to_value(record::List::modlist(name, description))?;
            let created = retry
                .call("create list", || session.create_record(record::LIST, &list))
                .await?;
            info!(uri = %created.uri, %name, "created moderation list");
            Ok(created.uri)
        }
        ListTarget::Existing { key } => {
            let list = get_list_by_key(session, retry, key).await?;
            info!(uri = %list.uri, name = %list.name, "using existing list");
            Ok(list.uri)
        }
    }
}

/// Adds one item per line of `lines` to the list `target` names.
///
/// Errors only if the list itself cannot be resolved, or if cancellation was
/// requested before it was. Cancellation later on ends the batch early with
/// [`BatchReport::interrupted`] set.
pub async fn add_to_list<S, I>(
    session: &S,
    retry: &Retry,
    target: &ListTarget,
    lines: I,
) -> Result<BatchReport>
where
    S: Session,
    I: IntoIterator<Item = String>,
{
    if retry.is_cancelled() {
        return Err(Error::Interrupted("list add"));
    }
    let list_uri = resolve_target(session, retry, target).await?;
    let mut report = BatchReport {
        list_uri,
        processed: 0,
        failed: Vec::new(),
        interrupted: false,
    };
    for line in lines {
        if retry.is_cancelled() {
            warn!(processed = report.processed, "interrupted, not reading more input");
            report.interrupted = true;
            break;
        }
        report.processed += 1;
        let subject = extract_did(&line);
        if !subject.is_recognized() {
            warn!(
                line = report.processed,
                subject = subject.value(),
                "identifier does not start with {DID_PREFIX}, adding it anyway"
            );
        }
        let subject = subject.into_value();
        info!("Adding record to modlist: {line}");
        let item = serde_json::to_value(record::ListItem::new(&report.list_uri, &subject))?;
        match retry
            .call("add list item", || {
                session.create_record(record::LIST_ITEM, &item)
            })
            .await
        {
            Ok(created) => debug!(uri = %created.uri, %subject, "added"),
            Err(err) => {
                warn!(line = report.processed, %subject, error = %err, "failed to add {subject}");
                report.failed.push(subject);
            }
        }
    }
    Ok(report)
}
