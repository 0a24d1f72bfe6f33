//! Exponential backoff around a single remote call.
//!
//! Only [`Error::Transient`] failures are retried. There is no attempt cap:
//! the loop gives up once the elapsed time since the first attempt reaches
//! [`Backoff::max_elapsed`] and hands back the last failure unchanged.
//! Every retry repeats the remote call, so operations passed in must be safe
//! to issue more than once.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::{Error, Result};

pub const MAX_ELAPSED: Duration = Duration::from_secs(300);

/// Flips to `true` when the caller wants in-flight retries abandoned.
pub type Cancel = watch::Receiver<bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub max_elapsed: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2,
            max_elapsed: MAX_ELAPSED,
        }
    }
}

/// A [`Backoff`] policy plus an optional way for the caller to give up early.
#[derive(Debug, Clone, Default)]
pub struct Retry {
    backoff: Backoff,
    cancel: Option<Cancel>,
}

impl Retry {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            cancel: None,
        }
    }

    /// Once `cancel` turns `true`, a pending backoff sleep ends with
    /// [`Error::Cancelled`].
    pub fn with_cancel(backoff: Backoff, cancel: Cancel) -> Self {
        Self {
            backoff,
            cancel: Some(cancel),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|cancel| *cancel.borrow())
    }

    pub async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Backoff {
            initial,
            factor,
            max_elapsed,
        } = self.backoff;
        let start = Instant::now();
        let mut delay = initial;
        let mut attempt: u32 = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };
            let elapsed = start.elapsed();
            if elapsed >= max_elapsed {
                warn!(what, attempt, ?elapsed, error = %err, "giving up");
                return Err(err);
            }
            let wait = delay.min(max_elapsed - elapsed);
            warn!(what, attempt, ?wait, error = %err, "transient failure, backing off");
            match &self.cancel {
                Some(cancel) => {
                    let mut cancel = cancel.clone();
                    tokio::select! {
                        _ = sleep(wait) => {}
                        _ = cancelled(&mut cancel) => return Err(Error::Cancelled(Box::new(err))),
                    }
                }
                None => sleep(wait).await,
            }
            delay = delay.saturating_mul(factor);
            attempt += 1;
        }
    }
}

async fn cancelled(cancel: &mut Cancel) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        // sender gone, nobody can cancel any more
        std::future::pending::<()>().await;
    }
}
