//! Search Bluesky for accounts and bulk-add them to moderation lists, using
//! the AT Protocol XRPC API over [reqwest](https://crates.io/crates/reqwest).
//!
//! # Usage
//!
//! ```bash
//! $ cargo run -- --help
//! $ cargo run -- likers https://bsky.app/profile/someone.bsky.social/post/3jzfcijpj2z2a > likers.txt
//! $ cargo run -- add --list-name "reply guys" likers.txt
//! ```
//!
//! # License
//!
//! This project is licensed under the MIT license. See the [LICENSE](LICENSE) file for more details.

pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod identity;
pub mod lookup;
pub mod model;
pub mod paginate;
pub mod retry;
pub mod xrpc;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
