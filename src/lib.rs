//! Feed ingestion and caching pipeline.
//!
//! Registered RSS/Atom feeds are fetched with bounded retries, normalized into
//! [`storage::Article`]s and upserted into a SQLite cache keyed by article
//! link, so readers can list articles without touching the network.
//!
//! - [`feed`] - fetcher, parser and title lookup
//! - [`storage`] - the [`storage::Store`] trait and its SQLite [`storage::Database`]
//! - [`refresh`] - the [`refresh::Refresher`] that drives Fetcher → Parser → Store
//! - [`api`] - JSON request/response shapes for readers
//! - [`config`] - optional TOML configuration

pub mod api;
pub mod config;
pub mod feed;
pub mod refresh;
pub mod storage;
pub mod util;
