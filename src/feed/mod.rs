//! Network and format side of the pipeline.
//!
//! - `fetcher` - HTTP retrieval with a fixed retry budget and size limit
//! - `parser` - RSS/Atom/JSON Feed bytes into canonical [`Article`]s
//! - `title` - one-shot feed title lookup used when registering a feed
//!
//! [`Article`]: crate::storage::Article

mod fetcher;
mod parser;
mod title;

pub use fetcher::{FetchError, Fetcher, MAX_ATTEMPTS, RETRY_DELAY};
pub use parser::{parse_feed, parse_feed_title, ParseError};
pub use title::resolve_feed_title;
