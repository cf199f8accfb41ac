mod articles;
mod feeds;
mod read_state;
mod schema;
mod store;
mod types;

pub use schema::Database;
pub use store::Store;
pub use types::{Article, Enclosure, Feed, StoreError};
