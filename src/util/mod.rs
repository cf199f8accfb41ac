//! Small helpers shared by the CLI and the refresher.

mod url_validator;

pub use url_validator::{validate_feed_url, UrlValidationError};
