//! JSON shapes exchanged with readers (web frontend, terminal client, CLI).

use serde::{Deserialize, Serialize};

use crate::refresh::{FeedOutcome, RefreshSummary};
use crate::storage::Article;

/// Envelope for a cached article listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticlesResponse {
    #[serde(rename = "fromCache")]
    pub from_cache: bool,
    pub articles: Vec<Article>,
}

impl ArticlesResponse {
    pub fn cached(articles: Vec<Article>) -> Self {
        Self {
            from_cache: true,
            articles,
        }
    }
}

/// Request to register a feed. `name` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRegistration {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Request naming one article for read/unread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum FeedOutcomeView {
    Done { stored: usize, failed: usize },
    Skipped { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedReportView {
    pub url: String,
    #[serde(flatten)]
    pub outcome: FeedOutcomeView,
}

/// Serializable form of a [`RefreshSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub stored: usize,
    pub skipped: usize,
    pub feeds: Vec<FeedReportView>,
}

impl From<&RefreshSummary> for RefreshReport {
    fn from(summary: &RefreshSummary) -> Self {
        let feeds = summary
            .feeds
            .iter()
            .map(|report| FeedReportView {
                url: report.url.clone(),
                outcome: match &report.outcome {
                    FeedOutcome::Done { stored, failed } => FeedOutcomeView::Done {
                        stored: *stored,
                        failed: *failed,
                    },
                    FeedOutcome::Skipped(e) => FeedOutcomeView::Skipped {
                        error: e.to_string(),
                    },
                },
            })
            .collect();

        Self {
            stored: summary.stored(),
            skipped: summary.skipped(),
            feeds,
        }
    }
}
