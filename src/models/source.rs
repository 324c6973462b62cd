use serde::{Deserialize, Serialize};

/// One entry of the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    /// Opaque identifier as stored in the catalog file.
    pub source_id: String,
    pub display_name: String,
    pub feed_url: String,
}

impl FeedSource {
    pub fn new(
        source_id: impl Into<String>,
        display_name: impl Into<String>,
        feed_url: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            display_name: display_name.into(),
            feed_url: feed_url.into(),
        }
    }
}
