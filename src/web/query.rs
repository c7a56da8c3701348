use serde::Deserialize;

use crate::schedule::scheduler::DEFAULT_RECENT_LIMIT;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    /// Requested limit; the supervisor caps it.
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_RECENT_LIMIT)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreviewQuery {
    pub preview: Option<bool>,
}

impl PreviewQuery {
    pub fn is_preview(&self) -> bool {
        self.preview.unwrap_or(false)
    }
}
