//! Shared state handed to every handler.

use crate::services::{file_lifecycle::FileLifecycle, file_query::FileQuery};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: FileLifecycle,
    pub query: FileQuery,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(lifecycle: FileLifecycle, max_upload_bytes: usize) -> Self {
        let query = FileQuery::new(lifecycle.repository().clone());
        Self {
            lifecycle,
            query,
            max_upload_bytes,
        }
    }
}
