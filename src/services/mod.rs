//! Service layer: the lifecycle engine and the collaborators it drives.

pub mod content_store;
pub mod file_lifecycle;
pub mod file_locks;
pub mod file_query;
pub mod metadata_repository;
pub mod reconcile;
pub mod upload_gateway;
