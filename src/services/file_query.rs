//! Read-side views over one owner's files: the dashboard listing (with
//! search and favorites filters) and the trash.

use crate::{
    models::file::File,
    services::{
        file_lifecycle::LifecycleResult,
        metadata_repository::{FileFilter, MetadataRepository},
    },
};

#[derive(Clone, Debug, Default)]
pub struct ListFilesParams {
    /// Case-insensitive substring of the file name; blank means no filter.
    pub search: Option<String>,
    pub favorites_only: bool,
}

#[derive(Clone)]
pub struct FileQuery {
    repo: MetadataRepository,
}

impl FileQuery {
    pub fn new(repo: MetadataRepository) -> Self {
        Self { repo }
    }

    /// Active files only, newest first.
    pub async fn list_files(&self, owner: &str, params: &ListFilesParams) -> LifecycleResult<Vec<File>> {
        let filter = FileFilter {
            trashed: Some(false),
            favorite: params.favorites_only.then_some(true),
            name_contains: params
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..FileFilter::owned_by(owner)
        };
        Ok(self.repo.find_files(&filter).await?)
    }

    /// Trashed files only, newest first.
    pub async fn list_trash(&self, owner: &str) -> LifecycleResult<Vec<File>> {
        let filter = FileFilter {
            trashed: Some(true),
            ..FileFilter::owned_by(owner)
        };
        Ok(self.repo.find_files(&filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::file_lifecycle::tests::{setup, upload_of};

    #[tokio::test]
    async fn test_trash_then_restore_round_trip() {
        let fx = setup().await;
        let query = FileQuery::new(fx.engine.repository().clone());
        let params = ListFilesParams::default();

        let file = fx.engine.upload("u1", upload_of("notes.txt", b"n")).await.unwrap();
        let before = query.list_files("u1", &params).await.unwrap();

        fx.engine.trash("u1", file.id).await.unwrap();
        assert!(query.list_files("u1", &params).await.unwrap().iter().all(|f| f.id != file.id));
        assert!(query.list_trash("u1").await.unwrap().iter().any(|f| f.id == file.id));

        fx.engine.restore("u1", file.id).await.unwrap();
        assert_eq!(query.list_files("u1", &params).await.unwrap(), before);
        assert!(query.list_trash("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listings_never_mix_states() {
        let fx = setup().await;
        let query = FileQuery::new(fx.engine.repository().clone());
        for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
            let file = fx.engine.upload("u1", upload_of(name, b"x")).await.unwrap();
            if name < "c" {
                fx.engine.trash("u1", file.id).await.unwrap();
            }
        }

        let active = query.list_files("u1", &ListFilesParams::default()).await.unwrap();
        let trashed = query.list_trash("u1").await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(trashed.len(), 2);
        assert!(active.iter().all(|f| !f.trashed));
        assert!(trashed.iter().all(|f| f.trashed));
    }

    #[tokio::test]
    async fn test_favorites_only_and_search() {
        let fx = setup().await;
        let query = FileQuery::new(fx.engine.repository().clone());
        let report = fx.engine.upload("u1", upload_of("Report.pdf", b"r")).await.unwrap();
        fx.engine.upload("u1", upload_of("photo.png", b"p")).await.unwrap();
        let memo = fx.engine.upload("u1", upload_of("memo.txt", b"m")).await.unwrap();
        fx.engine.toggle_favorite("u1", report.id).await.unwrap();
        fx.engine.toggle_favorite("u1", memo.id).await.unwrap();

        let favorites = query
            .list_files("u1", &ListFilesParams { search: None, favorites_only: true })
            .await
            .unwrap();
        assert_eq!(favorites.len(), 2);
        assert!(favorites.iter().all(|f| f.favorite));
        assert_eq!(favorites[0].id, memo.id);

        let searched = query
            .list_files(
                "u1",
                &ListFilesParams { search: Some("REPORT".into()), favorites_only: true },
            )
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].id, report.id);

        let blank = query
            .list_files("u1", &ListFilesParams { search: Some("  ".into()), favorites_only: false })
            .await
            .unwrap();
        assert_eq!(blank.len(), 3);
    }

    #[tokio::test]
    async fn test_listing_is_owner_scoped() {
        let fx = setup().await;
        let query = FileQuery::new(fx.engine.repository().clone());
        fx.engine.upload("u1", upload_of("a.txt", b"a")).await.unwrap();

        assert!(query.list_files("u2", &ListFilesParams::default()).await.unwrap().is_empty());
        assert!(query.list_trash("u2").await.unwrap().is_empty());
    }
}
