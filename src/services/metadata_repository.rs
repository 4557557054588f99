//! src/services/metadata_repository.rs
//!
//! SQLite-backed store of `File` and `Share` records. This is the single
//! source of truth for file state; nothing above it caches records across
//! calls. Every query that touches a file by id is scoped by owner so that
//! callers cannot observe foreign records.

use crate::models::{file::File, share::Share};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tracing::debug;
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, owner_id, name, folder, description, content_type, \
                            size_bytes, storage_key, created_at, favorite, trashed";

/// Newest first; rows created in the same instant keep insertion order.
const FILE_ORDER: &str = " ORDER BY julianday(created_at) DESC, seq DESC";

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

pub type RepoResult<T> = Result<T, sqlx::Error>;

/// Filter for [`MetadataRepository::find_files`]. Unset fields do not
/// constrain the result.
#[derive(Clone, Debug, Default)]
pub struct FileFilter {
    pub owner_id: String,
    pub trashed: Option<bool>,
    pub favorite: Option<bool>,
    /// Case-insensitive substring of the file name.
    pub name_contains: Option<String>,
    /// Only files the owner has granted to at least one recipient.
    pub shared_only: bool,
}

impl FileFilter {
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..Self::default()
        }
    }

    /// Append the `WHERE` clause for this filter against the `files` table.
    /// Bound parameters stay constant no matter how many rows match.
    fn push_where(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" WHERE files.owner_id = ");
        builder.push_bind(self.owner_id.clone());

        if let Some(trashed) = self.trashed {
            builder.push(" AND files.trashed = ");
            builder.push_bind(trashed);
        }

        if let Some(favorite) = self.favorite {
            builder.push(" AND files.favorite = ");
            builder.push_bind(favorite);
        }

        if let Some(needle) = self.name_contains.as_deref().filter(|n| !n.is_empty()) {
            builder.push(" AND LOWER(files.name) LIKE ");
            builder.push_bind(like_pattern(needle));
            builder.push(" ESCAPE '\\'");
        }

        if self.shared_only {
            builder.push(" AND files.id IN (SELECT file_id FROM shares WHERE shared_by = ");
            builder.push_bind(self.owner_id.clone());
            builder.push(")");
        }
    }
}

#[derive(Clone)]
pub struct MetadataRepository {
    db: Arc<SqlitePool>,
}

impl MetadataRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> RepoResult<()> {
        debug!("applying schema");
        sqlx::raw_sql(SCHEMA).execute(&*self.db).await?;
        Ok(())
    }

    /// Insert a new record. `shared_to` on the input is ignored; grants are
    /// only ever created through [`MetadataRepository::insert_share`].
    pub async fn insert_file(&self, file: &File) -> RepoResult<File> {
        sqlx::query_as::<_, File>(&format!(
            "INSERT INTO files (
                id, owner_id, name, folder, description, content_type,
                size_bytes, storage_key, created_at, favorite, trashed
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0)
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(file.id)
        .bind(&file.owner_id)
        .bind(&file.name)
        .bind(&file.folder)
        .bind(&file.description)
        .bind(&file.content_type)
        .bind(file.size_bytes)
        .bind(&file.storage_key)
        .bind(file.created_at)
        .fetch_one(&*self.db)
        .await
    }

    /// Fetch a record by id, only if `owner_id` owns it.
    pub async fn find_owned(&self, owner_id: &str, id: Uuid) -> RepoResult<Option<File>> {
        let file = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?;

        match file {
            Some(file) => Ok(Some(self.with_recipients(file).await?)),
            None => Ok(None),
        }
    }

    /// Filtered, ordered listing of one owner's records.
    ///
    /// Recipients are fetched with a second query that repeats the filter,
    /// so neither statement binds one parameter per file.
    pub async fn find_files(&self, filter: &FileFilter) -> RepoResult<Vec<File>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {FILE_COLUMNS} FROM files"));
        filter.push_where(&mut builder);
        builder.push(FILE_ORDER);
        let mut files: Vec<File> = builder.build_query_as().fetch_all(&*self.db).await?;
        if files.is_empty() {
            return Ok(files);
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT shares.file_id, shares.recipient FROM shares \
             JOIN files ON files.id = shares.file_id",
        );
        filter.push_where(&mut builder);
        let rows: Vec<(Uuid, String)> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut by_file: HashMap<Uuid, BTreeSet<String>> = HashMap::new();
        for (file_id, recipient) in rows {
            by_file.entry(file_id).or_default().insert(recipient);
        }
        for file in &mut files {
            file.shared_to = by_file.remove(&file.id).unwrap_or_default();
        }
        Ok(files)
    }

    /// Set the trash flag on an owned record. `None` when absent or foreign.
    pub async fn set_trashed(
        &self,
        owner_id: &str,
        id: Uuid,
        trashed: bool,
    ) -> RepoResult<Option<File>> {
        let file = sqlx::query_as::<_, File>(&format!(
            "UPDATE files SET trashed = ? WHERE id = ? AND owner_id = ?
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(trashed)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?;

        match file {
            Some(file) => Ok(Some(self.with_recipients(file).await?)),
            None => Ok(None),
        }
    }

    /// Flip the favorite flag in one statement so concurrent toggles cannot
    /// read the same prior value.
    pub async fn toggle_favorite(&self, owner_id: &str, id: Uuid) -> RepoResult<Option<File>> {
        let file = sqlx::query_as::<_, File>(&format!(
            "UPDATE files SET favorite = NOT favorite WHERE id = ? AND owner_id = ?
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?;

        match file {
            Some(file) => Ok(Some(self.with_recipients(file).await?)),
            None => Ok(None),
        }
    }

    /// Record a grant. Returns `false` when the `(file, recipient)` pair
    /// already existed; the original grant is left untouched.
    pub async fn insert_share(&self, share: &Share) -> RepoResult<bool> {
        let result = sqlx::query(
            "INSERT INTO shares (file_id, recipient, shared_by, shared_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(file_id, recipient) DO NOTHING",
        )
        .bind(share.file_id)
        .bind(&share.recipient)
        .bind(&share.shared_by)
        .bind(share.shared_at)
        .execute(&*self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Grants issued by `owner_id`, oldest first.
    #[cfg(test)]
    pub async fn shares_by(&self, owner_id: &str) -> RepoResult<Vec<Share>> {
        sqlx::query_as::<_, Share>(
            "SELECT file_id, recipient, shared_by, shared_at
             FROM shares WHERE shared_by = ?
             ORDER BY julianday(shared_at) ASC, rowid ASC",
        )
        .bind(owner_id)
        .fetch_all(&*self.db)
        .await
    }

    /// Grants referencing a single file.
    #[cfg(test)]
    pub async fn shares_for(&self, file_id: Uuid) -> RepoResult<Vec<Share>> {
        sqlx::query_as::<_, Share>(
            "SELECT file_id, recipient, shared_by, shared_at
             FROM shares WHERE file_id = ? ORDER BY recipient ASC",
        )
        .bind(file_id)
        .fetch_all(&*self.db)
        .await
    }

    /// Delete a record together with every grant referencing it, atomically.
    /// Returns `false` when no owned record matched.
    pub async fn delete_file(&self, owner_id: &str, id: Uuid) -> RepoResult<bool> {
        let mut tx = self.db.begin().await?;

        let removed = sqlx::query("DELETE FROM files WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        if removed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let shares = sqlx::query("DELETE FROM shares WHERE file_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(
            "deleted file {} and {} share(s)",
            id,
            shares.rows_affected()
        );
        Ok(true)
    }

    /// Every `(id, owner_id, storage_key)` triple, for reconciliation.
    pub async fn storage_keys(&self) -> RepoResult<Vec<(Uuid, String, String)>> {
        sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, owner_id, storage_key FROM files",
        )
        .fetch_all(&*self.db)
        .await
    }

    /// Fill `shared_to` on a single record from the `shares` table.
    async fn with_recipients(&self, mut file: File) -> RepoResult<File> {
        let recipients: Vec<String> =
            sqlx::query_scalar("SELECT recipient FROM shares WHERE file_id = ?")
                .bind(file.id)
                .fetch_all(&*self.db)
                .await?;
        file.shared_to = recipients.into_iter().collect();
        Ok(file)
    }
}

/// Build a `LIKE` pattern matching `needle` anywhere, with `%`, `_` and the
/// escape character itself taken literally.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_ascii_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    /// Fresh in-memory database with the schema applied. A single
    /// connection keeps every query on the same in-memory instance.
    pub(crate) async fn setup_repo() -> MetadataRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = MetadataRepository::new(Arc::new(pool));
        repo.migrate().await.unwrap();
        repo
    }

    fn sample(owner: &str, name: &str) -> File {
        File {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            name: name.to_string(),
            folder: "root".to_string(),
            description: String::new(),
            content_type: "text/plain".to_string(),
            size_bytes: 4,
            storage_key: Uuid::new_v4().simple().to_string(),
            created_at: Utc::now(),
            favorite: false,
            trashed: false,
            shared_to: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_owned() {
        let repo = setup_repo().await;
        let file = repo.insert_file(&sample("u1", "a.txt")).await.unwrap();

        let found = repo.find_owned("u1", file.id).await.unwrap().unwrap();
        assert_eq!(found.name, "a.txt");
        assert!(!found.trashed);
        assert!(!found.favorite);
        assert!(found.shared_to.is_empty());

        assert!(repo.find_owned("u2", file.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_files_orders_newest_first() {
        let repo = setup_repo().await;
        let mut old = sample("u1", "old.txt");
        old.created_at = Utc::now() - Duration::hours(1);
        repo.insert_file(&old).await.unwrap();
        repo.insert_file(&sample("u1", "new.txt")).await.unwrap();

        let names: Vec<_> = repo
            .find_files(&FileFilter::owned_by("u1"))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["new.txt", "old.txt"]);
    }

    #[tokio::test]
    async fn test_find_files_breaks_ties_by_insertion() {
        let repo = setup_repo().await;
        let at = Utc::now();
        for name in ["first.txt", "second.txt"] {
            let mut file = sample("u1", name);
            file.created_at = at;
            repo.insert_file(&file).await.unwrap();
        }

        let names: Vec<_> = repo
            .find_files(&FileFilter::owned_by("u1"))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["second.txt", "first.txt"]);
    }

    #[tokio::test]
    async fn test_name_filter_is_case_insensitive_and_literal() {
        let repo = setup_repo().await;
        repo.insert_file(&sample("u1", "Report_2024.PDF")).await.unwrap();
        repo.insert_file(&sample("u1", "Report-2024.pdf")).await.unwrap();

        let filter = FileFilter {
            name_contains: Some("report_".into()),
            ..FileFilter::owned_by("u1")
        };
        let found = repo.find_files(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Report_2024.PDF");
    }

    #[tokio::test]
    async fn test_toggle_favorite_flips_and_is_owner_scoped() {
        let repo = setup_repo().await;
        let file = repo.insert_file(&sample("u1", "a.txt")).await.unwrap();

        assert!(repo.toggle_favorite("u1", file.id).await.unwrap().unwrap().favorite);
        assert!(!repo.toggle_favorite("u1", file.id).await.unwrap().unwrap().favorite);
        assert!(repo.toggle_favorite("u2", file.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_share_is_set_semantics() {
        let repo = setup_repo().await;
        let file = repo.insert_file(&sample("u1", "a.txt")).await.unwrap();
        let share = Share {
            file_id: file.id,
            recipient: "bob@x.com".into(),
            shared_by: "u1".into(),
            shared_at: Utc::now(),
        };

        assert!(repo.insert_share(&share).await.unwrap());
        assert!(!repo.insert_share(&share).await.unwrap());
        assert_eq!(repo.shares_for(file.id).await.unwrap().len(), 1);

        let found = repo.find_owned("u1", file.id).await.unwrap().unwrap();
        assert_eq!(found.shared_to.len(), 1);
        assert!(found.shared_to.contains("bob@x.com"));
    }

    #[tokio::test]
    async fn test_delete_file_cascades_shares() {
        let repo = setup_repo().await;
        let file = repo.insert_file(&sample("u1", "a.txt")).await.unwrap();
        repo.insert_share(&Share {
            file_id: file.id,
            recipient: "bob@x.com".into(),
            shared_by: "u1".into(),
            shared_at: Utc::now(),
        })
        .await
        .unwrap();

        assert!(!repo.delete_file("u2", file.id).await.unwrap());
        assert!(repo.delete_file("u1", file.id).await.unwrap());
        assert!(repo.find_owned("u1", file.id).await.unwrap().is_none());
        assert!(repo.shares_for(file.id).await.unwrap().is_empty());
        assert!(repo.shares_by("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_key_cannot_be_rewritten() {
        let repo = setup_repo().await;
        let file = repo.insert_file(&sample("u1", "a.txt")).await.unwrap();

        let result = sqlx::query("UPDATE files SET storage_key = 'other' WHERE id = ?")
            .bind(file.id)
            .execute(repo.pool())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_listing_scales_past_sqlite_variable_limit() {
        const COUNT: usize = 33_000;
        let repo = setup_repo().await;
        let shared_at = Utc::now();

        let mut tx = repo.pool().begin().await.unwrap();
        for i in 0..COUNT {
            let file = sample("u1", &format!("f{i}.txt"));
            sqlx::query(
                "INSERT INTO files (id, owner_id, name, folder, description, content_type,
                                    size_bytes, storage_key, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(file.id)
            .bind(&file.owner_id)
            .bind(&file.name)
            .bind(&file.folder)
            .bind(&file.description)
            .bind(&file.content_type)
            .bind(file.size_bytes)
            .bind(&file.storage_key)
            .bind(file.created_at)
            .execute(&mut *tx)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO shares (file_id, recipient, shared_by, shared_at)
                 VALUES (?, 'bob@x.com', 'u1', ?)",
            )
            .bind(file.id)
            .bind(shared_at)
            .execute(&mut *tx)
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let active = repo
            .find_files(&FileFilter {
                trashed: Some(false),
                ..FileFilter::owned_by("u1")
            })
            .await
            .unwrap();
        assert_eq!(active.len(), COUNT);
        assert!(active.iter().all(|f| f.shared_to.contains("bob@x.com")));

        let shared = repo
            .find_files(&FileFilter {
                shared_only: true,
                ..FileFilter::owned_by("u1")
            })
            .await
            .unwrap();
        assert_eq!(shared.len(), COUNT);
    }

    #[tokio::test]
    async fn test_shared_only_filter_and_recipients_follow_filter() {
        let repo = setup_repo().await;
        let shared = repo.insert_file(&sample("u1", "shared.txt")).await.unwrap();
        let private = repo.insert_file(&sample("u1", "private.txt")).await.unwrap();
        for recipient in ["carol@x.com", "bob@x.com"] {
            repo.insert_share(&Share {
                file_id: shared.id,
                recipient: recipient.into(),
                shared_by: "u1".into(),
                shared_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let found = repo
            .find_files(&FileFilter {
                shared_only: true,
                ..FileFilter::owned_by("u1")
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, shared.id);
        assert_eq!(
            found[0].shared_to.iter().cloned().collect::<Vec<_>>(),
            vec!["bob@x.com".to_string(), "carol@x.com".to_string()]
        );

        let all = repo.find_files(&FileFilter::owned_by("u1")).await.unwrap();
        let private_row = all.iter().find(|f| f.id == private.id).unwrap();
        assert!(private_row.shared_to.is_empty());
        assert!(repo
            .find_files(&FileFilter {
                shared_only: true,
                ..FileFilter::owned_by("u2")
            })
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("A%b_c\\"), "%a\\%b\\_c\\\\%");
    }
}
