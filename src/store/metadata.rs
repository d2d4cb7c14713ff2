use super::SyncStore;
use super::chunks::ChunkRow;
use super::now_ts;
use super::tokens::TokenRow;
use crate::tokens::Token;
use anyhow::{Context, Result};
use diesel::prelude::*;

use crate::store::schema::file_metadatas::{self, dsl as fm};
use crate::store::schema::tokens;
use crate::store::schema::user_files::dsl as uf;

/// One row of `file_metadatas`: a single immutable version of a file.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = file_metadatas)]
pub struct FileVersionRow {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub file_hash: String,
    pub chunks: i32,
    pub current_flag: bool,
    pub upload_status: String,
    pub prev_id: Option<String>,
    pub end_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncStore {
    /// Insert a file version row on its own (no token attached).
    pub fn insert_version(&self, version: &FileVersionRow) -> Result<()> {
        let mut conn = self.connection()?;
        diesel::insert_into(file_metadatas::table)
            .values(version)
            .execute(&mut conn)
            .context("Failed to insert file version")?;
        Ok(())
    }

    /// Insert a file version together with its stream token.
    /// Both rows land in one transaction; a failure leaves neither behind.
    pub fn insert_version_with_token(
        &self,
        version: &FileVersionRow,
        token: &Token,
    ) -> Result<()> {
        let mut conn = self.connection()?;
        let token_row = TokenRow::from(token);

        conn.immediate_transaction(|conn| {
            diesel::insert_into(file_metadatas::table)
                .values(version)
                .execute(conn)?;
            diesel::insert_into(tokens::table)
                .values(&token_row)
                .execute(conn)?;
            Ok::<_, diesel::result::Error>(())
        })
        .context("Failed to insert file version and stream token")?;

        Ok(())
    }

    /// Look up a completed version carrying the given content digest.
    pub fn find_version_by_hash(&self, file_hash: &str) -> Result<Option<FileVersionRow>> {
        let mut conn = self.connection()?;
        fm::file_metadatas
            .filter(fm::file_hash.eq(file_hash))
            .filter(fm::upload_status.eq(crate::files::UploadStatus::Completed.as_str()))
            .first::<FileVersionRow>(&mut conn)
            .optional()
            .context("Failed to query file version by hash")
    }

    pub fn find_version(&self, file_id: &str, user_id: &str) -> Result<Option<FileVersionRow>> {
        let mut conn = self.connection()?;
        fm::file_metadatas
            .filter(fm::id.eq(file_id))
            .filter(fm::user_id.eq(user_id))
            .first::<FileVersionRow>(&mut conn)
            .optional()
            .context("Failed to query file version by id")
    }

    /// Find a version still accepting chunks (`upload_status = uploading`).
    pub fn find_uploading_version(
        &self,
        file_id: &str,
        user_id: &str,
    ) -> Result<Option<FileVersionRow>> {
        let mut conn = self.connection()?;
        fm::file_metadatas
            .filter(fm::id.eq(file_id))
            .filter(fm::user_id.eq(user_id))
            .filter(fm::upload_status.eq(crate::files::UploadStatus::Uploading.as_str()))
            .first::<FileVersionRow>(&mut conn)
            .optional()
            .context("Failed to query uploading file version")
    }

    /// Fetch the given versions together with their chunk rows.
    /// A version with no chunks yet still produces one row (left join).
    pub fn select_files(
        &self,
        ids: &[String],
    ) -> Result<Vec<(FileVersionRow, Option<ChunkRow>)>> {
        let mut conn = self.connection()?;
        fm::file_metadatas
            .left_join(uf::user_files)
            .filter(fm::id.eq_any(ids))
            .order((fm::created_at.asc(), uf::chunk_id.asc()))
            .select((
                file_metadatas::all_columns,
                crate::store::schema::user_files::all_columns.nullable(),
            ))
            .load::<(FileVersionRow, Option<ChunkRow>)>(&mut conn)
            .context("Failed to select file versions with chunks")
    }

    /// Page through a user's versions joined with their chunks.
    /// Fetches `limit + 1` join rows; the caller uses the boolean to tell
    /// whether more rows remain past this page.
    pub fn list_versions_for_user(
        &self,
        user_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<(FileVersionRow, Option<ChunkRow>)>, bool)> {
        let mut conn = self.connection()?;
        let rows = fm::file_metadatas
            .left_join(uf::user_files)
            .filter(fm::user_id.eq(user_id))
            .order((fm::created_at.desc(), fm::id.asc(), uf::chunk_id.asc()))
            .select((
                file_metadatas::all_columns,
                crate::store::schema::user_files::all_columns.nullable(),
            ))
            .limit(limit + 1)
            .offset(offset)
            .load::<(FileVersionRow, Option<ChunkRow>)>(&mut conn)
            .context("Failed to list file versions for user")?;

        let has_more = rows.len() as i64 > limit;
        Ok((rows, has_more))
    }

    /// Promote the first version of a file: no predecessor to demote.
    pub fn promote_initial_version(&self, file_id: &str, status: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let now = now_ts();

        diesel::update(
            fm::file_metadatas
                .filter(fm::id.eq(file_id))
                .filter(fm::prev_id.is_null()),
        )
        .set((
            fm::current_flag.eq(true),
            fm::upload_status.eq(status),
            fm::end_date.eq(None::<i64>),
            fm::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .context("Failed to promote initial file version")?;

        Ok(())
    }

    /// Atomically move the current flag from `prev_id` to `new_id`.
    ///
    /// Runs under an exclusive transaction so no reader observes two current
    /// versions in the chain. The `prev_id` guard on the first update keeps a
    /// redelivered message from flipping an unrelated row.
    pub fn flip_current_version(&self, new_id: &str, prev_id: &str, status: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let now = now_ts();

        conn.exclusive_transaction(|conn| {
            diesel::update(
                fm::file_metadatas
                    .filter(fm::id.eq(new_id))
                    .filter(fm::prev_id.eq(prev_id)),
            )
            .set((
                fm::current_flag.eq(true),
                fm::upload_status.eq(status),
                fm::end_date.eq(None::<i64>),
                fm::updated_at.eq(now),
            ))
            .execute(conn)?;

            diesel::update(fm::file_metadatas.filter(fm::id.eq(prev_id)))
                .set((
                    fm::current_flag.eq(false),
                    fm::upload_status.eq(status),
                    fm::end_date.eq(Some(now)),
                    fm::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok::<_, diesel::result::Error>(())
        })
        .context("Failed to flip current version flag")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::UploadStatus;
    use crate::store::test_store;

    fn version_row(id: &str, prev: Option<&str>, hash: &str) -> FileVersionRow {
        let now = now_ts();
        FileVersionRow {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            file_name: "report.pdf".to_string(),
            file_size: 5_242_880,
            file_type: "application/pdf".to_string(),
            file_hash: hash.to_string(),
            chunks: 2,
            current_flag: false,
            upload_status: UploadStatus::Uploading.as_str().to_string(),
            prev_id: prev.map(|p| p.to_string()),
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn find_by_hash_only_matches_completed_versions() {
        let (_dir, store) = test_store();

        store.insert_version(&version_row("f1", None, "digest-a")).unwrap();
        assert!(store.find_version_by_hash("digest-a").unwrap().is_none());

        store.promote_initial_version("f1", UploadStatus::Completed.as_str()).unwrap();
        let found = store.find_version_by_hash("digest-a").unwrap().unwrap();
        assert_eq!(found.id, "f1");
        assert!(found.current_flag);
    }

    #[test]
    fn flip_demotes_previous_and_promotes_new() {
        let (_dir, store) = test_store();

        store.insert_version(&version_row("f1", None, "digest-a")).unwrap();
        store.promote_initial_version("f1", UploadStatus::Completed.as_str()).unwrap();
        store.insert_version(&version_row("f2", Some("f1"), "digest-b")).unwrap();

        store
            .flip_current_version("f2", "f1", UploadStatus::Completed.as_str())
            .unwrap();

        let new = store.find_version("f2", "user-1").unwrap().unwrap();
        let old = store.find_version("f1", "user-1").unwrap().unwrap();
        assert!(new.current_flag);
        assert!(new.end_date.is_none());
        assert!(!old.current_flag);
        assert!(old.end_date.is_some());
    }

    #[test]
    fn flip_is_idempotent_and_keeps_one_current_version() {
        let (_dir, store) = test_store();

        store.insert_version(&version_row("f1", None, "digest-a")).unwrap();
        store.promote_initial_version("f1", UploadStatus::Completed.as_str()).unwrap();
        store.insert_version(&version_row("f2", Some("f1"), "digest-b")).unwrap();

        store
            .flip_current_version("f2", "f1", UploadStatus::Completed.as_str())
            .unwrap();
        store
            .flip_current_version("f2", "f1", UploadStatus::Completed.as_str())
            .unwrap();

        let chain = [
            store.find_version("f1", "user-1").unwrap().unwrap(),
            store.find_version("f2", "user-1").unwrap().unwrap(),
        ];
        let current: Vec<_> = chain.iter().filter(|v| v.current_flag).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, "f2");
    }

    #[test]
    fn guarded_flip_ignores_mismatched_predecessor() {
        let (_dir, store) = test_store();

        store.insert_version(&version_row("f2", Some("f1"), "digest-b")).unwrap();
        store
            .flip_current_version("f2", "f0", UploadStatus::Completed.as_str())
            .unwrap();

        let row = store.find_version("f2", "user-1").unwrap().unwrap();
        assert!(!row.current_flag, "guard must reject a wrong prev_id");
    }

    #[test]
    fn select_files_includes_versions_without_chunks() {
        let (_dir, store) = test_store();

        store.insert_version(&version_row("f1", None, "digest-a")).unwrap();
        let rows = store.select_files(&["f1".to_string()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].1.is_none());
    }
}
