use super::SyncStore;
use super::now_ts;
use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::upsert::excluded;

use crate::store::schema::user_files::{self, dsl as uf};

/// One row of `user_files`: a single uploaded (or inherited) chunk.
///
/// `chunk_blob_url` may point into a predecessor version's blob directory
/// when the chunk was inherited during reconciliation.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = user_files)]
pub struct ChunkRow {
    pub user_id: String,
    pub file_id: String,
    pub chunk_id: i64,
    pub chunk_blob_url: String,
    pub chunk_hash: String,
    pub next_chunk_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChunkRow {
    pub fn new(
        user_id: impl Into<String>,
        file_id: impl Into<String>,
        chunk_id: i64,
        chunk_blob_url: impl Into<String>,
        chunk_hash: impl Into<String>,
        next_chunk_id: Option<i64>,
    ) -> Self {
        let now = now_ts();
        Self {
            user_id: user_id.into(),
            file_id: file_id.into(),
            chunk_id,
            chunk_blob_url: chunk_blob_url.into(),
            chunk_hash: chunk_hash.into(),
            next_chunk_id,
            created_at: now,
            updated_at: now,
        }
    }
}

impl SyncStore {
    /// Insert or replace a chunk row keyed by `(file_id, chunk_id)`.
    /// Retrying the same chunk upload is a no-op apart from `updated_at`.
    pub fn upsert_chunk(&self, chunk: &ChunkRow) -> Result<()> {
        let mut conn = self.connection()?;
        diesel::insert_into(user_files::table)
            .values(chunk)
            .on_conflict((uf::file_id, uf::chunk_id))
            .do_update()
            .set((
                uf::chunk_blob_url.eq(excluded(uf::chunk_blob_url)),
                uf::chunk_hash.eq(excluded(uf::chunk_hash)),
                uf::next_chunk_id.eq(excluded(uf::next_chunk_id)),
                uf::updated_at.eq(now_ts()),
            ))
            .execute(&mut conn)
            .context("Failed to upsert chunk row")?;
        Ok(())
    }

    /// Batch-insert inherited chunk rows inside one transaction.
    /// Used by reconciliation to fill chunks carried over from the
    /// predecessor version; redelivery makes the same writes again.
    pub fn insert_chunks_batch(&self, chunks: &[ChunkRow]) -> Result<()> {
        let mut conn = self.connection()?;

        conn.immediate_transaction(|conn| {
            for chunk in chunks {
                diesel::insert_into(user_files::table)
                    .values(chunk)
                    .on_conflict((uf::file_id, uf::chunk_id))
                    .do_update()
                    .set((
                        uf::chunk_blob_url.eq(excluded(uf::chunk_blob_url)),
                        uf::chunk_hash.eq(excluded(uf::chunk_hash)),
                        uf::next_chunk_id.eq(excluded(uf::next_chunk_id)),
                        uf::updated_at.eq(now_ts()),
                    ))
                    .execute(conn)?;
            }
            Ok::<_, diesel::result::Error>(())
        })
        .context("Failed to batch-insert chunk rows")?;

        Ok(())
    }

    pub fn chunks_for_file(&self, file_id: &str) -> Result<Vec<ChunkRow>> {
        let mut conn = self.connection()?;
        uf::user_files
            .filter(uf::file_id.eq(file_id))
            .order(uf::chunk_id.asc())
            .load::<ChunkRow>(&mut conn)
            .context("Failed to load chunks for file")
    }
}
