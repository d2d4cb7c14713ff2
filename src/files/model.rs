use serde::Serialize;
use std::collections::HashMap;

use crate::store::{ChunkRow, FileVersionRow};

/// Fixed client-side chunk size; the server only verifies the resulting
/// chunk count.
pub const CHUNK_SIZE: i64 = 4 * 1024 * 1024;

/// `next_chunk_id` sentinel marking the terminal chunk of a version.
pub const TERMINAL_NEXT_CHUNK: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Uploading,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "uploading" => Some(UploadStatus::Uploading),
            "completed" => Some(UploadStatus::Completed),
            "failed" => Some(UploadStatus::Failed),
            _ => None,
        }
    }
}

/// Number of chunks a file of `file_size` bytes splits into.
pub fn calculate_chunks(file_size: i64) -> i32 {
    if file_size <= 0 {
        return 0;
    }
    ((file_size + CHUNK_SIZE - 1) / CHUNK_SIZE) as i32
}

/// One chunk of a grouped file response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkDetail {
    #[serde(rename = "chunkID")]
    pub chunk_id: i64,
    #[serde(rename = "chunkBlobUrl")]
    pub chunk_blob_url: String,
    #[serde(rename = "chunkHash")]
    pub chunk_hash: String,
    #[serde(rename = "nextChunkID")]
    pub next_chunk_id: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl From<ChunkRow> for ChunkDetail {
    fn from(row: ChunkRow) -> Self {
        Self {
            chunk_id: row.chunk_id,
            chunk_blob_url: row.chunk_blob_url,
            chunk_hash: row.chunk_hash,
            next_chunk_id: row.next_chunk_id,
            created_at: row.created_at,
        }
    }
}

/// A file version with its chunks grouped into a map keyed by the chunk id
/// rendered as a decimal string.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    #[serde(rename = "fileID")]
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
    #[serde(rename = "fileType")]
    pub file_type: String,
    #[serde(rename = "fileHash")]
    pub file_hash: String,
    #[serde(skip_serializing)]
    pub n_chunks: i32,
    #[serde(rename = "uploadStatus")]
    pub upload_status: String,
    pub chunks: HashMap<String, ChunkDetail>,
}

impl FileInfo {
    fn from_version(version: &FileVersionRow) -> Self {
        Self {
            id: version.id.clone(),
            user_id: version.user_id.clone(),
            file_name: version.file_name.clone(),
            file_size: version.file_size,
            file_type: version.file_type.clone(),
            file_hash: version.file_hash.clone(),
            n_chunks: version.chunks,
            upload_status: version.upload_status.clone(),
            chunks: HashMap::new(),
        }
    }
}

/// Collapse join rows (one row per version-chunk pair, versions with no
/// chunks produce a single row) into grouped `FileInfo` values, preserving
/// the order the versions first appear in.
pub fn group_file_rows(rows: Vec<(FileVersionRow, Option<ChunkRow>)>) -> Vec<FileInfo> {
    let mut grouped: Vec<FileInfo> = Vec::new();
    let mut seen_index: HashMap<String, usize> = HashMap::new();

    for (version, chunk) in rows {
        let index = match seen_index.get(&version.id) {
            Some(index) => *index,
            None => {
                seen_index.insert(version.id.clone(), grouped.len());
                grouped.push(FileInfo::from_version(&version));
                grouped.len() - 1
            }
        };

        if let Some(chunk) = chunk {
            grouped[index]
                .chunks
                .insert(chunk.chunk_id.to_string(), ChunkDetail::from(chunk));
        }
    }

    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::now_ts;

    #[test]
    fn chunk_count_follows_ceiling_division() {
        assert_eq!(calculate_chunks(0), 0);
        assert_eq!(calculate_chunks(1), 1);
        assert_eq!(calculate_chunks(CHUNK_SIZE), 1);
        assert_eq!(calculate_chunks(CHUNK_SIZE + 1), 2);
        assert_eq!(calculate_chunks(5_242_880), 2);
        for n in 1..=8 {
            assert_eq!(calculate_chunks(n * CHUNK_SIZE), n as i32);
        }
    }

    fn version(id: &str) -> FileVersionRow {
        let now = now_ts();
        FileVersionRow {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            file_name: "a.pdf".to_string(),
            file_size: CHUNK_SIZE * 2,
            file_type: "application/pdf".to_string(),
            file_hash: format!("hash-{id}"),
            chunks: 2,
            current_flag: false,
            upload_status: UploadStatus::Uploading.as_str().to_string(),
            prev_id: None,
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn chunk(file_id: &str, chunk_id: i64, next: i64) -> ChunkRow {
        ChunkRow::new(
            "user-1",
            file_id,
            chunk_id,
            format!("/blobs/{file_id}/{chunk_id}"),
            format!("chunk-hash-{chunk_id}"),
            Some(next),
        )
    }

    #[test]
    fn grouping_collects_chunks_under_their_version() {
        let rows = vec![
            (version("f1"), Some(chunk("f1", 0, 1))),
            (version("f1"), Some(chunk("f1", 1, TERMINAL_NEXT_CHUNK))),
            (version("f2"), None),
        ];

        let grouped = group_file_rows(rows);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].id, "f1");
        assert_eq!(grouped[0].chunks.len(), 2);
        assert!(grouped[0].chunks.contains_key("0"));
        assert!(grouped[0].chunks.contains_key("1"));
        assert_eq!(grouped[1].id, "f2");
        assert!(grouped[1].chunks.is_empty());
    }
}
