mod chunks;
mod download;
mod metadata;
mod model;

pub use chunks::{ChunkService, ChunkUploadRequest, ChunkUploadResponse, HashingReader};
pub use download::DownloadService;
pub use metadata::{
    DEFAULT_LIST_LIMIT, EofResponse, FileListResponse, MetadataService, PrepareRequest,
    PrepareResponse, UpdateRequest, UpdateResponse,
};
pub use model::{
    CHUNK_SIZE, ChunkDetail, FileInfo, TERMINAL_NEXT_CHUNK, UploadStatus, calculate_chunks,
    group_file_rows,
};
