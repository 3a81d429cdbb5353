//! Chunked batch writes.
//!
//! Large inserts are split into fixed-size chunks written one after another,
//! so no single backend round trip exceeds `chunk_size` rows. Progress is
//! reported after every chunk.

use serde::Serialize;

use rollcall_errors::{ErrorKind, HasErrorKind};

use crate::backend::DataBackend;
use crate::error::BackendError;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub chunks_done: usize,
    pub chunks_total: usize,
    pub rows_written: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub inserted: Vec<Record>,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    /// A chunk failed; earlier chunks stay written.
    #[error("chunk {chunk} failed after {rows_written} rows were written: {source}")]
    ChunkFailed {
        chunk: usize,
        rows_written: usize,
        #[source]
        source: BackendError,
    },
}

impl HasErrorKind for BatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidChunkSize => ErrorKind::Internal,
            Self::ChunkFailed { .. } => ErrorKind::BackendError,
        }
    }
}

/// Insert `rows` into `table` in sequential chunks of `chunk_size`.
///
/// # Errors
/// [`BatchError::InvalidChunkSize`] for a zero chunk size, or
/// [`BatchError::ChunkFailed`] on the first failing chunk.
pub async fn insert_batch<F>(
    backend: &dyn DataBackend,
    table: &str,
    rows: Vec<Record>,
    chunk_size: usize,
    mut on_progress: F,
) -> Result<BatchOutcome, BatchError>
where
    F: FnMut(BatchProgress) + Send,
{
    if chunk_size == 0 {
        return Err(BatchError::InvalidChunkSize);
    }
    let chunks_total = rows.len().div_ceil(chunk_size);
    let mut inserted = Vec::with_capacity(rows.len());
    let mut pending = rows.into_iter().peekable();
    let mut chunk = 0;

    while pending.peek().is_some() {
        let batch: Vec<Record> = pending.by_ref().take(chunk_size).collect();
        let written = backend.insert_many(table, batch).await.map_err(|source| {
            tracing::warn!(table, chunk, rows_written = inserted.len(), error = %source, "batch chunk failed");
            BatchError::ChunkFailed {
                chunk,
                rows_written: inserted.len(),
                source,
            }
        })?;
        inserted.extend(written);
        chunk += 1;
        tracing::debug!(table, chunk, chunks_total, rows_written = inserted.len(), "batch chunk written");
        on_progress(BatchProgress {
            chunks_done: chunk,
            chunks_total,
            rows_written: inserted.len(),
        });
    }

    Ok(BatchOutcome {
        inserted,
        chunks: chunk,
    })
}

#[cfg(all(test, feature = "memory"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn rows(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new().with("seq", i)).collect()
    }

    #[tokio::test]
    async fn reports_progress_after_each_chunk() {
        let db = MemoryBackend::new();
        let mut seen = Vec::new();
        let out = insert_batch(&db, "profiles", rows(7), 3, |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(out.chunks, 3);
        assert_eq!(out.inserted.len(), 7);
        assert_eq!(
            seen.iter().map(|p| p.rows_written).collect::<Vec<_>>(),
            vec![3, 6, 7]
        );
        assert!(seen.iter().all(|p| p.chunks_total == 3));
        assert_eq!(db.calls().insert, 3);
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let db = MemoryBackend::new();
        let err = insert_batch(&db, "profiles", rows(1), 0, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, BatchError::InvalidChunkSize);
        assert_eq!(db.calls().total(), 0);
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let db = MemoryBackend::new();
        let out = insert_batch(&db, "profiles", Vec::new(), 10, |_| {})
            .await
            .unwrap();
        assert_eq!(out.chunks, 0);
        assert_eq!(db.calls().insert, 0);
    }
}
