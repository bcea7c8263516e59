//! Upload ingestion
//!
//! Streams an uploaded payload into a file node chunk by chunk, then
//! records the extension announced by the content type and the final size.

use super::Storage;
use crate::error::{FsError, FsResult};
use crate::node::{File, Folder};
use std::fmt::Display;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_stream::{Stream, StreamExt};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of an ingestion.
#[derive(Debug)]
pub enum Ingest {
    /// No payload was supplied.
    NoUpload,
    Stored(File),
    /// The copy failed; the cause has been logged.
    Failed,
}

impl Ingest {
    pub fn stored(self) -> Option<File> {
        match self {
            Ingest::Stored(file) => Some(file),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct UploadIngester {
    storage: Storage,
    chunk_size: usize,
}

impl UploadIngester {
    pub fn new(storage: Storage, chunk_size: usize) -> Self {
        Self {
            storage,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copy a byte stream into `target`.
    pub async fn ingest_stream<S, B, E>(
        &self,
        upload: Option<S>,
        content_type: Option<&str>,
        target: &mut File,
    ) -> FsResult<Ingest>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let Some(upload) = upload else {
            return Ok(Ingest::NoUpload);
        };
        tokio::pin!(upload);

        let relpath = target.relpath()?.to_string();
        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        let mut out = match self.begin(target).await? {
            Some(out) => out,
            None => return Ok(Ingest::Failed),
        };

        let mut written: u64 = 0;
        while let Some(item) = upload.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(path = %relpath, error = %e, "upload stream failed");
                    return Ok(Ingest::Failed);
                }
            };
            for chunk in bytes.as_ref().chunks(self.chunk_size) {
                if let Err(e) = out.write_all(chunk).await {
                    tracing::error!(path = %relpath, error = %e, "could not write upload chunk");
                    return Ok(Ingest::Failed);
                }
                written += chunk.len() as u64;
            }
        }

        self.finish(out, target, content_type, written).await
    }

    /// Copy everything `reader` yields into `target`.
    pub async fn ingest_reader<R>(
        &self,
        reader: Option<R>,
        content_type: Option<&str>,
        target: &mut File,
    ) -> FsResult<Ingest>
    where
        R: AsyncRead + Unpin,
    {
        let Some(mut reader) = reader else {
            return Ok(Ingest::NoUpload);
        };

        let relpath = target.relpath()?.to_string();
        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        let mut out = match self.begin(target).await? {
            Some(out) => out,
            None => return Ok(Ingest::Failed),
        };

        let mut buf = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(path = %relpath, error = %e, "upload read failed");
                    return Ok(Ingest::Failed);
                }
            };
            if let Err(e) = out.write_all(&buf[..n]).await {
                tracing::error!(path = %relpath, error = %e, "could not write upload chunk");
                return Ok(Ingest::Failed);
            }
            written += n as u64;
        }

        self.finish(out, target, content_type, written).await
    }

    /// Touch the target and open it truncated. `None` when that failed.
    async fn begin(&self, target: &mut File) -> FsResult<Option<tokio::fs::File>> {
        let files = self.storage.files();
        let opened = async {
            files.touch_unlocked(target).await?;
            let out = tokio::fs::File::create(self.storage.abspath(target.relpath()?)).await?;
            Ok::<_, FsError>(out)
        }
        .await;

        match opened {
            Ok(out) => Ok(Some(out)),
            Err(e) if e.is_structural() => Err(e),
            Err(e) => {
                tracing::error!(path = %target, kind = e.kind(), error = %e, "could not open upload target");
                Ok(None)
            }
        }
    }

    async fn finish(
        &self,
        mut out: tokio::fs::File,
        target: &mut File,
        content_type: Option<&str>,
        written: u64,
    ) -> FsResult<Ingest> {
        if let Err(e) = out.flush().await {
            tracing::error!(path = %target, error = %e, "could not flush upload");
            return Ok(Ingest::Failed);
        }
        drop(out);

        if let Some(ext) = content_type.and_then(ext_from_content_type) {
            target.ext = ext;
        }
        match self.storage.files().persist(target).await {
            Ok(()) => {}
            Err(e) if e.is_structural() => return Err(e),
            Err(e) => {
                tracing::error!(path = %target, kind = e.kind(), error = %e, "could not save upload");
                return Ok(Ingest::Failed);
            }
        }

        tracing::info!(path = %target, bytes = written, ext = %target.ext, "upload stored");
        Ok(Ingest::Stored(target.clone()))
    }
}

/// Subtype of a MIME type, parameters stripped: `image/png; q=1` -> `png`.
pub fn ext_from_content_type(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim();
    let (_, subtype) = essence.split_once('/')?;
    let subtype = subtype.trim().to_ascii_lowercase();
    if subtype.is_empty() {
        None
    } else {
        Some(subtype)
    }
}
