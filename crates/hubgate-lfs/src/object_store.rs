//! Content-addressed object directory
//!
//! Objects live at `<root>/objects/ab/cd/<rest of oid>`. Uploads are
//! written to a temporary file under `<root>/tmp` while being hashed and
//! only move into place once oid and size both check out.

use crate::pointer::oid_relative_path;
use crate::{LfsError, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, oid: &str) -> Result<PathBuf> {
        Ok(self.root.join("objects").join(oid_relative_path(oid)?))
    }

    /// Stored size of `oid`, if present
    pub async fn size(&self, oid: &str) -> Result<Option<u64>> {
        match fs::metadata(self.object_path(oid)?).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn open(&self, oid: &str) -> Result<fs::File> {
        match fs::File::open(self.object_path(oid)?).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LfsError::NotFound(oid.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store the bytes of `reader` as `oid`.
    ///
    /// When the object is already present the body is still consumed and
    /// checked, but the stored copy is left untouched.
    pub async fn put<R>(&self, oid: &str, size: u64, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let dest = self.object_path(oid)?;
        if self.size(oid).await?.is_some() {
            let (actual_oid, actual_size) = digest(reader).await?;
            return check(oid, size, &actual_oid, actual_size);
        }

        let tmp_dir = self.root.join("tmp");
        fs::create_dir_all(&tmp_dir).await?;
        let tmp = tempfile::NamedTempFile::new_in(&tmp_dir)?;
        let mut out = fs::File::from_std(tmp.as_file().try_clone()?);

        let (actual_oid, actual_size) = copy_hashed(reader, &mut out).await?;
        out.flush().await?;
        out.sync_all().await?;
        drop(out);
        check(oid, size, &actual_oid, actual_size)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        tmp.persist(&dest).map_err(|e| LfsError::Io(e.error))?;
        debug!(oid, size, "stored lfs object");
        Ok(())
    }
}

fn check(oid: &str, size: u64, actual_oid: &str, actual_size: u64) -> Result<()> {
    if actual_size != size {
        return Err(LfsError::SizeMismatch {
            expected: size,
            actual: actual_size,
        });
    }
    if actual_oid != oid {
        return Err(LfsError::OidMismatch {
            expected: oid.to_string(),
            actual: actual_oid.to_string(),
        });
    }
    Ok(())
}

/// SHA-256 (hex) and length of everything `reader` yields
pub async fn digest<R>(reader: R) -> Result<(String, u64)>
where
    R: AsyncRead + Unpin,
{
    copy_hashed(reader, &mut tokio::io::sink()).await
}

async fn copy_hashed<R, W>(mut reader: R, writer: &mut W) -> Result<(String, u64)>
where
    R: AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}
