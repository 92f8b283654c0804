//! Positioned chunk I/O against local files.
//!
//! Workers address the file by byte range, so every operation opens its
//! own handle, seeks, and reads or writes exactly its range. There is no
//! shared cursor to lock. All disk work runs on the blocking pool.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::TransferError;

fn join_err(e: tokio::task::JoinError) -> TransferError {
    TransferError::Io(std::io::Error::other(format!("blocking task join: {e}")))
}

/// Returns the file's length in bytes.
pub async fn file_size(path: &Path) -> Result<i64, TransferError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let meta = std::fs::metadata(&path)?;
        Ok(meta.len() as i64)
    })
    .await
    .map_err(join_err)?
}

/// Reads exactly `len` bytes starting at `offset`.
///
/// Short reads (EOF inside the requested range) are an error: chunk
/// geometry is fixed at partition time, so the file shrinking underneath
/// a transfer is a real failure, not a condition to paper over.
pub async fn read_range(path: &Path, offset: i64, len: usize) -> Result<Vec<u8>, TransferError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    })
    .await
    .map_err(join_err)?
}

/// Writes `data` at `offset`, creating the file and any parent
/// directories as needed. Existing content outside the range is left
/// untouched, so concurrent workers can fill disjoint ranges of the same
/// file.
pub async fn write_range(path: &Path, offset: i64, data: Vec<u8>) -> Result<(), TransferError> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&data)?;
        Ok(())
    })
    .await
    .map_err(join_err)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reads_exact_ranges() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("src.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        assert_eq!(file_size(&path).await.unwrap(), 10);
        assert_eq!(read_range(&path, 0, 4).await.unwrap(), b"0123");
        assert_eq!(read_range(&path, 4, 4).await.unwrap(), b"4567");
        assert_eq!(read_range(&path, 8, 2).await.unwrap(), b"89");
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("src.bin");
        std::fs::write(&path, b"0123").unwrap();

        let result = read_range(&path, 2, 10).await;
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[tokio::test]
    async fn writes_disjoint_ranges_out_of_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/dst.bin");

        write_range(&path, 6, b"6789".to_vec()).await.unwrap();
        write_range(&path, 0, b"012345".to_vec()).await.unwrap();

        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content, b"0123456789");
    }

    #[tokio::test]
    async fn rewrite_preserves_other_ranges() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dst.bin");
        std::fs::write(&path, b"AAAABBBB").unwrap();

        write_range(&path, 4, b"CCCC".to_vec()).await.unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content, b"AAAACCCC");
    }

    #[tokio::test]
    async fn missing_file_read_fails() {
        let dir = TempDir::new().unwrap();
        let result = read_range(&dir.path().join("nope.bin"), 0, 1).await;
        assert!(result.is_err());
    }
}
