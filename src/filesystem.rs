//! Append-only column files (§4.3).
//!
//! Column files live at `{db_root}/{table}/{raw_col}/{base|tail}`; a new
//! file is created as a single zero-filled page. There is no compaction or
//! truncation except the WAL's own truncate-on-checkpoint.
//! Grounded on `examples/original_source/lstore/filesystem.py`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};
use crate::page::PageId;

/// Path to the column file a page belongs to.
pub fn column_file_path(db_root: &Path, page_id: &PageId) -> PathBuf {
    db_root
        .join(&page_id.table_name)
        .join(page_id.raw_column_index.to_string())
        .join(if page_id.is_base { "base" } else { "tail" })
}

/// Create a column file (and parent directories) containing a single
/// zero-filled page, if it doesn't already exist.
pub fn create_column_file(path: &Path, page_size: usize) -> StorageResult<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = File::create(path)?;
    f.write_all(&vec![0u8; page_size])?;
    f.sync_all()?;
    Ok(())
}

/// Read up to `count` consecutive pages starting at `page_id.page_index`,
/// truncated at end-of-file. Returns fewer than `count` pages (possibly
/// zero) if the file doesn't have that many.
pub fn read_pages(
    db_root: &Path,
    page_id: &PageId,
    count: u64,
    page_size: usize,
) -> StorageResult<Vec<Vec<u8>>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let path = column_file_path(db_root, page_id);
    let mut f = File::open(&path)?;
    let file_size = f.seek(SeekFrom::End(0))?;
    let start = page_id.page_index * page_size as u64;
    if start >= file_size {
        return Ok(Vec::new());
    }
    f.seek(SeekFrom::Start(start))?;
    let available = (file_size - start) / page_size as u64;
    let to_read = available.min(count) as usize;
    if to_read == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; to_read * page_size];
    f.read_exact(&mut buf)?;
    Ok(buf.chunks(page_size).map(|c| c.to_vec()).collect())
}

/// Write exactly one page at `page_id.page_index` and fsync.
pub fn write_page(db_root: &Path, page_id: &PageId, data: &[u8], page_size: usize) -> StorageResult<()> {
    let path = column_file_path(db_root, page_id);
    let mut f = OpenOptions::new().write(true).open(&path)?;
    f.seek(SeekFrom::Start(page_id.page_index * page_size as u64))?;
    f.write_all(data)?;
    f.flush()?;
    f.sync_all().map_err(StorageError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_read_write_round_trip() {
        let dir = tempdir().unwrap();
        let pid = PageId::new("t", 0, true, 0);
        let path = column_file_path(dir.path(), &pid);
        create_column_file(&path, 4096).unwrap();

        let mut page = vec![0u8; 4096];
        page[0] = 7;
        write_page(dir.path(), &pid, &page, 4096).unwrap();

        let pages = read_pages(dir.path(), &pid, 5, 4096).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0][0], 7);
    }

    #[test]
    fn read_past_eof_truncates() {
        let dir = tempdir().unwrap();
        let pid = PageId::new("t", 0, true, 0);
        let path = column_file_path(dir.path(), &pid);
        create_column_file(&path, 4096).unwrap();

        let far = PageId::new("t", 0, true, 10);
        let pages = read_pages(dir.path(), &far, 3, 4096).unwrap();
        assert!(pages.is_empty());
    }
}
