use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Concatenate uploaded chunks, in order, into `dest`, removing each chunk
/// once it has been copied.
pub fn merge_chunks(upload_dir: &Path, hashes: &[String], dest: &Path) -> io::Result<PathBuf> {
    File::create(dest)?;
    let mut output = OpenOptions::new().append(true).open(dest)?;
    for hash in hashes {
        let source = crate::env::upload_chunk_path(upload_dir, hash);
        let mut input = File::open(&source)?;
        io::copy(&mut input, &mut output)?;
        fs::remove_file(&source)?;
    }
    output.sync_all()?;
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_merge_in_order_and_remove_chunks() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("h1"), b"hello ").unwrap();
        fs::write(dir.path().join("h2"), b"world").unwrap();
        let dest = dir.path().join("movie.mkv");

        let merged =
            merge_chunks(dir.path(), &["h1".to_string(), "h2".to_string()], &dest).unwrap();

        assert_eq!(merged, dest);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hello world");
        assert!(!dir.path().join("h1").exists());
        assert!(!dir.path().join("h2").exists());
    }

    #[test]
    fn test_missing_chunk_fails() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");
        let result = merge_chunks(dir.path(), &["missing".to_string()], &dest);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
