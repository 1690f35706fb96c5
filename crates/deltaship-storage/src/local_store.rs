use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use deltaship_types::content_hash::ContentHash;
use deltaship_types::error::{DeltashipError, Result};
use tempfile::NamedTempFile;

use crate::{BulkItem, CommitFile, RemoteStore};

const BULK_MAX_THREADS: usize = 8;

/// Remote store backed by a local directory (mounted share, staging mirror, tests).
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn new(root: &str) -> Result<Self> {
        let root_path = PathBuf::from(root);
        fs::create_dir_all(&root_path)?;
        let root = fs::canonicalize(&root_path)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject keys that could escape the store root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(DeltashipError::Other("unsafe store key: empty".into()));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(DeltashipError::Other(format!(
                "unsafe store key: absolute path '{key}'"
            )));
        }
        if key.contains('\\') {
            return Err(DeltashipError::Other(format!(
                "unsafe store key: contains backslash '{key}'"
            )));
        }
        if Path::new(key)
            .components()
            .any(|c| c == Component::ParentDir)
        {
            return Err(DeltashipError::Other(format!(
                "unsafe store key: parent traversal '{key}'"
            )));
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Stage bytes in a temp file next to `path` without publishing it yet.
    fn stage(&self, path: &Path, data: &[u8]) -> Result<NamedTempFile> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_data()?;
        Ok(tmp)
    }

    /// Same length and same hash.
    fn same_content(path: &Path, size: u64, hash: &str) -> Result<bool> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() && meta.len() == size => Ok(ContentHash::of_file(path)?.matches(hash)),
            Ok(_) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn copy_if_needed(src: &Path, dest: &Path) -> Result<()> {
        let src_len = fs::metadata(src)?.len();
        if Self::same_content(dest, src_len, ContentHash::of_file(src)?.as_str())? {
            tracing::debug!("local bulk: {} already present", dest.display());
            return Ok(());
        }
        let dir = dest.parent().ok_or_else(|| {
            DeltashipError::Other(format!("destination '{}' has no parent", dest.display()))
        })?;
        fs::create_dir_all(dir)?;
        let tmp = NamedTempFile::new_in(dir)?;
        fs::copy(src, tmp.path())?;
        tmp.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }

    fn bulk_copy(pairs: Vec<(PathBuf, PathBuf)>) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .clamp(1, BULK_MAX_THREADS);
        let per_thread = pairs.len().div_ceil(threads);

        std::thread::scope(|s| {
            let handles: Vec<_> = pairs
                .chunks(per_thread)
                .map(|slice| {
                    s.spawn(move || -> Result<()> {
                        for (src, dest) in slice {
                            Self::copy_if_needed(src, dest)?;
                        }
                        Ok(())
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(result) => result?,
                    Err(_) => return Err(DeltashipError::Other("bulk copy thread panicked".into())),
                }
            }
            Ok(())
        })
    }
}

impl RemoteStore for LocalStore {
    fn label(&self) -> &str {
        "local"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        let tmp = self.stage(&path, data)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn holds(&self, key: &str, size: u64, hash: &str) -> Result<bool> {
        Self::same_content(&self.resolve(key)?, size, hash)
    }

    /// Stage every file first; nothing becomes visible unless all staged.
    fn commit(&self, files: &[CommitFile], message: &str) -> Result<()> {
        let mut staged = Vec::with_capacity(files.len());
        for file in files {
            let path = self.resolve(&file.path)?;
            let tmp = self.stage(&path, &file.data)?;
            staged.push((tmp, path));
        }
        for (tmp, path) in staged {
            tmp.persist(&path).map_err(|e| e.error)?;
        }
        tracing::debug!("local commit '{message}': {} files", files.len());
        Ok(())
    }

    fn push_all(&self, items: &[BulkItem<'_>]) -> Result<()> {
        let pairs = items
            .iter()
            .map(|item| Ok((item.local.to_path_buf(), self.resolve(item.remote)?)))
            .collect::<Result<Vec<_>>>()?;
        Self::bulk_copy(pairs)
    }

    fn pull_all(&self, items: &[BulkItem<'_>]) -> Result<()> {
        let pairs = items
            .iter()
            .map(|item| Ok((self.resolve(item.remote)?, item.local.to_path_buf())))
            .collect::<Result<Vec<_>>>()?;
        Self::bulk_copy(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("remote").to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_exists() {
        let (_dir, store) = store();
        assert!(!store.exists("a/b.bin").unwrap());
        assert!(store.get("a/b.bin").unwrap().is_none());
        store.put("a/b.bin", b"payload").unwrap();
        assert!(store.exists("a/b.bin").unwrap());
        assert_eq!(store.get("a/b.bin").unwrap().unwrap(), b"payload");
    }

    #[test]
    fn holds_compares_content_not_presence() {
        let (_dir, store) = store();
        let hash = ContentHash::of_bytes(b"new!").to_string();
        assert!(!store.holds("a/b.bin", 4, &hash).unwrap());
        store.put("a/b.bin", b"old!").unwrap();
        assert!(!store.holds("a/b.bin", 4, &hash).unwrap());
        store.put("a/b.bin", b"new!").unwrap();
        assert!(store.holds("a/b.bin", 4, &hash).unwrap());
        assert!(!store.holds("a/b.bin", 5, &hash).unwrap());
    }

    #[test]
    fn rejects_unsafe_keys() {
        let (_dir, store) = store();
        for key in ["", "/etc/passwd", "..\\x", "a/../../x"] {
            assert!(store.put(key, b"x").is_err(), "{key:?} should be rejected");
        }
    }

    #[test]
    fn commit_writes_all_files() {
        let (_dir, store) = store();
        let files = vec![
            CommitFile {
                path: "r/1.bin".into(),
                data: b"one".to_vec(),
            },
            CommitFile {
                path: "r/2.bin".into(),
                data: b"two".to_vec(),
            },
        ];
        store.commit(&files, "release 1").unwrap();
        assert_eq!(store.get("r/2.bin").unwrap().unwrap(), b"two");
    }

    #[test]
    fn commit_with_bad_key_publishes_nothing() {
        let (_dir, store) = store();
        let files = vec![
            CommitFile {
                path: "ok.bin".into(),
                data: b"one".to_vec(),
            },
            CommitFile {
                path: "../escape".into(),
                data: b"two".to_vec(),
            },
        ];
        assert!(store.commit(&files, "bad").is_err());
        assert!(!store.exists("ok.bin").unwrap());
    }

    #[test]
    fn bulk_push_and_pull_round_trip() {
        let (dir, store) = store();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let a = src.join("a.bin");
        let b = src.join("b.bin");
        fs::write(&a, b"aaaa").unwrap();
        fs::write(&b, b"bb").unwrap();

        store
            .push_all(&[
                BulkItem {
                    remote: "x/a.bin",
                    local: &a,
                },
                BulkItem {
                    remote: "x/b.bin",
                    local: &b,
                },
            ])
            .unwrap();
        assert_eq!(store.get("x/a.bin").unwrap().unwrap(), b"aaaa");

        let out = dir.path().join("out").join("b.bin");
        store
            .pull_all(&[BulkItem {
                remote: "x/b.bin",
                local: &out,
            }])
            .unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"bb");
    }

    #[test]
    fn bulk_push_replaces_same_size_changed_file() {
        let (dir, store) = store();
        store.put("x/a.bin", b"old!").unwrap();
        let src = dir.path().join("a.bin");
        fs::write(&src, b"new!").unwrap();

        store
            .push_all(&[BulkItem {
                remote: "x/a.bin",
                local: &src,
            }])
            .unwrap();
        assert_eq!(store.get("x/a.bin").unwrap().unwrap(), b"new!");
    }
}
