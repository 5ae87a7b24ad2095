use crate::controller::ObjectRef;
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

const TMP_PREFIX: &str = ".tmp-";

/// Filesystem-backed bucket store. Each bucket is a directory under `root`
/// and object keys map to relative paths inside it, so `data/node1/x.bin`
/// lives at `{root}/{bucket}/data/node1/x.bin`.
pub struct BucketStore {
    root: PathBuf,
}

impl BucketStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BucketStore { root: root.into() }
    }

    pub fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.bucket_dir(bucket)?.is_dir())
    }

    pub fn make_bucket(&self, bucket: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket)?;
        if dir.exists() {
            bail!("bucket '{}' already exists", bucket);
        }
        fs::create_dir_all(&dir).with_context(|| format!("creating bucket {}", bucket))
    }

    pub fn remove_bucket(&self, bucket: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.is_dir() {
            bail!("bucket '{}' does not exist", bucket);
        }
        let remaining = self.list(bucket, "")?;
        if !remaining.is_empty() {
            bail!(
                "bucket '{}' is not empty ({} objects)",
                bucket,
                remaining.len()
            );
        }
        fs::remove_dir_all(&dir).with_context(|| format!("removing bucket {}", bucket))
    }

    /// Write an object, replacing any previous body under the same key.
    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<ObjectRef> {
        if !self.bucket_exists(bucket)? {
            bail!("bucket '{}' does not exist", bucket);
        }
        let path = self.object_path(bucket, key)?;
        let dir = path
            .parent()
            .with_context(|| format!("object key '{}' has no parent", key))?;
        fs::create_dir_all(dir).context("creating object dir")?;

        // Atomic write: temp file + rename
        let tmp_path = dir.join(format!("{}{}", TMP_PREFIX, std::process::id()));
        let mut file = fs::File::create(&tmp_path).context("creating temp file")?;
        file.write_all(data).context("writing object")?;
        file.sync_all().context("syncing object")?;
        fs::rename(&tmp_path, &path).context("renaming object")?;

        Ok(ObjectRef {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: data.len() as u64,
            etag: etag(data),
        })
    }

    pub fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).with_context(|| format!("reading object {}/{}", bucket, key))
    }

    /// Delete an object and prune directories it leaves empty.
    pub fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        fs::remove_file(&path).with_context(|| format!("deleting object {}/{}", bucket, key))?;

        let bucket_dir = self.bucket_dir(bucket)?;
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == bucket_dir.as_path() || fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
        Ok(())
    }

    /// Objects whose key starts with `prefix`, sorted by key.
    pub fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectRef>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        if !bucket_dir.is_dir() {
            bail!("bucket '{}' does not exist", bucket);
        }
        let mut objects = Vec::new();
        let mut pending = vec![bucket_dir.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                    continue;
                }
                let key = key_for(&bucket_dir, &path)?;
                if !key.starts_with(prefix) {
                    continue;
                }
                let data = fs::read(&path).with_context(|| format!("reading {}", key))?;
                objects.push(ObjectRef {
                    bucket: bucket.to_string(),
                    key,
                    size: data.len() as u64,
                    etag: etag(&data),
                });
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            bail!("invalid bucket name '{}'", bucket);
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with('/')
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            bail!("invalid object key '{}'", key);
        }
        Ok(self.bucket_dir(bucket)?.join(rel))
    }
}

fn key_for(bucket_dir: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(bucket_dir)
        .with_context(|| format!("{} outside bucket", path.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Hex SHA-256 of the object body.
pub fn etag(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_bucket() -> (tempfile::TempDir, BucketStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BucketStore::new(dir.path().join("minio"));
        store.make_bucket("root").unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_round_trip() {
        let (_dir, store) = store_with_bucket();
        let obj = store.put("root", "data/a/b.bin", b"hello").unwrap();
        assert_eq!(obj.size, 5);
        assert_eq!(obj.etag.len(), 64);
        assert_eq!(store.get("root", "data/a/b.bin").unwrap(), b"hello");
    }

    #[test]
    fn overwrite_replaces_body() {
        let (_dir, store) = store_with_bucket();
        store.put("root", "k", b"one").unwrap();
        store.put("root", "k", b"two").unwrap();
        assert_eq!(store.get("root", "k").unwrap(), b"two");
        assert_eq!(store.list("root", "").unwrap().len(), 1);
    }

    #[test]
    fn list_filters_by_prefix_and_sorts() {
        let (_dir, store) = store_with_bucket();
        store.put("root", "data/n2/x", b"2").unwrap();
        store.put("root", "data/n1/y", b"1").unwrap();
        store.put("root", "meta/z", b"3").unwrap();

        let keys: Vec<String> = store
            .list("root", "data/")
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["data/n1/y", "data/n2/x"]);
        assert_eq!(store.list("root", "").unwrap().len(), 3);
    }

    #[test]
    fn delete_prunes_empty_dirs() {
        let (dir, store) = store_with_bucket();
        store.put("root", "data/n1/part/a.bin", b"a").unwrap();
        store.delete("root", "data/n1/part/a.bin").unwrap();
        assert!(store.list("root", "").unwrap().is_empty());
        assert!(!dir.path().join("minio").join("root").join("data").exists());
        assert!(store.bucket_exists("root").unwrap());
    }

    #[test]
    fn remove_bucket_requires_empty() {
        let (_dir, store) = store_with_bucket();
        store.put("root", "data/x", b"x").unwrap();
        assert!(store.remove_bucket("root").is_err());
        store.delete("root", "data/x").unwrap();
        store.remove_bucket("root").unwrap();
        assert!(!store.bucket_exists("root").unwrap());
    }

    #[test]
    fn make_bucket_twice_fails() {
        let (_dir, store) = store_with_bucket();
        assert!(store.make_bucket("root").is_err());
    }

    #[test]
    fn rejects_escaping_keys() {
        let (_dir, store) = store_with_bucket();
        assert!(store.put("root", "../evil", b"x").is_err());
        assert!(store.put("root", "/abs", b"x").is_err());
        assert!(store.put("root", "", b"x").is_err());
        assert!(store.put("root", "dir/", b"x").is_err());
        assert!(store.bucket_exists("../x").is_err());
    }

    #[test]
    fn missing_object_is_an_error() {
        let (_dir, store) = store_with_bucket();
        assert!(store.get("root", "nope").is_err());
        assert!(store.delete("root", "nope").is_err());
        assert!(store.list("other", "").is_err());
    }
}
