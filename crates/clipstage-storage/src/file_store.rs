//! One JSON file per key
//!
//! Writes go to a temporary file in the same directory, are synced and
//! then renamed over the target, so a crash leaves either the old or the
//! new value on disk.
//!
//! Keys whose escaped form would not fit in a file name are stored under a
//! hashed name, with the full key kept in a `.key` file beside the entry.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use clipstage_core::{ScopeStore, StoreError};

const EXTENSION: &str = ".json";
const KEY_EXTENSION: &str = ".key";
/// Longest escaped key used verbatim as a file stem
const MAX_STEM: usize = 200;
/// Escaped-key prefix kept in hashed file stems
const HASHED_PREFIX: usize = 64;

pub struct FileScopeStore {
    root: PathBuf,
    /// Serializes writers within this process
    write_lock: Mutex<()>,
}

impl FileScopeStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StoreError::Unavailable(format!(
            "cannot create {}: {e}",
            root.display()
        )))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{EXTENSION}", file_stem(key)))
    }

    fn key_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}{KEY_EXTENSION}"))
    }

    fn write_atomic(&self, path: &Path, contents: &str, key: &str) -> Result<(), StoreError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(|e| io_error(key, e))?;
        tmp.write_all(contents.as_bytes()).map_err(|e| io_error(key, e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(key, e))?;
        tmp.persist(path).map_err(|e| io_error(key, e.error))?;
        Ok(())
    }

    /// Every stored key, sorted
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error(&self.root.display().to_string(), e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root.display().to_string(), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(EXTENSION) else {
                continue;
            };
            let key = if is_hashed(stem) {
                fs::read_to_string(self.key_path(stem)).ok()
            } else {
                unescape_key(stem)
            };
            match key {
                Some(key) => keys.push(key),
                None => tracing::debug!(file = %name, "skipping file with unrecognized name"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl ScopeStore for FileScopeStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => Err(StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            }),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let stem = file_stem(key);
        let path = self.root.join(format!("{stem}{EXTENSION}"));

        if is_hashed(&stem) {
            self.write_atomic(&self.key_path(&stem), key, key)?;
        }
        self.write_atomic(&path, value, key)?;

        tracing::trace!(key, path = %path.display(), "wrote scope entry");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let stem = file_stem(key);
        remove_if_present(&self.root.join(format!("{stem}{EXTENSION}")), key)?;
        if is_hashed(&stem) {
            remove_if_present(&self.key_path(&stem), key)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileScopeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileScopeStore")
            .field("root", &self.root)
            .finish()
    }
}

fn io_error(key: &str, err: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        message: err.to_string(),
    }
}

fn remove_if_present(path: &Path, key: &str) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(key, e)),
    }
}

// ============================================================================
// Key <-> file name
// ============================================================================

/// File stem for `key`: the escaped key, or a prefix of it plus `~` and the
/// SHA-256 of the key when the escaped form is too long. `~` is always
/// escaped in plain stems, so the two forms never collide.
fn file_stem(key: &str) -> String {
    let escaped = escape_key(key);
    if escaped.len() <= MAX_STEM {
        return escaped;
    }

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest: String = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("{}~{digest}", &escaped[..HASHED_PREFIX])
}

fn is_hashed(stem: &str) -> bool {
    stem.contains('~')
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-')
}

/// Percent-escape every byte outside `[A-Za-z0-9._-]`
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if is_plain(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_escaped_into_file_names() {
        assert_eq!(escape_key("staging:book-1"), "staging%3Abook-1");
        assert_eq!(escape_key("a/b c"), "a%2Fb%20c");
        assert_eq!(unescape_key("staging%3Abook-1").as_deref(), Some("staging:book-1"));
        assert_eq!(unescape_key("bad%4"), None);
    }

    #[test]
    fn non_ascii_keys_survive() {
        let key = "snapshot:livre-été";
        assert_eq!(unescape_key(&escape_key(key)).as_deref(), Some(key));
    }

    #[test]
    fn long_keys_use_hashed_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScopeStore::open(dir.path()).unwrap();
        let long = format!("staging:{}", "é".repeat(200));
        let other = format!("staging:{}x", "é".repeat(200));

        store.set(&long, "[1]").unwrap();
        store.set(&other, "[2]").unwrap();
        let name = store.path_for(&long).file_name().unwrap().len();
        assert!(name <= 255, "file name is {name} bytes");
        assert_ne!(store.path_for(&long), store.path_for(&other));

        assert_eq!(store.get(&long).unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get(&other).unwrap().as_deref(), Some("[2]"));
        assert_eq!(store.keys().unwrap(), vec![long.clone(), other.clone()]);

        store.remove(&long).unwrap();
        assert_eq!(store.get(&long).unwrap(), None);
        assert_eq!(store.keys().unwrap(), vec![other]);
    }

    #[test]
    fn set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScopeStore::open(dir.path().join("nested")).unwrap();

        assert_eq!(store.get("staging:b").unwrap(), None);
        store.set("staging:b", "[1]").unwrap();
        store.set("staging:b", "[1,2]").unwrap();
        assert_eq!(store.get("staging:b").unwrap().as_deref(), Some("[1,2]"));
        assert!(store.path_for("staging:b").exists());

        store.remove("staging:b").unwrap();
        store.remove("staging:b").unwrap();
        assert_eq!(store.get("staging:b").unwrap(), None);
    }

    #[test]
    fn keys_lists_only_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScopeStore::open(dir.path()).unwrap();
        store.set("staging:b", "[]").unwrap();
        store.set("snapshot:b", "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(
            store.keys().unwrap(),
            vec!["snapshot:b".to_string(), "staging:b".to_string()]
        );
    }
}
