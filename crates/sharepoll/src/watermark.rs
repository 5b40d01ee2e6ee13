//! Delivered-file identities for one listener.

use crate::client::FileAttributes;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Path, modification time and size of a delivered entry.
///
/// A file rewritten in place gets a new identity and is delivered again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub path: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

impl FileIdentity {
    pub fn of(attrs: &FileAttributes) -> Self {
        Self {
            path: attrs.path.clone(),
            last_modified: attrs.last_modified,
            size: attrs.size,
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if let Some(ts) = self.last_modified {
            write!(f, "@{}", ts.to_rfc3339())?;
        }
        if let Some(size) = self.size {
            write!(f, "#{size}")?;
        }
        Ok(())
    }
}

/// Monotonically growing set of delivered identities.
#[derive(Debug, Default)]
pub struct WatermarkStore {
    seen: Mutex<HashSet<FileIdentity>>,
}

impl WatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &FileIdentity) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }

    /// Returns false when the identity was already recorded.
    pub fn insert(&self, identity: FileIdentity) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FileKind;
    use chrono::TimeZone;

    fn attrs(path: &str, size: u64) -> FileAttributes {
        FileAttributes {
            path: path.to_string(),
            name: path.to_string(),
            size: Some(size),
            last_modified: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            kind: FileKind::Regular,
        }
    }

    #[test]
    fn test_identity_includes_size_and_mtime() {
        let store = WatermarkStore::new();
        assert!(store.is_empty());
        assert!(store.insert(FileIdentity::of(&attrs("a.txt", 3))));
        assert!(!store.insert(FileIdentity::of(&attrs("a.txt", 3))));
        assert!(store.contains(&FileIdentity::of(&attrs("a.txt", 3))));
        assert!(!store.contains(&FileIdentity::of(&attrs("a.txt", 4))));

        let mut touched = attrs("a.txt", 3);
        touched.last_modified = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert!(!store.contains(&FileIdentity::of(&touched)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_display() {
        let id = FileIdentity::of(&attrs("in/a.txt", 3));
        assert_eq!(id.to_string(), "in/a.txt@2024-01-01T00:00:00+00:00#3");
    }
}
