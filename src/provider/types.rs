//! Entry data types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path_utils::{as_directory_path, file_name, path_key};

/// Entry type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    Bucket,
    Symlink,
}

impl EntryType {
    /// Directory-like entries carry a trailing slash in their path
    pub fn is_directory_like(&self) -> bool {
        matches!(self, EntryType::Directory | EntryType::Bucket)
    }

    /// Get icon name for UI
    pub fn icon(&self) -> &'static str {
        match self {
            EntryType::File => "file",
            EntryType::Directory => "folder",
            EntryType::Bucket => "database",
            EntryType::Symlink => "link",
        }
    }
}

/// Open metadata bag attached to an entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// File permissions (octal string, e.g., "755")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Object storage class (object stores only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
    /// Set on virtual entries derived from a pending operation
    #[serde(default)]
    pub pending: bool,
    /// Provider-specific fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A node in a provider's hierarchical namespace.
///
/// `path` is canonical for equality and lookup; `name` is always its final
/// segment. Entries are immutable once returned by a provider: staged or
/// virtual variants are built from copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Opaque id assigned when the entry is produced
    pub id: String,
    pub name: String,
    pub entry_type: EntryType,
    /// Backend-relative path, trailing slash for directory-like entries
    pub path: String,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl Entry {
    /// Build an entry, normalizing `path` to the directory form when needed
    pub fn new(entry_type: EntryType, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if entry_type.is_directory_like() {
            as_directory_path(&path)
        } else {
            path
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: file_name(&path).to_string(),
            entry_type,
            path,
            size: None,
            modified: None,
            metadata: EntryMetadata::default(),
        }
    }

    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self::new(EntryType::File, path).with_size(size)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(EntryType::Directory, path)
    }

    pub fn bucket(name: impl Into<String>) -> Self {
        Self::new(EntryType::Bucket, name)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type.is_directory_like()
    }

    /// Lookup key for this entry's path
    pub fn key(&self) -> &str {
        path_key(&self.path)
    }

    /// Copy of this entry relocated to `path` (new id, name follows path)
    pub fn relocated(&self, path: &str) -> Self {
        let mut copy = Entry::new(self.entry_type, path);
        copy.size = self.size;
        copy.modified = self.modified;
        copy.metadata = self.metadata.clone();
        copy
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

/// Backend variants understood by the provider factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    S3,
    Gcs,
    Sftp,
    Ftp,
    Smb,
    #[serde(rename = "gdrive")]
    GoogleDrive,
    Local,
    Mock,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::S3 => "s3",
            ProviderType::Gcs => "gcs",
            ProviderType::Sftp => "sftp",
            ProviderType::Ftp => "ftp",
            ProviderType::Smb => "smb",
            ProviderType::GoogleDrive => "gdrive",
            ProviderType::Local => "local",
            ProviderType::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(ProviderType::S3),
            "gcs" => Ok(ProviderType::Gcs),
            "sftp" => Ok(ProviderType::Sftp),
            "ftp" | "ftps" => Ok(ProviderType::Ftp),
            "smb" => Ok(ProviderType::Smb),
            "gdrive" | "googledrive" | "google-drive" => Ok(ProviderType::GoogleDrive),
            "local" | "file" => Ok(ProviderType::Local),
            "mock" | "memory" => Ok(ProviderType::Mock),
            other => Err(format!("unknown provider type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_entries_get_trailing_slash() {
        let dir = Entry::directory("docs/sub");
        assert_eq!(dir.path, "docs/sub/");
        assert_eq!(dir.name, "sub");
        assert!(dir.is_directory());

        let file = Entry::file("docs/a.txt", 10);
        assert_eq!(file.path, "docs/a.txt");
        assert_eq!(file.name, "a.txt");
        assert_eq!(file.size, Some(10));
    }

    #[test]
    fn test_equality_uses_path() {
        let a = Entry::file("docs/a.txt", 1);
        let b = Entry::file("docs/a.txt", 999);
        assert_ne!(a.id, b.id);
        assert_eq!(a, b);
        assert_ne!(a, Entry::file("docs/b.txt", 1));
    }

    #[test]
    fn test_relocated_copies_fields() {
        let mut original = Entry::file("a.txt", 42);
        original.metadata.permissions = Some("644".into());
        let moved = original.relocated("archive/b.txt");
        assert_eq!(moved.name, "b.txt");
        assert_eq!(moved.size, Some(42));
        assert_eq!(moved.metadata.permissions.as_deref(), Some("644"));
        assert_ne!(moved.id, original.id);
        // original untouched
        assert_eq!(original.path, "a.txt");
    }

    #[test]
    fn test_provider_type_parse() {
        assert_eq!("SFTP".parse::<ProviderType>(), Ok(ProviderType::Sftp));
        assert_eq!("gdrive".parse::<ProviderType>(), Ok(ProviderType::GoogleDrive));
        assert_eq!("memory".parse::<ProviderType>(), Ok(ProviderType::Mock));
        assert!("webdav".parse::<ProviderType>().is_err());
        assert_eq!(ProviderType::GoogleDrive.to_string(), "gdrive");
    }
}
