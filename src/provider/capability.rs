//! Provider capability model
//!
//! A provider instance owns a fixed set of [`Capability`] values. The UI uses
//! it to gray out unsupported actions; the dispatcher uses it to pick a
//! move/copy strategy.

use std::collections::BTreeSet;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A named operation a provider instance supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    List,
    Read,
    Write,
    Delete,
    Mkdir,
    Rmdir,
    Move,
    Copy,
    ServerSideCopy,
    Download,
    Upload,
    Resume,
    Permissions,
    Symlinks,
    Connection,
    Containers,
    Metadata,
    PresignedUrls,
    BatchDelete,
}

impl Capability {
    /// Every capability, in declaration order
    pub const ALL: [Capability; 19] = [
        Capability::List,
        Capability::Read,
        Capability::Write,
        Capability::Delete,
        Capability::Mkdir,
        Capability::Rmdir,
        Capability::Move,
        Capability::Copy,
        Capability::ServerSideCopy,
        Capability::Download,
        Capability::Upload,
        Capability::Resume,
        Capability::Permissions,
        Capability::Symlinks,
        Capability::Connection,
        Capability::Containers,
        Capability::Metadata,
        Capability::PresignedUrls,
        Capability::BatchDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::List => "list",
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Delete => "delete",
            Capability::Mkdir => "mkdir",
            Capability::Rmdir => "rmdir",
            Capability::Move => "move",
            Capability::Copy => "copy",
            Capability::ServerSideCopy => "server_side_copy",
            Capability::Download => "download",
            Capability::Upload => "upload",
            Capability::Resume => "resume",
            Capability::Permissions => "permissions",
            Capability::Symlinks => "symlinks",
            Capability::Connection => "connection",
            Capability::Containers => "containers",
            Capability::Metadata => "metadata",
            Capability::PresignedUrls => "presigned_urls",
            Capability::BatchDelete => "batch_delete",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set containing every capability
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    /// True when every capability in `caps` is present
    pub fn contains_all(&self, caps: &[Capability]) -> bool {
        caps.iter().all(|c| self.0.contains(c))
    }

    pub fn contains_any(&self, caps: &[Capability]) -> bool {
        caps.iter().any(|c| self.0.contains(c))
    }

    pub fn insert(&mut self, cap: Capability) -> bool {
        self.0.insert(cap)
    }

    pub fn remove(&mut self, cap: Capability) -> bool {
        self.0.remove(&cap)
    }

    pub fn without(mut self, cap: Capability) -> Self {
        self.0.remove(&cap);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(caps: [Capability; N]) -> Self {
        caps.into_iter().collect()
    }
}

/// Capability storage owned by a provider instance.
///
/// Readable from anywhere; mutation is restricted to the provider's own
/// lifecycle code (e.g. revoking after a failed connection).
#[derive(Debug, Default)]
pub struct ProviderCapabilities {
    inner: RwLock<CapabilitySet>,
}

impl ProviderCapabilities {
    pub fn new(initial: CapabilitySet) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn snapshot(&self) -> CapabilitySet {
        self.inner.read().clone()
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.inner.read().contains(cap)
    }

    pub(crate) fn add(&self, caps: &[Capability]) {
        let mut set = self.inner.write();
        for cap in caps {
            set.insert(*cap);
        }
    }

    pub(crate) fn remove(&self, cap: Capability) {
        self.inner.write().remove(cap);
    }
}
