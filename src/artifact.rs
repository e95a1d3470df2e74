//! Artifact identities and the versions reported available for them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::version::Version;

/// The kind of artifact an update applies to. Governs install semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    /// The news feed. Versions are decimal millisecond timestamps.
    News,
    /// The signed router binary.
    RouterSigned,
    /// The unsigned drop-in router archive. Versions are decimal
    /// millisecond timestamps.
    RouterUnsigned,
    /// A plugin, identified by name.
    Plugin,
    /// Internal no-op kind.
    Dummy,
}

impl UpdateKind {
    /// True for the two router kinds, which supersede each other in the
    /// downloaded tier.
    #[must_use]
    pub fn is_router(self) -> bool {
        matches!(self, Self::RouterSigned | Self::RouterUnsigned)
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::News => "NEWS",
            Self::RouterSigned => "ROUTER_SIGNED",
            Self::RouterUnsigned => "ROUTER_UNSIGNED",
            Self::Plugin => "PLUGIN",
            Self::Dummy => "DUMMY",
        };
        f.write_str(name)
    }
}

/// The transport mechanism used to fetch an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateMethod {
    /// In-network HTTP.
    Http,
    /// Clearnet HTTPS.
    HttpsClearnet,
    /// Clearnet HTTP.
    HttpClearnet,
    /// BitTorrent.
    Torrent,
    /// Local file move.
    File,
    /// Internal no-op method.
    Dummy,
}

impl fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "HTTP",
            Self::HttpsClearnet => "HTTPS_CLEARNET",
            Self::HttpClearnet => "HTTP_CLEARNET",
            Self::Torrent => "TORRENT",
            Self::File => "FILE",
            Self::Dummy => "DUMMY",
        };
        f.write_str(name)
    }
}

/// Identifies one artifact: a kind plus an id.
///
/// The id is empty for singleton kinds and the plugin name for
/// [`UpdateKind::Plugin`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub kind: UpdateKind,
    pub id: String,
}

impl ArtifactKey {
    /// Builds a key for the given kind and id.
    #[must_use]
    pub fn new(kind: UpdateKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Builds the key of a singleton kind (empty id).
    #[must_use]
    pub fn singleton(kind: UpdateKind) -> Self {
        Self::new(kind, "")
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} {}", self.kind, self.id)
        }
    }
}

/// Per-version accumulation of transport methods and their source URIs.
pub type SourceMap = BTreeMap<UpdateMethod, Vec<Url>>;

/// A version reported available, with the minimum installed version required
/// to apply it and the sources it can be fetched from.
///
/// The source map is additive: a later report of the same version may
/// register an additional method, but never replaces the URI list of a
/// method already present.
#[derive(Debug, Clone)]
pub struct AvailableVersion {
    pub version: Version,
    pub min_version: Version,
    pub sources: SourceMap,
}

impl AvailableVersion {
    /// Creates an available version with one initial method and its sources.
    #[must_use]
    pub fn new(
        version: Version,
        min_version: Version,
        method: UpdateMethod,
        uris: Vec<Url>,
    ) -> Self {
        let mut sources = SourceMap::new();
        sources.insert(method, uris);
        Self {
            version,
            min_version,
            sources,
        }
    }

    /// Adds a method and its sources if the method is not yet present.
    ///
    /// Returns true if the method was added.
    pub fn add_source_method(&mut self, method: UpdateMethod, uris: Vec<Url>) -> bool {
        if self.sources.contains_key(&method) {
            return false;
        }
        self.sources.insert(method, uris);
        true
    }

    /// The URIs registered for a method, if any.
    #[must_use]
    pub fn sources_for(&self, method: UpdateMethod) -> Option<&[Url]> {
        self.sources.get(&method).map(Vec::as_slice)
    }
}

impl fmt::Display for AvailableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" via", self.version)?;
        for (method, uris) in &self.sources {
            write!(f, " {}({})", method, uris.len())?;
        }
        Ok(())
    }
}
