//! Versioned Resource Cache
//!
//! A process-wide, hash-keyed cache of externally fetched content. Large
//! context resources (file slices, fetched pages, tool output) are cached
//! here so unchanged content is injected into the model request as a cheap
//! reference block instead of being re-transmitted on every turn.
//!
//! Entries are immutable: a content update replaces the entry with a new
//! value whose version is incremented and whose hash and timestamp are
//! fresh. The hash (CRC32) gives O(1) change detection within one process
//! run; the cache is memory-resident and never persisted.
//!
//! There is no eviction or size bound; hosts clear the cache explicitly
//! when a long session would otherwise grow it without limit.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Identifies a cacheable resource; identity is the `uri`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Stable resource identity
    pub uri: String,
    /// Type tag (e.g. "file", "web-page")
    pub kind: String,
    /// Human-readable name
    pub display_name: String,
    /// Filesystem path of origin, when applicable
    pub origin_path: Option<String>,
    /// Name of the tool that produced this resource, when applicable
    pub tool: Option<String>,
}

impl ResourceDescriptor {
    /// Create a descriptor with just identity, type and display name
    pub fn new(
        uri: impl Into<String>,
        kind: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            kind: kind.into(),
            display_name: display_name.into(),
            origin_path: None,
            tool: None,
        }
    }

    /// Set the filesystem path of origin
    #[must_use]
    pub fn with_origin_path(mut self, path: impl Into<String>) -> Self {
        self.origin_path = Some(path.into());
        self
    }

    /// Set the producing tool name
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

/// A cached resource with its content and metadata
///
/// Immutable; updates create new instances via [`CachedResource::with_updated_content`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedResource {
    /// Resource identity and metadata
    pub descriptor: ResourceDescriptor,
    /// Cached content
    pub content: String,
    /// Monotonic version, starting at 1
    pub version: u32,
    /// CRC32 of the content for change detection
    pub content_hash: u32,
    /// When this version was cached
    pub cached_at: DateTime<Utc>,
}

impl CachedResource {
    /// Create a version-1 entry for the given content
    pub fn create(descriptor: ResourceDescriptor, content: impl Into<String>) -> Self {
        let content = content.into();
        let content_hash = crc32fast::hash(content.as_bytes());
        Self {
            descriptor,
            content,
            version: 1,
            content_hash,
            cached_at: Utc::now(),
        }
    }

    /// Create the successor entry for new content
    ///
    /// Returns a new value with version + 1 and a fresh hash and timestamp;
    /// the old entry is untouched and callers replace their reference.
    #[must_use]
    pub fn with_updated_content(&self, new_content: impl Into<String>) -> Self {
        let content = new_content.into();
        let content_hash = crc32fast::hash(content.as_bytes());
        Self {
            descriptor: self.descriptor.clone(),
            content,
            version: self.version + 1,
            content_hash,
            cached_at: Utc::now(),
        }
    }

    /// Whether `new_content` differs from the cached content (hash compare)
    #[must_use]
    pub fn has_content_changed(&self, new_content: &str) -> bool {
        crc32fast::hash(new_content.as_bytes()) != self.content_hash
    }

    /// Rough token cost of injecting this resource (~4 chars per token)
    #[must_use]
    pub fn estimate_token_cost(&self) -> usize {
        self.content.len() / 4
    }

    /// Render the resource as an injectable context block
    ///
    /// Attribute values are markup-escaped; the content body is injected
    /// verbatim.
    #[must_use]
    pub fn to_context_fragment(&self) -> String {
        let mut out = String::with_capacity(self.content.len() + 128);
        out.push_str(&format!(
            "<resource uri=\"{}\" type=\"{}\" name=\"{}\" version=\"{}\" cached=\"{}\">\n",
            escape_markup(&self.descriptor.uri),
            escape_markup(&self.descriptor.kind),
            escape_markup(&self.descriptor.display_name),
            self.version,
            self.cached_at.to_rfc3339(),
        ));
        out.push_str(&self.content);
        out.push_str("\n</resource>");
        out
    }

    /// Short human-readable summary
    #[must_use]
    pub fn to_summary(&self) -> String {
        format!(
            "{} (v{}, ~{} tokens)",
            self.descriptor.display_name,
            self.version,
            self.estimate_token_cost()
        )
    }
}

/// Process-wide map of cached resources, keyed by uri
///
/// Individual get/put operations are atomic; no cross-operation transaction
/// is provided or needed.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: DashMap<String, CachedResource>,
}

impl ResourceCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a resource
    ///
    /// Unknown uris get a version-1 entry. Known uris are replaced with a
    /// version-bumped successor only when the content hash changed; unchanged
    /// content leaves the entry (and its version) alone.
    pub fn insert(&self, descriptor: ResourceDescriptor, content: impl Into<String>) -> CachedResource {
        let content = content.into();
        let uri = descriptor.uri.clone();

        let entry = match self.entries.get(&uri) {
            Some(existing) if !existing.has_content_changed(&content) => existing.clone(),
            Some(existing) => {
                let updated = existing.with_updated_content(content);
                tracing::debug!(uri = %uri, version = updated.version, "resource content changed, version bumped");
                updated
            }
            None => CachedResource::create(descriptor, content),
        };
        self.entries.insert(uri, entry.clone());
        entry
    }

    /// Get the cached entry for a uri
    #[must_use]
    pub fn get(&self, uri: &str) -> Option<CachedResource> {
        self.entries.get(uri).map(|e| e.clone())
    }

    /// Get the cached entry, loading and storing it on a miss
    pub fn get_or_load<E>(
        &self,
        descriptor: &ResourceDescriptor,
        loader: impl FnOnce() -> Result<String, E>,
    ) -> Result<CachedResource, E> {
        if let Some(existing) = self.get(&descriptor.uri) {
            return Ok(existing);
        }
        let content = loader()?;
        Ok(self.insert(descriptor.clone(), content))
    }

    /// Remove an entry; returns it if present
    pub fn remove(&self, uri: &str) -> Option<CachedResource> {
        self.entries.remove(uri).map(|(_, entry)| entry)
    }

    /// Render every entry into one `<resources>` block for request injection
    ///
    /// Returns `None` when the cache is empty.
    #[must_use]
    pub fn context_block(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let mut fragments: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.to_context_fragment()))
            .collect();
        // DashMap iteration order is unspecified; sort for a stable request body
        fragments.sort_by(|a, b| a.0.cmp(&b.0));

        let mut block = String::from("<resources>\n");
        for (_, fragment) in fragments {
            block.push_str(&fragment);
            block.push('\n');
        }
        block.push_str("</resources>");
        Some(block)
    }

    /// Total estimated token cost of all cached entries
    #[must_use]
    pub fn estimate_token_cost(&self) -> usize {
        self.entries.iter().map(|e| e.estimate_token_cost()).sum()
    }

    /// Number of cached resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Escape `& < > " '` for attribute values
fn escape_markup(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
