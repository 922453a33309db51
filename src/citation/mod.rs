//! Citation records and the splicer that turns them into inline markers.
//!
//! The knowledge base reports citations out of band: each one names the end
//! of a span of generated text plus the source fragments that back it. The
//! [`splice`] function merges those records back into the text as numbered
//! anchor links and produces the flat reference list the UI renders below
//! the answer.
//!
//! # Example
//!
//! ```rust
//! use kb_chat::citation::{CitationGroup, ReferencedChunk, splice};
//!
//! let groups = vec![CitationGroup {
//!     start: 0,
//!     end: 16,
//!     references: vec![ReferencedChunk::new("Skies scatter blue light.", "s3://docs/sky.pdf")],
//! }];
//! let (text, refs) = splice("The sky is blue. Water is wet.", &groups);
//!
//! assert!(text.starts_with(r##"The sky is blue.<a href="#ref-1" target="_self">[1]</a>"##));
//! assert_eq!(refs[0].id, 1);
//! ```

mod splice;

pub use splice::{marker, splice, try_splice};

use serde::{Deserialize, Serialize};

/// Opaque key/value metadata attached to a retrieved source fragment.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One retrieved source fragment backing a citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencedChunk {
    /// Text of the fragment.
    pub content: String,
    /// Source locator (usually an `s3://` URI).
    pub location: String,
    /// Source metadata as returned by the knowledge base.
    #[serde(default)]
    pub metadata: Metadata,
}

impl ReferencedChunk {
    /// Create a fragment without metadata.
    #[must_use]
    pub fn new(content: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            location: location.into(),
            metadata: Metadata::new(),
        }
    }
}

/// One annotation point: a cited span and its sources.
///
/// Offsets count Unicode scalar values of the fully assembled response text.
/// Only `end` matters for splicing, since markers follow the cited text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationGroup {
    /// Offset of the first cited character.
    #[serde(default)]
    pub start: usize,
    /// Offset immediately after the cited text; markers go here.
    pub end: usize,
    /// Ordered source fragments, one marker each.
    pub references: Vec<ReferencedChunk>,
}

/// A numbered, displayable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// 1-based id, matching the `[id]` marker and the `ref-{id}` anchor.
    pub id: usize,
    /// Fragment text.
    pub text: String,
    /// Source locator.
    pub source: String,
    /// Source metadata.
    pub metadata: Metadata,
}

impl Reference {
    /// Last path segment of the source locator, used as a display name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.source.rsplit('/').next().unwrap_or(&self.source)
    }
}
