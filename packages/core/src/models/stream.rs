//! Content Streams and Workspaces
//!
//! A content stream is an isolated version line of the whole graph. Forking
//! copies only hierarchy edges; node and reference rows stay shared by anchor
//! until copy-on-write forks them. A workspace is a stable, user-facing name
//! bound to exactly one current content stream; re-pointing that binding is
//! how publish/rebase semantics are built on top of this engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error for unknown lifecycle status strings read back from storage.
#[derive(Error, Debug)]
#[error("Unknown content stream status: {0}")]
pub struct UnknownStreamStatus(String);

/// Identifier of one version line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentStreamId(String);

impl ContentStreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContentStreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContentStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a content stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStreamStatus {
    Open,
    Closed,
    Removed,
}

impl ContentStreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownStreamStatus> {
        match value {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "removed" => Ok(Self::Removed),
            other => Err(UnknownStreamStatus(other.to_string())),
        }
    }
}

/// One version line of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStream {
    pub id: ContentStreamId,
    /// The line this stream was forked from, if any.
    pub source_content_stream_id: Option<ContentStreamId>,
    pub status: ContentStreamStatus,
}

impl ContentStream {
    pub fn root(id: ContentStreamId) -> Self {
        Self {
            id,
            source_content_stream_id: None,
            status: ContentStreamStatus::Open,
        }
    }

    pub fn forked_from(id: ContentStreamId, source: ContentStreamId) -> Self {
        Self {
            id,
            source_content_stream_id: Some(source),
            status: ContentStreamStatus::Open,
        }
    }
}

/// Stable, user-facing workspace name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceName(String);

impl WorkspaceName {
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binding of a workspace name to its current content stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: WorkspaceName,
    pub current_content_stream_id: ContentStreamId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ContentStreamStatus::Open,
            ContentStreamStatus::Closed,
            ContentStreamStatus::Removed,
        ] {
            assert_eq!(ContentStreamStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ContentStreamStatus::parse("stale").is_err());
    }

    #[test]
    fn forked_stream_remembers_source() {
        let source = ContentStreamId::new();
        let fork = ContentStream::forked_from(ContentStreamId::new(), source.clone());
        assert_eq!(fork.source_content_stream_id, Some(source));
        assert_eq!(fork.status, ContentStreamStatus::Open);
    }
}
