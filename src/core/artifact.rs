//! Versioned live-preview artifact built from extracted code blocks.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_ARTIFACT_TITLE: &str = "Generated Code";
pub const DEFAULT_ARTIFACT_LANGUAGE: &str = "tsx";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactVersion {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub id: String,
    pub title: String,
    pub content: String,
    pub language: String,
    pub versions: Vec<ArtifactVersion>,
}

/// Outcome of folding a code block into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactChange {
    Created,
    Versioned,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct ArtifactTracker {
    current: Option<Artifact>,
    sequence: u64,
}

impl ArtifactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Artifact> {
        self.current.as_ref()
    }

    fn next_id(&mut self, now: DateTime<Utc>) -> String {
        self.sequence += 1;
        format!("{}-{}", now.timestamp_millis(), self.sequence)
    }

    pub fn observe(&mut self, title: &str, language: &str, content: &str) -> ArtifactChange {
        self.observe_at(title, language, content, Utc::now())
    }

    /// Same title appends a version; a new title replaces the artifact.
    pub fn observe_at(
        &mut self,
        title: &str,
        language: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> ArtifactChange {
        let version = ArtifactVersion {
            id: self.next_id(now),
            content: content.to_string(),
            timestamp: now,
        };

        match self.current.as_mut() {
            Some(artifact) if artifact.title == title => {
                if artifact.content == content {
                    return ArtifactChange::Unchanged;
                }
                artifact.content = content.to_string();
                artifact.versions.push(version);
                ArtifactChange::Versioned
            }
            _ => {
                let id = self.next_id(now);
                self.current = Some(Artifact {
                    id,
                    title: title.to_string(),
                    content: content.to_string(),
                    language: language.to_string(),
                    versions: vec![version],
                });
                ArtifactChange::Created
            }
        }
    }
}
