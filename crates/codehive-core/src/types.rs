//! Operation catalogue and trackable entity kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CodehiveError;

/// A kind of queued work. Serialized as its string code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operation {
    CloneRepository,
    SyncRepository,
    DeleteRepository,
    ScanCommit,
    ExtractSnippets,
    CreateBm25Index,
    CreateCodeEmbeddings,
    CreateSummaryEnrichment,
    CreateCommitDescription,
    CreateArchitectureEnrichment,
    CreateExampleSummaries,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Operation::CloneRepository,
        Operation::SyncRepository,
        Operation::DeleteRepository,
        Operation::ScanCommit,
        Operation::ExtractSnippets,
        Operation::CreateBm25Index,
        Operation::CreateCodeEmbeddings,
        Operation::CreateSummaryEnrichment,
        Operation::CreateCommitDescription,
        Operation::CreateArchitectureEnrichment,
        Operation::CreateExampleSummaries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CloneRepository => "repository.clone",
            Operation::SyncRepository => "repository.sync",
            Operation::DeleteRepository => "repository.delete",
            Operation::ScanCommit => "commit.scan",
            Operation::ExtractSnippets => "commit.extract_snippets",
            Operation::CreateBm25Index => "commit.create_bm25_index",
            Operation::CreateCodeEmbeddings => "commit.create_code_embeddings",
            Operation::CreateSummaryEnrichment => "commit.create_summary_enrichment",
            Operation::CreateCommitDescription => "commit.create_commit_description",
            Operation::CreateArchitectureEnrichment => "commit.create_architecture_enrichment",
            Operation::CreateExampleSummaries => "commit.create_example_summaries",
        }
    }

    /// Operations that act on a single commit and expect a `commit_sha` in their payload.
    pub fn is_commit_scoped(&self) -> bool {
        self.as_str().starts_with("commit.")
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CodehiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .find(|op| op.as_str() == s)
            .copied()
            .ok_or_else(|| CodehiveError::Payload(format!("Unknown operation: {s}")))
    }
}

impl TryFrom<String> for Operation {
    type Error = CodehiveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

/// The kind of domain entity a status record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackableType {
    Repository,
    Commit,
}

impl TrackableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackableType::Repository => "repository",
            TrackableType::Commit => "commit",
        }
    }
}

impl fmt::Display for TrackableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackableType {
    type Err = CodehiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repository" => Ok(TrackableType::Repository),
            "commit" => Ok(TrackableType::Commit),
            other => Err(CodehiveError::Payload(format!("Unknown trackable type: {other}"))),
        }
    }
}
