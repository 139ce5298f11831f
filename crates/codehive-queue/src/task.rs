//! Task definitions: the data model for queued work.

use chrono::{DateTime, Utc};
use codehive_core::{CodehiveError, Operation, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned ID (0 until saved).
    pub id: i64,
    /// What to do.
    pub operation: Operation,
    /// Collapses repeated, logically identical requests into one row.
    pub dedup_key: String,
    /// Higher runs first.
    pub priority: i64,
    /// Operation arguments.
    pub payload: Payload,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
    /// Last enqueue or claim.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a task whose dedup key is derived from the operation and payload.
    pub fn new(operation: Operation, priority: i64, payload: Payload) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            operation,
            dedup_key: payload.dedup_key(operation),
            priority,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the derived dedup key.
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = key.into();
        self
    }
}

/// Scheduling priority levels. Pipelines add offsets on top of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Background,
    Normal,
    UserInitiated,
}

impl Priority {
    pub fn value(&self) -> i64 {
        match self {
            Priority::Background => 1000,
            Priority::Normal => 2000,
            Priority::UserInitiated => 5000,
        }
    }
}

impl From<Priority> for i64 {
    fn from(p: Priority) -> Self {
        p.value()
    }
}

/// Untyped operation arguments, as stored. Handlers decode it into a typed
/// payload with [`Payload::decode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn for_repository(repository_id: i64) -> Self {
        Self::new().with("repository_id", repository_id)
    }

    pub fn for_commit(repository_id: i64, commit_sha: &str) -> Self {
        Self::for_repository(repository_id).with("commit_sha", commit_sha)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The `repository_id` entry, whether stored as an integer or a whole float.
    pub fn repository_id(&self) -> Option<i64> {
        let Value::Number(number) = self.0.get("repository_id")? else {
            return None;
        };
        number
            .as_i64()
            .or_else(|| number.as_u64().and_then(|n| i64::try_from(n).ok()))
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.is_finite())
                    .map(|f| f as i64)
            })
    }

    /// Decode into the typed payload an operation expects.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| CodehiveError::Payload(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(json)?))
    }

    /// `"{operation}:{k=v,...}"` over the entries sorted by key.
    fn dedup_key(&self, operation: Operation) -> String {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let parts: Vec<String> = entries
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect();
        format!("{operation}:{}", parts.join(","))
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Arguments for repository-scoped operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryPayload {
    pub repository_id: i64,
}

/// Arguments for commit-scoped operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    pub repository_id: i64,
    pub commit_sha: String,
}

/// Ordered operation lists for [`Queue::enqueue_operations`](crate::Queue::enqueue_operations).
/// Earlier operations receive higher priority.
pub struct PrescribedOperations;

impl PrescribedOperations {
    pub fn create_new_repository() -> Vec<Operation> {
        vec![Operation::CloneRepository, Operation::SyncRepository]
    }

    pub fn sync_repository() -> Vec<Operation> {
        vec![Operation::SyncRepository]
    }

    pub fn delete_repository() -> Vec<Operation> {
        vec![Operation::DeleteRepository]
    }

    pub fn index_commit() -> Vec<Operation> {
        vec![
            Operation::ExtractSnippets,
            Operation::CreateBm25Index,
            Operation::CreateCodeEmbeddings,
        ]
    }

    pub fn scan_and_index_commit() -> Vec<Operation> {
        let mut ops = vec![Operation::ScanCommit];
        ops.extend(Self::index_commit());
        ops.extend([
            Operation::CreateSummaryEnrichment,
            Operation::CreateArchitectureEnrichment,
            Operation::CreateCommitDescription,
            Operation::CreateExampleSummaries,
        ]);
        ops
    }
}
