use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Outcome of a pipeline step as reported by the API.
///
/// Completed steps report a terminal result (`SUCCESSFUL`, `FAILED`,
/// `ERROR`); running steps only carry their top-level state. States this
/// tool does not recognize (e.g. `PAUSED`, `STOPPED`) are preserved verbatim
/// as `Other` rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    InProgress,
    Successful,
    Failed,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl StepState {
    pub fn from_name(name: &str) -> Self {
        match name {
            "IN_PROGRESS" => Self::InProgress,
            "SUCCESSFUL" => Self::Successful,
            "FAILED" => Self::Failed,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The winning record for one (branch, step name) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStep {
    pub name: String,
    pub state: StepState,
    /// Pipeline number the winning record came from.
    pub origin_pipeline: u64,
}

/// Aggregated step outcomes for one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchAggregate {
    pub name: String,
    /// Highest pipeline number observed for this branch.
    pub last_pipeline_number: u64,
    pub steps: IndexMap<String, AggregatedStep>,
}

impl BranchAggregate {
    pub fn new(name: String, pipeline_number: u64) -> Self {
        Self {
            name,
            last_pipeline_number: pipeline_number,
            steps: IndexMap::new(),
        }
    }
}

/// One complete per-branch view of recent pipeline activity.
///
/// Produced by a completed refresh cycle and replaced wholesale by the next
/// one. Renderers read it, nothing mutates it after the fold finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub branches: IndexMap<String, BranchAggregate>,
    pub collected_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            branches: IndexMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Branches ordered by most recent pipeline first, for display.
    pub fn branches_by_recency(&self) -> Vec<&BranchAggregate> {
        let mut branches: Vec<_> = self.branches.values().collect();
        branches.sort_by(|a, b| b.last_pipeline_number.cmp(&a.last_pipeline_number));
        branches
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}
