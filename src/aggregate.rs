use log::debug;
use serde::{Deserialize, Serialize};

use crate::snapshot::{AggregatedStep, BranchAggregate, Snapshot, StepState};

/// Priority assigned to result states the priority table does not list.
///
/// Such states lose against every recognized state but are still recorded
/// when no entry exists yet for a step name.
const UNRECOGNIZED_PRIORITY: i8 = -1;

/// One pipeline execution, reduced to what the fold needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRecord {
    pub number: u64,
    /// Source branch. Absent for pipelines not attributable to a branch
    /// (e.g. tag or custom-trigger runs); those are skipped entirely.
    pub branch: Option<String>,
}

/// One step of a pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub name: String,
    pub duration_seconds: f64,
    pub state: StepState,
}

/// How to resolve two records of equal severity for the same step name.
///
/// Historical variants of this aggregation disagreed here: one replaced only
/// on strictly higher severity (so the record visited first kept winning),
/// the other preferred the newer pipeline among equals. Both are kept
/// selectable; recency-on-tie is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreakPolicy {
    /// Replace only when the new record is strictly more severe.
    StrictPriority,
    /// Severity wins; among equal severity the larger pipeline number wins.
    #[default]
    RecencyOnTie,
}

/// Numeric severity per result state, higher = more noteworthy.
///
/// Kept as a configuration table so deployments can e.g. rank `ERROR` above
/// `FAILED` without a code change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StatePriorities {
    pub in_progress: i8,
    pub successful: i8,
    pub failed: i8,
    pub error: i8,
}

impl Default for StatePriorities {
    fn default() -> Self {
        Self {
            in_progress: 0,
            successful: 0,
            failed: 1,
            error: 1,
        }
    }
}

impl StatePriorities {
    pub fn priority(&self, state: &StepState) -> i8 {
        match state {
            StepState::InProgress => self.in_progress,
            StepState::Successful => self.successful,
            StepState::Failed => self.failed,
            StepState::Error => self.error,
            StepState::Other(_) => UNRECOGNIZED_PRIORITY,
        }
    }
}

/// Folds pipeline step reports into a per-branch snapshot.
///
/// The fold is the sole writer of the snapshot under construction: the
/// refresh loop fans fetches out concurrently, then feeds completed results
/// through [`Aggregator::fold`] one at a time, in ascending pipeline-number
/// order, so the outcome never depends on network arrival order.
pub struct Aggregator {
    policy: TieBreakPolicy,
    priorities: StatePriorities,
    min_step_duration: f64,
    snapshot: Snapshot,
}

impl Aggregator {
    pub fn new(policy: TieBreakPolicy, priorities: StatePriorities, min_step_duration: f64) -> Self {
        Self {
            policy,
            priorities,
            min_step_duration,
            snapshot: Snapshot::new(),
        }
    }

    /// Merges one pipeline's steps into the snapshot under construction.
    ///
    /// Pipelines without a branch are discarded. Steps at or below the
    /// duration threshold are noise-filtered out.
    pub fn fold(&mut self, pipeline: &PipelineRecord, steps: &[StepRecord]) {
        let Some(branch_name) = &pipeline.branch else {
            debug!("Skipping branchless pipeline #{}", pipeline.number);
            return;
        };

        let policy = self.policy;
        let priorities = &self.priorities;
        let min_step_duration = self.min_step_duration;

        let branch = self
            .snapshot
            .branches
            .entry(branch_name.clone())
            .or_insert_with(|| BranchAggregate::new(branch_name.clone(), pipeline.number));

        branch.last_pipeline_number = branch.last_pipeline_number.max(pipeline.number);

        for step in steps {
            if step.duration_seconds <= min_step_duration {
                continue;
            }

            let replace = match branch.steps.get(&step.name) {
                None => true,
                Some(current) => {
                    Self::outranks(priorities, policy, current, &step.state, pipeline.number)
                }
            };

            if replace {
                branch.steps.insert(
                    step.name.clone(),
                    AggregatedStep {
                        name: step.name.clone(),
                        state: step.state.clone(),
                        origin_pipeline: pipeline.number,
                    },
                );
            }
        }
    }

    fn outranks(
        priorities: &StatePriorities,
        policy: TieBreakPolicy,
        current: &AggregatedStep,
        state: &StepState,
        pipeline_number: u64,
    ) -> bool {
        let candidate = priorities.priority(state);
        let incumbent = priorities.priority(&current.state);

        match policy {
            TieBreakPolicy::StrictPriority => candidate > incumbent,
            TieBreakPolicy::RecencyOnTie => {
                candidate > incumbent
                    || (candidate == incumbent && pipeline_number > current.origin_pipeline)
            }
        }
    }

    /// Finalizes the fold and hands the snapshot over.
    pub fn finish(self) -> Snapshot {
        self.snapshot
    }
}
