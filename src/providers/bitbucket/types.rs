use serde::Deserialize;

use crate::aggregate::{PipelineRecord, StepRecord};
use crate::snapshot::StepState;

/// First page of the pipeline listing endpoint. Only the total count is
/// needed; recent pipelines are addressed directly by build number.
#[derive(Debug, Deserialize)]
pub struct PipelinePage {
    pub size: u64,
}

/// One pipeline as returned by `GET .../pipelines/{n}`.
#[derive(Debug, Deserialize)]
pub struct PipelineDetail {
    pub build_number: u64,
    #[serde(default)]
    pub target: PipelineTarget,
}

/// Trigger target of a pipeline. `ref_name` is absent for runs not tied to
/// a branch (tags, custom triggers).
#[derive(Debug, Default, Deserialize)]
pub struct PipelineTarget {
    pub ref_name: Option<String>,
}

impl From<PipelineDetail> for PipelineRecord {
    fn from(detail: PipelineDetail) -> Self {
        Self {
            number: detail.build_number,
            branch: detail.target.ref_name,
        }
    }
}

/// Page of steps from `GET .../pipelines/{n}/steps/`.
#[derive(Debug, Deserialize)]
pub struct StepsPage {
    pub values: Vec<StepDetail>,
}

/// One step as returned by the API.
#[derive(Debug, Deserialize)]
pub struct StepDetail {
    #[serde(default)]
    pub name: String,
    /// Absent while a step is still running.
    #[serde(default)]
    pub duration_in_seconds: f64,
    pub state: StepStateDetail,
}

/// Step state object: completed steps nest their terminal outcome under
/// `result`, in-progress steps only carry the top-level `name`.
#[derive(Debug, Deserialize)]
pub struct StepStateDetail {
    pub name: String,
    pub result: Option<StepResultDetail>,
}

#[derive(Debug, Deserialize)]
pub struct StepResultDetail {
    pub name: String,
}

impl From<StepDetail> for StepRecord {
    fn from(detail: StepDetail) -> Self {
        // Prefer the nested terminal outcome, fall back to the top-level
        // state for steps that have not completed.
        let state_name = detail
            .state
            .result
            .map(|result| result.name)
            .unwrap_or(detail.state.name);

        Self {
            name: detail.name,
            duration_seconds: detail.duration_in_seconds,
            state: StepState::from_name(&state_name),
        }
    }
}
