//! Artifact references and the result bundle manifest.

use serde::{Deserialize, Serialize};

use super::{PipelineRun, RunId, StageStatus, TaskStatus};
use crate::utils::{now_utc, Timestamp};

/// A durable output handle produced by a task.
///
/// Only the handle is recorded; the data itself stays in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    /// Producing task.
    pub task: String,
    /// Artifact key.
    pub key: String,
    /// Path or URI of the stored artifact.
    pub handle: String,
}

/// The artifacts of one completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageArtifacts {
    /// Stage ordinal.
    pub ordinal: usize,
    /// Stage name.
    pub name: String,
    /// Artifacts in task order.
    pub artifacts: Vec<ArtifactRef>,
    /// Per-task summaries that were not empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summaries: Vec<(String, serde_json::Value)>,
}

/// Immutable manifest of a completed run's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    /// Run id.
    pub run_id: RunId,
    /// Pipeline name.
    pub pipeline: String,
    /// When the bundle was assembled.
    pub created_at: Timestamp,
    /// Artifacts per stage, in ordinal order.
    pub stages: Vec<StageArtifacts>,
}

impl ResultBundle {
    /// Assembles the manifest from a run whose stages all completed.
    ///
    /// Fails rather than returning a partially populated bundle.
    pub fn assemble(run: &PipelineRun) -> Result<Self, String> {
        let mut stages = Vec::with_capacity(run.stages.len());

        for stage in &run.stages {
            if stage.status != StageStatus::Completed {
                return Err(format!(
                    "stage {} ('{}') is {}, not completed",
                    stage.ordinal, stage.name, stage.status
                ));
            }

            let mut artifacts = Vec::new();
            let mut summaries = Vec::new();
            for task in &stage.tasks {
                let output = match (&task.status, &task.output) {
                    (TaskStatus::Succeeded, Some(output)) => output,
                    _ => {
                        return Err(format!(
                            "task '{}' in stage {} has no recorded output",
                            task.name, stage.ordinal
                        ))
                    }
                };
                artifacts.extend(output.artifacts.iter().map(|(key, handle)| ArtifactRef {
                    task: task.name.clone(),
                    key: key.clone(),
                    handle: handle.clone(),
                }));
                if !output.summary.is_null() {
                    summaries.push((task.name.clone(), output.summary.clone()));
                }
            }

            stages.push(StageArtifacts {
                ordinal: stage.ordinal,
                name: stage.name.clone(),
                artifacts,
                summaries,
            });
        }

        Ok(Self {
            run_id: run.id,
            pipeline: run.pipeline.clone(),
            created_at: now_utc(),
            stages,
        })
    }

    /// Total number of artifacts across stages.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.stages.iter().map(|s| s.artifacts.len()).sum()
    }

    /// Finds an artifact handle by key.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&ArtifactRef> {
        self.stages
            .iter()
            .flat_map(|s| s.artifacts.iter())
            .find(|a| a.key == key)
    }
}
