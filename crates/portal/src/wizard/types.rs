use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::pack::CampaignPack;
use crate::{brief::GoalBrief, PortalError, Result};

/// Fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Signals,
    Futurist,
    Draft,
    Debate,
    Revise,
    Localize,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 6] = [
        PipelineStage::Signals,
        PipelineStage::Futurist,
        PipelineStage::Draft,
        PipelineStage::Debate,
        PipelineStage::Revise,
        PipelineStage::Localize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Signals => "signals",
            PipelineStage::Futurist => "futurist",
            PipelineStage::Draft => "draft",
            PipelineStage::Debate => "debate",
            PipelineStage::Revise => "revise",
            PipelineStage::Localize => "localize",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a run is in the wizard state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum WizardState {
    Init,
    Running(PipelineStage),
    Assembled,
    Failed,
}

impl WizardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WizardState::Init => "init",
            WizardState::Running(stage) => stage.as_str(),
            WizardState::Assembled => "assembled",
            WizardState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Degraded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded | StageStatus::Degraded | StageStatus::Failed | StageStatus::Skipped
        )
    }

    /// Stage status only moves forward: pending, running, then settled.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        match (self, next) {
            (StageStatus::Pending, StageStatus::Running)
            | (StageStatus::Pending, StageStatus::Skipped)
            | (StageStatus::Pending, StageStatus::Failed) => true,
            (StageStatus::Running, next) => next.is_settled() && next != StageStatus::Skipped,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Degraded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Degraded => "degraded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Degraded | RunStatus::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "degraded" => Ok(RunStatus::Degraded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

/// A shortfall recorded against a run that still produced a pack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct RunWarning {
    pub stage: PipelineStage,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Cancelled,
    Validation,
    DraftFailed,
    RevisionFailed,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    /// Stage the run stopped at, if it had started one.
    pub stage: Option<PipelineStage>,
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn cancelled(stage: Option<PipelineStage>) -> Self {
        Self {
            stage,
            kind: FailureKind::Cancelled,
            message: PortalError::Cancelled.to_string(),
        }
    }

    /// Classify `err` raised while running `stage`.
    pub fn from_error(stage: PipelineStage, err: &PortalError) -> Self {
        let kind = match (stage, err) {
            (_, PortalError::Cancelled) => FailureKind::Cancelled,
            (_, PortalError::Validation(_)) => FailureKind::Validation,
            (PipelineStage::Draft, _) => FailureKind::DraftFailed,
            (PipelineStage::Revise, _) => FailureKind::RevisionFailed,
            _ => FailureKind::Internal,
        };
        Self {
            stage: Some(stage),
            kind,
            message: err.to_string(),
        }
    }
}

/// The wizard's unit of work. Every transition is appended to the run ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRun {
    pub id: Uuid,
    pub brief: GoalBrief,
    pub status: RunStatus,
    pub current_stage: WizardState,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<RunWarning>,
    pub failure: Option<FailureReason>,
    pub pack: Option<CampaignPack>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRun {
    pub fn new(brief: GoalBrief) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            brief,
            status: RunStatus::Pending,
            current_stage: WizardState::Init,
            stages: PipelineStage::ALL
                .iter()
                .map(|stage| StageRecord {
                    stage: *stage,
                    status: StageStatus::Pending,
                    started_at: None,
                    finished_at: None,
                    detail: None,
                })
                .collect(),
            warnings: Vec::new(),
            failure: None,
            pack: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, stage: PipelineStage) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.stage == stage)
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn begin_stage(&mut self, stage: PipelineStage) -> Result<()> {
        self.transition(stage, StageStatus::Running, None)?;
        self.status = RunStatus::Running;
        self.current_stage = WizardState::Running(stage);
        Ok(())
    }

    /// Settle a stage as succeeded, degraded, skipped or failed.
    pub fn settle_stage(&mut self, stage: PipelineStage, status: StageStatus, detail: Option<String>) -> Result<()> {
        if !status.is_settled() {
            return Err(PortalError::InvalidTransition(format!(
                "{stage} cannot settle as {status:?}"
            )));
        }
        self.transition(stage, status, detail)
    }

    pub fn warn(&mut self, stage: PipelineStage, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[WIZARD] Run {} {}: {}", self.id, stage, message);
        self.warnings.push(RunWarning { stage, message });
        self.updated_at = Utc::now();
    }

    /// Attach the pack and settle the run. Stages never reached are skipped.
    pub fn assemble(&mut self, pack: CampaignPack) -> Result<()> {
        if self.is_settled() {
            return Err(PortalError::RunSettled(self.id));
        }
        for stage in PipelineStage::ALL {
            if self.stage(stage).map(|r| r.status) == Some(StageStatus::Pending) {
                self.transition(stage, StageStatus::Skipped, None)?;
            }
        }
        self.status = if pack.degraded {
            RunStatus::Degraded
        } else {
            RunStatus::Succeeded
        };
        self.current_stage = WizardState::Assembled;
        self.pack = Some(pack);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Settle the run as failed. A stage left running is marked failed with it.
    pub fn fail(&mut self, reason: FailureReason) {
        if self.is_settled() {
            tracing::warn!("[WIZARD] Run {} already settled, ignoring failure: {}", self.id, reason.message);
            return;
        }
        let now = Utc::now();
        for record in self.stages.iter_mut().filter(|r| r.status == StageStatus::Running) {
            record.status = StageStatus::Failed;
            record.finished_at = Some(now);
            record.detail = Some(reason.message.clone());
        }
        self.status = RunStatus::Failed;
        self.current_stage = WizardState::Failed;
        self.failure = Some(reason);
        self.updated_at = now;
    }

    fn transition(&mut self, stage: PipelineStage, next: StageStatus, detail: Option<String>) -> Result<()> {
        if self.is_settled() {
            return Err(PortalError::RunSettled(self.id));
        }
        let record = self
            .stages
            .iter_mut()
            .find(|record| record.stage == stage)
            .ok_or_else(|| PortalError::InvalidTransition(format!("unknown stage {stage}")))?;
        if !record.status.can_transition_to(next) {
            return Err(PortalError::InvalidTransition(format!(
                "{stage}: {:?} -> {next:?}",
                record.status
            )));
        }

        let now = Utc::now();
        match next {
            StageStatus::Running => record.started_at = Some(now),
            _ => record.finished_at = Some(now),
        }
        record.status = next;
        if detail.is_some() {
            record.detail = detail;
        }
        self.updated_at = now;
        Ok(())
    }
}
