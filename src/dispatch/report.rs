//! Provenance-stamped summary of one dispatch run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::gate::ApprovalFlow;
use super::protocol::DispatchRequest;
use super::reconciler::{BlockedJournalEntry, BlockedSource, DispatchOutcome};
use crate::core::task::TaskId;
use crate::{clog_debug, Result};

pub const REPORT_VERSION: u32 = 1;
pub const REPORT_COMMAND: &str = "cognition-dispatch dispatch";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub version: u32,
    pub generated_at: String,
    pub command: String,
    pub inputs: ReportInputs,
    pub outputs: ReportOutputs,
    pub stats: ReportStats,
    pub dispatched_task_ids: Vec<String>,
    pub blocked_task_ids: Vec<TaskId>,
    pub released_after_approval_task_ids: Vec<TaskId>,
    pub follow_up_request_ids: Vec<String>,
    pub approval_flow: ApprovalRollup,
    pub blocked_entries: Vec<BlockedSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportInputs {
    pub task_dag_path: String,
    pub task_dag_sha256: String,
    pub task_package_path: String,
    pub task_package_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutputs {
    pub journal_path: String,
    pub report_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub dag_task_count: usize,
    pub package_request_count: usize,
    pub package_blocked_count: usize,
    pub dispatch_count: usize,
    pub blocked_count: usize,
    pub blocked_pending_count: usize,
    pub blocked_approval_required_count: usize,
    pub follow_up_count: usize,
    pub released_after_approval_count: usize,
    pub appended_entries: usize,
    pub blocked_by_reason: BTreeMap<String, usize>,
    pub blocked_by_source: BTreeMap<String, usize>,
    pub blocked_by_approval_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRollup {
    pub pending_count: usize,
    pub pending_task_ids: Vec<TaskId>,
    pub required_approvers: Vec<ApproverCount>,
    pub follow_up_targets: Vec<TargetCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverCount {
    pub approver: String,
    pub blocked_task_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCount {
    pub target: String,
    pub follow_up_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedSummary {
    pub task_id: TaskId,
    pub recommendation_id: Option<String>,
    pub reason: String,
    pub blocked_source: BlockedSource,
    pub approval_flow: ApprovalFlow,
}

/// Everything the report is computed from besides the outcome itself.
///
/// Input hashes are taken over the bytes the run actually parsed.
pub struct ReportContext<'a> {
    pub generated_at: String,
    pub task_dag_path: &'a Path,
    pub task_dag_sha256: String,
    pub task_package_path: &'a Path,
    pub task_package_sha256: String,
    pub journal_path: &'a Path,
    pub report_path: &'a Path,
    pub dag_task_count: usize,
    pub appended_entries: usize,
}

impl DispatchReport {
    /// Assemble the report from a reconciled outcome and its follow-ups.
    pub fn build(
        ctx: &ReportContext<'_>,
        outcome: &DispatchOutcome,
        follow_ups: &[DispatchRequest],
    ) -> Self {
        let stats = &outcome.stats;
        Self {
            version: REPORT_VERSION,
            generated_at: ctx.generated_at.clone(),
            command: REPORT_COMMAND.to_string(),
            inputs: ReportInputs {
                task_dag_path: ctx.task_dag_path.display().to_string(),
                task_dag_sha256: ctx.task_dag_sha256.clone(),
                task_package_path: ctx.task_package_path.display().to_string(),
                task_package_sha256: ctx.task_package_sha256.clone(),
            },
            outputs: ReportOutputs {
                journal_path: ctx.journal_path.display().to_string(),
                report_path: ctx.report_path.display().to_string(),
            },
            stats: ReportStats {
                dag_task_count: ctx.dag_task_count,
                package_request_count: stats.request_count,
                package_blocked_count: stats.package_blocked_count,
                dispatch_count: stats.dispatch_count,
                blocked_count: stats.blocked_count,
                blocked_pending_count: stats.blocked_pending_count,
                blocked_approval_required_count: stats.blocked_approval_required_count,
                follow_up_count: follow_ups.len(),
                released_after_approval_count: stats.released_after_approval_count,
                appended_entries: ctx.appended_entries,
                blocked_by_reason: stats.blocked_by_reason.clone(),
                blocked_by_source: stats.blocked_by_source.clone(),
                blocked_by_approval_status: stats.blocked_by_approval_status.clone(),
            },
            dispatched_task_ids: outcome.dispatch_entries.iter().map(|e| e.id.clone()).collect(),
            blocked_task_ids: outcome.blocked_entries.iter().map(|e| e.task_id.clone()).collect(),
            released_after_approval_task_ids: outcome.released_after_approval_task_ids.clone(),
            follow_up_request_ids: follow_ups.iter().map(|r| r.id.clone()).collect(),
            approval_flow: approval_rollup(&outcome.blocked_entries, follow_ups),
            blocked_entries: outcome.blocked_entries.iter().map(summarize).collect(),
        }
    }

    /// Write the report as pretty JSON next to `path` without replacing it
    /// yet. Parent directories are created.
    ///
    /// Nothing exists at `path` until [`StagedReport::commit`] renames the
    /// staged file into place.
    pub fn stage(&self, path: &Path) -> Result<StagedReport> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut staged = path.as_os_str().to_owned();
        staged.push(".tmp");
        let staged = PathBuf::from(staged);

        let json = serde_json::to_string_pretty(self)?;
        fs::write(&staged, format!("{json}\n"))?;
        clog_debug!("report staged at {}", staged.display());
        Ok(StagedReport {
            staged,
            target: path.to_path_buf(),
        })
    }
}

/// A fully written report waiting to be moved to its final path.
#[derive(Debug)]
pub struct StagedReport {
    staged: PathBuf,
    target: PathBuf,
}

impl StagedReport {
    /// Rename the staged file over the target.
    pub fn commit(self) -> Result<()> {
        fs::rename(&self.staged, &self.target)?;
        Ok(())
    }

    /// Remove the staged file. Failures are ignored; the target is untouched.
    pub fn discard(self) {
        let _ = fs::remove_file(&self.staged);
    }
}

fn approval_rollup(blocked: &[BlockedJournalEntry], follow_ups: &[DispatchRequest]) -> ApprovalRollup {
    let pending_task_ids: Vec<TaskId> = blocked
        .iter()
        .filter(|e| e.approval_flow.requires_human_approval && e.approval_flow.is_pending())
        .map(|e| e.task_id.clone())
        .collect();

    let mut approvers: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in blocked {
        for approver in &entry.follow_up.required_approvers {
            *approvers.entry(approver.as_str()).or_default() += 1;
        }
    }

    let mut targets: BTreeMap<&str, usize> = BTreeMap::new();
    for request in follow_ups {
        if let Some(target) = request.target.as_deref() {
            *targets.entry(target).or_default() += 1;
        }
    }

    ApprovalRollup {
        pending_count: pending_task_ids.len(),
        pending_task_ids,
        required_approvers: approvers
            .into_iter()
            .map(|(approver, count)| ApproverCount {
                approver: approver.to_string(),
                blocked_task_count: count,
            })
            .collect(),
        follow_up_targets: targets
            .into_iter()
            .map(|(target, count)| TargetCount {
                target: target.to_string(),
                follow_up_count: count,
            })
            .collect(),
    }
}

fn summarize(entry: &BlockedJournalEntry) -> BlockedSummary {
    BlockedSummary {
        task_id: entry.task_id.clone(),
        recommendation_id: entry.recommendation_id.clone(),
        reason: entry.reason.clone(),
        blocked_source: entry.blocked_source,
        approval_flow: entry.approval_flow.clone(),
    }
}
