//! End-to-end dispatch run: load artifacts, reconcile, raise follow-ups,
//! append the journal and write the report.
//!
//! The report is staged before the journal is touched and only moved into
//! place once the append has succeeded. A run that fails before the append
//! leaves both the journal and any previous report untouched.

use std::fs;
use std::path::{Path, PathBuf};

use super::follow_up::build_approval_follow_ups;
use super::journal::{append_journal, journal_batch};
use super::package::TaskPackage;
use super::protocol::TaskRequestBuilder;
use super::reconciler::DispatchReconciler;
use super::report::{DispatchReport, ReportContext};
use crate::clock::Clock;
use crate::core::dag::TaskDag;
use crate::identity::sha256_hex;
use crate::{clog, clog_error, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPaths {
    pub task_dag: PathBuf,
    pub task_package: PathBuf,
    pub journal: PathBuf,
    pub report: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRunResult {
    pub report: DispatchReport,
    pub dispatch_count: usize,
    pub blocked_count: usize,
    pub follow_up_count: usize,
    pub released_count: usize,
    pub appended_entries: usize,
}

/// Run one dispatch over the artifacts at `paths`.
///
/// # Errors
/// Missing or malformed inputs, an invalid DAG, or any write failure. The
/// journal is only appended once the report has been staged.
pub fn dispatch_artifacts(
    paths: &DispatchPaths,
    from_agent: &str,
    clock: &dyn Clock,
    builder: &dyn TaskRequestBuilder,
) -> Result<DispatchRunResult> {
    let dag_bytes = read_artifact(&paths.task_dag)?;
    let package_bytes = read_artifact(&paths.task_package)?;
    let dag = TaskDag::from_slice(&dag_bytes)?;
    let package = TaskPackage::from_slice(&package_bytes)?;

    let outcome = DispatchReconciler::new(&dag, clock, builder)?
        .with_from_agent(from_agent)
        .reconcile(&package)?;
    let follow_ups = build_approval_follow_ups(&outcome.blocked_entries, clock, builder)?;
    let batch = journal_batch(&outcome.dispatch_entries, &follow_ups, &outcome.blocked_entries);

    let report = DispatchReport::build(
        &ReportContext {
            generated_at: clock.now_rfc3339(),
            task_dag_path: &paths.task_dag,
            task_dag_sha256: sha256_hex(&dag_bytes),
            task_package_path: &paths.task_package,
            task_package_sha256: sha256_hex(&package_bytes),
            journal_path: &paths.journal,
            report_path: &paths.report,
            dag_task_count: dag.tasks.len(),
            appended_entries: batch.len(),
        },
        &outcome,
        &follow_ups,
    );
    let staged = report.stage(&paths.report)?;

    let appended_entries = match append_journal(&paths.journal, &batch) {
        Ok(count) => count,
        Err(err) => {
            clog_error!("journal append failed, report not written: {}", err);
            staged.discard();
            return Err(err);
        }
    };
    staged.commit()?;

    clog!(
        "{} dispatched, {} blocked, {} follow-ups, {} released",
        outcome.dispatch_entries.len(),
        outcome.blocked_entries.len(),
        follow_ups.len(),
        outcome.released_after_approval_task_ids.len()
    );

    Ok(DispatchRunResult {
        dispatch_count: outcome.dispatch_entries.len(),
        blocked_count: outcome.blocked_entries.len(),
        follow_up_count: follow_ups.len(),
        released_count: outcome.released_after_approval_task_ids.len(),
        appended_entries,
        report,
    })
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(Error::ArtifactNotFound(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}
