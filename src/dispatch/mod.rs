//! Dispatch: reconcile a task DAG with a packaged request list, raise
//! approval follow-ups, and record the run.

pub mod follow_up;
pub mod gate;
pub mod journal;
pub mod package;
pub mod protocol;
pub mod reconciler;
pub mod report;
pub mod run;

pub use follow_up::{approver_assignments, build_approval_follow_ups, ApproverAssignment};
pub use gate::{normalize_approver_target, ApprovalFlow, GateView};
pub use journal::{append_journal, journal_batch, JournalEntry};
pub use package::{BlockedPackageItem, ReleaseTemplate, TaskPackage};
pub use protocol::{
    DispatchRequest, ProtocolTaskRequestBuilder, RequestPriority, TaskRequestBuilder,
    TaskRequestSpec,
};
pub use reconciler::{
    BlockedJournalEntry, BlockedSource, DispatchOutcome, DispatchReconciler, DispatchStats,
    FollowUp, Traceability,
};
pub use report::DispatchReport;
pub use run::{dispatch_artifacts, DispatchPaths, DispatchRunResult};
