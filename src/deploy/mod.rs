//! Deployment indicators: which functional services actually run for a project.

pub mod job;
pub mod reconcile;

pub use job::{DeploymentJob, PassSummary};
pub use reconcile::{reconcile_matrix, reconcile_project, Catalog, ReconcileOutcome};
