//! The deployment indicators pass: reconcile every project having a Docktor
//! group against its live containers.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use super::reconcile::{reconcile_project, Catalog};
use crate::db::{DbError, DbProject, ProjectStore, ServiceCatalog};
use crate::docktor::{DocktorGroup, WorkloadInspector};
use crate::error::{DocktorError, JobError};
use crate::types::DeployConfig;

/// Result of one pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub updated: usize,
    pub failed: usize,
    /// Projects left alone because they run an isolated-environment marker.
    pub skipped: usize,
    /// `"<name> (docktor:<group name>)"` of every failed project.
    pub failed_projects: Vec<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PassSummary {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            updated: 0,
            failed: 0,
            skipped: 0,
            failed_projects: Vec::new(),
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    fn fail(&mut self, project: &DbProject) {
        self.failed_projects.push(format!(
            "{} (docktor:{})",
            project.name, project.docktor_group_name
        ));
        self.failed = self.failed_projects.len();
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} projects updated, {} not updated because an error occurred. List of projects in error [{}].",
            self.updated,
            self.failed,
            self.failed_projects.join(",")
        )
    }
}

#[derive(Debug, thiserror::Error)]
enum ProjectError {
    #[error(transparent)]
    Docktor(#[from] DocktorError),
    #[error(transparent)]
    Store(#[from] DbError),
}

enum Applied {
    Reconciled,
    Isolated,
}

pub struct DeploymentJob {
    projects: Arc<dyn ProjectStore>,
    catalog: Arc<dyn ServiceCatalog>,
    inspector: Arc<dyn WorkloadInspector>,
    settings: DeployConfig,
    shutdown: watch::Receiver<bool>,
    running: Mutex<()>,
}

impl DeploymentJob {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        catalog: Arc<dyn ServiceCatalog>,
        inspector: Arc<dyn WorkloadInspector>,
        settings: DeployConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            projects,
            catalog,
            inspector,
            settings,
            shutdown,
            running: Mutex::new(()),
        }
    }

    /// True while a pass holds the single-flight guard.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run one pass over every candidate project.
    ///
    /// Per-project failures end up in the summary. The pass itself only
    /// fails when the candidates or the catalog cannot be read, or when
    /// another pass is already running.
    pub async fn run_pass(&self) -> Result<PassSummary, JobError> {
        let _guard = self.running.try_lock().map_err(|_| JobError::AlreadyRunning)?;
        let mut summary = PassSummary::start();

        log::info!("Starting to compute deployment status analytics");

        let candidates = self
            .projects
            .find_with_docktor_group_url()
            .map_err(|source| JobError::Store {
                what: "projects with a Docktor group URL",
                source,
            })?;
        let catalog = Catalog::new(self.catalog.find_all().map_err(|source| JobError::Store {
            what: "functional services",
            source,
        })?);
        let markers = self.settings.isolated_marker_set();

        log::info!(
            "Found {} projects with a Docktor URL, {} functional services in catalog",
            candidates.len(),
            catalog.len()
        );

        let mut shutdown = self.shutdown.clone();
        for project in candidates {
            if *shutdown.borrow() {
                log::warn!("Shutdown requested, stopping deployment pass early");
                summary.cancelled = true;
                break;
            }

            let group = match self.fetch_workload(&project).await {
                Ok(group) => group,
                Err(e) => {
                    log::warn!("Project {} ({}): {}", project.name, project.id, e);
                    summary.fail(&project);
                    self.pause(self.settings.error_delay_ms, &mut shutdown).await;
                    continue;
                }
            };
            self.pause(self.settings.throttle_ms, &mut shutdown).await;

            match self.apply(project.clone(), &group, &catalog, &markers) {
                Ok(Applied::Reconciled) => summary.updated += 1,
                Ok(Applied::Isolated) => {
                    log::info!("Project {} runs in an isolated environment, skipped", project.name);
                    summary.skipped += 1;
                }
                Err(e) => {
                    log::warn!("Error when updating project {} ({}): {}", project.name, project.id, e);
                    summary.fail(&project);
                }
            }
        }

        summary.finished_at = Utc::now();
        log::info!("Computing deployment status analytics is over: {}", summary);
        Ok(summary)
    }

    async fn fetch_workload(&self, project: &DbProject) -> Result<DocktorGroup, DocktorError> {
        let group_id = self.inspector.resolve_group_id(&project.docktor_group_url)?;
        self.inspector.fetch_group(&group_id).await
    }

    fn apply(
        &self,
        mut project: DbProject,
        group: &DocktorGroup,
        catalog: &Catalog,
        markers: &HashSet<String>,
    ) -> Result<Applied, ProjectError> {
        let live = group.service_names();
        let outcome = reconcile_project(&mut project, &live, catalog, markers);
        if outcome.isolated {
            return Ok(Applied::Isolated);
        }

        let renamed = !group.name.is_empty() && group.name != project.docktor_group_name;
        if renamed {
            project.docktor_group_name = group.name.clone();
        }

        if outcome.changed || renamed {
            log::debug!(
                "Project {}: {} added, {} confirmed, {} regressed",
                project.name,
                outcome.added.len(),
                outcome.confirmed.len(),
                outcome.regressed.len()
            );
            self.projects.save_if_version(project)?;
        }
        Ok(Applied::Reconciled)
    }

    /// Sleep for `ms`, waking early on shutdown.
    async fn pause(&self, ms: u64, shutdown: &mut watch::Receiver<bool>) {
        if ms == 0 {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            Ok(()) = shutdown.changed() => {}
        }
    }
}
