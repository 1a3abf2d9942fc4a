use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::db::{
    ensure_all_indexes, DbError, EnsureIndexes, EntityRepo, EntityStore, ProjectRepo, ProjectStore,
    ServiceCatalog, ServiceRepo, SharedDb,
};
use crate::deploy::{DeploymentJob, PassSummary};
use crate::docktor::{DocktorClient, WorkloadInspector};
use crate::error::JobError;
use crate::projects::ProjectService;
use crate::types::Config;

/// Maximum number of pass summaries to keep in memory
const MAX_PASS_HISTORY: usize = 20;

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassTrigger {
    Scheduled,
    Manual,
}

/// A finished pass, as listed by the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassRecord {
    pub trigger: PassTrigger,
    #[serde(flatten)]
    pub summary: PassSummary,
    /// Display form of the summary.
    pub message: String,
}

/// Shared application state handed to the scheduler and HTTP handlers.
pub struct AppState {
    pub config: Config,
    pub projects: Arc<dyn ProjectStore>,
    pub services: Arc<dyn ServiceCatalog>,
    pub entities: Arc<dyn EntityStore>,
    pub project_service: ProjectService,
    /// `None` when Docktor is not configured: the job subsystem is off.
    pub job: Option<Arc<DeploymentJob>>,
    pass_history: Mutex<VecDeque<PassRecord>>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Wire the repositories and the Docktor client around an open database.
    pub fn new(config: Config, db: SharedDb) -> Result<Self, DbError> {
        let projects = ProjectRepo::new(db.clone());
        let services = ServiceRepo::new(db.clone());
        let entities = EntityRepo::new(db);
        let repos: [&dyn EnsureIndexes; 3] = [&projects, &services, &entities];
        ensure_all_indexes(&repos)?;

        let inspector: Option<Arc<dyn WorkloadInspector>> =
            match DocktorClient::new(config.docktor.clone()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    log::error!("{}. Deployment indicators are disabled.", e);
                    None
                }
            };

        Ok(Self::with_parts(
            config,
            Arc::new(projects),
            Arc::new(services),
            Arc::new(entities),
            inspector,
        ))
    }

    /// Build the state from explicit parts.
    pub fn with_parts(
        config: Config,
        projects: Arc<dyn ProjectStore>,
        services: Arc<dyn ServiceCatalog>,
        entities: Arc<dyn EntityStore>,
        inspector: Option<Arc<dyn WorkloadInspector>>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let job = inspector.clone().map(|inspector| {
            Arc::new(DeploymentJob::new(
                projects.clone(),
                services.clone(),
                inspector,
                config.deploy.clone(),
                shutdown_rx,
            ))
        });
        let project_service = ProjectService::new(projects.clone(), entities.clone(), inspector);

        Self {
            config,
            projects,
            services,
            entities,
            project_service,
            job,
            pass_history: Mutex::new(VecDeque::new()),
            shutdown,
        }
    }

    /// Run a deployment pass and record it in the history.
    pub async fn run_deployment_pass(&self, trigger: PassTrigger) -> Result<PassSummary, JobError> {
        let job = self.job.as_ref().ok_or_else(|| {
            JobError::NotConfigured("Docktor connection settings are missing".to_string())
        })?;
        log::info!("Deployment indicators pass requested ({:?})", trigger);
        let summary = job.run_pass().await?;
        self.add_pass_record(PassRecord {
            trigger,
            message: summary.to_string(),
            summary: summary.clone(),
        });
        Ok(summary)
    }

    pub fn add_pass_record(&self, record: PassRecord) {
        let mut guard = self.pass_history.lock();
        guard.push_front(record);
        guard.truncate(MAX_PASS_HISTORY);
    }

    /// Most recent passes first.
    pub fn pass_history(&self, limit: usize) -> Vec<PassRecord> {
        self.pass_history.lock().iter().take(limit).cloned().collect()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask the scheduler and any running pass to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Path of the configuration file: `$DAD_CONFIG`, else `~/.dad/config.json`.
pub fn config_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("DAD_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".dad").join("config.json"))
}

/// Load the configuration. A missing file yields the defaults.
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;
    if !path.exists() {
        log::warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }
    load_config_from(&path)
}

pub fn load_config_from(path: &std::path::Path) -> Result<Config, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))
}
