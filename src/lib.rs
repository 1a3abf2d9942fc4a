//! D.A.D, the Deployment Analytics Dashboard backend.
//!
//! Stores project maturity matrices and keeps their `deployed` flags in
//! line with the services Docktor reports as running.

pub mod api;
pub mod cli;
pub mod db;
pub mod deploy;
pub mod docktor;
pub mod error;
pub mod migrations;
pub mod projects;
pub mod scheduler;
pub mod state;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use crate::db::DadDb;
use crate::scheduler::Scheduler;
use crate::state::AppState;
use crate::types::Config;

/// Open the database, start the scheduler and serve the API until Ctrl+C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr))?;

    let db = DadDb::open(config.database_path.as_deref())
        .context("Failed to open the database")?
        .into_shared();
    let state = Arc::new(AppState::new(config, db).context("Failed to prepare the database")?);

    let scheduler = if !state.config.schedule.enabled {
        log::info!("Deployment indicators scheduler is disabled");
        None
    } else if state.job.is_none() {
        log::warn!("Docktor is not configured, deployment indicators will not be scheduled");
        None
    } else {
        match Scheduler::new(
            &state.config.schedule,
            state.clone(),
            state.subscribe_shutdown(),
        ) {
            Ok(scheduler) => Some(tokio::spawn(scheduler.run())),
            Err(e) => {
                log::error!("Scheduler not started: {}", e);
                None
            }
        }
    };

    let mut server = tokio::spawn(api::serve(state.clone(), addr, state.subscribe_shutdown()));

    let served = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            log::info!("Shutting down");
            state.shutdown();
            (&mut server).await
        }
        // The server only returns early when it could not bind or accept.
        served = &mut server => {
            state.shutdown();
            served
        }
    };

    if let Some(scheduler) = scheduler {
        scheduler.await.context("Scheduler task panicked")?;
    }
    served
        .context("API server task panicked")?
        .with_context(|| format!("API server on {} failed", addr))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_fails_fast_when_port_is_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.listen_addr = taken.local_addr().unwrap().to_string();
        config.database_path = Some(dir.path().join("dad.db").to_string_lossy().to_string());

        let result = tokio::time::timeout(Duration::from_secs(5), run(config))
            .await
            .expect("run should return instead of waiting for Ctrl+C");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("API server on"), "{:#}", err);
    }

    #[tokio::test]
    async fn test_run_rejects_bad_listen_address() {
        let config = Config {
            listen_addr: "not an address".to_string(),
            ..Config::default()
        };
        assert!(run(config).await.is_err());
    }
}
