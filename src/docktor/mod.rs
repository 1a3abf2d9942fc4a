//! Docktor: the container-management system reporting which services run
//! for each project group.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DocktorError;

pub mod client;

pub use client::{resolve_group_id, DocktorClient};

/// Connection settings of the Docktor API (`docktor` config section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocktorConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// Log in through Docktor's LDAP backend.
    #[serde(default)]
    pub ldap: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Reuse a login token for this long. 0 logs in before every fetch.
    #[serde(default)]
    pub token_ttl_secs: u64,
}

fn default_address() -> String {
    "http://localhost:3000".to_string()
}

fn default_user() -> String {
    "user".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

impl Default for DocktorConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            user: default_user(),
            password: default_password(),
            ldap: false,
            timeout_secs: default_timeout_secs(),
            token_ttl_secs: 0,
        }
    }
}

impl DocktorConfig {
    pub fn validate(&self) -> Result<(), DocktorError> {
        if self.address.trim().is_empty() {
            return Err(DocktorError::Configuration("Docktor address is empty".into()));
        }
        if self.user.trim().is_empty() {
            return Err(DocktorError::Configuration("Docktor username is empty".into()));
        }
        if self.password.is_empty() {
            return Err(DocktorError::Configuration("Docktor password is empty".into()));
        }
        Ok(())
    }
}

/// A Docktor group and the containers deployed in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocktorGroup {
    #[serde(default, alias = "_id")]
    pub id: String,
    #[serde(default, alias = "title")]
    pub name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default, rename = "serviceTitle")]
    pub service_title: String,
    #[serde(default, rename = "Image", alias = "image")]
    pub image: String,
}

impl Container {
    /// Lower-cased service title, or the bare image name when the title is empty:
    /// `registry:5000/team/jenkins:2.1` gives `jenkins`.
    pub fn service_name(&self) -> String {
        let title = self.service_title.trim();
        if !title.is_empty() {
            return title.to_lowercase();
        }
        let last = self.image.rsplit('/').next().unwrap_or_default();
        let last = last.split('@').next().unwrap_or_default();
        let name = last.split(':').next().unwrap_or_default();
        name.trim().to_lowercase()
    }
}

impl DocktorGroup {
    /// Names of the services running in the group, lower-cased, blanks dropped.
    pub fn service_names(&self) -> HashSet<String> {
        self.containers
            .iter()
            .map(Container::service_name)
            .filter(|n| !n.is_empty())
            .collect()
    }
}

/// Source of live workloads. Implemented by [`DocktorClient`], faked in tests.
#[async_trait]
pub trait WorkloadInspector: Send + Sync {
    /// Extract the group id from a project's Docktor group URL.
    fn resolve_group_id(&self, url: &str) -> Result<String, DocktorError>;

    async fn fetch_group(&self, group_id: &str) -> Result<DocktorGroup, DocktorError>;
}
