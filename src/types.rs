use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::docktor::DocktorConfig;

/// Main configuration loaded from `~/.dad/config.json` (or `$DAD_CONFIG`).
///
/// Every section has defaults so a missing file still yields a runnable
/// development setup pointing at a local Docktor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// SQLite database path. Defaults to `~/.dad/dad.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default)]
    pub docktor: DocktorConfig,
    #[serde(default)]
    pub schedule: ScheduleEntry,
    #[serde(default)]
    pub deploy: DeployConfig,
    /// API users. Requests authenticate with `Authorization: Bearer <token>`.
    #[serde(default)]
    pub users: Vec<ApiUser>,
    /// Emit logs as JSON lines instead of the human-readable format.
    #[serde(default)]
    pub log_json: bool,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database_path: None,
            docktor: DocktorConfig::default(),
            schedule: ScheduleEntry::default(),
            deploy: DeployConfig::default(),
            users: Vec::new(),
            log_json: false,
        }
    }
}

impl Config {
    /// Find the configured user owning an API token.
    pub fn user_for_token(&self, token: &str) -> Option<User> {
        self.users
            .iter()
            .find(|u| !u.token.is_empty() && u.token == token)
            .map(|u| u.user.clone())
    }
}

/// Recurrence of the deployment indicators pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `@every 20m`, a cron macro (`@daily`) or a 5/6-field cron expression.
    #[serde(default = "default_recurrence")]
    pub recurrence: String,
    /// Timezone used to evaluate cron expressions.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_true() -> bool {
    true
}

fn default_recurrence() -> String {
    "@every 20m".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for ScheduleEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            recurrence: default_recurrence(),
            timezone: default_timezone(),
        }
    }
}

/// Tuning of the reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    /// Pause between two projects so Docktor is not hit back-to-back.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Pause after a Docktor failure before moving to the next project.
    #[serde(default = "default_error_delay_ms")]
    pub error_delay_ms: u64,
    /// Container service names marking an isolated (non-cloud) environment.
    /// Projects running one are left untouched by the pass.
    #[serde(default)]
    pub isolated_markers: Vec<String>,
}

fn default_throttle_ms() -> u64 {
    50
}

fn default_error_delay_ms() -> u64 {
    1000
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            error_delay_ms: default_error_delay_ms(),
            isolated_markers: Vec::new(),
        }
    }
}

impl DeployConfig {
    pub fn isolated_marker_set(&self) -> HashSet<String> {
        self.isolated_markers
            .iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect()
    }
}

/// A configured API user with its bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    pub token: String,
    #[serde(flatten)]
    pub user: User,
}

// =============================================================================
// Users and roles
// =============================================================================

/// Global rights of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can do anything.
    Admin,
    /// Sees and edits the projects of its entities.
    Ri,
    /// Sees the projects it manages.
    Pm,
    /// Substitute of a PM, same rights.
    Deputy,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Ri => write!(f, "ri"),
            Role::Pm => write!(f, "pm"),
            Role::Deputy => write!(f, "deputy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    pub role: Role,
    /// Business units and service centers the user is responsible for (RI).
    #[serde(default)]
    pub entities: Vec<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_ri(&self) -> bool {
        self.role == Role::Ri
    }

    pub fn is_pm_or_deputy(&self) -> bool {
        matches!(self.role, Role::Pm | Role::Deputy)
    }
}

// =============================================================================
// Matrix scales
// =============================================================================

/// Progress or goal level: 0..=5, i.e. 0% to 100% in steps of 20%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Level(u8);

impl Level {
    pub const NONE: Level = Level(0);
    /// First non-zero level (20%). A running service is at least here.
    pub const STARTED: Level = Level(1);
    pub const MAX: Level = Level(5);

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX.0).then_some(Level(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn percent(self) -> u8 {
        self.0 * 20
    }
}

impl TryFrom<i64> for Level {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Level::new)
            .ok_or_else(|| format!("level must be between 0 and 5, got {}", value))
    }
}

impl From<Level> for i64 {
    fn from(level: Level) -> Self {
        level.0 as i64
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// Deployment flag of a matrix line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Deployed {
    #[serde(rename = "Yes", alias = "yes")]
    Yes,
    #[serde(rename = "No", alias = "no")]
    No,
    #[default]
    #[serde(rename = "")]
    NotApplicable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    #[default]
    #[serde(rename = "", alias = "N/A")]
    NotApplicable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_rejects_out_of_range() {
        assert!(serde_json::from_str::<Level>("6").is_err());
        assert!(serde_json::from_str::<Level>("-1").is_err());
        assert_eq!(serde_json::from_str::<Level>("3").unwrap().percent(), 60);
    }

    #[test]
    fn test_deployed_accepts_lowercase_history() {
        assert_eq!(serde_json::from_str::<Deployed>("\"yes\"").unwrap(), Deployed::Yes);
        assert_eq!(serde_json::from_str::<Deployed>("\"No\"").unwrap(), Deployed::No);
        assert_eq!(
            serde_json::from_str::<Deployed>("\"\"").unwrap(),
            Deployed::NotApplicable
        );
        assert_eq!(serde_json::to_string(&Deployed::Yes).unwrap(), "\"Yes\"");
    }

    #[test]
    fn test_priority_na_alias() {
        assert_eq!(
            serde_json::from_str::<Priority>("\"N/A\"").unwrap(),
            Priority::NotApplicable
        );
        assert_eq!(serde_json::to_string(&Priority::P1).unwrap(), "\"P1\"");
    }

    #[test]
    fn test_config_defaults_from_empty_object() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.schedule.recurrence, "@every 20m");
        assert_eq!(config.deploy.throttle_ms, 50);
        assert_eq!(config.docktor.timeout_secs, 15);
    }

    #[test]
    fn test_user_for_token() {
        let config: Config = serde_json::from_str(
            r#"{"users": [{"token": "s3cret", "id": "u1", "username": "root", "role": "admin"}]}"#,
        )
        .unwrap();
        let user = config.user_for_token("s3cret").unwrap();
        assert!(user.is_admin());
        assert!(config.user_for_token("nope").is_none());
        assert!(config.user_for_token("").is_none());
    }
}
