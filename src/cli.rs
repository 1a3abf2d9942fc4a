//! Command line of the `dad` binary.
//!
//! `dad serve` starts the server. Its flags (or the matching `DAD_*`
//! environment variables) override what the configuration file says, so
//! secrets like the Docktor password need not be written to disk.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::state::{load_config, load_config_from};
use crate::types::Config;

#[derive(Debug, Parser)]
#[command(name = "dad")]
#[command(about = "D.A.D - Deployment Analytics Dashboard", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file path (defaults to ~/.dad/config.json)
    #[arg(short, long, env = "DAD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch the D.A.D server
    Serve(ServeArgs),
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Address the HTTP API listens on
    #[arg(long, env = "DAD_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// SQLite database file
    #[arg(long, env = "DAD_DATABASE_PATH")]
    pub database_path: Option<String>,

    /// Docktor HTTP address. Format http://host:port
    #[arg(long, env = "DAD_DOCKTOR_ADDR")]
    pub docktor_addr: Option<String>,

    /// Docktor user to connect with
    #[arg(long, env = "DAD_DOCKTOR_USER")]
    pub docktor_user: Option<String>,

    /// Docktor password to connect with
    #[arg(long, env = "DAD_DOCKTOR_PASSWORD", hide_env_values = true)]
    pub docktor_password: Option<String>,

    /// Log in to Docktor through LDAP
    #[arg(long, env = "DAD_DOCKTOR_LDAP")]
    pub docktor_ldap: bool,

    /// Recurrence of the deployment indicators pass (`@every 20m`, cron)
    #[arg(long, env = "DAD_TASKS_RECURRENCE")]
    pub tasks_recurrence: Option<String>,

    /// Timezone used to evaluate cron recurrences
    #[arg(long, env = "DAD_TASKS_TIMEZONE")]
    pub tasks_timezone: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "DAD_LOG_JSON")]
    pub log_json: bool,
}

impl ServeArgs {
    /// Overwrite the fields given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(addr) = &self.listen_addr {
            config.listen_addr = addr.clone();
        }
        if let Some(path) = &self.database_path {
            config.database_path = Some(path.clone());
        }
        if let Some(addr) = &self.docktor_addr {
            config.docktor.address = addr.clone();
        }
        if let Some(user) = &self.docktor_user {
            config.docktor.user = user.clone();
        }
        if let Some(password) = &self.docktor_password {
            config.docktor.password = password.clone();
        }
        if self.docktor_ldap {
            config.docktor.ldap = true;
        }
        if let Some(recurrence) = &self.tasks_recurrence {
            config.schedule.recurrence = recurrence.clone();
        }
        if let Some(tz) = &self.tasks_timezone {
            config.schedule.timezone = tz.clone();
        }
        if self.log_json {
            config.log_json = true;
        }
    }
}

impl Cli {
    /// Load the configuration file, then apply the `serve` flags.
    pub fn load_config(&self) -> Result<Config, String> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        if let Some(Command::Serve(args)) = &self.command {
            args.apply(&mut config);
        }
        Ok(config)
    }
}
