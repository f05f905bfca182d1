//! Bridge configuration
//!
//! Layered with figment, lowest priority first: built-in defaults, optional
//! YAML file, `HMBRIDGE_*` environment variables, command-line flags.

use std::path::PathBuf;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::command::CommandEncoding;
use crate::error::{BridgeError, Result};
use crate::filter::FilterSet;
use crate::mqtt::BrokerEndpoint;

pub const ENV_PREFIX: &str = "HMBRIDGE_";

/// Command-line flags
///
/// Only flags actually given take part in the merge.
#[derive(Debug, Clone, Default, Parser, Serialize)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Instance name, used as MQTT client id and topic prefix
    #[arg(short = 'n', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// MQTT broker URL (mqtt://[user:pass@]host[:port])
    #[arg(short = 'm', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_url: Option<String>,

    /// CCU address
    #[arg(short = 'c', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ccu_address: Option<String>,

    /// CCU XML-RPC port of the HmIP interface
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ccu_port: Option<u16>,

    /// Own IP for callbacks
    #[arg(short = 'i', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_address: Option<String>,

    /// Own port for callbacks
    #[arg(short = 'p', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    /// Publish only datapoints matching any of these space-separated regexes, e.g. "^PRESS_ ^BRIGHTNESS$"
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_whitelist: Option<String>,

    /// Never publish datapoints matching any of these space-separated regexes, e.g. "^PARTY_"
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_blacklist: Option<String>,

    /// error, warn, info, debug or trace
    #[arg(short = 'v', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,

    /// How command payloads are sent to the CCU
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_encoding: Option<CommandEncoding>,

    /// Directory for a daily rolling log file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub name: String,
    pub mqtt_url: String,
    pub ccu_address: String,
    pub ccu_port: u16,
    pub init_address: String,
    pub listen_port: u16,
    pub filter_whitelist: Option<String>,
    pub filter_blacklist: Option<String>,
    pub verbosity: String,
    pub command_encoding: CommandEncoding,
    pub log_dir: Option<PathBuf>,
    /// Upper bound on waiting for deregistration at shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "hmip".to_string(),
            mqtt_url: "mqtt://127.0.0.1".to_string(),
            ccu_address: String::new(),
            ccu_port: 2010,
            init_address: String::new(),
            listen_port: 3126,
            filter_whitelist: None,
            filter_blacklist: None,
            verbosity: "info".to_string(),
            command_encoding: CommandEncoding::Raw,
            log_dir: None,
            shutdown_grace_secs: 1,
        }
    }
}

impl BridgeConfig {
    pub fn figment(args: &CliArgs) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(BridgeConfig::default()));
        if let Some(path) = &args.config {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(args))
    }

    /// Merge all sources and validate the result
    pub fn load(args: &CliArgs) -> Result<Self> {
        if let Some(path) = &args.config {
            if !path.exists() {
                return Err(BridgeError::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }

        let config: BridgeConfig = Self::figment(args).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ccu_address.trim().is_empty() {
            return Err(BridgeError::config("ccu_address is required"));
        }
        if self.init_address.trim().is_empty() {
            return Err(BridgeError::config("init_address is required"));
        }
        if self.name.is_empty() || self.name.contains(['/', '+', '#']) {
            return Err(BridgeError::config(format!(
                "Invalid instance name '{}': must be non-empty and free of '/', '+' and '#'",
                self.name
            )));
        }
        if common::parse_level(&self.verbosity).is_none() {
            return Err(BridgeError::config(format!(
                "Invalid verbosity '{}'",
                self.verbosity
            )));
        }
        BrokerEndpoint::parse(&self.mqtt_url)?;
        self.filter_set()?;
        Ok(())
    }

    pub fn filter_set(&self) -> Result<FilterSet> {
        FilterSet::from_lists(
            self.filter_whitelist.as_deref(),
            self.filter_blacklist.as_deref(),
        )
    }

    /// URL the CCU calls back, `http://{init_address}:{listen_port}`
    pub fn callback_url(&self) -> String {
        format!("http://{}:{}", self.init_address, self.listen_port)
    }

    /// `http://{ccu_address}:{ccu_port}/`
    pub fn controller_url(&self) -> String {
        format!("http://{}:{}/", self.ccu_address, self.ccu_port)
    }
}
