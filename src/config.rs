//! Node configuration (section 6.6): loaded from an optional TOML file named
//! by `DTN_CONFIG` (default `config/default.toml`), overridable by `DTN_`-
//! prefixed environment variables, the way the teacher loads `Config`.

use crate::bpv7::EndpointId;
use crate::consts::{
    DEFAULT_ANNOUNCEMENT_INTERVAL_SECS, DEFAULT_JANITOR_INTERVAL_SECS, DEFAULT_PEER_TIMEOUT_SECS,
    DEFAULT_WEB_PORT,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaConfig {
    #[serde(rename = "type")]
    pub cla_type: String,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticPeerConfig {
    pub eid: String,
    pub address: String,
    #[serde(default)]
    pub cla: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    /// `"mem"` or `"sqlite"`.
    #[serde(default = "default_db")]
    pub db: String,
    #[serde(default)]
    pub db_path: Option<String>,
    /// `"epidemic"`, `"flooding"`, `"static"`, `"sprayandwait"`, or `"sink"`.
    #[serde(default = "default_routing")]
    pub routing: String,
    #[serde(default)]
    pub routing_settings: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub services: HashMap<u8, String>,
    #[serde(default)]
    pub clas: Vec<ClaConfig>,
    #[serde(default)]
    pub statics: Vec<StaticPeerConfig>,
    #[serde(default = "default_janitor_interval")]
    pub janitor_interval: u64,
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout: u64,
    #[serde(default = "default_announcement_interval")]
    pub announcement_interval: u64,
    #[serde(default)]
    pub disable_neighbour_discovery: bool,
    #[serde(default = "default_true")]
    pub generate_status_reports: bool,
    #[serde(default)]
    pub parallel_bundle_processing: bool,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default)]
    pub debug: bool,
}

fn default_node_id() -> String {
    "dtn://local".to_string()
}
fn default_web_port() -> u16 {
    DEFAULT_WEB_PORT
}
fn default_db() -> String {
    "mem".to_string()
}
fn default_routing() -> String {
    "epidemic".to_string()
}
fn default_janitor_interval() -> u64 {
    DEFAULT_JANITOR_INTERVAL_SECS
}
fn default_peer_timeout() -> u64 {
    DEFAULT_PEER_TIMEOUT_SECS
}
fn default_announcement_interval() -> u64 {
    DEFAULT_ANNOUNCEMENT_INTERVAL_SECS
}
fn default_workdir() -> String {
    ".".to_string()
}
fn default_true() -> bool {
    true
}

impl NodeConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("DTN_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        let mut builder = config::Config::builder();
        if Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::from(Path::new(&config_path)));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("DTN").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn node_eid(&self) -> EndpointId {
        EndpointId::from(&self.node_id)
    }

    #[cfg(test)]
    pub fn for_tests(node_id: EndpointId) -> Self {
        NodeConfig {
            node_id: node_id.description(),
            web_port: default_web_port(),
            db: "mem".to_string(),
            db_path: None,
            routing: "epidemic".to_string(),
            routing_settings: HashMap::new(),
            endpoints: Vec::new(),
            services: HashMap::new(),
            clas: Vec::new(),
            statics: Vec::new(),
            janitor_interval: default_janitor_interval(),
            peer_timeout: default_peer_timeout(),
            announcement_interval: default_announcement_interval(),
            disable_neighbour_discovery: true,
            generate_status_reports: true,
            parallel_bundle_processing: false,
            workdir: default_workdir(),
            debug: false,
        }
    }
}
