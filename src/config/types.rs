//! Configuration types

use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Destination used to pick the default adapter when none is named
pub const DEFAULT_PROBE: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);

/// User-defined configuration (rebind.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rebind: RebindSection,
    #[serde(default)]
    pub capture_log: CaptureLogConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebindSection {
    /// Substring of the target process name
    #[serde(default)]
    pub application: String,
    /// Host adapter the application's traffic is moved to
    #[serde(default)]
    pub adapter: String,
    /// Host adapter the traffic normally leaves through; the best route to
    /// `probe` when unset
    #[serde(default)]
    pub default_adapter: Option<String>,
    #[serde(default = "default_probe")]
    pub probe: Ipv4Addr,
}

impl Default for RebindSection {
    fn default() -> Self {
        Self {
            application: String::new(),
            adapter: String::new(),
            default_adapter: None,
            probe: DEFAULT_PROBE,
        }
    }
}

fn default_probe() -> Ipv4Addr {
    DEFAULT_PROBE
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureLogConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_capture_path")]
    pub path: PathBuf,
}

impl Default for CaptureLogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: default_capture_path(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_capture_path() -> PathBuf {
    PathBuf::from("capture.pcap")
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub application: Option<String>,
    pub adapter: Option<String>,
    pub default_adapter: Option<String>,
}

impl Config {
    /// Apply command-line overrides in place
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(application) = overrides.application {
            self.rebind.application = application;
        }
        if let Some(adapter) = overrides.adapter {
            self.rebind.adapter = adapter;
        }
        if let Some(default_adapter) = overrides.default_adapter {
            self.rebind.default_adapter = Some(default_adapter);
        }
    }
}
