//! Configuration validation

use super::Config;
use crate::telemetry::{LOG_FORMATS, LOG_LEVELS};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_rebind(config, &mut result);
    validate_capture_log(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_rebind(config: &Config, result: &mut ValidationResult) {
    let rebind = &config.rebind;

    if rebind.application.trim().is_empty() {
        result.error("rebind.application: target application name is required");
    }

    if rebind.adapter.trim().is_empty() {
        result.error("rebind.adapter: rebind adapter name is required");
    }

    if let Some(default_adapter) = &rebind.default_adapter {
        if default_adapter.trim().is_empty() {
            result.error("rebind.default_adapter: adapter name is empty");
        } else if *default_adapter == rebind.adapter {
            result.error(format!(
                "rebind.default_adapter: '{}' is also the rebind adapter",
                default_adapter
            ));
        }
    }

    let probe = rebind.probe;
    if probe.is_unspecified() || probe.is_broadcast() || probe.is_multicast() {
        result.error(format!(
            "rebind.probe: {} is not a unicast destination",
            probe
        ));
    } else if probe.is_loopback() || probe.is_private() || probe.is_link_local() {
        result.warn(format!(
            "rebind.probe: {} is not a public address, default adapter selection may pick a local route",
            probe
        ));
    }
}

fn validate_capture_log(config: &Config, result: &mut ValidationResult) {
    let log = &config.capture_log;
    if !log.enabled {
        return;
    }

    if log.path.as_os_str().is_empty() {
        result.error("capture_log.path: path is empty");
    } else if log.path.extension().map_or(true, |ext| ext != "pcap") {
        result.warn(format!(
            "capture_log.path: '{}' does not end in .pcap",
            log.path.display()
        ));
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    let logging = &config.logging;

    if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            logging.level
        ));
    }

    if !LOG_FORMATS.contains(&logging.format.as_str()) {
        result.warn(format!(
            "logging.format: unknown format '{}', using pretty",
            logging.format
        ));
    }
}
