//! Rebind session lifecycle
//!
//! Slot 0 filters the default adapter, slot 1 the rebind adapter. Both are
//! started together or not at all.

use super::binding::{AdapterBinding, RebindConfig, Role};
use super::rebind::RebindEngine;
use crate::capture::{CaptureEngine, FrameHandler};
use crate::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

pub struct Session {
    capture: Arc<dyn CaptureEngine>,
    config: Arc<RebindConfig>,
    active: Mutex<bool>,
}

impl Session {
    /// Register `engine` as the capture handler for a new, inactive session
    pub fn new(capture: Arc<dyn CaptureEngine>, engine: Arc<RebindEngine>) -> Self {
        let config = Arc::clone(engine.config());
        let handler: Arc<dyn FrameHandler> = engine;
        capture.register(handler);

        Self {
            capture,
            config,
            active: Mutex::new(false),
        }
    }

    fn start_slot(&self, binding: &AdapterBinding) -> Result<()> {
        if self.capture.start(binding.handle, binding.role.slot()) {
            Ok(())
        } else {
            Err(Error::ActivationFailed {
                role: binding.role.to_string(),
                name: binding.interface_name.clone(),
            })
        }
    }

    /// Start filtering both adapters. On failure nothing stays active.
    pub fn start(&self) -> Result<()> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if *active {
            return Ok(());
        }

        self.start_slot(self.config.binding(Role::Default))?;

        if let Err(e) = self.start_slot(self.config.binding(Role::Rebind)) {
            warn!("Rolling back default adapter filter: {}", e);
            self.capture.stop(Role::Default.slot());
            return Err(e);
        }

        *active = true;
        info!(
            "Filtering {} and {}",
            self.config.default_binding().interface_name,
            self.config.rebind_binding().interface_name
        );
        Ok(())
    }

    /// Stop both filters. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        self.capture.stop(Role::Default.slot());
        self.capture.stop(Role::Rebind.slot());

        if *active {
            info!("Filtering stopped");
        }
        *active = false;
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &Arc<RebindConfig> {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
