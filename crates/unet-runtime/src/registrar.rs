//! Metadata registrar: pushes a module's class descriptors to the native side

use crate::bridge::Core;
use crate::config::RefreshPolicy;
use crate::error::{Result, UnetError};
use crate::fault;
use crate::module::ModuleInstance;
use std::sync::Arc;
use tracing::{debug, info};
use unet_interop::ClassDescriptor;

/// Registers class descriptors through the native bridge
#[derive(Debug, Clone)]
pub struct MetadataRegistrar {
    core: Arc<Core>,
    policy: RefreshPolicy,
}

impl MetadataRegistrar {
    /// Create a registrar over `core`
    pub fn new(core: Arc<Core>, policy: RefreshPolicy) -> Self {
        Self { core, policy }
    }

    /// Refresh policy in effect
    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Validate the module and collect its descriptors in provider order
    fn descriptors(&self, module: &ModuleInstance) -> Result<Vec<ClassDescriptor>> {
        self.core.bridge()?;

        let arena = module
            .entry()
            .ok_or_else(|| UnetError::not_a_plugin(module.name()))?;
        let provider = arena
            .module()
            .metadata_provider()
            .ok_or_else(|| UnetError::not_a_plugin(module.name()))?;

        fault::guard("metadata provider", || provider.class_descriptors())
    }

    /// Register every class descriptor the module's provider yields, in order
    ///
    /// Returns the number of descriptors registered.
    pub fn register_all(&self, module: &ModuleInstance) -> Result<usize> {
        let descriptors = self.descriptors(module)?;

        for descriptor in &descriptors {
            self.core.register_class(*descriptor)?;
        }

        info!(
            module = %module.name(),
            classes = descriptors.len(),
            "Plugin classes registered"
        );
        Ok(descriptors.len())
    }

    /// Bring the native side up to date after a module reload
    ///
    /// Always revalidates. Under [`RefreshPolicy::Reregister`] the possibly
    /// changed descriptor set is registered again; returns how many
    /// descriptors were pushed.
    pub fn refresh(&self, module: &ModuleInstance) -> Result<usize> {
        match self.policy {
            RefreshPolicy::Reregister => self.register_all(module),
            RefreshPolicy::Revalidate => {
                self.descriptors(module)?;
                debug!(module = %module.name(), "Plugin revalidated after reload");
                Ok(0)
            }
        }
    }
}
