/// Plugin host: creates bridged destination instances
use crate::bridge::plugin_ref::PluginRef;
use crate::bridge::BridgeError;
use crate::handle::ConfigHandle;
use crate::loader::{ClassLoader, PluginDescriptor};
use crate::message::MessageSource;
use crate::options::{OptionResolver, Options};
use crate::plugin::DestinationContext;
use std::sync::Arc;
use strum_macros::{Display, EnumString, VariantNames};

/// Whether `deinit` reaches a plugin whose `init` failed.
///
/// Either way the instance ends up deinitialized and receives nothing else.
#[derive(EnumString, VariantNames, Display, Debug, Clone, Copy, Default, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum DeinitPolicy {
    /// Only instances whose `init` returned `true` get `deinit`.
    #[default]
    OnlyAfterInit,
    /// Every instance that went through `init` gets `deinit`, so plugins can
    /// release what they acquired before failing.
    Always,
}

/// Creates destination instances for the host.
pub struct PluginHost {
    loader: ClassLoader,
    options: Arc<dyn OptionResolver>,
    messages: Arc<dyn MessageSource>,
    deinit_policy: DeinitPolicy,
}

impl PluginHost {
    pub fn new(
        loader: ClassLoader,
        options: Arc<dyn OptionResolver>,
        messages: Arc<dyn MessageSource>,
    ) -> Self {
        Self {
            loader,
            options,
            messages,
            deinit_policy: DeinitPolicy::default(),
        }
    }

    pub fn with_deinit_policy(mut self, policy: DeinitPolicy) -> Self {
        self.deinit_policy = policy;
        self
    }

    pub fn loader(&self) -> &ClassLoader {
        &self.loader
    }

    pub fn deinit_policy(&self) -> DeinitPolicy {
        self.deinit_policy
    }

    /// Resolve the descriptor's class and construct an instance bound to `handle`.
    ///
    /// The instance starts unconfigured; the host issues `init` next.
    pub fn create(
        &self,
        handle: ConfigHandle,
        descriptor: &PluginDescriptor,
    ) -> Result<PluginRef, BridgeError> {
        let class = self
            .loader
            .load(descriptor)
            .inspect_err(|e| log::error!("Failed to resolve {descriptor}: {e}"))?;

        let ctx = DestinationContext::new(class.name(), Options::new(self.options.clone(), handle));
        let instance = class.instantiate(ctx).map_err(|detail| {
            log::error!("Constructor of {} panicked: {detail}", class.id());
            BridgeError::Fault {
                class: class.name().to_string(),
                detail,
            }
        })?;

        log::info!("Created destination {} bound to {handle}", class.id());
        Ok(PluginRef::new(
            instance,
            class,
            self.messages.clone(),
            self.deinit_policy,
        ))
    }

    /// [`create`](Self::create) with the descriptor given as its two parts.
    pub fn create_from(
        &self,
        handle: ConfigHandle,
        path_list: &str,
        class_name: &str,
    ) -> Result<PluginRef, BridgeError> {
        self.create(handle, &PluginDescriptor::new(path_list, class_name))
    }
}
