// ── Plugins ──
//
// Named extensions mounted on a bound widget. Each host owns its own
// registry; nothing here is process-wide.

use std::collections::HashMap;
use std::sync::Arc;

use msi_api::channel::Channel;
use tracing::debug;

use crate::controls::RemoteControls;
use crate::error::CoreError;

/// What a plugin gets to work with once the widget is bound.
#[derive(Clone)]
pub struct PluginContext {
    pub channel: Arc<dyn Channel>,
    pub controls: Arc<RemoteControls>,
}

pub type PluginFactory = Arc<dyn Fn(&PluginContext) -> Result<(), CoreError> + Send + Sync>;

#[derive(Default, Clone)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any earlier one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&PluginContext) -> Result<(), CoreError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Run each selected factory once, in order. Every name is checked
    /// before any factory runs.
    pub fn mount(&self, selected: &[String], ctx: &PluginContext) -> Result<(), CoreError> {
        let factories = selected
            .iter()
            .map(|name| {
                self.factories
                    .get(name)
                    .map(|f| (name, Arc::clone(f)))
                    .ok_or_else(|| CoreError::PluginNotFound { name: name.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (name, factory) in factories {
            debug!(plugin = %name, "mounting plugin");
            factory(ctx)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("PluginRegistry").field("plugins", &names).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use msi_api::MessageChannel;
    use secrecy::SecretString;
    use std::sync::Mutex;
    use std::time::Duration;

    fn context() -> PluginContext {
        let (host, _widget) = MessageChannel::pair();
        let channel: Arc<dyn Channel> = host;
        PluginContext {
            controls: Arc::new(RemoteControls::new(
                Arc::clone(&channel),
                Duration::from_secs(12),
                SecretString::from("tok".to_owned()),
            )),
            channel,
        }
    }

    #[tokio::test]
    async fn mounts_selected_plugins_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        for name in ["traffic", "heatmap", "unused"] {
            let calls = Arc::clone(&calls);
            registry.register(name, move |_| {
                calls.lock().unwrap().push(name);
                Ok(())
            });
        }

        registry
            .mount(&["heatmap".into(), "traffic".into()], &context())
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["heatmap", "traffic"]);
    }

    #[tokio::test]
    async fn unknown_plugin_fails_before_any_mount() {
        let calls = Arc::new(Mutex::new(0));
        let mut registry = PluginRegistry::new();
        {
            let calls = Arc::clone(&calls);
            registry.register("traffic", move |_| {
                *calls.lock().unwrap() += 1;
                Ok(())
            });
        }

        let err = registry
            .mount(&["traffic".into(), "ghost".into()], &context())
            .unwrap_err();
        assert!(matches!(err, CoreError::PluginNotFound { ref name } if name == "ghost"));
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
