//! The contract every hosted plugin satisfies.

use crate::plugin::context::PluginContext;
use crate::plugin::error::PluginResult;
use crate::plugin::state::PluginState;
use async_trait::async_trait;

/// Lifecycle contract for hosted plugins.
///
/// The registry drives instances through
/// `init → start → stop → destroy`; each of the first three reports
/// failure by returning an error, `destroy` never fails. A plugin receives
/// a fresh [`PluginContext`] on every `init` (including reinitializations
/// after a configuration change) and must not cache context references
/// beyond `stop`.
///
/// `state` is the plugin's own view of where it is; the state recorded by
/// the registry remains authoritative for lifecycle decisions.
///
/// # Examples
///
/// ```
/// use veldra_core::plugin::{Plugin, PluginContext, PluginResult, PluginState};
/// use async_trait::async_trait;
///
/// struct Echo {
///     state: PluginState,
/// }
///
/// #[async_trait]
/// impl Plugin for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn version(&self) -> &str {
///         "1.0.0"
///     }
///
///     async fn init(&mut self, context: PluginContext) -> PluginResult<()> {
///         let _greeting = context.config_or("greeting", "hello");
///         self.state = PluginState::Initialized;
///         Ok(())
///     }
///
///     async fn start(&mut self) -> PluginResult<()> {
///         self.state = PluginState::Started;
///         Ok(())
///     }
///
///     async fn stop(&mut self) -> PluginResult<()> {
///         self.state = PluginState::Stopped;
///         Ok(())
///     }
///
///     async fn destroy(&mut self) {
///         self.state = PluginState::Unloaded;
///     }
///
///     fn state(&self) -> PluginState {
///         self.state
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin identifier.
    fn name(&self) -> &str;

    /// Plugin version string.
    fn version(&self) -> &str;

    /// Initialize the plugin with its execution context.
    async fn init(&mut self, context: PluginContext) -> PluginResult<()>;

    /// Start the plugin.
    async fn start(&mut self) -> PluginResult<()>;

    /// Stop the plugin gracefully.
    async fn stop(&mut self) -> PluginResult<()>;

    /// Destroy the plugin and release its resources.
    async fn destroy(&mut self);

    /// The plugin's own view of its lifecycle state.
    fn state(&self) -> PluginState;
}
