pub mod factory;
pub mod plugin;
pub mod router;

pub use factory::{FactoryOptions, PluginFactory};
pub use plugin::Plugin;
pub use router::NotificationRouter;
