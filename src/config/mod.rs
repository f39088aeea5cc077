pub mod document;
pub mod store;
pub mod watcher;

pub use document::{IntegrationsDocument, InstanceConfig, SecretReference};
pub use store::ConfigStore;
pub use watcher::FileWatcher;
