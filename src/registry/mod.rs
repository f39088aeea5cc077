pub mod factory;
pub mod instance;

pub use factory::FactoryRegistry;
pub use instance::{InstanceHandle, InstanceRegistry};
pub use crate::integration::Factory;
