pub mod schema;
pub mod catalog;
pub mod context;
pub mod monitor;
pub mod registry;
pub mod admission;
pub mod selector;

pub use schema::*;
pub use catalog::*;
pub use context::*;
pub use monitor::*;
pub use registry::{ProviderView, Registry, RegistryError, RegistrySettings, RegistryView};
pub use admission::*;
pub use selector::*;
