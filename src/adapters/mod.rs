pub mod traits;
pub mod registry;
pub mod explorer;
pub mod prober;

pub use registry::ProviderRegistry;
