pub mod env;
pub mod plan;
pub mod tracing_init;

pub use env::AppConfig;
pub use plan::{SyncConfig, SyncPlan};
pub use tracing_init::init_tracing;
