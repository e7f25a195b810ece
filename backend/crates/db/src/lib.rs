pub mod rows;
pub mod sql;
pub mod store;

pub use store::{PgTargetStore, TargetStore};
