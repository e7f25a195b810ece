pub mod pg_repository;
pub mod repositories;

pub use pg_repository::PgTargetStore;
pub use repositories::TargetStore;
