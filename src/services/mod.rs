pub mod delivery;
pub mod engine;
pub mod integrity;
pub mod locks;
pub mod metadata;
pub mod path_policy;
pub mod repository;
pub mod selector;
pub mod sqlite_repository;

pub use delivery::Delivery;
pub use engine::Engine;
pub use integrity::{IntegrityCheck, SizeCheck};
pub use locks::KeyedLocks;
pub use repository::{FileRepository, MemoryRepository};
pub use sqlite_repository::SqliteRepository;
