pub mod persistence;
pub mod store;

pub use persistence::{MemoryPersistence, PersistenceError, TargetPersistence, TomlFilePersistence};
pub use store::{ConfigurationStore, StoreError};
