pub mod kv;
pub mod registry;
pub mod state;

pub use kv::{FileStore, KvStore, MemoryStore};
pub use registry::{SymbolRegistry, SyncDelta, REGISTRY_KEY};
pub use state::{SignalStateStore, StateMap};
