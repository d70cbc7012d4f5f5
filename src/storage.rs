//! Key/value storage behind the settings store
//!
//! On the device a namespace is an NVS handle. Test builds add `MemoryStorage`,
//! which keeps the same semantics: writes are staged on the open namespace and only
//! become visible to other handles after a successful `commit`.

/// Opens namespaces of a key/value store
pub trait StorageBackend {
    type Namespace: StorageNamespace;

    fn open(&self, namespace: &str) -> anyhow::Result<Self::Namespace>;
}

/// An open, writable namespace
pub trait StorageNamespace {
    fn get_i32(&self, key: &str) -> anyhow::Result<Option<i32>>;

    /// Read a string of at most `max_len` bytes. A longer stored value is an error.
    fn get_str(&self, key: &str, max_len: usize) -> anyhow::Result<Option<String>>;

    fn set_i32(&mut self, key: &str, value: i32) -> anyhow::Result<()>;

    fn set_str(&mut self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Remove every key in the namespace (takes effect on commit)
    fn erase_all(&mut self) -> anyhow::Result<()>;

    fn commit(&mut self) -> anyhow::Result<()>;
}

#[cfg(test)]
pub use memory::{MemoryStorage, StorageFaults, StoredValue};
