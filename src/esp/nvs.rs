//! NVS-backed settings storage

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};

use crate::config::nvs_keys;
use crate::storage::{StorageBackend, StorageNamespace};

#[derive(Clone)]
pub struct NvsStorage {
    partition: EspNvsPartition<NvsDefault>,
}

impl NvsStorage {
    pub fn new(partition: EspNvsPartition<NvsDefault>) -> Self {
        Self { partition }
    }
}

impl StorageBackend for NvsStorage {
    type Namespace = NvsNamespace;

    fn open(&self, namespace: &str) -> anyhow::Result<NvsNamespace> {
        Ok(NvsNamespace(EspNvs::new(self.partition.clone(), namespace, true)?))
    }
}

pub struct NvsNamespace(EspNvs<NvsDefault>);

impl StorageNamespace for NvsNamespace {
    fn get_i32(&self, key: &str) -> anyhow::Result<Option<i32>> {
        Ok(self.0.get_i32(key)?)
    }

    fn get_str(&self, key: &str, max_len: usize) -> anyhow::Result<Option<String>> {
        // One extra byte for the terminator; a longer value fails with INVALID_LENGTH.
        let mut buf = vec![0u8; max_len + 1];
        Ok(self.0.get_str(key, &mut buf)?.map(str::to_string))
    }

    fn set_i32(&mut self, key: &str, value: i32) -> anyhow::Result<()> {
        self.0.set_i32(key, value)?;
        Ok(())
    }

    fn set_str(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.0.set_str(key, value)?;
        Ok(())
    }

    fn erase_all(&mut self) -> anyhow::Result<()> {
        for key in nvs_keys::ALL {
            self.0.remove(key)?;
        }
        Ok(())
    }

    // EspNvs commits after every write.
    fn commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
