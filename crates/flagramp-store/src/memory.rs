//! In-memory store backend — non-durable, single-process.

use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{StateStore, StoreResult};

/// Trivial backend holding the document in a mutex.
#[derive(Debug, Default)]
pub struct MemoryStore<T> {
    slot: Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> StateStore<T> for MemoryStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send,
{
    fn read(&self) -> StoreResult<Option<T>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.clone())
    }

    fn write(&self, value: &T) -> StoreResult<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(value.clone());
        Ok(())
    }

    fn update(&self, apply: &mut dyn FnMut(Option<T>) -> Option<T>) -> StoreResult<bool> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match apply(slot.clone()) {
            Some(next) => {
                *slot = Some(next);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&self) -> StoreResult<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        Ok(())
    }
}
