//! Deal record storage.
//!
//! The store is the only shared mutable state in the system. Writers never
//! read-modify-write it without a version check: every update goes through
//! [`DealStore::cas_write`], which only lands if the stored record still has
//! the version the writer started from.
use super::deal::{Deal, DealId};
use super::error::StoreError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const DEALS_TREE: &str = "deals";

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Written,
    VersionConflict { actual: u64 },
    Missing,
}

pub trait DealStore: Send + Sync {
    fn get(&self, id: &DealId) -> Result<Option<Deal>, StoreError>;

    /// Insert a brand new record; fails if the id is taken.
    fn insert_new(&self, deal: &Deal) -> Result<(), StoreError>;

    /// Replace the record for `id` with `deal` only if the stored version is
    /// still `expected_version`.
    fn cas_write(
        &self,
        id: &DealId,
        expected_version: u64,
        deal: &Deal,
    ) -> Result<CasOutcome, StoreError>;

    fn scan(&self) -> Result<Vec<Deal>, StoreError>;
}

/// sled backed store. Records are CBOR encoded and keyed by deal id in the
/// `deals` tree.
#[derive(Clone)]
pub struct SledDealStore {
    tree: sled::Tree,
}

impl SledDealStore {
    pub fn new(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree(DEALS_TREE)?,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::new(&db)
    }
}

impl DealStore for SledDealStore {
    fn get(&self, id: &DealId) -> Result<Option<Deal>, StoreError> {
        match self.tree.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_new(&self, deal: &Deal) -> Result<(), StoreError> {
        let cbor = minicbor::to_vec(deal)?;
        let swapped =
            self.tree
                .compare_and_swap(deal.id.as_str().as_bytes(), None::<&[u8]>, Some(cbor))?;

        match swapped {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::AlreadyExists(deal.id.clone())),
        }
    }

    fn cas_write(
        &self,
        id: &DealId,
        expected_version: u64,
        deal: &Deal,
    ) -> Result<CasOutcome, StoreError> {
        let key = id.as_str().as_bytes();
        let Some(current) = self.tree.get(key)? else {
            return Ok(CasOutcome::Missing);
        };
        let stored: Deal = minicbor::decode(&current)?;
        if stored.version != expected_version {
            return Ok(CasOutcome::VersionConflict {
                actual: stored.version,
            });
        }

        // the swap is conditioned on the exact bytes we checked, so a writer
        // that got in between makes it fail rather than being overwritten
        let cbor = minicbor::to_vec(deal)?;
        match self.tree.compare_and_swap(key, Some(&current), Some(cbor))? {
            Ok(()) => Ok(CasOutcome::Written),
            Err(lost) => {
                debug!(deal_id = %id, expected_version, "lost compare-and-swap race");
                match lost.current {
                    Some(bytes) => {
                        let winner: Deal = minicbor::decode(&bytes)?;
                        Ok(CasOutcome::VersionConflict {
                            actual: winner.version,
                        })
                    }
                    None => Ok(CasOutcome::Missing),
                }
            }
        }
    }

    fn scan(&self) -> Result<Vec<Deal>, StoreError> {
        self.tree
            .iter()
            .values()
            .map(|value| -> Result<Deal, StoreError> {
                let bytes = value?;
                Ok(minicbor::decode(&bytes)?)
            })
            .collect()
    }
}

/// In-process store guarded by a mutex.
#[derive(Debug, Default)]
pub struct MemoryDealStore {
    deals: Mutex<HashMap<DealId, Deal>>,
}

impl MemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DealStore for MemoryDealStore {
    fn get(&self, id: &DealId) -> Result<Option<Deal>, StoreError> {
        let deals = self.deals.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(deals.get(id).cloned())
    }

    fn insert_new(&self, deal: &Deal) -> Result<(), StoreError> {
        let mut deals = self.deals.lock().map_err(|_| StoreError::Poisoned)?;
        if deals.contains_key(&deal.id) {
            return Err(StoreError::AlreadyExists(deal.id.clone()));
        }
        deals.insert(deal.id.clone(), deal.clone());
        Ok(())
    }

    fn cas_write(
        &self,
        id: &DealId,
        expected_version: u64,
        deal: &Deal,
    ) -> Result<CasOutcome, StoreError> {
        let mut deals = self.deals.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(stored) = deals.get_mut(id) else {
            return Ok(CasOutcome::Missing);
        };
        if stored.version != expected_version {
            return Ok(CasOutcome::VersionConflict {
                actual: stored.version,
            });
        }
        *stored = deal.clone();
        Ok(CasOutcome::Written)
    }

    fn scan(&self) -> Result<Vec<Deal>, StoreError> {
        let deals = self.deals.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(deals.values().cloned().collect())
    }
}
