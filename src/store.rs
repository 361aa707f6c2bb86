//! ReferenceStore: in-memory index of Subscriptions/Operations by ID and by
//! S2 cell. Grounded in
//! `original_source/datanode/src/app/scd/memory_storage.py`.
//!
//! A single `RwLock<StoreInner>` guards every field, so "one exclusive
//! writer, one consistent snapshot per request" is literal rather than
//! approximate — a per-key sharded lock cannot make a multi-entity mutation
//! (an Operation plus its bound Subscription) atomic with the fan-out query
//! that follows it. Simple single-entity operations take their own lock per
//! call; compound operations that must observe one consistent snapshot go
//! through [`ReferenceStore::transact`], which hands out a [`StoreTxn`]
//! backed by a single write guard for the whole closure.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use uuid::Uuid;

use crate::geo::{CellId, Volume4};
use crate::model::{Operation, Subscription};

#[derive(Default)]
struct CellBucket {
    subs: HashSet<Uuid>,
    ops: HashSet<Uuid>,
}

impl CellBucket {
    fn is_empty(&self) -> bool {
        self.subs.is_empty() && self.ops.is_empty()
    }
}

#[derive(Default)]
struct StoreInner {
    subscriptions: HashMap<Uuid, Subscription>,
    operations: HashMap<Uuid, Operation>,
    cells: HashMap<CellId, CellBucket>,
}

impl StoreInner {
    fn index_sub(&mut self, sub: &Subscription) {
        for cell in &sub.vol4.cells {
            self.cells.entry(*cell).or_default().subs.insert(sub.id);
        }
    }

    fn unindex_sub(&mut self, sub: &Subscription) {
        let mut to_remove = Vec::new();
        for cell in &sub.vol4.cells {
            if let Some(bucket) = self.cells.get_mut(cell) {
                bucket.subs.remove(&sub.id);
                if bucket.is_empty() {
                    to_remove.push(*cell);
                }
            }
        }
        for cell in to_remove {
            self.cells.remove(&cell);
        }
    }

    fn index_op(&mut self, op: &Operation) {
        for cell in &op.vol4.cells {
            self.cells.entry(*cell).or_default().ops.insert(op.id);
        }
    }

    fn unindex_op(&mut self, op: &Operation) {
        let mut to_remove = Vec::new();
        for cell in &op.vol4.cells {
            if let Some(bucket) = self.cells.get_mut(cell) {
                bucket.ops.remove(&op.id);
                if bucket.is_empty() {
                    to_remove.push(*cell);
                }
            }
        }
        for cell in to_remove {
            self.cells.remove(&cell);
        }
    }

    fn get_sub(&self, id: Uuid) -> Option<Subscription> {
        self.subscriptions.get(&id).cloned()
    }

    fn get_op(&self, id: Uuid) -> Option<Operation> {
        self.operations.get(&id).cloned()
    }

    fn upsert_sub(&mut self, sub: Subscription) {
        if let Some(old) = self.subscriptions.get(&sub.id).cloned() {
            self.unindex_sub(&old);
        }
        self.index_sub(&sub);
        self.subscriptions.insert(sub.id, sub);
    }

    fn upsert_op(&mut self, op: Operation) {
        if let Some(old) = self.operations.get(&op.id).cloned() {
            self.unindex_op(&old);
        }
        self.index_op(&op);
        self.operations.insert(op.id, op);
    }

    fn delete_sub(&mut self, id: Uuid) -> Option<Subscription> {
        let removed = self.subscriptions.remove(&id);
        if let Some(sub) = &removed {
            self.unindex_sub(sub);
        }
        removed
    }

    fn delete_op(&mut self, id: Uuid) -> Option<Operation> {
        let removed = self.operations.remove(&id);
        if let Some(op) = &removed {
            self.unindex_op(op);
        }
        removed
    }

    /// Mirrors `find_subscriptions` in `memory_storage.py`: subscriptions
    /// whose cells intersect `vol4.cells`, whose `vol4` overlaps `vol4` on
    /// time/altitude, and (if `owner` supplied) whose owner matches.
    fn find_subs(&self, vol4: &Volume4, owner: Option<&str>) -> Vec<Subscription> {
        let mut candidate_ids = HashSet::new();
        for cell in &vol4.cells {
            if let Some(bucket) = self.cells.get(cell) {
                candidate_ids.extend(bucket.subs.iter().copied());
            }
        }
        candidate_ids
            .into_iter()
            .filter_map(|id| self.subscriptions.get(&id))
            .filter(|s| owner.map_or(true, |o| s.owner == o))
            .filter(|s| vol4.overlaps_time_altitude(&s.vol4))
            .cloned()
            .collect()
    }

    fn find_ops(&self, vol4: &Volume4) -> Vec<Operation> {
        let mut candidate_ids = HashSet::new();
        for cell in &vol4.cells {
            if let Some(bucket) = self.cells.get(cell) {
                candidate_ids.extend(bucket.ops.iter().copied());
            }
        }
        candidate_ids
            .into_iter()
            .filter_map(|id| self.operations.get(&id))
            .filter(|o| vol4.overlaps_time_altitude(&o.vol4))
            .cloned()
            .collect()
    }
}

/// A view into the store backed by a single write guard, handed to the
/// closure passed to [`ReferenceStore::transact`]. All reads and writes
/// through it observe and mutate one consistent snapshot.
pub struct StoreTxn<'a> {
    inner: &'a mut StoreInner,
}

impl<'a> StoreTxn<'a> {
    pub fn get_sub(&self, id: Uuid) -> Option<Subscription> {
        self.inner.get_sub(id)
    }

    pub fn get_op(&self, id: Uuid) -> Option<Operation> {
        self.inner.get_op(id)
    }

    pub fn upsert_sub(&mut self, sub: Subscription) {
        self.inner.upsert_sub(sub)
    }

    pub fn upsert_op(&mut self, op: Operation) {
        self.inner.upsert_op(op)
    }

    pub fn delete_sub(&mut self, id: Uuid) -> Option<Subscription> {
        self.inner.delete_sub(id)
    }

    pub fn delete_op(&mut self, id: Uuid) -> Option<Operation> {
        self.inner.delete_op(id)
    }

    pub fn find_subs(&self, vol4: &Volume4, owner: Option<&str>) -> Vec<Subscription> {
        self.inner.find_subs(vol4, owner)
    }

    pub fn find_ops(&self, vol4: &Volume4) -> Vec<Operation> {
        self.inner.find_ops(vol4)
    }
}

#[derive(Default)]
pub struct ReferenceStore {
    inner: RwLock<StoreInner>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_sub(&self, id: Uuid) -> Option<Subscription> {
        self.inner.read().unwrap().get_sub(id)
    }

    pub fn get_op(&self, id: Uuid) -> Option<Operation> {
        self.inner.read().unwrap().get_op(id)
    }

    pub fn upsert_sub(&self, sub: Subscription) {
        self.inner.write().unwrap().upsert_sub(sub)
    }

    pub fn upsert_op(&self, op: Operation) {
        self.inner.write().unwrap().upsert_op(op)
    }

    pub fn delete_sub(&self, id: Uuid) -> Option<Subscription> {
        self.inner.write().unwrap().delete_sub(id)
    }

    pub fn delete_op(&self, id: Uuid) -> Option<Operation> {
        self.inner.write().unwrap().delete_op(id)
    }

    pub fn find_subs(&self, vol4: &Volume4, owner: Option<&str>) -> Vec<Subscription> {
        self.inner.read().unwrap().find_subs(vol4, owner)
    }

    pub fn find_ops(&self, vol4: &Volume4) -> Vec<Operation> {
        self.inner.read().unwrap().find_ops(vol4)
    }

    /// Runs `f` against a single write guard held for its entire duration —
    /// the mechanism behind every compound mutation in `OperationService`
    /// (Operation + bound Subscription, then the post-mutation fan-out
    /// query, all as one critical section). `f` must not block or perform
    /// I/O: no `.await` point may occur while the guard is held.
    pub fn transact<T>(&self, f: impl FnOnce(&mut StoreTxn) -> T) -> T {
        let mut guard = self.inner.write().unwrap();
        let mut txn = StoreTxn { inner: &mut guard };
        f(&mut txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as HSet;

    fn cell(n: u64) -> CellId {
        CellId(n)
    }

    fn sub(id: Uuid, owner: &str, cells: &[u64]) -> Subscription {
        Subscription {
            id,
            owner: owner.to_string(),
            version: 1,
            notification_index: 0,
            vol4: Volume4::unbounded(cells.iter().map(|&n| cell(n)).collect::<HSet<_>>()),
            uss_base_url: "https://uss.example/utm".into(),
            notify_for_operations: true,
            notify_for_constraints: false,
            implicit: false,
            dependent_operations: HSet::new(),
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = ReferenceStore::new();
        let id = Uuid::new_v4();
        store.upsert_sub(sub(id, "uss1", &[1, 2, 3]));
        let fetched = store.get_sub(id).unwrap();
        assert_eq!(fetched.owner, "uss1");
    }

    #[test]
    fn find_subs_matches_by_cell_and_owner() {
        let store = ReferenceStore::new();
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        store.upsert_sub(sub(id_a, "uss1", &[1, 2]));
        store.upsert_sub(sub(id_b, "uss2", &[2, 3]));

        let query = Volume4::unbounded([cell(2)].into_iter().collect());
        let all = store.find_subs(&query, None);
        assert_eq!(all.len(), 2);

        let only_uss1 = store.find_subs(&query, Some("uss1"));
        assert_eq!(only_uss1.len(), 1);
        assert_eq!(only_uss1[0].id, id_a);
    }

    #[test]
    fn delete_removes_from_every_bucket_and_evicts_empty_ones() {
        let store = ReferenceStore::new();
        let id = Uuid::new_v4();
        store.upsert_sub(sub(id, "uss1", &[10, 11]));
        store.delete_sub(id);
        assert!(store.get_sub(id).is_none());

        let query = Volume4::unbounded([cell(10), cell(11)].into_iter().collect());
        assert!(store.find_subs(&query, None).is_empty());
    }

    #[test]
    fn upsert_replacing_moves_cell_membership() {
        let store = ReferenceStore::new();
        let id = Uuid::new_v4();
        store.upsert_sub(sub(id, "uss1", &[1]));
        store.upsert_sub(sub(id, "uss1", &[2]));

        let old_query = Volume4::unbounded([cell(1)].into_iter().collect());
        assert!(store.find_subs(&old_query, None).is_empty());

        let new_query = Volume4::unbounded([cell(2)].into_iter().collect());
        assert_eq!(store.find_subs(&new_query, None).len(), 1);
    }

    #[test]
    fn transact_runs_compound_mutation_under_one_guard() {
        let store = ReferenceStore::new();
        let sub_id = Uuid::new_v4();
        store.transact(|tx| {
            tx.upsert_sub(sub(sub_id, "uss1", &[5]));
            assert!(tx.get_sub(sub_id).is_some());
        });
        assert!(store.get_sub(sub_id).is_some());
    }
}
