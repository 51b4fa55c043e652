//! Open-addressed, tombstone-aware hash table.
//!
//! Keyed by [`GcRef`] (an interned string's handle) so that probing never
//! needs to touch the heap to hash a key that's already on the table — the
//! hash is threaded in by the caller (who gets it once, cheaply, from the
//! [`crate::object::ObjString`] being looked up). Used for the VM's
//! globals environment; [`crate::interner::Interner`] implements the
//! same probe/tombstone algorithm one level lower, directly over string
//! content, for the one case (deduplicating on first sight of a string)
//! that must compare bytes rather than `GcRef` identity.

use crate::object::GcRef;
use crate::value::Value;

const MAX_LOAD_FACTOR: f64 = 0.75;

#[derive(Clone)]
enum Slot {
    Empty,
    Tombstone,
    Occupied { key: GcRef, hash: u32, value: Value },
}

/// A hash table from interned-string keys to [`Value`]s.
#[derive(Clone)]
pub struct Table {
    entries: Vec<Slot>,
    /// Live entries plus tombstones — what capacity planning is based on.
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|s| matches!(s, Slot::Occupied { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Probe starting at `hash & (cap - 1)`, linear probing with wraparound.
    /// Returns the index of the matching occupied slot, or the first
    /// empty/tombstone slot seen (preferring the first tombstone, per
    /// spec, so reinsertion reuses it).
    fn find_slot(&self, key: GcRef, hash: u32) -> usize {
        let cap = self.capacity();
        let mut index = (hash as usize) & (cap - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            match &self.entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied { key: k, .. } if *k == key => return index,
                Slot::Occupied { .. } => {}
            }
            index = (index + 1) & (cap - 1);
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let old_entries = std::mem::replace(&mut self.entries, vec![Slot::Empty; new_capacity]);
        self.count = 0;
        for slot in old_entries {
            if let Slot::Occupied { key, hash, value } = slot {
                self.insert(key, hash, value);
            }
        }
    }

    fn ensure_capacity(&mut self) {
        if self.capacity() == 0 {
            self.grow(8);
        } else if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow(self.capacity() * 2);
        }
    }

    /// Insert or overwrite. Returns `true` if this created a brand-new
    /// entry (key not previously present, including over a tombstone).
    pub fn insert(&mut self, key: GcRef, hash: u32, value: Value) -> bool {
        self.ensure_capacity();
        let index = self.find_slot(key, hash);
        let is_new = !matches!(self.entries[index], Slot::Occupied { .. });
        if is_new && matches!(self.entries[index], Slot::Empty) {
            self.count += 1;
        }
        self.entries[index] = Slot::Occupied { key, hash, value };
        is_new
    }

    pub fn get(&self, key: GcRef, hash: u32) -> Option<Value> {
        if self.capacity() == 0 {
            return None;
        }
        let index = self.find_slot(key, hash);
        match &self.entries[index] {
            Slot::Occupied { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn contains(&self, key: GcRef, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    /// Delete by inserting a tombstone. Tombstones preserve probe chains
    /// for keys that hashed into the same bucket before the deleted key.
    pub fn delete(&mut self, key: GcRef, hash: u32) -> bool {
        if self.capacity() == 0 {
            return false;
        }
        let index = self.find_slot(key, hash);
        if matches!(self.entries[index], Slot::Occupied { .. }) {
            self.entries[index] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    /// Iterate live `(key, value)` pairs, e.g. for GC root marking.
    pub fn iter(&self) -> impl Iterator<Item = (GcRef, Value)> + '_ {
        self.entries.iter().filter_map(|s| match s {
            Slot::Occupied { key, value, .. } => Some((*key, *value)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> GcRef {
        // GcRef's inner field is crate-visible; tests just need distinct,
        // comparable handles without allocating through a Heap.
        GcRef(n)
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let mut t = Table::new();
        assert!(t.insert(key(1), 1, Value::Int(10)));
        assert!(!t.insert(key(1), 1, Value::Int(20)));
        assert_eq!(t.get(key(1), 1), Some(Value::Int(20)));
        assert!(t.delete(key(1), 1));
        assert_eq!(t.get(key(1), 1), None);
    }

    #[test]
    fn tombstones_preserve_probe_chain() {
        let mut t = Table::new();
        // Force two keys into the same bucket by sharing a hash.
        t.insert(key(1), 0, Value::Int(1));
        t.insert(key(2), 0, Value::Int(2));
        assert!(t.delete(key(1), 0));
        // key(2) must still be reachable even though key(1)'s slot (which
        // key(2) probed past) is now a tombstone, not empty.
        assert_eq!(t.get(key(2), 0), Some(Value::Int(2)));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut t = Table::new();
        for i in 0..100 {
            t.insert(key(i), i, Value::Int(i as i64));
        }
        assert_eq!(t.len(), 100);
        for i in 0..100 {
            assert_eq!(t.get(key(i), i), Some(Value::Int(i as i64)));
        }
    }
}
