//! Global deduplicating set of string objects.
//!
//! Shares the open-addressed, tombstone-aware probing algorithm with
//! [`crate::table::Table`], but probes by *content* — hash, then length,
//! then bytes — rather than by `GcRef` identity, since the whole point is
//! to find an existing string before a new heap object for the same
//! content is ever allocated.

use crate::heap::{GcRef, Heap};
use crate::object::{fnv1a, HeapObject, ObjString};

const MAX_LOAD_FACTOR: f64 = 0.75;

#[derive(Clone, Copy)]
enum Slot {
    Empty,
    Tombstone,
    Occupied { key: GcRef, hash: u32 },
}

/// Interns strings so that two content-equal strings share one heap
/// object. Holds *weak* references: `clean` must run between the GC's
/// mark phase and its sweep phase, or sweep would free a string this
/// table still points at.
#[derive(Default)]
pub struct Interner {
    entries: Vec<Slot>,
    count: usize,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_slot(&self, heap: &Heap, hash: u32, text: &str) -> usize {
        let cap = self.capacity();
        let mut index = (hash as usize) & (cap - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            match self.entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied { key, hash: h } => {
                    if h == hash {
                        if let HeapObject::String(s) = heap.resolve(key) {
                            if s.value == text {
                                return index;
                            }
                        }
                    }
                }
            }
            index = (index + 1) & (cap - 1);
        }
    }

    fn grow(&mut self, heap: &Heap, new_capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Slot::Empty; new_capacity]);
        self.count = 0;
        for slot in old {
            if let Slot::Occupied { key, hash } = slot {
                let index = self.find_slot(heap, hash, &string_value(heap, key));
                self.entries[index] = Slot::Occupied { key, hash };
                self.count += 1;
            }
        }
    }

    fn ensure_capacity(&mut self, heap: &Heap) {
        if self.capacity() == 0 {
            self.grow(heap, 8);
        } else if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow(heap, self.capacity() * 2);
        }
    }

    /// Return the interned handle for `text`, allocating a new `ObjString`
    /// only if no content-equal string already exists.
    pub fn intern(&mut self, heap: &mut Heap, text: &str) -> GcRef {
        let hash = fnv1a(text.as_bytes());
        if self.capacity() > 0 {
            let index = self.find_slot(heap, hash, text);
            if let Slot::Occupied { key, .. } = self.entries[index] {
                return key;
            }
        }
        let key = heap.allocate(HeapObject::String(ObjString {
            value: text.to_string(),
            hash,
        }));
        self.ensure_capacity(heap);
        let index = self.find_slot(heap, hash, text);
        if !matches!(self.entries[index], Slot::Occupied { .. }) {
            self.count += 1;
        }
        self.entries[index] = Slot::Occupied { key, hash };
        key
    }

    /// Remove entries whose key the sweep phase is about to free. Must run
    /// after marking, before sweeping.
    pub fn clean_unmarked(&mut self, heap: &Heap) {
        for slot in &mut self.entries {
            if let Slot::Occupied { key, .. } = slot {
                if !heap.is_marked(*key) {
                    *slot = Slot::Tombstone;
                }
            }
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
}

fn string_value(heap: &Heap, key: GcRef) -> String {
    match heap.resolve(key) {
        HeapObject::String(s) => s.value.clone(),
        _ => unreachable!("interner key is never anything but a string"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates_identical_content() {
        let mut heap = Heap::new(1024, 2);
        let mut interner = Interner::new();
        let a = interner.intern(&mut heap, "hello");
        let b = interner.intern(&mut heap, "hello");
        assert_eq!(a, b);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn distinct_content_gets_distinct_refs() {
        let mut heap = Heap::new(1024, 2);
        let mut interner = Interner::new();
        let a = interner.intern(&mut heap, "hello");
        let b = interner.intern(&mut heap, "world");
        assert_ne!(a, b);
    }

    #[test]
    fn clean_unmarked_drops_dead_entries() {
        let mut heap = Heap::new(1024, 2);
        let mut interner = Interner::new();
        let live = interner.intern(&mut heap, "live");
        let _dead = interner.intern(&mut heap, "dead");
        heap.mark(live);
        heap.trace();
        interner.clean_unmarked(&heap);
        heap.sweep();
        assert_eq!(interner.len(), 1);
        // Re-interning the same content after its entry was cleaned
        // allocates a fresh object rather than dereferencing the dangling
        // handle.
        let reinterned = interner.intern(&mut heap, "dead");
        assert_ne!(reinterned, live);
    }
}
