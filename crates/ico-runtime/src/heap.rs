//! Allocation accounting and the tri-color mark-sweep collector.
//!
//! The original intrusive "every live object threaded onto one list"
//! design is realized here as a slot arena (`Vec<Option<Slot>>`) addressed
//! by [`GcRef`]: sweeping still walks every slot and frees the unmarked
//! ones, but there is no raw self-referential pointer to get wrong. A
//! separate `gray` worklist drives tracing, exactly as the spec's tri-color
//! invariant describes: marking blackens an object's own bit and, if it
//! holds further references, pushes it onto `gray` for the trace phase to
//! drain.

pub use crate::object::GcRef;
use crate::object::{HeapObject, ObjClosure, ObjFunction, ObjUpvalue, UpvalueState};

struct Slot {
    object: HeapObject,
    marked: bool,
}

/// Owns every heap object the VM has allocated and the bookkeeping needed
/// to decide when to collect.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free_list: Vec<u32>,
    gray: Vec<GcRef>,
    /// Bytes currently live, by [`HeapObject::size_bytes`].
    pub bytes_allocated: usize,
    /// Collection runs again once `bytes_allocated` exceeds this watermark.
    pub next_gc: usize,
    /// `bytes_allocated` is multiplied by this after each collection to
    /// compute the next watermark. Default 2, per spec.
    pub growth_factor: usize,
    /// When set, every allocation collects unconditionally (GC-stress
    /// test mode) rather than only when the watermark is exceeded.
    pub stress_gc: bool,
}

impl Heap {
    pub fn new(initial_next_gc: usize, growth_factor: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: initial_next_gc,
            growth_factor,
            stress_gc: false,
        }
    }

    /// Whether the next allocation should trigger a collection.
    pub fn should_collect(&self) -> bool {
        self.stress_gc || self.bytes_allocated > self.next_gc
    }

    /// Insert a newly-created object into the arena and return its handle.
    /// Caller is responsible for calling [`Heap::should_collect`] and
    /// running a GC cycle *before* this, since collection needs roots this
    /// module does not have access to.
    pub fn allocate(&mut self, object: HeapObject) -> GcRef {
        self.bytes_allocated += object.size_bytes();
        if let Some(index) = self.free_list.pop() {
            self.slots[index as usize] = Some(Slot {
                object,
                marked: false,
            });
            GcRef(index)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(Slot {
                object,
                marked: false,
            }));
            GcRef(index)
        }
    }

    pub fn resolve(&self, r: GcRef) -> &HeapObject {
        &self
            .slots
            .get(r.index())
            .and_then(|s| s.as_ref())
            .expect("dangling GcRef")
            .object
    }

    pub fn resolve_mut(&mut self, r: GcRef) -> &mut HeapObject {
        &mut self
            .slots
            .get_mut(r.index())
            .and_then(|s| s.as_mut())
            .expect("dangling GcRef")
            .object
    }

    pub fn is_marked(&self, r: GcRef) -> bool {
        self.slots[r.index()].as_ref().is_some_and(|s| s.marked)
    }

    /// Mark root `r` black (or push gray if it carries further
    /// references). Idempotent: marking an already-marked object is a
    /// no-op, which is what keeps cyclic graphs from looping forever.
    pub fn mark(&mut self, r: GcRef) {
        let slot = self.slots[r.index()].as_mut().expect("dangling GcRef");
        if slot.marked {
            return;
        }
        slot.marked = true;
        if matches!(
            slot.object,
            HeapObject::Function(_) | HeapObject::Closure(_) | HeapObject::Upvalue(_)
        ) {
            self.gray.push(r);
        }
    }

    /// Drain the gray worklist, blackening each object by marking the
    /// references it holds. Strings and natives never enter `gray` (they
    /// have no outgoing references), so this terminates.
    pub fn trace(&mut self) {
        while let Some(r) = self.gray.pop() {
            let object = self.resolve(r).clone();
            match object {
                HeapObject::Function(ObjFunction { name, chunk, .. }) => {
                    if let Some(name) = name {
                        self.mark(name);
                    }
                    for constant in &chunk.constants {
                        if let crate::value::Value::Obj(r) = constant {
                            self.mark(*r);
                        }
                    }
                }
                HeapObject::Closure(ObjClosure {
                    function, upvalues, ..
                }) => {
                    self.mark(function);
                    for uv in upvalues {
                        self.mark(uv);
                    }
                }
                HeapObject::Upvalue(ObjUpvalue { state }) => {
                    if let UpvalueState::Closed(crate::value::Value::Obj(r)) = state {
                        self.mark(r);
                    }
                }
                HeapObject::String(_) | HeapObject::Native(_) => {}
            }
        }
    }

    /// Walk every slot; free the ones left unmarked, clear the mark bit on
    /// survivors for the next cycle.
    pub fn sweep(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(s) if s.marked => s.marked = false,
                Some(s) => {
                    self.bytes_allocated -= s.object.size_bytes();
                    *slot = None;
                    self.free_list.push(index as u32);
                }
                None => {}
            }
        }
    }

    pub fn update_watermark(&mut self) {
        self.next_gc = self.bytes_allocated * self.growth_factor.max(1);
    }

    /// Total number of live objects, for diagnostics/tests.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjString;

    #[test]
    fn allocate_and_resolve_round_trips() {
        let mut heap = Heap::new(1024, 2);
        let r = heap.allocate(HeapObject::String(ObjString::new("hi".into())));
        match heap.resolve(r) {
            HeapObject::String(s) => assert_eq!(s.value, "hi"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unmarked_objects_are_freed_and_slots_reused() {
        let mut heap = Heap::new(1024, 2);
        let a = heap.allocate(HeapObject::String(ObjString::new("a".into())));
        let _b = heap.allocate(HeapObject::String(ObjString::new("b".into())));
        heap.mark(a);
        heap.trace();
        heap.sweep();
        assert_eq!(heap.live_count(), 1);
        let c = heap.allocate(HeapObject::String(ObjString::new("c".into())));
        // The freed slot for `b` should have been reused.
        assert_eq!(heap.live_count(), 2);
        assert_ne!(c, a);
    }
}
