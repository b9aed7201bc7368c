//! Garbage collection: the young (Cheney copying) and old (mark-compact) collectors.
//!
//! The young collector flips the semispaces, copies root-reachable objects into the new
//! to-space, and scans copied objects breadth-first using the bump pointer as its work queue.
//! Survivors that reached the tenure threshold are promoted into the old space and pushed onto
//! a stack that grows downward from the top of to-space; their bodies are scanned once the
//! regular scan catches up. The remembered set feeds old→young edges into the copy and is
//! pruned as entries stop pointing at the young generation.
//!
//! The old collector marks the root-reachable closure, weakly sweeps the symbol table, assigns
//! forwarding addresses with a linear sweep, rewrites every reference to a marked object, and
//! slides the survivors down.

use std::ptr;
use std::time::Duration;

use crate::ll::heap::Heap;
use crate::ll::object::HeapObject;
use crate::ll::value::RawValue;

/// Collection counters and durations, per collection mode.
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    pub young_collections: usize,
    pub old_collections: usize,
    pub full_collections: usize,
    pub young_time: Duration,
    pub old_time: Duration,
    pub full_time: Duration,
}

/// The Cheney copying collector for the young generation.
pub(crate) struct CopyingCollector<'h> {
    heap: &'h mut Heap,
    /// Top of the promoted-object stack; entries live in the unused top of to-space.
    promoted_top: *mut u64,
    promoted_cursor: *mut u64,
}

impl<'h> CopyingCollector<'h> {
    pub fn collect(heap: &mut Heap) {
        heap.new_space.flip();
        let top = heap.new_space.to_space_high() as *mut u64;
        let mut collector = CopyingCollector {
            heap,
            promoted_top: top,
            promoted_cursor: top,
        };
        collector.run();
    }

    fn run(&mut self) {
        let mut scan = self.heap.new_space.to_space_low();

        for cell in self.heap.root_cells() {
            self.visit_cell(cell);
        }
        self.process_remembered_set();

        loop {
            while scan < self.heap.new_space.free {
                let object = HeapObject::from_address(scan);
                self.visit_body(object);
                scan = unsafe { scan.add(object.size()) };
            }
            if self.promoted_cursor < self.promoted_top {
                // Promoted objects were copied wholesale; their bodies may still reference
                // from-space, and after the rewrite they may reference to-space, which the
                // barrier has to record.
                while self.promoted_cursor < self.promoted_top {
                    self.promoted_top = unsafe { self.promoted_top.sub(1) };
                    let address = unsafe { *self.promoted_top } as *mut u8;
                    let object = HeapObject::from_address(address);
                    self.visit_body(object);
                    self.record_new_references(object);
                }
                continue;
            }
            break;
        }

        self.heap.new_space.reset_limit();
    }

    fn visit_cell(&mut self, cell: *mut RawValue) {
        let value = unsafe { *cell };
        if self.heap.is_in_new_space(value) {
            let copied = self.copy_object(HeapObject::from_value(value));
            unsafe { *cell = copied.value() };
        }
    }

    fn visit_body(&mut self, object: HeapObject) {
        object.iterate_body(&mut |cell| self.visit_cell(cell));
    }

    /// Copies a from-space object into to-space, or promotes it when it has survived enough
    /// collections. Already-forwarded objects resolve to their forwarding address.
    fn copy_object(&mut self, object: HeapObject) -> HeapObject {
        if !self.heap.new_space.contains(object.address()) {
            return object;
        }
        let mut from_metadata = object.metadata();
        if from_metadata.is_forwarding() {
            return HeapObject::from_address(from_metadata.forwarding());
        }
        debug_assert!(self.heap.new_space.is_in_from_space(object.address()));

        if from_metadata.age() >= self.heap.tenure_threshold() {
            if let Some(promoted) = self.promote(object) {
                return promoted;
            }
            // The old space is out of room; keep the object young.
        }

        let size = object.size();
        let address = self
            .heap
            .new_space
            .allocate(size)
            .expect("to-space cannot be smaller than the from-space survivors");
        unsafe { ptr::copy_nonoverlapping(object.address(), address, size) };
        let copy = HeapObject::from_address(address);
        let mut metadata = copy.metadata();
        metadata.increment_age();
        copy.set_metadata(metadata);
        from_metadata.set_forwarding(address);
        object.set_metadata(from_metadata);
        copy
    }

    fn promote(&mut self, object: HeapObject) -> Option<HeapObject> {
        let size = object.size();
        let address = self.heap.old_space.allocate(size)?;
        unsafe { ptr::copy_nonoverlapping(object.address(), address, size) };
        let promoted = HeapObject::from_address(address);
        let mut metadata = object.metadata();
        metadata.set_forwarding(address);
        object.set_metadata(metadata);
        self.promoted_cursor = unsafe { self.promoted_cursor.sub(1) };
        unsafe { *self.promoted_cursor = promoted.address() as u64 };
        self.heap
            .new_space
            .set_limit(self.promoted_cursor as *mut u8);
        Some(promoted)
    }

    /// Rewrites the young references held by remembered objects. Entries whose holder no longer
    /// references the young generation are removed (swap with last) and their flag cleared.
    fn process_remembered_set(&mut self) {
        let mut i = 0;
        while i < self.heap.old_space.rset_len() {
            let object = self.heap.old_space.rset_get(i);
            debug_assert!(self.heap.is_in_old_space(object));
            let mut keeps_new = false;
            object.iterate_body(&mut |cell| {
                let value = unsafe { *cell };
                if self.heap.is_in_new_space(value) {
                    let copied = self.copy_object(HeapObject::from_value(value));
                    unsafe { *cell = copied.value() };
                    if self.heap.is_in_new_space(copied.value()) {
                        keeps_new = true;
                    }
                }
            });
            if keeps_new {
                i += 1;
            } else {
                let mut metadata = object.metadata();
                metadata.reset_remembered();
                object.set_metadata(metadata);
                self.heap.old_space.rset_swap_remove(i);
            }
        }
    }

    /// The write barrier for freshly promoted objects, which may hold to-space references.
    fn record_new_references(&mut self, object: HeapObject) {
        let mut holds_new = false;
        object.iterate_body(&mut |cell| {
            if self.heap.is_in_new_space(unsafe { *cell }) {
                holds_new = true;
            }
        });
        if holds_new {
            self.heap.old_space.remember(object);
        }
    }
}

/// The mark-compact collector for the old generation.
pub(crate) struct MarkCompactCollector;

impl MarkCompactCollector {
    pub fn collect(heap: &mut Heap) {
        Self::mark(heap);
        heap.symbols.sweep_unmarked();
        Self::set_forwarding(heap);
        Self::adjust_pointers(heap);
        Self::move_objects(heap);
    }

    fn mark(heap: &mut Heap) {
        for cell in heap.root_cells() {
            Self::mark_value(heap, unsafe { *cell });
        }
        // Live young objects may hold the only reference to an old object, so their bodies
        // count as roots here. Marking still never traverses into the young generation.
        let mut scan = heap.new_space.to_space_low();
        while scan < heap.new_space.free {
            let object = HeapObject::from_address(scan);
            object.iterate_body(&mut |cell| Self::mark_value(heap, unsafe { *cell }));
            scan = unsafe { scan.add(object.size()) };
        }
    }

    fn mark_value(heap: &Heap, value: RawValue) {
        if !value.is_heap_object() {
            return;
        }
        let object = HeapObject::from_value(value);
        if !heap.is_in_old_space(object) {
            return;
        }
        let mut metadata = object.metadata();
        if metadata.is_marked() {
            return;
        }
        metadata.mark();
        object.set_metadata(metadata);
        object.iterate_body(&mut |cell| Self::mark_value(heap, unsafe { *cell }));
    }

    /// Assigns each marked object its slide-down destination with a linear sweep.
    fn set_forwarding(heap: &Heap) {
        let mut new_address = heap.old_space.begin();
        let mut scan = heap.old_space.begin();
        while scan < heap.old_space.free {
            let object = HeapObject::from_address(scan);
            let size = object.size();
            let mut metadata = object.metadata();
            if metadata.is_marked() {
                metadata.set_forwarding(new_address);
                object.set_metadata(metadata);
                new_address = unsafe { new_address.add(size) };
            }
            scan = unsafe { scan.add(size) };
        }
    }

    fn adjust_pointers(heap: &mut Heap) {
        for cell in heap.root_cells() {
            Self::adjust_cell(heap, cell);
        }
        heap.symbols.adjust_forwarded();

        let mut i = 0;
        while i < heap.old_space.rset_len() {
            let object = heap.old_space.rset_get(i);
            let metadata = object.metadata();
            if metadata.is_marked() {
                heap.old_space
                    .rset_set(i, HeapObject::from_address(metadata.forwarding()));
                i += 1;
            } else {
                heap.old_space.rset_swap_remove(i);
            }
        }

        let mut scan = heap.old_space.begin();
        while scan < heap.old_space.free {
            let object = HeapObject::from_address(scan);
            let size = object.size();
            if object.metadata().is_marked() {
                object.iterate_body(&mut |cell| Self::adjust_cell(heap, cell));
            }
            scan = unsafe { scan.add(size) };
        }

        // Old references held by live young objects move too.
        let mut scan = heap.new_space.to_space_low();
        while scan < heap.new_space.free {
            let object = HeapObject::from_address(scan);
            object.iterate_body(&mut |cell| Self::adjust_cell(heap, cell));
            scan = unsafe { scan.add(object.size()) };
        }
    }

    fn adjust_cell(heap: &Heap, cell: *mut RawValue) {
        let value = unsafe { *cell };
        if !value.is_heap_object() {
            return;
        }
        let object = HeapObject::from_value(value);
        if heap.is_in_old_space(object) {
            let metadata = object.metadata();
            debug_assert!(metadata.is_marked());
            unsafe { *cell = RawValue::from_address(metadata.forwarding()) };
        }
    }

    fn move_objects(heap: &mut Heap) {
        let mut free = heap.old_space.begin();
        let mut available_objects = 0;
        let mut scan = heap.old_space.begin();
        while scan < heap.old_space.free {
            let object = HeapObject::from_address(scan);
            let size = object.size();
            let metadata = object.metadata();
            if metadata.is_marked() {
                let destination = metadata.forwarding();
                // Sliding compaction: destinations stay behind the scan pointer, so an
                // overlapping copy is possible but never clobbers unscanned objects.
                unsafe { ptr::copy(object.address(), destination, size) };
                let moved = HeapObject::from_address(destination);
                let mut new_metadata = moved.metadata();
                new_metadata.reset_forwarding();
                new_metadata.reset_marked();
                moved.set_metadata(new_metadata);
                free = unsafe { free.add(size) };
                available_objects += 1;
            }
            scan = unsafe { scan.add(size) };
        }
        heap.old_space.free = free;
        heap.old_space.available_objects = available_objects;
    }
}

/// Walks the whole object graph from the roots, asserting that no reference points into
/// from-space or outside the allocated parts of the spaces. Runs before and after every
/// collection in debug builds.
pub(crate) fn verify_heap(heap: &mut Heap) {
    let mut visited = std::collections::HashSet::new();
    for cell in heap.root_cells() {
        verify_value(heap, unsafe { *cell }, &mut visited);
    }
}

fn verify_value(heap: &Heap, value: RawValue, visited: &mut std::collections::HashSet<usize>) {
    if !value.is_heap_object() {
        return;
    }
    let object = HeapObject::from_value(value);
    if !visited.insert(object.address() as usize) {
        return;
    }
    if heap.new_space.contains(object.address()) {
        assert!(
            !heap.new_space.is_in_from_space(object.address()),
            "live reference into from-space"
        );
    } else {
        assert!(
            heap.is_in_old_space(object),
            "heap reference outside the heap region"
        );
        assert!(
            object.address() < heap.old_space.free,
            "old-space reference beyond the allocation frontier"
        );
    }
    object.iterate_body(&mut |cell| verify_value(heap, unsafe { *cell }, visited));
}

#[cfg(test)]
mod tests {
    use crate::ll::heap::{AllocationPolicy, AllocationSpace, Heap};
    use crate::ll::object::{GcString, HeapObject, KsArray};
    use crate::ll::value::RawValue;

    fn heap() -> Heap {
        Heap::new(16 * 1024, 256 * 1024, 2)
    }

    #[test]
    fn young_collection_preserves_rooted_objects() {
        let mut heap = heap();
        let string = heap
            .new_string(b"survivor", AllocationPolicy::NotTenured)
            .unwrap();
        let string = heap.make_handle(string);
        let array = heap.new_ks_array(2, AllocationPolicy::NotTenured).unwrap();
        let array = heap.make_handle(array);
        heap.ks_array_set(array, 0, string.get());
        heap.ks_array_set(array, 1, RawValue::from_i32(7));

        heap.collect(AllocationSpace::New);

        let element = heap.ks_array_get(array.get(), 0);
        let view = GcString::cast(HeapObject::from_value(element));
        assert_eq!(unsafe { view.bytes() }, b"survivor");
        assert_eq!(heap.ks_array_get(array.get(), 1).as_i32(), 7);
        assert!(!heap.new_space.is_in_from_space(view.object().address()));
    }

    #[test]
    fn unrooted_young_objects_die() {
        let mut heap = heap();
        for i in 0..50 {
            heap.new_string(format!("garbage {i}").as_bytes(), AllocationPolicy::NotTenured)
                .unwrap();
        }
        let before = heap.new_space.available_objects;
        heap.collect(AllocationSpace::New);
        assert!(heap.new_space.available_objects < before);
    }

    #[test]
    fn survivors_are_promoted_at_the_tenure_threshold() {
        let mut heap = Heap::new(16 * 1024, 256 * 1024, 1);
        let string = heap
            .new_string(b"old-timer", AllocationPolicy::NotTenured)
            .unwrap();
        let string = heap.make_handle(string);
        assert!(heap.is_in_new_space(string.get()));

        // First collection copies (age 0 → 1), second promotes (age 1 ≥ threshold 1).
        heap.collect(AllocationSpace::New);
        assert!(heap.is_in_new_space(string.get()));
        heap.collect(AllocationSpace::New);
        assert!(heap.is_in_old_space(HeapObject::from_value(string.get())));
        let view = GcString::cast(HeapObject::from_value(string.get()));
        assert_eq!(unsafe { view.bytes() }, b"old-timer");
    }

    #[test]
    fn the_write_barrier_keeps_old_to_young_edges_alive() {
        let mut heap = heap();
        let array = heap.new_ks_array(1, AllocationPolicy::Tenured).unwrap();
        let array = heap.make_handle(array);
        assert!(heap.is_in_old_space(HeapObject::from_value(array.get())));

        let string = heap
            .new_string(b"young", AllocationPolicy::NotTenured)
            .unwrap();
        heap.ks_array_set(array, 0, string);
        assert!(heap.old_space.rset_len() > 0);

        heap.collect(AllocationSpace::New);

        let element = heap.ks_array_get(array.get(), 0);
        let view = GcString::cast(HeapObject::from_value(element));
        assert_eq!(unsafe { view.bytes() }, b"young");
    }

    #[test]
    fn the_remembered_set_is_pruned_once_referents_leave_the_nursery() {
        let mut heap = Heap::new(16 * 1024, 256 * 1024, 0);
        let array = heap.new_ks_array(1, AllocationPolicy::Tenured).unwrap();
        let array = heap.make_handle(array);
        let string = heap
            .new_string(b"promoted", AllocationPolicy::NotTenured)
            .unwrap();
        heap.ks_array_set(array, 0, string);
        assert!(heap.old_space.rset_len() > 0);

        // Threshold 0 promotes on the first copy, so the entry must disappear.
        heap.collect(AllocationSpace::New);
        assert_eq!(heap.old_space.rset_len(), 0);
        let element = heap.ks_array_get(array.get(), 0);
        assert!(heap.is_in_old_space(HeapObject::from_value(element)));
    }

    #[test]
    fn mark_compact_reclaims_unreachable_old_objects() {
        let mut heap = heap();
        for i in 0..100 {
            heap.new_string(
                format!("tenured garbage {i}").as_bytes(),
                AllocationPolicy::Tenured,
            )
            .unwrap();
        }
        let kept = heap.new_string(b"kept", AllocationPolicy::Tenured).unwrap();
        let kept = heap.make_handle(kept);

        let before = heap.old_space.free;
        heap.collect(AllocationSpace::Old);
        assert!(heap.old_space.free < before);

        let view = GcString::cast(HeapObject::from_value(kept.get()));
        assert_eq!(unsafe { view.bytes() }, b"kept");
    }

    #[test]
    fn unreferenced_symbols_are_swept() {
        let mut heap = heap();
        let kept = heap.intern("kept_symbol").unwrap();
        heap.make_handle(kept);
        heap.intern("transient_symbol").unwrap();
        assert!(heap.symbols.find(b"transient_symbol").is_some());

        heap.collect(AllocationSpace::Old);

        assert!(heap.symbols.find(b"kept_symbol").is_some());
        assert!(heap.symbols.find(b"transient_symbol").is_none());
        // Interning again after the sweep just creates a fresh symbol.
        assert!(heap.intern("transient_symbol").is_ok());
    }

    #[test]
    fn old_collection_adjusts_references_held_by_young_objects() {
        let mut heap = heap();
        // Tenured garbage before the kept string forces the survivor to slide down.
        for i in 0..50 {
            heap.new_string(format!("filler {i}").as_bytes(), AllocationPolicy::Tenured)
                .unwrap();
        }
        let old_string = heap
            .new_string(b"pointee", AllocationPolicy::Tenured)
            .unwrap();
        let array = heap.new_ks_array(1, AllocationPolicy::NotTenured).unwrap();
        let array = heap.make_handle(array);
        heap.ks_array_set(array, 0, old_string);
        assert!(heap.is_in_new_space(array.get()));

        heap.collect(AllocationSpace::Old);

        let element = heap.ks_array_get(array.get(), 0);
        let view = GcString::cast(HeapObject::from_value(element));
        assert_eq!(unsafe { view.bytes() }, b"pointee");
    }

    #[test]
    fn a_full_collection_runs_when_both_spaces_are_exhausted() {
        let mut heap = Heap::new(1024, 64 * 1024, 2);
        // One string sized to the exact remaining room fills the young space completely.
        let remaining = heap.new_space.to_space_high() as usize - heap.new_space.free as usize;
        let length = (remaining - GcString::BYTES_OFFSET) as i32;
        heap.new_string(&vec![b'a'; length as usize], AllocationPolicy::NotTenured)
            .unwrap();
        assert!(heap.new_space.is_full());

        heap.collect(AllocationSpace::Old);
        assert_eq!(heap.stats().full_collections, 1);
    }

    #[test]
    fn a_storm_of_short_lived_strings_does_not_exhaust_the_heap() {
        let mut heap = Heap::new(
            crate::ll::heap::DEFAULT_SEMISPACE_SIZE,
            crate::ll::heap::DEFAULT_OLD_SPACE_SIZE,
            2,
        );
        for i in 0..10_000 {
            heap.new_string(
                format!("transient {i}").as_bytes(),
                AllocationPolicy::NotTenured,
            )
            .expect("short-lived allocations must be collectable");
        }
        assert!(heap.stats().young_collections > 0);
    }

    #[test]
    fn ks_arrays_survive_collections_with_their_structure_intact() {
        let mut heap = heap();
        let array = heap.new_ks_array(0, AllocationPolicy::NotTenured).unwrap();
        let array = heap.make_handle(array);
        for i in 0..200 {
            let value = heap.make_handle(RawValue::from_i32(i));
            heap.ks_array_push(array, value).unwrap();
        }
        heap.collect(AllocationSpace::New);
        heap.collect(AllocationSpace::New);
        heap.collect(AllocationSpace::Old);
        let view = KsArray::cast(HeapObject::from_value(array.get()));
        assert_eq!(view.len(), 200);
        for i in 0..200 {
            assert_eq!(heap.ks_array_get(array.get(), i).as_i32(), i);
        }
    }
}
