//! The garbage-collected heap.
//!
//! One contiguous region is split into a semispace young generation and a bump-allocated old
//! generation. Typed allocators come in two flavors: `*_no_gc` attempts that signal
//! [`AllocationFailed`] when the space is out of room, and public entry points that wrap them in
//! the two-try envelope: attempt, collect the failing space, attempt again, and report
//! [`ErrorKind::OutOfMemory`] if the retry fails too.
//!
//! The heap also owns everything the collector treats as roots: the context arena, the handle
//! arenas, the interned-symbol table, and the fixed root list (the shared empty array, hash
//! table, and string, plus the installed `push` builtin).

use std::alloc::{self, handle_alloc_error, Layout};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use tracing::debug;

use crate::ll::ast::{Ast, NodeId};
use crate::ll::context::{ContextId, Contexts};
use crate::ll::error::ErrorKind;
use crate::ll::gc::{CopyingCollector, GcStats, MarkCompactCollector};
use crate::ll::handle::{Handle, HandleArena};
use crate::ll::object::{
    GcArray, GcFunction, GcString, HashTable, HeapKind, HeapNumber, HeapObject, KsArray,
    KsObject, Metadata,
};
use crate::ll::space::{NewSpace, OldSpace};
use crate::ll::symbols::SymbolTable;
use crate::ll::value::RawValue;

pub const DEFAULT_SEMISPACE_SIZE: usize = 256 * 1024;
pub const DEFAULT_OLD_SPACE_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_TENURE_THRESHOLD: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSpace {
    New,
    Old,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationPolicy {
    NotTenured,
    Tenured,
}

impl AllocationPolicy {
    fn space(self) -> AllocationSpace {
        match self {
            AllocationPolicy::NotTenured => AllocationSpace::New,
            AllocationPolicy::Tenured => AllocationSpace::Old,
        }
    }
}

/// A space-local allocation did not fit. Caught by the two-try envelope; never escapes the heap.
#[derive(Debug, Clone, Copy)]
pub struct AllocationFailed(pub AllocationSpace);

/// The implementation of a native (Rust) function value.
pub type NativeFunction =
    fn(&mut Heap, Handle, ContextId) -> Result<Handle, ErrorKind>;

/// A property-read interceptor, consulted in installation order before the table lookup.
pub type PropertyInterceptor = fn(&Heap, HeapObject, GcString) -> Option<RawValue>;

/// The body of a function value.
#[derive(Clone, Copy)]
pub enum FunctionBody {
    /// Index into the heap's script-body table.
    Script(usize),
    Native(NativeFunction),
}

impl FunctionBody {
    fn bits(self) -> u64 {
        match self {
            FunctionBody::Script(index) => (index as u64) << 1,
            FunctionBody::Native(function) => function as usize as u64 | GcFunction::NATIVE_TAG,
        }
    }
}

/// A script function's body: the AST that owns it and the `function` declaration node.
#[derive(Clone)]
pub struct ScriptBody {
    pub ast: Rc<Ast>,
    pub node: NodeId,
}

/// The fixed root list. These cells are visited by the collector like any other root.
struct Roots {
    empty_array: RawValue,
    empty_hash_table: RawValue,
    empty_string: RawValue,
    array_push: RawValue,
}

pub struct Heap {
    region: *mut u8,
    region_layout: Layout,
    pub(crate) new_space: NewSpace,
    pub(crate) old_space: OldSpace,
    pub(crate) contexts: Contexts,
    pub(crate) symbols: SymbolTable,
    handles: HandleArena,
    /// Roots for values exported through the embedding API; never truncated.
    persistent: HandleArena,
    roots: Box<Roots>,
    /// Cells backing the handles for true, false, null, and undefined.
    singletons: Box<[RawValue; 4]>,
    interceptors: Vec<PropertyInterceptor>,
    bodies: Vec<ScriptBody>,
    tenure_threshold: u8,
    pub(crate) stats: GcStats,
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap").finish_non_exhaustive()
    }
}

impl Heap {
    /// Creates a heap from a total size budget: one semispace gets a quarter, the old space
    /// gets half, each rounded up to the next power of two. A budget of zero keeps the
    /// defaults.
    pub fn with_config(heap_size: usize, tenure_threshold: u8) -> Heap {
        let mut semispace_size = DEFAULT_SEMISPACE_SIZE;
        let mut old_space_size = DEFAULT_OLD_SPACE_SIZE;
        if heap_size >> 2 > 0 {
            semispace_size = (heap_size >> 2).next_power_of_two();
        }
        if heap_size >> 1 > 0 {
            old_space_size = (heap_size >> 1).next_power_of_two();
        }
        Self::new(semispace_size, old_space_size, tenure_threshold)
    }

    /// Creates a heap with explicit space sizes.
    ///
    /// # Panics
    /// Panics if the old space cannot hold the root objects, which only happens for absurdly
    /// small sizes.
    pub fn new(semispace_size: usize, old_space_size: usize, tenure_threshold: u8) -> Heap {
        let total_size = semispace_size * 2 + old_space_size;
        let region_layout =
            Layout::from_size_align(total_size, 16).expect("heap size overflows a Layout");
        let region = unsafe { alloc::alloc(region_layout) };
        if region.is_null() {
            handle_alloc_error(region_layout);
        }

        let new_space = NewSpace::new(region, semispace_size);
        let old_space = OldSpace::new(unsafe { region.add(semispace_size * 2) }, old_space_size);

        let mut heap = Heap {
            region,
            region_layout,
            new_space,
            old_space,
            contexts: Contexts::new(),
            symbols: SymbolTable::new(),
            handles: HandleArena::new(),
            persistent: HandleArena::new(),
            roots: Box::new(Roots {
                empty_array: RawValue::UNDEFINED,
                empty_hash_table: RawValue::UNDEFINED,
                empty_string: RawValue::UNDEFINED,
                array_push: RawValue::UNDEFINED,
            }),
            singletons: Box::new([
                RawValue::TRUE,
                RawValue::FALSE,
                RawValue::NULL,
                RawValue::UNDEFINED,
            ]),
            interceptors: Vec::new(),
            bodies: Vec::new(),
            tenure_threshold,
            stats: GcStats::default(),
        };
        heap.initialize_roots();
        heap
    }

    fn initialize_roots(&mut self) {
        let empty_array = self
            .allocate_array_no_gc_internal(0, AllocationPolicy::Tenured)
            .expect("a fresh old space must fit the root objects");
        self.roots.empty_array = empty_array.value();
        let empty_hash_table = self
            .allocate_hash_table_no_gc_internal(0, AllocationPolicy::Tenured)
            .expect("a fresh old space must fit the root objects");
        self.roots.empty_hash_table = empty_hash_table.value();
        let empty_string = self
            .allocate_string_no_gc_internal(0, AllocationPolicy::Tenured)
            .expect("a fresh old space must fit the root objects");
        self.roots.empty_string = empty_string.value();
    }

    pub fn tenure_threshold(&self) -> u8 {
        self.tenure_threshold
    }

    pub fn empty_array(&self) -> RawValue {
        self.roots.empty_array
    }

    pub fn empty_hash_table(&self) -> RawValue {
        self.roots.empty_hash_table
    }

    pub fn empty_string(&self) -> RawValue {
        self.roots.empty_string
    }

    pub fn array_push_function(&self) -> RawValue {
        self.roots.array_push
    }

    pub(crate) fn set_array_push_function(&mut self, function: RawValue) {
        self.roots.array_push = function;
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    // ------------------------------- Handles -------------------------------

    pub fn make_handle(&mut self, value: RawValue) -> Handle {
        self.handles.make(value)
    }

    /// Allocates a never-released root cell, for values exported through the embedding API.
    pub fn make_persistent_handle(&mut self, value: RawValue) -> Handle {
        self.persistent.make(value)
    }

    pub fn handle_level(&self) -> usize {
        self.handles.level()
    }

    pub fn truncate_handles(&mut self, level: usize) {
        self.handles.truncate(level);
    }

    pub fn undefined_handle(&self) -> Handle {
        self.singleton_handle(3)
    }

    pub fn null_handle(&self) -> Handle {
        self.singleton_handle(2)
    }

    pub fn boolean_handle(&self, value: bool) -> Handle {
        self.singleton_handle(if value { 0 } else { 1 })
    }

    fn singleton_handle(&self, index: usize) -> Handle {
        // The cells live in a Box, so their addresses are stable, and they are never written.
        let cell = &self.singletons[index] as *const RawValue as *mut RawValue;
        Handle::from_location(cell)
    }

    // ---------------------------- Raw allocation ----------------------------

    pub(crate) fn allocate_raw(
        &mut self,
        size: usize,
        space: AllocationSpace,
    ) -> Result<HeapObject, AllocationFailed> {
        debug_assert_eq!(size % 8, 0);
        let address = match space {
            AllocationSpace::New => self.new_space.allocate(size),
            AllocationSpace::Old => self.old_space.allocate(size),
        };
        address
            .map(HeapObject::from_address)
            .ok_or(AllocationFailed(space))
    }

    fn initialize_metadata(object: HeapObject, kind: HeapKind) {
        object.set_metadata(Metadata::new(kind));
    }

    /// Runs a fallible allocation action; on failure collects the failing space and retries
    /// once. A second failure is an out-of-memory condition.
    pub(crate) fn with_gc_retry<T>(
        &mut self,
        mut action: impl FnMut(&mut Self) -> Result<T, AllocationFailed>,
    ) -> Result<T, ErrorKind> {
        match action(self) {
            Ok(value) => Ok(value),
            Err(AllocationFailed(space)) => {
                self.collect(space);
                action(self).map_err(|_| ErrorKind::OutOfMemory)
            }
        }
    }

    // --------------------------- No-GC allocators ---------------------------

    pub(crate) fn allocate_array_no_gc(
        &mut self,
        length: i32,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        if length == 0 {
            return Ok(HeapObject::from_value(self.roots.empty_array));
        }
        self.allocate_array_no_gc_internal(length, policy)
    }

    fn allocate_array_no_gc_internal(
        &mut self,
        length: i32,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        let object = self.allocate_raw(GcArray::ensure_size(length), policy.space())?;
        Self::initialize_metadata(object, HeapKind::Array);
        let array = GcArray::cast(object);
        array.set_len(length);
        for i in 0..length {
            array.set(i, RawValue::UNDEFINED);
        }
        Ok(object)
    }

    pub(crate) fn allocate_hash_table_no_gc(
        &mut self,
        elements_size: i32,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        if elements_size == 0 {
            return Ok(HeapObject::from_value(self.roots.empty_hash_table));
        }
        self.allocate_hash_table_no_gc_internal(elements_size, policy)
    }

    fn allocate_hash_table_no_gc_internal(
        &mut self,
        elements_size: i32,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        let capacity = (elements_size.max(2) as u32).next_power_of_two() as i32;
        let slots = HashTable::slots_for_capacity(capacity);
        let object = self.allocate_array_no_gc_internal(slots, policy)?;
        let table = HashTable::cast(object);
        table.set_elements_size(0);
        table.set_capacity(capacity);
        Ok(object)
    }

    pub(crate) fn allocate_string_no_gc(
        &mut self,
        length: i32,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        if length == 0 {
            return Ok(HeapObject::from_value(self.roots.empty_string));
        }
        self.allocate_string_no_gc_internal(length, policy)
    }

    fn allocate_string_no_gc_internal(
        &mut self,
        length: i32,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        let object = self.allocate_raw(GcString::ensure_size(length), policy.space())?;
        Self::initialize_metadata(object, HeapKind::String);
        let string = GcString::cast(object);
        string.set_len(length);
        KsObject::cast(object).set_elements(HashTable::cast(HeapObject::from_value(
            self.roots.empty_hash_table,
        )));
        Ok(object)
    }

    pub(crate) fn allocate_ks_object_no_gc(
        &mut self,
        elements_size: i32,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        let properties = self.allocate_hash_table_no_gc(elements_size, policy)?;
        let object = self.allocate_raw(KsObject::SIZE, policy.space())?;
        Self::initialize_metadata(object, HeapKind::KsObject);
        KsObject::cast(object).set_elements(HashTable::cast(properties));
        self.write_barrier(object, properties.value());
        Ok(object)
    }

    pub(crate) fn allocate_ks_array_no_gc(
        &mut self,
        length: i32,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        let elements = self.allocate_array_no_gc(length, policy)?;
        let object = self.allocate_raw(KsArray::SIZE, policy.space())?;
        Self::initialize_metadata(object, HeapKind::KsArray);
        let array = KsArray::cast(object);
        array.set_elements(GcArray::cast(elements));
        array.set_len(length);
        KsObject::cast(object).set_elements(HashTable::cast(HeapObject::from_value(
            self.roots.empty_hash_table,
        )));
        self.write_barrier(object, elements.value());
        Ok(object)
    }

    fn allocate_heap_number_no_gc(
        &mut self,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        let object = self.allocate_raw(HeapNumber::SIZE, policy.space())?;
        Self::initialize_metadata(object, HeapKind::HeapNumber);
        Ok(object)
    }

    fn allocate_function_no_gc(
        &mut self,
        policy: AllocationPolicy,
    ) -> Result<HeapObject, AllocationFailed> {
        let object = self.allocate_raw(GcFunction::SIZE, policy.space())?;
        Self::initialize_metadata(object, HeapKind::Function);
        Ok(object)
    }

    // --------------------------- Typed allocators ---------------------------

    pub fn new_string(
        &mut self,
        bytes: &[u8],
        policy: AllocationPolicy,
    ) -> Result<RawValue, ErrorKind> {
        let length = bytes.len() as i32;
        let object = self.with_gc_retry(|heap| heap.allocate_string_no_gc(length, policy))?;
        GcString::cast(object).set_content(bytes);
        Ok(object.value())
    }

    pub fn new_array(
        &mut self,
        length: i32,
        policy: AllocationPolicy,
    ) -> Result<RawValue, ErrorKind> {
        self.with_gc_retry(|heap| heap.allocate_array_no_gc(length, policy))
            .map(HeapObject::value)
    }

    pub fn new_ks_object(
        &mut self,
        elements_size: i32,
        policy: AllocationPolicy,
    ) -> Result<RawValue, ErrorKind> {
        self.with_gc_retry(|heap| heap.allocate_ks_object_no_gc(elements_size, policy))
            .map(HeapObject::value)
    }

    pub fn new_ks_array(
        &mut self,
        length: i32,
        policy: AllocationPolicy,
    ) -> Result<RawValue, ErrorKind> {
        self.with_gc_retry(|heap| heap.allocate_ks_array_no_gc(length, policy))
            .map(HeapObject::value)
    }

    pub fn new_heap_number(
        &mut self,
        value: i64,
        policy: AllocationPolicy,
    ) -> Result<RawValue, ErrorKind> {
        let object = self.with_gc_retry(|heap| heap.allocate_heap_number_no_gc(policy))?;
        HeapNumber::cast(object).set_value(value);
        Ok(object.value())
    }

    /// Allocates a function value. `name` must hold a string, `params` an array of symbols.
    pub fn new_function(
        &mut self,
        name: Handle,
        params: Handle,
        body: FunctionBody,
        policy: AllocationPolicy,
    ) -> Result<RawValue, ErrorKind> {
        let object = self.with_gc_retry(|heap| heap.allocate_function_no_gc(policy))?;
        let function = GcFunction::cast(object);
        function.object().write_field(GcFunction::NAME_OFFSET, name.get());
        function
            .object()
            .write_field(GcFunction::PARAMS_OFFSET, params.get());
        function.set_body_bits(body.bits());
        self.write_barrier(object, name.get());
        self.write_barrier(object, params.get());
        Ok(object.value())
    }

    /// Recovers the native function pointer from a function's body word.
    pub(crate) fn native_function(bits: u64) -> NativeFunction {
        debug_assert!(bits & GcFunction::NATIVE_TAG != 0);
        unsafe { std::mem::transmute::<usize, NativeFunction>((bits & !GcFunction::NATIVE_TAG) as usize) }
    }

    pub(crate) fn register_script_body(&mut self, ast: Rc<Ast>, node: NodeId) -> usize {
        self.bodies.push(ScriptBody { ast, node });
        self.bodies.len() - 1
    }

    pub(crate) fn script_body(&self, index: usize) -> ScriptBody {
        self.bodies[index].clone()
    }

    // ------------------------------- Symbols --------------------------------

    /// Returns the interned symbol for `text`, allocating a tenured string on first use.
    /// Interning the same content twice yields the same word.
    pub fn intern(&mut self, text: &str) -> Result<RawValue, ErrorKind> {
        if let Some(symbol) = self.symbols.find(text.as_bytes()) {
            return Ok(symbol);
        }
        let symbol = self.new_string(text.as_bytes(), AllocationPolicy::Tenured)?;
        self.symbols.insert(symbol);
        Ok(symbol)
    }

    // ----------------------------- Write barrier ----------------------------

    /// Records `holder` in the remembered set when an old-space object is given a new-space
    /// reference. Every mutating setter goes through here.
    pub fn write_barrier(&mut self, holder: HeapObject, field: RawValue) {
        if self.old_space.contains(holder.address())
            && field.is_heap_object()
            && self.new_space.contains(field.address())
        {
            self.old_space.remember(holder);
        }
    }

    /// A barriered array store: writes `value` at `index` and returns it, or returns undefined
    /// if the index is out of range.
    pub fn array_write(&mut self, array: GcArray, index: i32, value: RawValue) -> RawValue {
        self.write_barrier(array.object(), value);
        array.set(index, value)
    }

    // ------------------------------ Script arrays ---------------------------

    pub fn ks_array_get(&self, array: RawValue, index: i32) -> RawValue {
        KsArray::cast(HeapObject::from_value(array)).get(index)
    }

    /// Indexed store into a script array. Out-of-range stores are silently ignored and yield
    /// undefined; script arrays grow only through [`ks_array_push`][Self::ks_array_push].
    pub fn ks_array_set(&mut self, array: Handle, index: i32, value: RawValue) -> RawValue {
        let elements = KsArray::cast(HeapObject::from_value(array.get())).elements();
        self.array_write(elements, index, value)
    }

    /// Appends to a script array, growing the backing store by half plus one when full.
    pub fn ks_array_push(&mut self, array: Handle, value: Handle) -> Result<(), ErrorKind> {
        self.with_gc_retry(|heap| {
            let view = KsArray::cast(HeapObject::from_value(array.get()));
            let length = view.len();
            if length >= view.capacity() {
                let new_capacity = length + 1 + (length >> 1);
                let elements =
                    heap.allocate_array_no_gc(new_capacity, AllocationPolicy::NotTenured)?;
                let view = KsArray::cast(HeapObject::from_value(array.get()));
                let new_elements = GcArray::cast(elements);
                new_elements.copy_from(view.elements());
                view.set_elements(new_elements);
                heap.write_barrier(view.object(), elements.value());
            }
            let view = KsArray::cast(HeapObject::from_value(array.get()));
            view.set_len(length + 1);
            heap.array_write(view.elements(), length, value.get());
            Ok(())
        })
    }

    // ------------------------------- Properties -----------------------------

    pub(crate) fn add_property_interceptor(&mut self, interceptor: PropertyInterceptor) {
        self.interceptors.push(interceptor);
    }

    /// Reads a property: the interceptors are consulted in order, then the table; absent
    /// properties read as undefined.
    pub fn get_property(&mut self, object: Handle, key: Handle) -> Result<RawValue, ErrorKind> {
        let key_string = self.to_string(key.get())?;
        let key_view = GcString::cast(HeapObject::from_value(key_string));
        let holder = HeapObject::from_value(object.get());
        for i in 0..self.interceptors.len() {
            let interceptor = self.interceptors[i];
            if let Some(value) = interceptor(self, holder, key_view) {
                return Ok(value);
            }
        }
        let table = KsObject::cast(holder).elements();
        let bytes = unsafe { key_view.bytes() };
        Ok(table
            .search(bytes, GcString::hash_bytes(bytes))
            .unwrap_or(RawValue::UNDEFINED))
    }

    /// Writes a property, rehashing the table at a load factor of ~0.8. The shared empty table
    /// is copied on first write, never mutated in place.
    pub fn set_property(
        &mut self,
        object: Handle,
        key: Handle,
        value: Handle,
    ) -> Result<(), ErrorKind> {
        self.with_gc_retry(|heap| {
            let key_string = heap.to_string_no_gc(key.get())?;
            heap.insert_property_no_gc(object, key_string, value.get())
        })
    }

    fn insert_property_no_gc(
        &mut self,
        object: Handle,
        key: RawValue,
        value: RawValue,
    ) -> Result<(), AllocationFailed> {
        let holder = KsObject::cast(HeapObject::from_value(object.get()));
        if holder.elements().object().value() == self.roots.empty_hash_table {
            let fresh = self.allocate_hash_table_no_gc_internal(1, AllocationPolicy::NotTenured)?;
            let holder = KsObject::cast(HeapObject::from_value(object.get()));
            holder.set_elements(HashTable::cast(fresh));
            self.write_barrier(holder.object(), fresh.value());
        }

        let holder = KsObject::cast(HeapObject::from_value(object.get()));
        let table = holder.elements();
        let key_view = GcString::cast(HeapObject::from_value(key));
        let hash = key_view.hash();
        if let Some(entry) = table.find_entry(unsafe { key_view.bytes() }, hash) {
            self.array_write(table.array(), HashTable::entry_to_index(entry) + 1, value);
            return Ok(());
        }

        let new_size = table.elements_size() + 1;
        if new_size + (new_size >> 2) <= table.capacity() {
            table.set_elements_size(new_size);
            let index = table.find_insertion_index(hash);
            self.array_write(table.array(), index, key);
            self.array_write(table.array(), index + 1, value);
            return Ok(());
        }

        // Rehash into a table with capacity for double the new size.
        let grown = self.allocate_hash_table_no_gc(new_size * 2, AllocationPolicy::NotTenured)?;
        let grown = HashTable::cast(grown);
        grown.set_elements_size(new_size);
        let holder = KsObject::cast(HeapObject::from_value(object.get()));
        let table = holder.elements();
        table.for_each_entry(&mut |entry_key, entry_value| {
            let entry_string = GcString::cast(HeapObject::from_value(entry_key));
            let index = grown.find_insertion_index(entry_string.hash());
            grown.set_entry(index, entry_key, entry_value);
        });
        let index = grown.find_insertion_index(hash);
        grown.set_entry(index, key, value);
        holder.set_elements(grown);
        self.write_barrier(holder.object(), grown.object().value());
        // The grown table holds every entry; record it if it is old and any entry is young.
        for i in 0..grown.array().len() {
            self.write_barrier(grown.object(), grown.array().get(i));
        }
        Ok(())
    }

    // ------------------------------ Conversions -----------------------------

    pub fn to_boolean(&self, value: RawValue) -> bool {
        if value.is_boolean() {
            return value.is_true();
        }
        if value.is_double() {
            let x = value.as_f64();
            return x != 0.0 && !x.is_nan();
        }
        if value.is_int32() {
            return value.as_i32() != 0;
        }
        if value.is_null() || value.is_undefined() {
            return false;
        }
        let object = HeapObject::from_value(value);
        match object.kind() {
            HeapKind::KsObject => true,
            HeapKind::String => GcString::cast(object).len() != 0,
            HeapKind::Array => GcArray::cast(object).len() != 0,
            HeapKind::KsArray => KsArray::cast(object).len() != 0,
            HeapKind::Function => false,
            HeapKind::HeapNumber => HeapNumber::cast(object).value() != 0,
        }
    }

    pub fn to_double(&self, value: RawValue) -> f64 {
        if value.is_double() {
            return value.as_f64();
        }
        if value.is_int32() {
            return f64::from(value.as_i32());
        }
        if value.is_boolean() {
            return if value.is_true() { 1.0 } else { 0.0 };
        }
        if value.is_null() || value.is_undefined() {
            return f64::NAN;
        }
        let object = HeapObject::from_value(value);
        match object.kind() {
            HeapKind::HeapNumber => HeapNumber::cast(object).value() as f64,
            HeapKind::String => string_to_double(unsafe { GcString::cast(object).bytes() }),
            _ => f64::NAN,
        }
    }

    pub fn to_int32(&self, value: RawValue) -> i32 {
        if value.is_int32() {
            return value.as_i32();
        }
        if value.is_double() {
            return double_to_int32(value.as_f64());
        }
        if value.is_boolean() {
            return i32::from(value.is_true());
        }
        if value.is_null() || value.is_undefined() {
            return 0;
        }
        let object = HeapObject::from_value(value);
        match object.kind() {
            HeapKind::HeapNumber => HeapNumber::cast(object).value() as i32,
            HeapKind::String => string_to_int(unsafe { GcString::cast(object).bytes() }),
            _ => 0,
        }
    }

    pub fn to_int64(&self, value: RawValue) -> i64 {
        if value.is_int32() {
            return i64::from(value.as_i32());
        }
        if value.is_double() {
            return double_to_int64(value.as_f64());
        }
        if value.is_boolean() {
            return i64::from(value.is_true());
        }
        if value.is_null() || value.is_undefined() {
            return 0;
        }
        let object = HeapObject::from_value(value);
        match object.kind() {
            HeapKind::HeapNumber => HeapNumber::cast(object).value(),
            HeapKind::String => string_to_int64(unsafe { GcString::cast(object).bytes() }),
            _ => 0,
        }
    }

    /// Coerces to a number value without changing representation where one already exists.
    pub fn to_number(&self, value: RawValue) -> RawValue {
        if crate::ll::object::is_number_value(value) {
            return value;
        }
        if value.is_boolean() {
            return RawValue::from_i32(i32::from(value.is_true()));
        }
        RawValue::from_f64(self.to_double(value))
    }

    /// Renders a value to a Rust string without allocating on the heap.
    pub fn to_display_string(&self, value: RawValue) -> String {
        let mut out = String::new();
        self.write_value(&mut out, value);
        out
    }

    fn write_value(&self, out: &mut String, value: RawValue) {
        use std::fmt::Write;

        if value.is_double() {
            let _ = write!(out, "{}", value.as_f64());
        } else if value.is_int32() {
            let _ = write!(out, "{}", value.as_i32());
        } else if value == RawValue::TRUE {
            out.push_str("true");
        } else if value == RawValue::FALSE {
            out.push_str("false");
        } else if value.is_null() {
            out.push_str("null");
        } else if value.is_undefined() {
            out.push_str("undefined");
        } else {
            let object = HeapObject::from_value(value);
            match object.kind() {
                HeapKind::String => out.push_str(unsafe { GcString::cast(object).as_str() }),
                HeapKind::HeapNumber => {
                    let _ = write!(out, "{}", HeapNumber::cast(object).value());
                }
                HeapKind::Function => out.push_str("[[function]]"),
                HeapKind::Array => {
                    let array = GcArray::cast(object);
                    out.push('[');
                    for i in 0..array.len() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        self.write_value(out, array.get(i));
                    }
                    out.push(']');
                }
                HeapKind::KsArray => {
                    let array = KsArray::cast(object);
                    out.push('[');
                    for i in 0..array.len() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        self.write_value(out, array.get(i));
                    }
                    out.push(']');
                }
                HeapKind::KsObject => {
                    let mut first = true;
                    out.push('{');
                    KsObject::cast(object).elements().for_each_entry(&mut |key, value| {
                        if !first {
                            out.push_str(", ");
                        }
                        first = false;
                        self.write_value(out, key);
                        out.push_str(": ");
                        self.write_value(out, value);
                    });
                    out.push('}');
                }
            }
        }
    }

    /// Coerces to a heap string. Strings pass through unchanged.
    pub fn to_string(&mut self, value: RawValue) -> Result<RawValue, ErrorKind> {
        if value.is_heap_object() && HeapObject::from_value(value).kind() == HeapKind::String {
            return Ok(value);
        }
        let text = self.to_display_string(value);
        self.new_string(text.as_bytes(), AllocationPolicy::NotTenured)
    }

    fn to_string_no_gc(&mut self, value: RawValue) -> Result<RawValue, AllocationFailed> {
        if value.is_heap_object() && HeapObject::from_value(value).kind() == HeapKind::String {
            return Ok(value);
        }
        let text = self.to_display_string(value);
        let object = self.allocate_string_no_gc(text.len() as i32, AllocationPolicy::NotTenured)?;
        GcString::cast(object).set_content(text.as_bytes());
        Ok(object.value())
    }

    /// Concatenates two strings. Concatenation with the empty string on the right returns the
    /// left string unchanged.
    pub fn string_concat(&mut self, left: RawValue, right: RawValue) -> Result<RawValue, ErrorKind> {
        let right_view = GcString::cast(HeapObject::from_value(right));
        if right_view.len() == 0 {
            return Ok(left);
        }
        let left_view = GcString::cast(HeapObject::from_value(left));
        let mut buffer = Vec::with_capacity((left_view.len() + right_view.len()) as usize);
        buffer.extend_from_slice(unsafe { left_view.bytes() });
        buffer.extend_from_slice(unsafe { right_view.bytes() });
        self.new_string(&buffer, AllocationPolicy::NotTenured)
    }

    /// Value equality: bit-identical words are equal; numbers compare across representations;
    /// strings compare by content; distinct heap objects are never equal otherwise.
    pub fn equals(&self, left: RawValue, right: RawValue) -> bool {
        if left == right {
            return true;
        }
        use crate::ll::object::is_number_value;
        if is_number_value(left) && is_number_value(right) {
            if left.is_double() || right.is_double() {
                return self.to_double(left) == self.to_double(right);
            }
            // At least one side is a heap number; int32 pairs were caught by word equality.
            return self.to_int64(left) == self.to_int64(right);
        }
        if left.is_heap_object()
            && right.is_heap_object()
            && HeapObject::from_value(left).kind() == HeapKind::String
            && HeapObject::from_value(right).kind() == HeapKind::String
        {
            let left = GcString::cast(HeapObject::from_value(left));
            let right = GcString::cast(HeapObject::from_value(right));
            return unsafe { left.bytes() == right.bytes() };
        }
        false
    }

    pub fn is_function(&self, value: RawValue) -> bool {
        value.is_heap_object() && HeapObject::from_value(value).kind() == HeapKind::Function
    }

    // --------------------------------- GC -----------------------------------

    pub fn is_in_new_space(&self, value: RawValue) -> bool {
        value.is_heap_object() && self.new_space.contains(value.address())
    }

    pub fn is_in_old_space(&self, object: HeapObject) -> bool {
        self.old_space.contains(object.address())
    }

    /// Collects garbage. `New` runs a young (Cheney copying) collection; `Old` runs mark-compact,
    /// extended to a full collection (mark-compact then copy) when the young generation is also
    /// out of room.
    pub fn collect(&mut self, space: AllocationSpace) {
        #[cfg(debug_assertions)]
        crate::ll::gc::verify_heap(self);

        let start = Instant::now();
        match space {
            AllocationSpace::New => {
                debug!(
                    new_objects = self.new_space.available_objects,
                    old_objects = self.old_space.available_objects,
                    "young gc start"
                );
                CopyingCollector::collect(self);
                self.stats.young_collections += 1;
                self.stats.young_time += start.elapsed();
                debug!(cost = ?start.elapsed(), "young gc stop");
            }
            AllocationSpace::Old => {
                if self.new_space.is_full() {
                    debug!(
                        new_objects = self.new_space.available_objects,
                        old_objects = self.old_space.available_objects,
                        "full gc start"
                    );
                    MarkCompactCollector::collect(self);
                    CopyingCollector::collect(self);
                    self.stats.full_collections += 1;
                    self.stats.full_time += start.elapsed();
                    debug!(cost = ?start.elapsed(), "full gc stop");
                } else {
                    debug!(
                        new_objects = self.new_space.available_objects,
                        old_objects = self.old_space.available_objects,
                        "old gc start"
                    );
                    MarkCompactCollector::collect(self);
                    self.stats.old_collections += 1;
                    self.stats.old_time += start.elapsed();
                    debug!(cost = ?start.elapsed(), "old gc stop");
                }
            }
        }

        #[cfg(debug_assertions)]
        crate::ll::gc::verify_heap(self);
    }

    /// Collects a pointer to every root cell: context bindings, live handles, persistent
    /// handles, and the fixed root list.
    pub(crate) fn root_cells(&mut self) -> Vec<*mut RawValue> {
        let mut cells = Vec::new();
        {
            let mut push = |cell: *mut RawValue| cells.push(cell);
            self.contexts.iterate(&mut push);
            self.handles.iterate(&mut push);
            self.persistent.iterate(&mut push);
        }
        let roots = &mut *self.roots;
        cells.push(&mut roots.empty_array as *mut RawValue);
        cells.push(&mut roots.empty_hash_table as *mut RawValue);
        cells.push(&mut roots.empty_string as *mut RawValue);
        cells.push(&mut roots.array_push as *mut RawValue);
        cells
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.region, self.region_layout) }
    }
}

// ------------------------- Numeric string conversions -------------------------

fn string_to_double(bytes: &[u8]) -> f64 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

fn string_to_int(bytes: &[u8]) -> i32 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .unwrap_or(0)
}

fn string_to_int64(bytes: &[u8]) -> i64 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Converts a double to an int32, clamping at the range ends; NaN converts to 0.
pub fn double_to_int32(value: f64) -> i32 {
    if value.is_nan() {
        return 0;
    }
    if value >= f64::from(i32::MAX) {
        return i32::MAX;
    }
    if value <= f64::from(i32::MIN) {
        return i32::MIN;
    }
    value as i32
}

/// Converts a double to an int64, clamping at the range ends; NaN converts to 0.
pub fn double_to_int64(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    if value >= i64::MAX as f64 {
        return i64::MAX;
    }
    if value <= i64::MIN as f64 {
        return i64::MIN;
    }
    value as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Heap {
        Heap::new(16 * 1024, 256 * 1024, DEFAULT_TENURE_THRESHOLD)
    }

    #[test]
    fn interning_is_idempotent() {
        let mut heap = small_heap();
        let a = heap.intern("foo").unwrap();
        let b = heap.intern("foo").unwrap();
        let c = heap.intern("bar").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(heap.is_in_old_space(HeapObject::from_value(a)));
    }

    #[test]
    fn strings_round_trip_their_content() {
        let mut heap = small_heap();
        let s = heap.new_string(b"hello", AllocationPolicy::NotTenured).unwrap();
        let view = GcString::cast(HeapObject::from_value(s));
        assert_eq!(unsafe { view.bytes() }, b"hello");
        assert_eq!(view.len(), 5);
    }

    #[test]
    fn zero_sized_allocations_share_the_roots() {
        let mut heap = small_heap();
        let a = heap.new_string(b"", AllocationPolicy::NotTenured).unwrap();
        let b = heap.new_array(0, AllocationPolicy::NotTenured).unwrap();
        assert_eq!(a, heap.empty_string());
        assert_eq!(b, heap.empty_array());
    }

    #[test]
    fn properties_read_back_after_rehash() {
        let mut heap = small_heap();
        let object = heap.new_ks_object(0, AllocationPolicy::NotTenured).unwrap();
        let object = heap.make_handle(object);
        // Enough keys to force several rehashes from the copied-on-write empty table.
        for i in 0..40 {
            let key = heap.new_string(format!("key{i}").as_bytes(), AllocationPolicy::NotTenured).unwrap();
            let key = heap.make_handle(key);
            let value = heap.make_handle(RawValue::from_i32(i));
            heap.set_property(object, key, value).unwrap();
        }
        for i in 0..40 {
            let key = heap.new_string(format!("key{i}").as_bytes(), AllocationPolicy::NotTenured).unwrap();
            let key = heap.make_handle(key);
            let value = heap.get_property(object, key).unwrap();
            assert_eq!(value.as_i32(), i);
        }
    }

    #[test]
    fn the_shared_empty_table_is_never_mutated() {
        let mut heap = small_heap();
        let a = heap.new_ks_object(0, AllocationPolicy::NotTenured).unwrap();
        let a = heap.make_handle(a);
        let b = heap.new_ks_object(0, AllocationPolicy::NotTenured).unwrap();
        let b = heap.make_handle(b);
        let key = heap.intern("x").unwrap();
        let key = heap.make_handle(key);
        let value = heap.make_handle(RawValue::from_i32(1));
        heap.set_property(a, key, value).unwrap();
        assert_eq!(heap.get_property(a, key).unwrap().as_i32(), 1);
        assert!(heap.get_property(b, key).unwrap().is_undefined());
    }

    #[test]
    fn ks_array_push_grows_the_backing_store() {
        let mut heap = small_heap();
        let array = heap.new_ks_array(0, AllocationPolicy::NotTenured).unwrap();
        let array = heap.make_handle(array);
        for i in 0..100 {
            let value = heap.make_handle(RawValue::from_i32(i));
            heap.ks_array_push(array, value).unwrap();
        }
        let view = KsArray::cast(HeapObject::from_value(array.get()));
        assert_eq!(view.len(), 100);
        assert!(view.capacity() >= 100);
        for i in 0..100 {
            assert_eq!(heap.ks_array_get(array.get(), i).as_i32(), i);
        }
        assert!(heap.ks_array_get(array.get(), 100).is_undefined());
    }

    #[test]
    fn boolean_conversion() {
        let mut heap = small_heap();
        assert!(!heap.to_boolean(RawValue::from_f64(0.0)));
        assert!(!heap.to_boolean(RawValue::from_f64(f64::NAN)));
        assert!(heap.to_boolean(RawValue::from_f64(0.5)));
        assert!(!heap.to_boolean(RawValue::from_i32(0)));
        assert!(heap.to_boolean(RawValue::from_i32(-1)));
        assert!(!heap.to_boolean(RawValue::NULL));
        assert!(!heap.to_boolean(RawValue::UNDEFINED));
        let empty = heap.new_string(b"", AllocationPolicy::NotTenured).unwrap();
        let full = heap.new_string(b"x", AllocationPolicy::NotTenured).unwrap();
        assert!(!heap.to_boolean(empty));
        assert!(heap.to_boolean(full));
    }

    #[test]
    fn number_string_round_trip() {
        let mut heap = small_heap();
        for x in [0.0, 1.0, -1.5, 1234.25, 1e300] {
            let rendered = heap.to_string(RawValue::from_f64(x)).unwrap();
            assert_eq!(heap.to_double(rendered), x);
        }
    }

    #[test]
    fn cross_representation_equality() {
        let mut heap = small_heap();
        let heap_number = heap
            .new_heap_number(5_000_000_000, AllocationPolicy::NotTenured)
            .unwrap();
        assert!(heap.equals(RawValue::from_i32(3), RawValue::from_f64(3.0)));
        assert!(heap.equals(heap_number, RawValue::from_f64(5e9)));
        assert!(!heap.equals(RawValue::from_i32(3), RawValue::from_f64(3.5)));
        let a = heap.new_string(b"abc", AllocationPolicy::NotTenured).unwrap();
        let b = heap.new_string(b"abc", AllocationPolicy::NotTenured).unwrap();
        assert!(heap.equals(a, b));
        // NaN is bit-identical to itself after canonicalization, so it compares equal.
        assert!(heap.equals(RawValue::from_f64(f64::NAN), RawValue::from_f64(f64::NAN)));
    }

    #[test]
    fn concat_with_the_empty_string_is_identity() {
        let mut heap = small_heap();
        let s = heap.new_string(b"abc", AllocationPolicy::NotTenured).unwrap();
        let empty = heap.new_string(b"", AllocationPolicy::NotTenured).unwrap();
        assert_eq!(heap.string_concat(s, empty).unwrap(), s);
        let reversed = heap.string_concat(empty, s).unwrap();
        let view = GcString::cast(HeapObject::from_value(reversed));
        assert_eq!(unsafe { view.bytes() }, b"abc");
    }

    #[test]
    fn out_of_memory_is_reported_after_retry() {
        let mut heap = Heap::new(1024, 8 * 1024, DEFAULT_TENURE_THRESHOLD);
        // Keep every allocation alive through handles until the young space cannot satisfy
        // the request even after a collection.
        let mut failed = false;
        for _ in 0..100 {
            match heap.new_string(&[b'x'; 512], AllocationPolicy::NotTenured) {
                Ok(value) => {
                    heap.make_handle(value);
                }
                Err(kind) => {
                    assert!(matches!(kind, ErrorKind::OutOfMemory));
                    failed = true;
                    break;
                }
            }
        }
        assert!(failed);
    }
}
