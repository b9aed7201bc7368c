//! Heap object headers and typed views over raw heap memory.
//!
//! Objects live in memory owned by the heap's spaces. Every object starts with an 8-byte
//! [`Metadata`] word carrying the GC state (mark/remembered bits, forwarding address, type tag,
//! age), followed by type-specific fields. The views in this module ([`GcString`], [`GcArray`],
//! …) are `Copy` wrappers around an object's address.
//!
//! # Safety
//!
//! A [`HeapObject`] must only be constructed from an address that points at an initialized,
//! currently live object; every accessor relies on that. Views are invalidated whenever the
//! collector runs: hold a [`Handle`][crate::ll::handle::Handle] across anything that may
//! allocate and re-create the view afterwards.

use std::ptr;

use crate::ll::value::RawValue;

pub const POINTER_SIZE: usize = 8;
/// The metadata word sits at the start of every object.
pub const HEADER_SIZE: usize = POINTER_SIZE;

/// Rounds a size up to the 8-byte allocation granularity.
pub const fn align(size: usize) -> usize {
    (size + POINTER_SIZE - 1) & !(POINTER_SIZE - 1)
}

/// The type of a heap object, stored in bits 48..56 of its metadata word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeapKind {
    /// A string-keyed object (script `{...}` values).
    KsObject = 0,
    /// An immutable byte string. Also a `KsObject` (it has a property table slot).
    String,
    /// A raw fixed-size slot array. Also the representation of hash tables.
    Array,
    /// A script-visible dense array. Also a `KsObject`.
    KsArray,
    /// An `i64` outside the small-int range.
    HeapNumber,
    /// A script or native function.
    Function,
}

impl HeapKind {
    fn from_bits(bits: u8) -> HeapKind {
        match bits {
            0 => HeapKind::KsObject,
            1 => HeapKind::String,
            2 => HeapKind::Array,
            3 => HeapKind::KsArray,
            4 => HeapKind::HeapNumber,
            5 => HeapKind::Function,
            _ => unreachable!("corrupt heap object type tag"),
        }
    }
}

/// The 8-byte metadata word at the start of every heap object.
///
/// ```text
/// 63-56    55-48    47-3                  2-1           0
/// |age|    |type|   |forwarding address|  |remembered|  |marked|
/// ```
///
/// The low three bits overlap the always-zero low bits of aligned addresses, so a non-zero
/// forwarding field is enough to detect the forwarded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata(u64);

impl Metadata {
    const MARKED: u64 = 1;
    const REMEMBERED: u64 = 1 << 1;
    const FORWARDING_MASK: u64 = ((1u64 << 48) - 1) & !(POINTER_SIZE as u64 - 1);
    const TYPE_OFFSET: u32 = 48;
    const TYPE_MASK: u64 = 0xff << Self::TYPE_OFFSET;
    const AGE_OFFSET: u32 = 56;
    const AGE_MASK: u64 = 0xff << Self::AGE_OFFSET;

    /// Creates the metadata of a freshly allocated object: given type, age 0, no flags.
    pub fn new(kind: HeapKind) -> Self {
        Self((kind as u64) << Self::TYPE_OFFSET)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn kind(self) -> HeapKind {
        HeapKind::from_bits(((self.0 & Self::TYPE_MASK) >> Self::TYPE_OFFSET) as u8)
    }

    pub fn age(self) -> u8 {
        ((self.0 & Self::AGE_MASK) >> Self::AGE_OFFSET) as u8
    }

    pub fn increment_age(&mut self) {
        let age = self.age().saturating_add(1);
        self.0 = (self.0 & !Self::AGE_MASK) | (u64::from(age) << Self::AGE_OFFSET);
    }

    pub fn is_marked(self) -> bool {
        self.0 & Self::MARKED != 0
    }

    pub fn mark(&mut self) {
        self.0 |= Self::MARKED;
    }

    pub fn reset_marked(&mut self) {
        self.0 &= !Self::MARKED;
    }

    pub fn is_remembered(self) -> bool {
        self.0 & Self::REMEMBERED != 0
    }

    pub fn remember(&mut self) {
        self.0 |= Self::REMEMBERED;
    }

    pub fn reset_remembered(&mut self) {
        self.0 &= !Self::REMEMBERED;
    }

    pub fn is_forwarding(self) -> bool {
        self.0 & Self::FORWARDING_MASK != 0
    }

    /// Returns the forwarding address. Must only be called on forwarded metadata.
    pub fn forwarding(self) -> *mut u8 {
        debug_assert!(self.is_forwarding());
        (self.0 & Self::FORWARDING_MASK) as *mut u8
    }

    pub fn set_forwarding(&mut self, address: *mut u8) {
        debug_assert!(!self.is_forwarding());
        self.0 |= address as u64 & Self::FORWARDING_MASK;
    }

    pub fn reset_forwarding(&mut self) {
        self.0 &= !Self::FORWARDING_MASK;
    }
}

/// An untyped view of an allocated heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapObject(*mut u8);

impl HeapObject {
    pub fn from_address(address: *mut u8) -> Self {
        debug_assert!(!address.is_null());
        Self(address)
    }

    pub fn from_value(value: RawValue) -> Self {
        Self(value.address())
    }

    pub fn address(self) -> *mut u8 {
        self.0
    }

    pub fn value(self) -> RawValue {
        RawValue::from_address(self.0)
    }

    pub fn metadata(self) -> Metadata {
        Metadata::from_bits(unsafe { ptr::read(self.0 as *const u64) })
    }

    pub fn set_metadata(self, metadata: Metadata) {
        unsafe { ptr::write(self.0 as *mut u64, metadata.to_bits()) }
    }

    pub fn kind(self) -> HeapKind {
        self.metadata().kind()
    }

    /// Returns the size of the object in bytes, including the header.
    pub fn size(self) -> usize {
        match self.kind() {
            HeapKind::KsObject => KsObject::SIZE,
            HeapKind::String => GcString::ensure_size(GcString::cast(self).len()),
            HeapKind::Array => GcArray::ensure_size(GcArray::cast(self).len()),
            HeapKind::KsArray => KsArray::SIZE,
            HeapKind::HeapNumber => HeapNumber::SIZE,
            HeapKind::Function => GcFunction::SIZE,
        }
    }

    pub(crate) fn field_ptr(self, offset: usize) -> *mut RawValue {
        unsafe { self.0.add(offset) as *mut RawValue }
    }

    pub(crate) fn read_field(self, offset: usize) -> RawValue {
        unsafe { ptr::read(self.field_ptr(offset)) }
    }

    pub(crate) fn write_field(self, offset: usize, value: RawValue) {
        unsafe { ptr::write(self.field_ptr(offset), value) }
    }

    fn read_i32(self, offset: usize) -> i32 {
        unsafe { ptr::read(self.0.add(offset) as *const i32) }
    }

    fn write_i32(self, offset: usize, value: i32) {
        unsafe { ptr::write(self.0.add(offset) as *mut i32, value) }
    }

    fn read_u64(self, offset: usize) -> u64 {
        unsafe { ptr::read(self.0.add(offset) as *const u64) }
    }

    fn write_u64(self, offset: usize, value: u64) {
        unsafe { ptr::write(self.0.add(offset) as *mut u64, value) }
    }

    /// Calls `f` with a pointer to every reference field in the object's body.
    ///
    /// Scalar fields (lengths, heap-number payloads, function body words that do not carry the
    /// heap tag) are either skipped or harmlessly visited as non-heap words.
    pub fn iterate_body(self, f: &mut dyn FnMut(*mut RawValue)) {
        match self.kind() {
            HeapKind::Array => {
                let array = GcArray::cast(self);
                for i in 0..array.len() {
                    f(array.slot_ptr(i));
                }
            }
            HeapKind::KsArray => {
                f(self.field_ptr(KsArray::ELEMENTS_OFFSET));
                f(self.field_ptr(KsObject::ELEMENTS_OFFSET));
            }
            HeapKind::KsObject | HeapKind::String => {
                f(self.field_ptr(KsObject::ELEMENTS_OFFSET));
            }
            HeapKind::Function => {
                f(self.field_ptr(GcFunction::NAME_OFFSET));
                f(self.field_ptr(GcFunction::PARAMS_OFFSET));
                // The body word is either a native function pointer or a shifted body index;
                // neither carries the heap tag, so visiting it is a no-op by construction.
                f(self.field_ptr(GcFunction::BODY_OFFSET));
            }
            HeapKind::HeapNumber => (),
        }
    }
}

/// A string-keyed object. Strings and script arrays are also `KsObject`s.
#[derive(Debug, Clone, Copy)]
pub struct KsObject(HeapObject);

impl KsObject {
    pub const ELEMENTS_OFFSET: usize = HEADER_SIZE;
    pub const SIZE: usize = Self::ELEMENTS_OFFSET + POINTER_SIZE;

    pub fn cast(object: HeapObject) -> Self {
        debug_assert!(matches!(
            object.kind(),
            HeapKind::KsObject | HeapKind::String | HeapKind::KsArray
        ));
        Self(object)
    }

    pub fn object(self) -> HeapObject {
        self.0
    }

    pub fn elements(self) -> HashTable {
        HashTable::cast(HeapObject::from_value(
            self.0.read_field(Self::ELEMENTS_OFFSET),
        ))
    }

    /// Replaces the property table. The caller is responsible for the write barrier.
    pub(crate) fn set_elements(self, elements: HashTable) {
        self.0
            .write_field(Self::ELEMENTS_OFFSET, elements.object().value());
    }
}

/// An immutable byte string.
#[derive(Debug, Clone, Copy)]
pub struct GcString(HeapObject);

impl GcString {
    pub const LENGTH_OFFSET: usize = KsObject::SIZE;
    pub const BYTES_OFFSET: usize = Self::LENGTH_OFFSET + 4;

    pub const fn ensure_size(length: i32) -> usize {
        align(Self::BYTES_OFFSET + length as usize)
    }

    pub fn cast(object: HeapObject) -> Self {
        debug_assert_eq!(object.kind(), HeapKind::String);
        Self(object)
    }

    pub fn object(self) -> HeapObject {
        self.0
    }

    pub fn len(self) -> i32 {
        self.0.read_i32(Self::LENGTH_OFFSET)
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub(crate) fn set_len(self, length: i32) {
        self.0.write_i32(Self::LENGTH_OFFSET, length);
    }

    /// Returns the string's bytes.
    ///
    /// # Safety
    /// The returned slice has an unconstrained lifetime; it must not outlive the next allocation
    /// (which may move the string).
    pub unsafe fn bytes<'a>(self) -> &'a [u8] {
        std::slice::from_raw_parts(self.0.address().add(Self::BYTES_OFFSET), self.len() as usize)
    }

    /// Returns the string's contents as `str`. Strings only ever hold concatenations of source
    /// text and number renderings, so they are valid UTF-8.
    ///
    /// # Safety
    /// Same lifetime caveat as [`bytes`][Self::bytes].
    pub unsafe fn as_str<'a>(self) -> &'a str {
        std::str::from_utf8_unchecked(self.bytes())
    }

    pub(crate) fn set_content(self, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.len() as usize);
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.0.address().add(Self::BYTES_OFFSET),
                bytes.len(),
            );
        }
    }

    pub fn hash(self) -> u32 {
        Self::hash_bytes(unsafe { self.bytes() })
    }

    pub fn hash_bytes(bytes: &[u8]) -> u32 {
        let mut hash = 0u32;
        for &b in bytes {
            hash = hash.wrapping_mul(31).wrapping_add(u32::from(b));
        }
        hash
    }
}

/// A raw fixed-size slot array. The backing store of script arrays and hash tables.
#[derive(Debug, Clone, Copy)]
pub struct GcArray(HeapObject);

impl GcArray {
    pub const LENGTH_OFFSET: usize = HEADER_SIZE;
    pub const ELEMENTS_OFFSET: usize = align(Self::LENGTH_OFFSET + 4);

    pub const fn ensure_size(length: i32) -> usize {
        Self::ELEMENTS_OFFSET + POINTER_SIZE * length as usize
    }

    pub fn cast(object: HeapObject) -> Self {
        debug_assert_eq!(object.kind(), HeapKind::Array);
        Self(object)
    }

    pub fn object(self) -> HeapObject {
        self.0
    }

    pub fn len(self) -> i32 {
        self.0.read_i32(Self::LENGTH_OFFSET)
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub(crate) fn set_len(self, length: i32) {
        self.0.write_i32(Self::LENGTH_OFFSET, length);
    }

    pub fn get(self, index: i32) -> RawValue {
        debug_assert!((0..self.len()).contains(&index));
        self.0
            .read_field(Self::ELEMENTS_OFFSET + POINTER_SIZE * index as usize)
    }

    pub(crate) fn slot_ptr(self, index: i32) -> *mut RawValue {
        debug_assert!((0..self.len()).contains(&index));
        self.0
            .field_ptr(Self::ELEMENTS_OFFSET + POINTER_SIZE * index as usize)
    }

    /// Stores `value` at `index` and returns it, or returns undefined if the index is out of
    /// range. The caller is responsible for the write barrier.
    pub(crate) fn set(self, index: i32, value: RawValue) -> RawValue {
        if (0..self.len()).contains(&index) {
            self.0
                .write_field(Self::ELEMENTS_OFFSET + POINTER_SIZE * index as usize, value);
            value
        } else {
            RawValue::UNDEFINED
        }
    }

    /// Copies all of `from`'s elements into the front of this array.
    pub(crate) fn copy_from(self, from: GcArray) {
        debug_assert!(self.len() >= from.len());
        unsafe {
            ptr::copy_nonoverlapping(
                from.0.address().add(Self::ELEMENTS_OFFSET),
                self.0.address().add(Self::ELEMENTS_OFFSET),
                POINTER_SIZE * from.len() as usize,
            );
        }
    }
}

/// A string-keyed hash table, stored as a raw array of
/// `[elements_size, capacity, entry₀ key, entry₀ value, …]`.
///
/// Capacity is a power of two ≥ 2; probing is quadratic; an undefined key marks an empty slot.
#[derive(Debug, Clone, Copy)]
pub struct HashTable(GcArray);

impl HashTable {
    pub const ELEMENTS_SIZE_INDEX: i32 = 0;
    pub const CAPACITY_INDEX: i32 = 1;
    const FIRST_ENTRY_INDEX: i32 = 2;

    pub fn cast(object: HeapObject) -> Self {
        Self(GcArray::cast(object))
    }

    pub fn object(self) -> HeapObject {
        self.0.object()
    }

    pub fn array(self) -> GcArray {
        self.0
    }

    pub const fn entry_to_index(entry: i32) -> i32 {
        Self::FIRST_ENTRY_INDEX + entry * 2
    }

    /// The number of raw array slots needed for a table with the given capacity.
    pub const fn slots_for_capacity(capacity: i32) -> i32 {
        Self::entry_to_index(capacity)
    }

    pub fn elements_size(self) -> i32 {
        self.0.get(Self::ELEMENTS_SIZE_INDEX).as_i32()
    }

    pub(crate) fn set_elements_size(self, elements_size: i32) {
        debug_assert!(elements_size >= 0);
        self.0
            .set(Self::ELEMENTS_SIZE_INDEX, RawValue::from_i32(elements_size));
    }

    pub fn capacity(self) -> i32 {
        self.0.get(Self::CAPACITY_INDEX).as_i32()
    }

    pub(crate) fn set_capacity(self, capacity: i32) {
        self.0.set(Self::CAPACITY_INDEX, RawValue::from_i32(capacity));
    }

    fn location(hash: u32, probe: u32, capacity: i32) -> i32 {
        let quadratic = (u64::from(probe) + u64::from(probe) * u64::from(probe)) >> 1;
        ((u64::from(hash) + quadratic) & (capacity as u64 - 1)) as i32
    }

    /// Finds the entry number holding `key` (compared by content), or `None`.
    pub fn find_entry(self, key: &[u8], hash: u32) -> Option<i32> {
        let elements_size = self.elements_size();
        if elements_size == 0 {
            return None;
        }
        let capacity = self.capacity();
        let mut passed = 0;
        for probe in 0..capacity {
            let entry = Self::location(hash, probe as u32, capacity);
            let entry_key = self.0.get(Self::entry_to_index(entry));
            if entry_key.is_undefined() {
                continue;
            }
            let entry_string = GcString::cast(HeapObject::from_value(entry_key));
            if unsafe { entry_string.bytes() } == key {
                return Some(entry);
            }
            passed += 1;
            if passed == elements_size {
                return None;
            }
        }
        None
    }

    /// Finds the raw slot index of the first empty slot on `hash`'s probe sequence. The load
    /// factor invariant guarantees one exists.
    pub fn find_insertion_index(self, hash: u32) -> i32 {
        let capacity = self.capacity();
        let mut probe = 0u32;
        loop {
            let index = Self::entry_to_index(Self::location(hash, probe, capacity));
            if self.0.get(index).is_undefined() {
                return index;
            }
            probe += 1;
        }
    }

    /// Looks up the value stored under `key`, or `None`.
    pub fn search(self, key: &[u8], hash: u32) -> Option<RawValue> {
        self.find_entry(key, hash)
            .map(|entry| self.0.get(Self::entry_to_index(entry) + 1))
    }

    /// Writes a key/value pair at a raw slot index. The caller is responsible for the write
    /// barrier and for updating `elements_size`.
    pub(crate) fn set_entry(self, index: i32, key: RawValue, value: RawValue) {
        self.0.set(index, key);
        self.0.set(index + 1, value);
    }

    /// Calls `f` for every occupied entry, in slot order.
    pub fn for_each_entry(self, f: &mut dyn FnMut(RawValue, RawValue)) {
        let elements_size = self.elements_size();
        if elements_size == 0 {
            return;
        }
        let mut passed = 0;
        for entry in 0..self.capacity() {
            let index = Self::entry_to_index(entry);
            let key = self.0.get(index);
            if !key.is_undefined() {
                f(key, self.0.get(index + 1));
                passed += 1;
                if passed == elements_size {
                    return;
                }
            }
        }
    }
}

/// A script-visible dense array. Integer-indexed elements live in a backing [`GcArray`]; the
/// inherited `KsObject` slot carries string-keyed properties (unused in practice).
#[derive(Debug, Clone, Copy)]
pub struct KsArray(HeapObject);

impl KsArray {
    pub const LENGTH_OFFSET: usize = KsObject::SIZE;
    pub const ELEMENTS_OFFSET: usize = align(Self::LENGTH_OFFSET + 4);
    pub const SIZE: usize = Self::ELEMENTS_OFFSET + POINTER_SIZE;

    pub fn cast(object: HeapObject) -> Self {
        debug_assert_eq!(object.kind(), HeapKind::KsArray);
        Self(object)
    }

    pub fn object(self) -> HeapObject {
        self.0
    }

    pub fn len(self) -> i32 {
        self.0.read_i32(Self::LENGTH_OFFSET)
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub(crate) fn set_len(self, length: i32) {
        self.0.write_i32(Self::LENGTH_OFFSET, length);
    }

    pub fn capacity(self) -> i32 {
        self.elements().len()
    }

    pub fn elements(self) -> GcArray {
        GcArray::cast(HeapObject::from_value(
            self.0.read_field(Self::ELEMENTS_OFFSET),
        ))
    }

    /// Replaces the backing store. The caller is responsible for the write barrier.
    pub(crate) fn set_elements(self, elements: GcArray) {
        self.0
            .write_field(Self::ELEMENTS_OFFSET, elements.object().value());
    }

    /// Reads the element at `index`; out-of-range reads yield undefined.
    pub fn get(self, index: i32) -> RawValue {
        if (0..self.len()).contains(&index) {
            self.elements().get(index)
        } else {
            RawValue::UNDEFINED
        }
    }
}

/// An `i64` that does not fit the small-int encoding.
#[derive(Debug, Clone, Copy)]
pub struct HeapNumber(HeapObject);

impl HeapNumber {
    pub const VALUE_OFFSET: usize = HEADER_SIZE;
    pub const SIZE: usize = Self::VALUE_OFFSET + 8;

    pub fn cast(object: HeapObject) -> Self {
        debug_assert_eq!(object.kind(), HeapKind::HeapNumber);
        Self(object)
    }

    pub fn object(self) -> HeapObject {
        self.0
    }

    pub fn value(self) -> i64 {
        self.0.read_u64(Self::VALUE_OFFSET) as i64
    }

    pub(crate) fn set_value(self, value: i64) {
        self.0.write_u64(Self::VALUE_OFFSET, value as u64);
    }
}

/// A function: a name, an array of parameter symbols, and a body word.
///
/// The body word's low bit distinguishes native functions (a tagged function pointer) from
/// script functions (a body-table index shifted left by one).
#[derive(Debug, Clone, Copy)]
pub struct GcFunction(HeapObject);

impl GcFunction {
    pub const NAME_OFFSET: usize = HEADER_SIZE;
    pub const PARAMS_OFFSET: usize = Self::NAME_OFFSET + POINTER_SIZE;
    pub const BODY_OFFSET: usize = Self::PARAMS_OFFSET + POINTER_SIZE;
    pub const SIZE: usize = Self::BODY_OFFSET + POINTER_SIZE;

    pub const NATIVE_TAG: u64 = 1;

    pub fn cast(object: HeapObject) -> Self {
        debug_assert_eq!(object.kind(), HeapKind::Function);
        Self(object)
    }

    pub fn object(self) -> HeapObject {
        self.0
    }

    pub fn name(self) -> GcString {
        GcString::cast(HeapObject::from_value(self.0.read_field(Self::NAME_OFFSET)))
    }

    pub fn params(self) -> GcArray {
        GcArray::cast(HeapObject::from_value(
            self.0.read_field(Self::PARAMS_OFFSET),
        ))
    }

    pub fn body_bits(self) -> u64 {
        self.0.read_u64(Self::BODY_OFFSET)
    }

    pub(crate) fn set_body_bits(self, bits: u64) {
        self.0.write_u64(Self::BODY_OFFSET, bits);
    }

    pub fn is_native(self) -> bool {
        self.body_bits() & Self::NATIVE_TAG != 0
    }

    /// The body-table index of a script function.
    pub fn body_index(self) -> usize {
        debug_assert!(!self.is_native());
        (self.body_bits() >> 1) as usize
    }
}

/// Returns whether the value is a number in any representation (double, small int, heap number).
pub fn is_number_value(value: RawValue) -> bool {
    value.is_double()
        || value.is_int32()
        || (value.is_heap_object()
            && HeapObject::from_value(value).kind() == HeapKind::HeapNumber)
}

pub fn is_string_value(value: RawValue) -> bool {
    value.is_heap_object() && HeapObject::from_value(value).kind() == HeapKind::String
}

pub fn is_ks_array_value(value: RawValue) -> bool {
    value.is_heap_object() && HeapObject::from_value(value).kind() == HeapKind::KsArray
}

/// Returns whether the value carries a property table: plain objects, strings, script arrays.
pub fn is_ks_object_value(value: RawValue) -> bool {
    value.is_heap_object()
        && matches!(
            HeapObject::from_value(value).kind(),
            HeapKind::KsObject | HeapKind::String | HeapKind::KsArray
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_type_and_age() {
        let mut metadata = Metadata::new(HeapKind::KsArray);
        assert_eq!(metadata.kind(), HeapKind::KsArray);
        assert_eq!(metadata.age(), 0);
        metadata.increment_age();
        metadata.increment_age();
        assert_eq!(metadata.age(), 2);
        assert_eq!(metadata.kind(), HeapKind::KsArray);
    }

    #[test]
    fn metadata_flags_are_independent() {
        let mut metadata = Metadata::new(HeapKind::String);
        metadata.mark();
        metadata.remember();
        assert!(metadata.is_marked());
        assert!(metadata.is_remembered());
        assert!(!metadata.is_forwarding());
        metadata.reset_marked();
        assert!(!metadata.is_marked());
        assert!(metadata.is_remembered());
        assert_eq!(metadata.kind(), HeapKind::String);
    }

    #[test]
    fn metadata_forwarding_preserves_flags() {
        let mut metadata = Metadata::new(HeapKind::Array);
        metadata.remember();
        metadata.set_forwarding(0x10008 as *mut u8);
        assert!(metadata.is_forwarding());
        assert_eq!(metadata.forwarding() as usize, 0x10008);
        assert!(metadata.is_remembered());
        metadata.reset_forwarding();
        assert!(!metadata.is_forwarding());
        assert_eq!(metadata.kind(), HeapKind::Array);
    }

    #[test]
    fn object_sizes() {
        assert_eq!(KsObject::SIZE, 16);
        assert_eq!(KsArray::SIZE, 32);
        assert_eq!(HeapNumber::SIZE, 16);
        assert_eq!(GcFunction::SIZE, 32);
        assert_eq!(GcString::ensure_size(0), 24);
        assert_eq!(GcString::ensure_size(5), 32);
        assert_eq!(GcArray::ensure_size(0), 16);
        assert_eq!(GcArray::ensure_size(3), 40);
    }

    #[test]
    fn alignment() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 8);
        assert_eq!(align(8), 8);
        assert_eq!(align(21), 24);
    }

    #[test]
    fn string_hash_depends_on_order() {
        assert_ne!(GcString::hash_bytes(b"ab"), GcString::hash_bytes(b"ba"));
        assert_eq!(GcString::hash_bytes(b""), 0);
    }
}
