//! The interned-symbol table.
//!
//! Symbols are tenured heap strings interned by content: looking the same bytes up twice yields
//! the same string pointer, which is what makes context lookup a pointer comparison. The table
//! holds its entries weakly with respect to the old collector: after marking, unmarked symbols
//! are evicted, and surviving entries are re-pointed at their forwarding addresses.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

use hashbrown::raw::RawTable;

use crate::ll::object::{GcString, HeapObject};
use crate::ll::value::RawValue;

pub struct SymbolTable {
    table: RawTable<RawValue>,
    state: RandomState,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            table: RawTable::new(),
            state: RandomState::new(),
        }
    }

    fn hash_bytes(state: &RandomState, bytes: &[u8]) -> u64 {
        let mut hasher = state.build_hasher();
        hasher.write(bytes);
        hasher.finish()
    }

    fn hash_symbol(state: &RandomState, symbol: RawValue) -> u64 {
        let string = GcString::cast(HeapObject::from_value(symbol));
        Self::hash_bytes(state, unsafe { string.bytes() })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Returns the interned symbol with the given content, if there is one.
    pub fn find(&self, bytes: &[u8]) -> Option<RawValue> {
        let hash = Self::hash_bytes(&self.state, bytes);
        self.table
            .get(hash, |&symbol| {
                let string = GcString::cast(HeapObject::from_value(symbol));
                unsafe { string.bytes() == bytes }
            })
            .copied()
    }

    /// Inserts a freshly allocated symbol. The caller must have checked that no symbol with the
    /// same content is present.
    pub fn insert(&mut self, symbol: RawValue) {
        let Self { table, state } = self;
        let hash = Self::hash_symbol(state, symbol);
        table.insert(hash, symbol, |&entry| Self::hash_symbol(state, entry));
    }

    /// Evicts every symbol whose object is unmarked. Called between the old collector's mark and
    /// compact phases.
    pub fn sweep_unmarked(&mut self) {
        unsafe {
            let stale: Vec<_> = self
                .table
                .iter()
                .filter(|bucket| !HeapObject::from_value(*bucket.as_ref()).metadata().is_marked())
                .collect();
            for bucket in stale {
                self.table.erase(bucket);
            }
        }
    }

    /// Re-points every surviving entry at its forwarding address. Content (and therefore hash)
    /// is unchanged by the move, so entries stay in their buckets.
    pub fn adjust_forwarded(&mut self) {
        unsafe {
            for bucket in self.table.iter() {
                let entry = bucket.as_mut();
                let metadata = HeapObject::from_value(*entry).metadata();
                debug_assert!(metadata.is_marked());
                if metadata.is_forwarding() {
                    *entry = RawValue::from_address(metadata.forwarding());
                }
            }
        }
    }

    /// Calls `f` for every interned symbol.
    pub fn for_each(&self, f: &mut dyn FnMut(RawValue)) {
        unsafe {
            for bucket in self.table.iter() {
                f(*bucket.as_ref());
            }
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
