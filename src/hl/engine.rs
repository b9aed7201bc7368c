//! The execution engine.

use std::rc::Rc;

use crate::corelib;
use crate::hl::value::{ObjectRef, Value};
use crate::ll::ast::{Ast, DumpAst, NodeId};
use crate::ll::context::ContextId;
use crate::ll::error::{Error, ErrorKind, Location};
use crate::ll::heap::{
    AllocationPolicy, AllocationSpace, Heap, NativeFunction, DEFAULT_TENURE_THRESHOLD,
};
use crate::ll::interpreter::{self, Execution};
use crate::ll::lexer::Lexer;
use crate::ll::object::{GcString, HeapKind, HeapObject, KsArray};
use crate::ll::parser::Parser;
use crate::ll::value::RawValue;

/// Configuration applied when an engine is created.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// The total heap budget in bytes: one semispace gets a quarter, the old space half, each
    /// rounded up to the next power of two. Zero keeps the built-in defaults (256 KiB
    /// semispaces, a 16 MiB old space).
    pub heap_size: usize,
    /// How many young collections an object must survive before it is tenured.
    pub tenure_threshold: u8,
    /// Print the AST of every compiled script to stdout.
    pub dump_ast: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            heap_size: 0,
            tenure_threshold: DEFAULT_TENURE_THRESHOLD,
            dump_ast: false,
        }
    }
}

/// A compiled script: an AST plus its root node, ready to run any number of times.
#[derive(Clone, Debug)]
pub struct Script {
    pub(crate) ast: Rc<Ast>,
    pub(crate) root: NodeId,
}

/// **Start here!** An execution engine: a heap, its global context, and the core library.
///
/// Dropping the engine tears the whole runtime down.
pub struct Engine {
    heap: Heap,
    dump_ast: bool,
}

impl Engine {
    /// Creates an engine with default options.
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    /// Creates an engine with the given options.
    ///
    /// # Panics
    /// Panics if the configured heap is too small to hold the core library, which only happens
    /// for absurdly small heap budgets.
    pub fn with_options(options: EngineOptions) -> Self {
        let mut heap = Heap::with_config(options.heap_size, options.tenure_threshold);
        corelib::install(&mut heap).expect("the configured heap must fit the core library");
        Self {
            heap,
            dump_ast: options.dump_ast,
        }
    }

    /// Compiles a script. Compilation touches neither the heap nor the global context.
    pub fn compile(&self, module_name: &str, source: &str) -> Result<Script, Error> {
        let lexer = Lexer::new(Rc::from(module_name), source.to_owned());
        let (ast, root) = Parser::new(lexer).parse()?;
        if self.dump_ast {
            println!("{:?}", DumpAst(&ast, root));
        }
        Ok(Script {
            ast: Rc::new(ast),
            root,
        })
    }

    /// Runs a compiled script in the global context and returns its result.
    pub fn run(&mut self, script: &Script) -> Result<Value, Error> {
        let level = self.heap.handle_level();
        let result =
            interpreter::evaluate(&mut self.heap, &script.ast, script.root, ContextId::GLOBAL);
        let result = result.map(|handle| self.export_value(handle.get()));
        self.heap.truncate_handles(level);
        result
    }

    /// Compiles and runs a script.
    pub fn eval(&mut self, module_name: &str, source: &str) -> Result<Value, Error> {
        let script = self.compile(module_name, source)?;
        self.run(&script)
    }

    /// Binds a global variable.
    pub fn set_global(&mut self, name: &str, value: &Value) -> Result<(), Error> {
        let symbol = self.heap.intern(name).map_err(api_error)?;
        let symbol = self.heap.make_handle(symbol);
        let raw = self.import_value(value).map_err(api_error)?;
        self.heap
            .contexts
            .push_binding(ContextId::GLOBAL, symbol.get(), raw);
        Ok(())
    }

    /// Reads a global variable. An absent binding reads as `None`.
    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        let symbol = self.heap.intern(name).ok()?;
        let slot = self.heap.contexts.resolve(ContextId::GLOBAL, symbol)?;
        let raw = slot.get();
        Some(self.export_value(raw))
    }

    /// Installs a native function as a global.
    pub fn set_native_function(
        &mut self,
        name: &str,
        function: NativeFunction,
    ) -> Result<(), Error> {
        corelib::install_global_function(&mut self.heap, name, function).map_err(api_error)
    }

    /// Calls a function value with the given arguments.
    pub fn call(&mut self, function: &Value, arguments: &[Value]) -> Result<Value, Error> {
        let function = match function {
            Value::Function(reference) => *reference,
            _ => return Err(api_error(ErrorKind::NotAFunction)),
        };
        let level = self.heap.handle_level();
        let result = self.call_impl(function, arguments);
        self.heap.truncate_handles(level);
        result
    }

    fn call_impl(&mut self, function: ObjectRef, arguments: &[Value]) -> Result<Value, Error> {
        let function = self.heap.make_handle(function.0.get());
        let array = self
            .heap
            .new_ks_array(arguments.len() as i32, AllocationPolicy::Tenured)
            .map_err(api_error)?;
        let array = self.heap.make_handle(array);
        for (i, argument) in arguments.iter().enumerate() {
            let raw = self.import_value(argument).map_err(api_error)?;
            self.heap.ks_array_set(array, i as i32, raw);
        }
        let ast = Rc::new(Ast::new(Rc::from("(api)")));
        let result = {
            let mut execution = Execution::new(&mut self.heap, &ast, ContextId::GLOBAL);
            execution.call(NodeId::EMPTY, None, function, array)?
        };
        let raw = result.get();
        Ok(self.export_value(raw))
    }

    // ------------------------------ Coercions -------------------------------

    pub fn coerce_to_number(&mut self, value: &Value) -> Result<f64, Error> {
        let raw = self.import_value(value).map_err(api_error)?;
        Ok(self.heap.to_double(raw))
    }

    pub fn coerce_to_boolean(&mut self, value: &Value) -> Result<bool, Error> {
        let raw = self.import_value(value).map_err(api_error)?;
        Ok(self.heap.to_boolean(raw))
    }

    pub fn coerce_to_string(&mut self, value: &Value) -> Result<Rc<str>, Error> {
        let raw = self.import_value(value).map_err(api_error)?;
        Ok(Rc::from(self.heap.to_display_string(raw)))
    }

    /// Value equality, with cross-representation numeric comparison and string content
    /// comparison.
    pub fn equals(&mut self, left: &Value, right: &Value) -> Result<bool, Error> {
        let left = self.import_value(left).map_err(api_error)?;
        let left = self.heap.make_handle(left);
        let right = self.import_value(right).map_err(api_error)?;
        Ok(self.heap.equals(left.get(), right))
    }

    // ----------------------------- Object access ----------------------------

    /// Creates an array of the given length, filled with undefined.
    pub fn create_array(&mut self, length: i32) -> Result<Value, Error> {
        let raw = self
            .heap
            .new_ks_array(length, AllocationPolicy::NotTenured)
            .map_err(api_error)?;
        Ok(self.export_value(raw))
    }

    /// Creates an empty object.
    pub fn create_object(&mut self) -> Result<Value, Error> {
        let raw = self
            .heap
            .new_ks_object(0, AllocationPolicy::NotTenured)
            .map_err(api_error)?;
        Ok(self.export_value(raw))
    }

    pub fn get_property(&mut self, object: &Value, key: &str) -> Result<Value, Error> {
        let object = self.object_handle(object)?;
        let key = self
            .heap
            .new_string(key.as_bytes(), AllocationPolicy::NotTenured)
            .map_err(api_error)?;
        let key = self.heap.make_handle(key);
        let raw = self.heap.get_property(object, key).map_err(api_error)?;
        Ok(self.export_value(raw))
    }

    pub fn set_property(&mut self, object: &Value, key: &str, value: &Value) -> Result<(), Error> {
        let object = self.object_handle(object)?;
        let key = self
            .heap
            .new_string(key.as_bytes(), AllocationPolicy::NotTenured)
            .map_err(api_error)?;
        let key = self.heap.make_handle(key);
        let raw = self.import_value(value).map_err(api_error)?;
        let raw = self.heap.make_handle(raw);
        self.heap.set_property(object, key, raw).map_err(api_error)
    }

    pub fn get_element(&mut self, array: &Value, index: i32) -> Result<Value, Error> {
        match array {
            Value::Array(reference) => {
                let raw = self.heap.ks_array_get(reference.0.get(), index);
                Ok(self.export_value(raw))
            }
            _ => Err(api_error(ErrorKind::ReferenceError)),
        }
    }

    pub fn set_element(&mut self, array: &Value, index: i32, value: &Value) -> Result<(), Error> {
        match array {
            Value::Array(reference) => {
                let handle = self.heap.make_handle(reference.0.get());
                let raw = self.import_value(value).map_err(api_error)?;
                self.heap.ks_array_set(handle, index, raw);
                Ok(())
            }
            _ => Err(api_error(ErrorKind::ReferenceError)),
        }
    }

    pub fn array_length(&self, array: &Value) -> Option<i32> {
        match array {
            Value::Array(reference) => {
                Some(KsArray::cast(HeapObject::from_value(reference.0.get())).len())
            }
            _ => None,
        }
    }

    /// The underlying heap, for embedders that need the unstable low-level API.
    pub fn heap(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Forces a collection of the given space.
    pub fn collect_garbage(&mut self, space: AllocationSpace) {
        self.heap.collect(space);
    }

    // ----------------------------- Conversions ------------------------------

    fn object_handle(
        &mut self,
        value: &Value,
    ) -> Result<crate::ll::handle::Handle, Error> {
        match value {
            Value::Array(reference) | Value::Object(reference) | Value::Function(reference) => {
                Ok(self.heap.make_handle(reference.0.get()))
            }
            Value::String(s) => {
                let raw = self
                    .heap
                    .new_string(s.as_bytes(), AllocationPolicy::NotTenured)
                    .map_err(api_error)?;
                Ok(self.heap.make_handle(raw))
            }
            _ => Err(api_error(ErrorKind::ReferenceError)),
        }
    }

    fn export_value(&mut self, raw: RawValue) -> Value {
        if raw.is_undefined() {
            return Value::Undefined;
        }
        if raw.is_null() {
            return Value::Null;
        }
        if raw.is_boolean() {
            return Value::Boolean(raw.is_true());
        }
        if raw.is_int32() {
            return Value::Number(f64::from(raw.as_i32()));
        }
        if raw.is_double() {
            return Value::Number(raw.as_f64());
        }
        let object = HeapObject::from_value(raw);
        match object.kind() {
            HeapKind::String => {
                Value::String(Rc::from(unsafe { GcString::cast(object).as_str() }))
            }
            HeapKind::HeapNumber => {
                Value::Number(crate::ll::object::HeapNumber::cast(object).value() as f64)
            }
            HeapKind::KsArray => Value::Array(ObjectRef(self.heap.make_persistent_handle(raw))),
            HeapKind::Function => Value::Function(ObjectRef(self.heap.make_persistent_handle(raw))),
            HeapKind::KsObject | HeapKind::Array => {
                Value::Object(ObjectRef(self.heap.make_persistent_handle(raw)))
            }
        }
    }

    fn import_value(&mut self, value: &Value) -> Result<RawValue, ErrorKind> {
        Ok(match value {
            Value::Undefined => RawValue::UNDEFINED,
            Value::Null => RawValue::NULL,
            Value::Boolean(b) => RawValue::from_bool(*b),
            Value::Number(x) => RawValue::from_f64(*x),
            Value::String(s) => self.heap.new_string(s.as_bytes(), AllocationPolicy::NotTenured)?,
            Value::Array(reference) | Value::Object(reference) | Value::Function(reference) => {
                reference.0.get()
            }
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn api_error(kind: ErrorKind) -> Error {
    Error::Runtime {
        kind,
        module_name: Rc::from("(api)"),
        location: Location::UNINIT,
    }
}
