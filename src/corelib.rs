//! The Kipper core library: the `Print` and `Assert` builtins and the native property
//! interceptors (`length` on arrays and strings, `push` on arrays). Installed once per engine,
//! at construction.

use crate::ll::context::ContextId;
use crate::ll::error::ErrorKind;
use crate::ll::handle::Handle;
use crate::ll::heap::{AllocationPolicy, FunctionBody, Heap, NativeFunction};
use crate::ll::object::{is_ks_array_value, GcString, HeapKind, HeapObject, KsArray};
use crate::ll::value::RawValue;

/// Installs the native properties and functions into the heap and its global context.
pub(crate) fn install(heap: &mut Heap) -> Result<(), ErrorKind> {
    install_native_properties(heap)?;
    install_native_functions(heap)?;
    Ok(())
}

fn install_native_properties(heap: &mut Heap) -> Result<(), ErrorKind> {
    let push = make_native_function(heap, "push", array_push)?;
    heap.set_array_push_function(push);
    heap.add_property_interceptor(intercept_get_property);
    Ok(())
}

fn install_native_functions(heap: &mut Heap) -> Result<(), ErrorKind> {
    install_global_function(heap, "Print", print)?;
    install_global_function(heap, "Assert", assert_condition)?;
    Ok(())
}

/// Allocates a tenured native function value.
pub(crate) fn make_native_function(
    heap: &mut Heap,
    name: &str,
    function: NativeFunction,
) -> Result<RawValue, ErrorKind> {
    let name = heap.intern(name)?;
    let name = heap.make_handle(name);
    let params = heap.empty_array();
    let params = heap.make_handle(params);
    heap.new_function(
        name,
        params,
        FunctionBody::Native(function),
        AllocationPolicy::Tenured,
    )
}

/// Creates a native function and binds it in the global context.
pub(crate) fn install_global_function(
    heap: &mut Heap,
    name: &str,
    function: NativeFunction,
) -> Result<(), ErrorKind> {
    let value = make_native_function(heap, name, function)?;
    let value = heap.make_handle(value);
    let symbol = heap.intern(name)?;
    heap.contexts.push_binding(ContextId::GLOBAL, symbol, value.get());
    Ok(())
}

/// The interceptor consulted by every string-keyed property read.
fn intercept_get_property(heap: &Heap, object: HeapObject, key: GcString) -> Option<RawValue> {
    let key = unsafe { key.bytes() };
    match object.kind() {
        HeapKind::KsArray => match key {
            b"length" => Some(RawValue::from_i32(KsArray::cast(object).len())),
            b"push" => Some(heap.array_push_function()),
            _ => None,
        },
        HeapKind::String => match key {
            b"length" => Some(RawValue::from_i32(GcString::cast(object).len())),
            _ => None,
        },
        _ => None,
    }
}

/// `Print(a, b, ...)`: writes the arguments joined by `", "` and a newline to stdout.
fn print(heap: &mut Heap, arguments: Handle, _context: ContextId) -> Result<Handle, ErrorKind> {
    let view = KsArray::cast(HeapObject::from_value(arguments.get()));
    let mut line = String::new();
    for i in 0..view.len() {
        if i > 0 {
            line.push_str(", ");
        }
        line.push_str(&heap.to_display_string(view.get(i)));
    }
    println!("{line}");
    Ok(heap.undefined_handle())
}

/// `Assert(condition)`: raises a runtime error when the condition is falsy.
fn assert_condition(
    heap: &mut Heap,
    arguments: Handle,
    _context: ContextId,
) -> Result<Handle, ErrorKind> {
    let condition = heap.ks_array_get(arguments.get(), 0);
    if !heap.to_boolean(condition) {
        return Err(ErrorKind::AssertionFailed);
    }
    Ok(heap.undefined_handle())
}

/// `push(value)`: appends to the receiver array. A method; the receiver comes from the calling
/// context's `self` slot.
fn array_push(heap: &mut Heap, arguments: Handle, context: ContextId) -> Result<Handle, ErrorKind> {
    let receiver = heap.contexts.self_value(context);
    if is_ks_array_value(receiver) {
        let receiver = heap.make_handle(receiver);
        let value = heap.ks_array_get(arguments.get(), 0);
        let value = heap.make_handle(value);
        heap.ks_array_push(receiver, value)?;
    }
    Ok(heap.undefined_handle())
}
