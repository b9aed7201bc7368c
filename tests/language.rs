//! Engine-level tests: the language surface, the embedding API, and the collector seen through
//! running programs.

use kipper::{AllocationSpace, Engine, EngineOptions, ErrorKind, Value};

fn eval(engine: &mut Engine, source: &str) -> Value {
    engine.eval("(test)", source).expect("the script must run")
}

fn global(engine: &mut Engine, name: &str) -> Value {
    engine.get_global(name).unwrap_or(Value::Undefined)
}

#[test]
fn counting_loop() {
    let mut engine = Engine::new();
    eval(
        &mut engine,
        "out = \"\"\nfor (i = 0; i < 3; i = i + 1) { out = out + i + \"\\n\" }",
    );
    // The loop visits 0, 1, 2 in order.
    assert_eq!(global(&mut engine, "out"), Value::from("0\\n1\\n2\\n"));
    assert_eq!(global(&mut engine, "i"), Value::Number(3.0));
}

#[test]
fn function_declaration_and_call() {
    let mut engine = Engine::new();
    eval(
        &mut engine,
        "function f(a, b) { return a + b }\nresult = f(2, 3)",
    );
    assert_eq!(global(&mut engine, "result"), Value::Number(5.0));
}

#[test]
fn a_thousand_pushes_survive_a_young_collection() {
    let mut engine = Engine::new();
    eval(
        &mut engine,
        "xs = []\nfor (i = 0; i < 1000; i = i + 1) xs.push(i)\nn = xs.length",
    );
    assert_eq!(global(&mut engine, "n"), Value::Number(1000.0));

    engine.collect_garbage(AllocationSpace::New);

    let xs = global(&mut engine, "xs");
    assert!(xs.is_array());
    assert_eq!(engine.array_length(&xs), Some(1000));
    for i in [0, 1, 499, 999] {
        assert_eq!(
            engine.get_element(&xs, i).unwrap(),
            Value::Number(f64::from(i))
        );
    }
}

#[test]
fn string_number_addition() {
    let mut engine = Engine::new();
    assert_eq!(
        eval(&mut engine, "\"foo\" + 1"),
        Value::Undefined,
        "scripts evaluate to undefined; the value is read back through a global"
    );
    eval(&mut engine, "a = \"foo\" + 1\nb = 1 + \"foo\"");
    assert_eq!(global(&mut engine, "a"), Value::from("foo1"));
    assert_eq!(global(&mut engine, "b"), Value::from("1foo"));
}

#[test]
fn nested_object_mutation() {
    let mut engine = Engine::new();
    eval(
        &mut engine,
        "obj = {a: 1, b: {c: 2}}\nobj.b.c = obj.b.c + 40\nx = obj.b.c",
    );
    assert_eq!(global(&mut engine, "x"), Value::Number(42.0));
}

#[test]
fn ten_thousand_short_lived_strings_fit_in_the_default_heap() {
    let mut engine = Engine::new();
    eval(
        &mut engine,
        "keep = \"\"\n\
         for (i = 0; i < 10000; i = i + 1) {\n\
             s = \"transient string number \" + i\n\
             if (i % 2500 == 0) { keep = keep + \".\" }\n\
         }",
    );
    assert_eq!(global(&mut engine, "keep"), Value::from("...."));
    assert!(engine.heap().stats().young_collections > 0);
}

#[test]
fn number_string_round_trip() {
    let mut engine = Engine::new();
    for x in [0.0, 1.0, -2.5, 1234.25, 1e15, 0.1] {
        let rendered = engine.coerce_to_string(&Value::Number(x)).unwrap();
        let parsed = engine.coerce_to_number(&Value::String(rendered)).unwrap();
        assert_eq!(parsed, x);
    }
}

#[test]
fn boolean_coercion_is_idempotent() {
    let mut engine = Engine::new();
    for value in [
        Value::Number(0.0),
        Value::Number(1.0),
        Value::from(""),
        Value::from("x"),
        Value::Null,
        Value::Undefined,
    ] {
        let once = engine.coerce_to_boolean(&value).unwrap();
        let twice = engine.coerce_to_boolean(&Value::Boolean(once)).unwrap();
        assert_eq!(once, twice);
    }
}

#[test]
fn symbols_intern_to_the_same_pointer() {
    let mut engine = Engine::new();
    let heap = engine.heap();
    let a = heap.intern("interned_name").unwrap();
    let b = heap.intern("interned_name").unwrap();
    assert_eq!(a, b);
}

#[test]
fn globals_round_trip_through_the_api() {
    let mut engine = Engine::new();
    engine.set_global("x", &Value::Number(7.0)).unwrap();
    engine.set_global("s", &Value::from("hello")).unwrap();
    eval(&mut engine, "y = x + 1\nt = s + \" world\"");
    assert_eq!(global(&mut engine, "y"), Value::Number(8.0));
    assert_eq!(global(&mut engine, "t"), Value::from("hello world"));
}

#[test]
fn script_functions_are_callable_from_rust() {
    let mut engine = Engine::new();
    eval(&mut engine, "function double(x) { return x * 2 }");
    let function = global(&mut engine, "double");
    assert!(function.is_function());
    let result = engine.call(&function, &[Value::Number(21.0)]).unwrap();
    assert_eq!(result, Value::Number(42.0));
}

#[test]
fn native_functions_are_callable_from_scripts() {
    fn triple(
        heap: &mut kipper::ll::heap::Heap,
        arguments: kipper::ll::handle::Handle,
        _context: kipper::ll::context::ContextId,
    ) -> Result<kipper::ll::handle::Handle, ErrorKind> {
        let argument = heap.ks_array_get(arguments.get(), 0);
        let result = kipper::ll::interpreter::make_fit(heap.to_double(argument) * 3.0);
        Ok(heap.make_handle(result))
    }

    let mut engine = Engine::new();
    engine.set_native_function("Triple", triple).unwrap();
    eval(&mut engine, "x = Triple(14)");
    assert_eq!(global(&mut engine, "x"), Value::Number(42.0));
}

#[test]
fn arrays_and_objects_through_the_api() {
    let mut engine = Engine::new();
    let array = engine.create_array(3).unwrap();
    engine.set_element(&array, 0, &Value::Number(1.0)).unwrap();
    engine.set_element(&array, 1, &Value::from("two")).unwrap();
    assert_eq!(engine.array_length(&array), Some(3));
    assert_eq!(engine.get_element(&array, 0).unwrap(), Value::Number(1.0));
    assert_eq!(engine.get_element(&array, 1).unwrap(), Value::from("two"));
    assert_eq!(engine.get_element(&array, 2).unwrap(), Value::Undefined);

    let object = engine.create_object().unwrap();
    engine
        .set_property(&object, "answer", &Value::Number(42.0))
        .unwrap();
    assert_eq!(
        engine.get_property(&object, "answer").unwrap(),
        Value::Number(42.0)
    );
    assert_eq!(
        engine.get_property(&object, "missing").unwrap(),
        Value::Undefined
    );
}

#[test]
fn exported_values_survive_collections() {
    let mut engine = Engine::new();
    eval(&mut engine, "xs = [1, 2, 3]");
    let xs = global(&mut engine, "xs");
    engine.collect_garbage(AllocationSpace::New);
    engine.collect_garbage(AllocationSpace::New);
    engine.collect_garbage(AllocationSpace::Old);
    assert_eq!(engine.get_element(&xs, 2).unwrap(), Value::Number(3.0));
}

#[test]
fn compile_errors_carry_module_and_location() {
    let engine = Engine::new();
    let error = engine.compile("(module)", "a = ]").unwrap_err();
    let message = error.to_string();
    assert!(message.contains("(module)"), "got: {message}");
    assert!(message.contains("error"), "got: {message}");
}

#[test]
fn runtime_errors_surface_through_eval() {
    let mut engine = Engine::new();
    let error = engine.eval("(test)", "x = 1\nx()").unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::NotAFunction));
}

#[test]
fn scripts_can_run_repeatedly() {
    let mut engine = Engine::new();
    let script = engine.compile("(test)", "counter = counter + 1").unwrap();
    engine.set_global("counter", &Value::Number(0.0)).unwrap();
    for _ in 0..3 {
        engine.run(&script).unwrap();
    }
    assert_eq!(global(&mut engine, "counter"), Value::Number(3.0));
}

#[test]
fn a_small_heap_reports_out_of_memory() {
    let mut engine = Engine::with_options(EngineOptions {
        heap_size: 16 * 1024,
        ..EngineOptions::default()
    });
    // Strings accumulated into a live array cannot be collected, so the heap must eventually
    // report exhaustion rather than loop or crash.
    let error = engine
        .eval(
            "(test)",
            "xs = []\nfor (i = 0; i < 100000; i = i + 1) { xs.push(\"string \" + i) }",
        )
        .unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::OutOfMemory));
}
