//! The tree-walking evaluator.
//!
//! Expressions produce handles; statements produce a [`Completion`] that drives `return`,
//! `break`, and `continue` up through the enclosing blocks. Each block and call runs inside a
//! frame: a fresh child context plus a handle scope, both released on exit. A value escaping a
//! frame (a return value) is re-homed into the enclosing scope before the frame's storage is
//! released.

use std::mem;
use std::rc::Rc;

use crate::ll::ast::{Ast, NodeId, NodeKind};
use crate::ll::context::ContextId;
use crate::ll::error::{Error, ErrorKind};
use crate::ll::handle::Handle;
use crate::ll::heap::{AllocationPolicy, FunctionBody, Heap};
use crate::ll::object::{
    is_ks_array_value, is_ks_object_value, is_number_value, is_string_value, GcArray, GcFunction,
    HeapNumber, HeapObject,
};
use crate::ll::value::RawValue;

/// How a statement finished: fall through, return from the enclosing function, or leave the
/// innermost loop.
pub enum Completion {
    Normal,
    Return(Handle),
    Break,
    Continue,
}

/// Evaluates a whole translation unit in the given context: function declarations are installed
/// first, then the remaining statements run in order. Non-normal completions at the top level
/// are treated as normal (the parser already rejects stray `return`/`break`/`continue`).
pub fn evaluate(
    heap: &mut Heap,
    ast: &Rc<Ast>,
    root: NodeId,
    context: ContextId,
) -> Result<Handle, Error> {
    let level = heap.handle_level();
    let result = {
        let mut execution = Execution {
            heap: &mut *heap,
            ast,
            context,
        };
        execution.run_unit(root)
    };
    match result {
        Ok(handle) => {
            let value = handle.get();
            heap.truncate_handles(level);
            Ok(heap.make_handle(value))
        }
        Err(error) => {
            heap.truncate_handles(level);
            Err(error)
        }
    }
}

/// Narrows a double to the int32 representation when it is integral and within range; anything
/// else stays a double.
pub fn make_fit(value: f64) -> RawValue {
    if value.fract() == 0.0 && value >= f64::from(i32::MIN) && value <= f64::from(i32::MAX) {
        RawValue::from_i32(value as i32)
    } else {
        RawValue::from_f64(value)
    }
}

/// One execution: the heap, the AST being walked, and the current context.
pub struct Execution<'a> {
    pub heap: &'a mut Heap,
    ast: &'a Rc<Ast>,
    context: ContextId,
}

/// A block or call frame: a child context and a handle-scope snapshot.
struct Frame {
    handle_level: usize,
    previous_context: ContextId,
    context: ContextId,
}

impl<'a> Execution<'a> {
    pub fn new(heap: &'a mut Heap, ast: &'a Rc<Ast>, context: ContextId) -> Self {
        Self { heap, ast, context }
    }

    fn error(&self, node: NodeId, kind: ErrorKind) -> Error {
        self.ast.runtime_error(node, kind)
    }

    fn enter_frame(&mut self) -> Frame {
        let handle_level = self.heap.handle_level();
        let context = self.heap.contexts.push(self.context);
        let previous_context = mem::replace(&mut self.context, context);
        Frame {
            handle_level,
            previous_context,
            context,
        }
    }

    fn pop_frame(&mut self, frame: Frame) {
        self.context = frame.previous_context;
        self.heap.contexts.pop(frame.context);
        self.heap.truncate_handles(frame.handle_level);
    }

    /// Releases a frame, re-homing a returning value into the enclosing scope first.
    fn leave_frame(
        &mut self,
        frame: Frame,
        result: Result<Completion, Error>,
    ) -> Result<Completion, Error> {
        match result {
            Ok(Completion::Return(handle)) => {
                // Read the escaping value before the frame's bindings and cells are released.
                let value = handle.get();
                self.pop_frame(frame);
                Ok(Completion::Return(self.heap.make_handle(value)))
            }
            other => {
                self.pop_frame(frame);
                other
            }
        }
    }

    // ------------------------------ Statements ------------------------------

    fn run_unit(&mut self, root: NodeId) -> Result<Handle, Error> {
        let ast = self.ast;
        let statements = ast.children(root).unwrap_or(&[]);
        for &node in statements {
            if ast.kind(node) == NodeKind::Func {
                self.declare_function(node)?;
            }
        }
        for &node in statements {
            if ast.kind(node) != NodeKind::Func {
                self.execute(node)?;
            }
        }
        Ok(self.heap.undefined_handle())
    }

    pub fn execute(&mut self, node: NodeId) -> Result<Completion, Error> {
        let ast = self.ast;
        match ast.kind(node) {
            NodeKind::Block => self.execute_block(node),
            NodeKind::If => {
                let (condition, then) = ast.node_pair(node);
                let condition = self.evaluate(condition)?;
                if self.heap.to_boolean(condition.get()) {
                    self.execute(then)
                } else if let Some(&otherwise) = ast.children(node).and_then(|c| c.first()) {
                    self.execute(otherwise)
                } else {
                    Ok(Completion::Normal)
                }
            }
            NodeKind::While => {
                let (condition, body) = ast.node_pair(node);
                loop {
                    let value = self.evaluate(condition)?;
                    if !self.heap.to_boolean(value.get()) {
                        break;
                    }
                    match self.execute(body)? {
                        Completion::Break => break,
                        completion @ Completion::Return(_) => return Ok(completion),
                        Completion::Continue | Completion::Normal => (),
                    }
                }
                Ok(Completion::Normal)
            }
            NodeKind::For => {
                let children = ast.children(node).unwrap_or(&[]);
                let (init, condition, update, body) =
                    (children[0], children[1], children[2], children[3]);
                if init != NodeId::EMPTY {
                    self.evaluate(init)?;
                }
                loop {
                    if condition != NodeId::EMPTY {
                        let value = self.evaluate(condition)?;
                        if !self.heap.to_boolean(value.get()) {
                            break;
                        }
                    }
                    match self.execute(body)? {
                        Completion::Break => break,
                        completion @ Completion::Return(_) => return Ok(completion),
                        Completion::Continue | Completion::Normal => (),
                    }
                    if update != NodeId::EMPTY {
                        self.evaluate(update)?;
                    }
                }
                Ok(Completion::Normal)
            }
            NodeKind::Return => {
                let (value, _) = ast.node_pair(node);
                let value = if value == NodeId::EMPTY {
                    self.heap.undefined_handle()
                } else {
                    self.evaluate(value)?
                };
                Ok(Completion::Return(value))
            }
            NodeKind::Break => Ok(Completion::Break),
            NodeKind::Continue => Ok(Completion::Continue),
            _ => {
                self.evaluate(node)?;
                Ok(Completion::Normal)
            }
        }
    }

    fn execute_block(&mut self, node: NodeId) -> Result<Completion, Error> {
        let ast = self.ast;
        let statements = ast.children(node).unwrap_or(&[]);
        let frame = self.enter_frame();
        let mut result = Ok(Completion::Normal);
        for &statement in statements {
            match self.execute(statement) {
                Ok(Completion::Normal) => (),
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.leave_frame(frame, result)
    }

    /// Evaluates a `function` declaration: interns the name and parameters, registers the body,
    /// and binds the resulting function value in the current context.
    fn declare_function(&mut self, node: NodeId) -> Result<(), Error> {
        let ast = self.ast;
        let (name_node, params_node) = ast.node_pair(node);
        let name = ast.string(name_node).expect("function declarations carry a name");
        let name_symbol = self.heap.intern(name).map_err(|kind| self.error(node, kind))?;
        let name_handle = self.heap.make_handle(name_symbol);

        let params = ast.children(params_node).unwrap_or(&[]);
        let params_array = self
            .heap
            .new_array(params.len() as i32, AllocationPolicy::Tenured)
            .map_err(|kind| self.error(node, kind))?;
        let params_handle = self.heap.make_handle(params_array);
        for (i, &param) in params.iter().enumerate() {
            let text = ast.string(param).expect("parameters are identifier names");
            let symbol = self.heap.intern(text).map_err(|kind| self.error(param, kind))?;
            let array = GcArray::cast(HeapObject::from_value(params_handle.get()));
            self.heap.array_write(array, i as i32, symbol);
        }

        let body = self.heap.register_script_body(Rc::clone(ast), node);
        let function = self
            .heap
            .new_function(
                name_handle,
                params_handle,
                FunctionBody::Script(body),
                AllocationPolicy::Tenured,
            )
            .map_err(|kind| self.error(node, kind))?;
        self.heap.contexts.push_binding(self.context, name_handle.get(), function);
        Ok(())
    }

    // ------------------------------ Expressions -----------------------------

    pub fn evaluate(&mut self, node: NodeId) -> Result<Handle, Error> {
        let ast = self.ast;
        match ast.kind(node) {
            NodeKind::True => Ok(self.heap.boolean_handle(true)),
            NodeKind::False => Ok(self.heap.boolean_handle(false)),
            NodeKind::Null => Ok(self.heap.null_handle()),
            NodeKind::Undefined => Ok(self.heap.undefined_handle()),
            NodeKind::Int => {
                let value = ast.number(node).expect("int literals carry their value");
                Ok(self.heap.make_handle(RawValue::from_i32(value as i32)))
            }
            NodeKind::Number => {
                let value = ast.number(node).expect("number literals carry their value");
                Ok(self.heap.make_handle(RawValue::from_f64(value)))
            }
            NodeKind::String => {
                let text = ast.string(node).expect("string literals carry their text");
                let value = self
                    .heap
                    .new_string(text.as_bytes(), AllocationPolicy::NotTenured)
                    .map_err(|kind| self.error(node, kind))?;
                Ok(self.heap.make_handle(value))
            }
            NodeKind::Identifier => {
                let name = ast.string(node).expect("identifiers carry their name");
                let symbol = self.heap.intern(name).map_err(|kind| self.error(node, kind))?;
                // An unbound name reads as undefined, not as an error.
                Ok(match self.heap.contexts.resolve(self.context, symbol) {
                    Some(slot) => slot,
                    None => self.heap.undefined_handle(),
                })
            }
            NodeKind::IdentifierName => {
                let name = ast.string(node).expect("identifier names carry their name");
                let symbol = self.heap.intern(name).map_err(|kind| self.error(node, kind))?;
                Ok(self.heap.make_handle(symbol))
            }

            NodeKind::Index | NodeKind::Dot => {
                let reference = Reference::new(self, node)?;
                reference.get_value(self)
            }

            NodeKind::Negate => {
                let (target, _) = ast.node_pair(node);
                let value = self.evaluate(target)?;
                let negated = -self.heap.to_double(value.get());
                Ok(self.heap.make_handle(RawValue::from_f64(negated)))
            }
            NodeKind::UnaryPlus => {
                let (target, _) = ast.node_pair(node);
                let value = self.evaluate(target)?;
                let number = self.heap.to_number(value.get());
                Ok(self.heap.make_handle(number))
            }
            NodeKind::Not => {
                let (target, _) = ast.node_pair(node);
                let value = self.evaluate(target)?;
                let negated = !self.heap.to_boolean(value.get());
                Ok(self.heap.boolean_handle(negated))
            }
            NodeKind::PreIncrement => self.increment(node, 1, true),
            NodeKind::PreDecrement => self.increment(node, -1, true),
            NodeKind::PostIncrement => self.increment(node, 1, false),
            NodeKind::PostDecrement => self.increment(node, -1, false),

            NodeKind::Add => {
                let (left, right) = ast.node_pair(node);
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.add_values(node, left, right)
            }
            NodeKind::Subtract => self.arithmetic(node, |a, b| a - b),
            NodeKind::Multiply => self.arithmetic(node, |a, b| a * b),
            NodeKind::Divide => self.arithmetic(node, |a, b| a / b),
            NodeKind::Modulo => self.arithmetic(node, |a, b| a % b),

            NodeKind::Equal => {
                let (left, right) = ast.node_pair(node);
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                let equal = self.heap.equals(left.get(), right.get());
                Ok(self.heap.boolean_handle(equal))
            }
            NodeKind::NotEqual => {
                let (left, right) = ast.node_pair(node);
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                let equal = self.heap.equals(left.get(), right.get());
                Ok(self.heap.boolean_handle(!equal))
            }
            NodeKind::Less => self.comparison(node, |a, b| a < b),
            NodeKind::Greater => self.comparison(node, |a, b| a > b),
            NodeKind::LessEqual => self.comparison(node, |a, b| a <= b),
            NodeKind::GreaterEqual => self.comparison(node, |a, b| a >= b),

            NodeKind::And => {
                let (left, right) = ast.node_pair(node);
                let left = self.evaluate(left)?;
                if !self.heap.to_boolean(left.get()) {
                    return Ok(self.heap.boolean_handle(false));
                }
                let right = self.evaluate(right)?;
                let truthy = self.heap.to_boolean(right.get());
                Ok(self.heap.boolean_handle(truthy))
            }
            NodeKind::Or => {
                let (left, right) = ast.node_pair(node);
                let left = self.evaluate(left)?;
                if self.heap.to_boolean(left.get()) {
                    return Ok(self.heap.boolean_handle(true));
                }
                let right = self.evaluate(right)?;
                let truthy = self.heap.to_boolean(right.get());
                Ok(self.heap.boolean_handle(truthy))
            }

            NodeKind::Conditional => {
                let children = ast.children(node).unwrap_or(&[]);
                let condition = self.evaluate(children[0])?;
                if self.heap.to_boolean(condition.get()) {
                    self.evaluate(children[1])
                } else {
                    self.evaluate(children[2])
                }
            }

            NodeKind::Assign => {
                let (target, value) = ast.node_pair(node);
                let reference = Reference::new(self, target)?;
                let value = self.evaluate(value)?;
                reference.set_value(self, value)
            }
            | NodeKind::AddAssign
            | NodeKind::SubtractAssign
            | NodeKind::MultiplyAssign
            | NodeKind::DivideAssign
            | NodeKind::ModuloAssign => self.compound_assignment(node),

            NodeKind::Array => {
                let elements = ast.children(node).unwrap_or(&[]);
                let array = self
                    .heap
                    .new_ks_array(elements.len() as i32, AllocationPolicy::NotTenured)
                    .map_err(|kind| self.error(node, kind))?;
                let array = self.heap.make_handle(array);
                for (i, &element) in elements.iter().enumerate() {
                    let value = self.evaluate(element)?;
                    self.heap.ks_array_set(array, i as i32, value.get());
                }
                Ok(array)
            }
            NodeKind::Object => {
                let properties = ast.children(node).unwrap_or(&[]);
                let object = self
                    .heap
                    .new_ks_object(properties.len() as i32, AllocationPolicy::NotTenured)
                    .map_err(|kind| self.error(node, kind))?;
                let object = self.heap.make_handle(object);
                for &property in properties {
                    let (key, value) = ast.node_pair(property);
                    let key = self.evaluate(key)?;
                    let value = self.evaluate(value)?;
                    self.heap
                        .set_property(object, key, value)
                        .map_err(|kind| self.error(property, kind))?;
                }
                Ok(object)
            }

            NodeKind::Call => self.call_expression(node),

            kind => unreachable!("{kind:?} cannot appear in expression position"),
        }
    }

    fn arithmetic(&mut self, node: NodeId, op: fn(f64, f64) -> f64) -> Result<Handle, Error> {
        let (left, right) = self.ast.node_pair(node);
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;
        let result = make_fit(op(
            self.heap.to_double(left.get()),
            self.heap.to_double(right.get()),
        ));
        Ok(self.heap.make_handle(result))
    }

    fn comparison(&mut self, node: NodeId, op: fn(f64, f64) -> bool) -> Result<Handle, Error> {
        let (left, right) = self.ast.node_pair(node);
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;
        let result = op(
            self.heap.to_double(left.get()),
            self.heap.to_double(right.get()),
        );
        Ok(self.heap.boolean_handle(result))
    }

    /// `+`: string concatenation when either side is a string, numeric addition otherwise.
    fn add_values(&mut self, node: NodeId, left: Handle, right: Handle) -> Result<Handle, Error> {
        if is_string_value(left.get()) || is_string_value(right.get()) {
            let left_string = self.heap.to_string(left.get()).map_err(|kind| self.error(node, kind))?;
            let left_string = self.heap.make_handle(left_string);
            let right_string =
                self.heap.to_string(right.get()).map_err(|kind| self.error(node, kind))?;
            let result = self
                .heap
                .string_concat(left_string.get(), right_string)
                .map_err(|kind| self.error(node, kind))?;
            return Ok(self.heap.make_handle(result));
        }
        let result = make_fit(self.heap.to_double(left.get()) + self.heap.to_double(right.get()));
        Ok(self.heap.make_handle(result))
    }

    fn compound_assignment(&mut self, node: NodeId) -> Result<Handle, Error> {
        let ast = self.ast;
        let (target, value) = ast.node_pair(node);
        let reference = Reference::new(self, target)?;
        let value = self.evaluate(value)?;
        let current = reference.get_value(self)?;
        let combined = match ast.kind(node) {
            NodeKind::AddAssign => self.add_values(node, current, value)?,
            kind => {
                let op: fn(f64, f64) -> f64 = match kind {
                    NodeKind::SubtractAssign => |a, b| a - b,
                    NodeKind::MultiplyAssign => |a, b| a * b,
                    NodeKind::DivideAssign => |a, b| a / b,
                    NodeKind::ModuloAssign => |a, b| a % b,
                    _ => unreachable!("not a compound assignment"),
                };
                let result = make_fit(op(
                    self.heap.to_double(current.get()),
                    self.heap.to_double(value.get()),
                ));
                self.heap.make_handle(result)
            }
        };
        reference.set_value(self, combined)
    }

    /// `++`/`--`. The result representation follows the operand: int32 stays int32, a heap
    /// number stays a heap number, everything else becomes a double. Prefix forms yield the
    /// stored value, postfix forms the value before modification.
    fn increment(&mut self, node: NodeId, delta: i64, prefix: bool) -> Result<Handle, Error> {
        let (target, _) = self.ast.node_pair(node);
        let reference = Reference::new(self, target)?;
        let old = reference.get_value(self)?;
        // Snapshot the old value: for named references `old` aliases the binding slot, which
        // the store below overwrites.
        let snapshot = self.heap.make_handle(old.get());

        let old_value = old.get();
        let new = if old_value.is_int32() {
            let incremented = old_value.as_i32().wrapping_add(delta as i32);
            self.heap.make_handle(RawValue::from_i32(incremented))
        } else if is_number_value(old_value) && old_value.is_heap_object() {
            let incremented = HeapNumber::cast(HeapObject::from_value(old_value))
                .value()
                .wrapping_add(delta);
            let raw = self
                .heap
                .new_heap_number(incremented, AllocationPolicy::NotTenured)
                .map_err(|kind| self.error(node, kind))?;
            self.heap.make_handle(raw)
        } else {
            let incremented = self.heap.to_double(old_value) + delta as f64;
            self.heap.make_handle(RawValue::from_f64(incremented))
        };

        let stored = reference.set_value(self, new)?;
        Ok(if prefix { stored } else { snapshot })
    }

    // --------------------------------- Calls --------------------------------

    fn call_expression(&mut self, node: NodeId) -> Result<Handle, Error> {
        let ast = self.ast;
        let (target, _) = ast.node_pair(node);
        let reference = Reference::new(self, target)?;
        let function = reference.get_value(self)?;
        if !self.heap.is_function(function.get()) {
            return Err(self.error(target, ErrorKind::NotAFunction));
        }
        let self_value = reference.property_base();

        let argument_nodes = ast.children(node).unwrap_or(&[]);
        let arguments = self
            .heap
            .new_ks_array(argument_nodes.len() as i32, AllocationPolicy::Tenured)
            .map_err(|kind| self.error(node, kind))?;
        let arguments = self.heap.make_handle(arguments);
        for (i, &argument) in argument_nodes.iter().enumerate() {
            let value = self.evaluate(argument)?;
            self.heap.ks_array_set(arguments, i as i32, value.get());
        }

        self.call(node, self_value, function, arguments)
    }

    /// Calls a function value: binds parameters (missing arguments read as undefined) and the
    /// `arguments_` array in a fresh frame, sets `self` for method calls, and runs the body.
    pub fn call(
        &mut self,
        node: NodeId,
        self_value: Option<Handle>,
        function: Handle,
        arguments: Handle,
    ) -> Result<Handle, Error> {
        if !self.heap.is_function(function.get()) {
            return Err(self.error(node, ErrorKind::NotAFunction));
        }
        let frame = self.enter_frame();
        let result = self.call_in_frame(node, self_value, function, arguments);
        match result {
            Ok(handle) => {
                let value = handle.get();
                self.pop_frame(frame);
                Ok(self.heap.make_handle(value))
            }
            Err(error) => {
                self.pop_frame(frame);
                Err(error)
            }
        }
    }

    fn call_in_frame(
        &mut self,
        node: NodeId,
        self_value: Option<Handle>,
        function: Handle,
        arguments: Handle,
    ) -> Result<Handle, Error> {
        if let Some(receiver) = self_value {
            self.heap.contexts.set_self(self.context, receiver.get());
        }

        // Interning may collect, so it happens before any raw view is taken.
        let arguments_symbol =
            self.heap.intern("arguments_").map_err(|kind| self.error(node, kind))?;

        let view = GcFunction::cast(HeapObject::from_value(function.get()));
        let params = view.params();
        for i in 0..params.len() {
            let name = params.get(i);
            let value = self.heap.ks_array_get(arguments.get(), i);
            self.heap.contexts.push_binding(self.context, name, value);
        }
        self.heap.contexts.push_binding(self.context, arguments_symbol, arguments.get());

        let view = GcFunction::cast(HeapObject::from_value(function.get()));
        if view.is_native() {
            let native = Heap::native_function(view.body_bits());
            return native(&mut *self.heap, arguments, self.context)
                .map_err(|kind| self.error(node, kind));
        }

        let body = self.heap.script_body(view.body_index());
        let mut inner = Execution {
            heap: &mut *self.heap,
            ast: &body.ast,
            context: self.context,
        };
        if let Some(statements) = body.ast.children(body.node) {
            for &statement in statements {
                if let Completion::Return(value) = inner.execute(statement)? {
                    return Ok(value);
                }
            }
        }
        Ok(self.heap.undefined_handle())
    }
}

// -------------------------------- References --------------------------------

enum ReferenceKind {
    Named { base: Option<Handle> },
    Keyed { base: Handle, key: Handle },
    Dotted { base: Handle, key: Handle },
}

/// A settable location: a named binding, an indexed element, or a dotted property. Produced
/// from lvalue expressions; base and key are evaluated once, at creation.
pub(crate) struct Reference {
    kind: ReferenceKind,
    node: NodeId,
}

impl Reference {
    fn new(execution: &mut Execution, node: NodeId) -> Result<Reference, Error> {
        let ast = execution.ast;
        let kind = match ast.kind(node) {
            NodeKind::Identifier => {
                let name = ast.string(node).expect("identifiers carry their name");
                let symbol = execution
                    .heap
                    .intern(name)
                    .map_err(|kind| execution.error(node, kind))?;
                let base = execution.heap.contexts.resolve(execution.context, symbol);
                ReferenceKind::Named { base }
            }
            NodeKind::Index => {
                let (target, key) = ast.node_pair(node);
                let base = execution.evaluate(target)?;
                let key = execution.evaluate(key)?;
                ReferenceKind::Keyed { base, key }
            }
            NodeKind::Dot => {
                let (target, name) = ast.node_pair(node);
                let base = execution.evaluate(target)?;
                let key = execution.evaluate(name)?;
                ReferenceKind::Dotted { base, key }
            }
            _ => return Err(ast.runtime_error(node, ErrorKind::ReferenceError)),
        };
        Ok(Reference { kind, node })
    }

    /// The base to bind as `self` when this reference is the target of a call, if it is a
    /// property reference.
    fn property_base(&self) -> Option<Handle> {
        match &self.kind {
            ReferenceKind::Named { .. } => None,
            ReferenceKind::Keyed { base, .. } | ReferenceKind::Dotted { base, .. } => Some(*base),
        }
    }

    fn get_value(&self, execution: &mut Execution) -> Result<Handle, Error> {
        match &self.kind {
            ReferenceKind::Named { base } => {
                Ok(base.unwrap_or_else(|| execution.heap.undefined_handle()))
            }
            ReferenceKind::Keyed { base, key } => {
                let base_value = base.get();
                if is_ks_array_value(base_value) && is_number_value(key.get()) {
                    let index = execution.heap.to_int32(key.get());
                    let element = execution.heap.ks_array_get(base_value, index);
                    return Ok(execution.heap.make_handle(element));
                }
                if is_ks_object_value(base_value) {
                    let value = execution
                        .heap
                        .get_property(*base, *key)
                        .map_err(|kind| execution.error(self.node, kind))?;
                    return Ok(execution.heap.make_handle(value));
                }
                Err(execution.error(self.node, ErrorKind::ReferenceError))
            }
            ReferenceKind::Dotted { base, key } => {
                if is_ks_object_value(base.get()) {
                    let value = execution
                        .heap
                        .get_property(*base, *key)
                        .map_err(|kind| execution.error(self.node, kind))?;
                    return Ok(execution.heap.make_handle(value));
                }
                Err(execution.error(self.node, ErrorKind::ReferenceError))
            }
        }
    }

    fn set_value(&self, execution: &mut Execution, value: Handle) -> Result<Handle, Error> {
        match &self.kind {
            ReferenceKind::Named { base: Some(slot) } => {
                slot.set(value.get());
                Ok(*slot)
            }
            ReferenceKind::Named { base: None } => {
                // Assignment to an unresolved name creates the binding in the current context.
                let ast = execution.ast;
                let name = ast.string(self.node).expect("identifiers carry their name");
                let symbol = execution
                    .heap
                    .intern(name)
                    .map_err(|kind| execution.error(self.node, kind))?;
                let slot =
                    execution
                        .heap
                        .contexts
                        .push_binding(execution.context, symbol, value.get());
                Ok(slot)
            }
            ReferenceKind::Keyed { base, key } => {
                let base_value = base.get();
                if is_ks_array_value(base_value) && is_number_value(key.get()) {
                    let index = execution.heap.to_int32(key.get());
                    let stored = execution.heap.ks_array_set(*base, index, value.get());
                    return Ok(execution.heap.make_handle(stored));
                }
                if is_ks_object_value(base_value) {
                    execution
                        .heap
                        .set_property(*base, *key, value)
                        .map_err(|kind| execution.error(self.node, kind))?;
                    return Ok(value);
                }
                Err(execution.error(self.node, ErrorKind::ReferenceError))
            }
            ReferenceKind::Dotted { base, key } => {
                if is_ks_object_value(base.get()) {
                    execution
                        .heap
                        .set_property(*base, *key, value)
                        .map_err(|kind| execution.error(self.node, kind))?;
                    return Ok(value);
                }
                Err(execution.error(self.node, ErrorKind::ReferenceError))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ll::lexer::Lexer;
    use crate::ll::parser::Parser;

    fn eval_in(heap: &mut Heap, source: &str) -> Result<Handle, Error> {
        let lexer = Lexer::new(Rc::from("(test)"), source.to_owned());
        let (ast, root) = Parser::new(lexer).parse()?;
        let ast = Rc::new(ast);
        evaluate(heap, &ast, root, ContextId::GLOBAL)
    }

    fn eval(source: &str) -> Result<Heap, Error> {
        let mut heap = Heap::new(64 * 1024, 2 * 1024 * 1024, 2);
        crate::corelib::install(&mut heap).expect("the core library must install");
        eval_in(&mut heap, source)?;
        Ok(heap)
    }

    fn global(heap: &mut Heap, name: &str) -> RawValue {
        let symbol = heap.intern(name).unwrap();
        heap.contexts
            .resolve(ContextId::GLOBAL, symbol)
            .map(|slot| slot.get())
            .unwrap_or(RawValue::UNDEFINED)
    }

    fn global_string(heap: &mut Heap, name: &str) -> String {
        let value = global(heap, name);
        heap.to_display_string(value)
    }

    #[test]
    fn arithmetic_narrows_integral_results() {
        let mut heap = eval("a = 1 + 2\nb = 1 / 2\nc = 3 * 2.0\nd = 1.5 + 1").unwrap();
        assert!(global(&mut heap, "a").is_int32());
        assert_eq!(global(&mut heap, "a").as_i32(), 3);
        assert!(global(&mut heap, "b").is_double());
        assert_eq!(global(&mut heap, "b").as_f64(), 0.5);
        // Integral doubles within range narrow back to int32.
        assert!(global(&mut heap, "c").is_int32());
        assert_eq!(global(&mut heap, "c").as_i32(), 6);
        assert!(global(&mut heap, "d").is_double());
    }

    #[test]
    fn int32_overflow_widens_to_double() {
        let mut heap = eval("x = 2147483647 + 1").unwrap();
        let x = global(&mut heap, "x");
        assert!(x.is_double());
        assert_eq!(x.as_f64(), 2147483648.0);
    }

    #[test]
    fn division_by_zero_follows_ieee754() {
        let mut heap = eval("inf = 1 / 0\nnan = 0 / 0").unwrap();
        assert_eq!(global(&mut heap, "inf").as_f64(), f64::INFINITY);
        assert!(global(&mut heap, "nan").as_f64().is_nan());
        let nan = global(&mut heap, "nan");
        assert_eq!(heap.to_int32(nan), 0);
    }

    #[test]
    fn string_addition_concatenates_either_way() {
        let mut heap = eval("a = \"foo\" + 1\nb = 1 + \"foo\"").unwrap();
        assert_eq!(global_string(&mut heap, "a"), "foo1");
        assert_eq!(global_string(&mut heap, "b"), "1foo");
    }

    #[test]
    fn equality_crosses_representations() {
        let mut heap = eval(
            "a = 1 == 1.0\nb = \"x\" == \"x\"\nc = 1 == 2\nd = {} == {}\ne = null == null",
        )
        .unwrap();
        assert!(global(&mut heap, "a").is_true());
        assert!(global(&mut heap, "b").is_true());
        assert!(!global(&mut heap, "c").is_true());
        // Distinct objects are never equal.
        assert!(!global(&mut heap, "d").is_true());
        assert!(global(&mut heap, "e").is_true());
    }

    #[test]
    fn logical_operators_short_circuit() {
        let mut heap = eval(
            "function tick() { called = called + 1\nreturn true }\n\
             called = 0\n\
             a = false && tick()\n\
             b = true || tick()\n\
             c = true && tick()",
        )
        .unwrap();
        assert_eq!(global(&mut heap, "called").as_i32(), 1);
        assert!(!global(&mut heap, "a").is_true());
        assert!(global(&mut heap, "b").is_true());
        assert!(global(&mut heap, "c").is_true());
    }

    #[test]
    fn the_conditional_evaluates_only_the_taken_branch() {
        let mut heap = eval(
            "function tick() { called = called + 1\nreturn 1 }\n\
             called = 0\n\
             x = 1 < 2 ? 10 : tick()",
        )
        .unwrap();
        assert_eq!(global(&mut heap, "x").as_i32(), 10);
        assert_eq!(global(&mut heap, "called").as_i32(), 0);
    }

    #[test]
    fn for_loops_run_their_body() {
        let mut heap = eval("sum = 0\nfor (i = 0; i < 10; i = i + 1) { sum += i }").unwrap();
        assert_eq!(global(&mut heap, "sum").as_i32(), 45);
        assert_eq!(global(&mut heap, "i").as_i32(), 10);
    }

    #[test]
    fn break_and_continue_unwind_the_loop() {
        let mut heap = eval(
            "sum = 0\n\
             for (i = 0; i < 10; i = i + 1) {\n\
                 if (i % 2 == 0) continue\n\
                 if (i > 6) break\n\
                 sum += i\n\
             }",
        )
        .unwrap();
        // 1 + 3 + 5; 7 breaks out before the add.
        assert_eq!(global(&mut heap, "sum").as_i32(), 9);
    }

    #[test]
    fn while_loops_and_compound_assignment() {
        let mut heap = eval("n = 1\nwhile (n < 100) n *= 2").unwrap();
        assert_eq!(global(&mut heap, "n").as_i32(), 128);
    }

    #[test]
    fn functions_return_values() {
        let mut heap = eval("function add(a, b) { return a + b }\nr = add(2, 3)").unwrap();
        assert_eq!(global(&mut heap, "r").as_i32(), 5);
    }

    #[test]
    fn missing_arguments_read_as_undefined() {
        let mut heap = eval("function id(a) { return a }\nu = id()").unwrap();
        assert!(global(&mut heap, "u").is_undefined());
    }

    #[test]
    fn the_arguments_array_is_bound() {
        let mut heap = eval("function count() { return arguments_.length }\nn = count(1, 2, 3)")
            .unwrap();
        assert_eq!(global(&mut heap, "n").as_i32(), 3);
    }

    #[test]
    fn return_unwinds_nested_blocks_and_loops() {
        let mut heap = eval(
            "function find() {\n\
                 for (i = 0; i < 10; i = i + 1) {\n\
                     { if (i == 3) { return i } }\n\
                 }\n\
                 return -1\n\
             }\n\
             found = find()",
        )
        .unwrap();
        assert_eq!(global(&mut heap, "found").as_i32(), 3);
    }

    #[test]
    fn nested_member_assignment() {
        let mut heap = eval("obj = {a: 1, b: {c: 2}}\nobj.b.c = obj.b.c + 40\nx = obj.b.c").unwrap();
        assert_eq!(global(&mut heap, "x").as_i32(), 42);
    }

    #[test]
    fn object_literal_duplicate_keys_last_write_wins() {
        let mut heap = eval("o = {a: 1, a: 2}\nx = o.a").unwrap();
        assert_eq!(global(&mut heap, "x").as_i32(), 2);
    }

    #[test]
    fn array_push_and_length() {
        let mut heap = eval(
            "xs = []\nfor (i = 0; i < 100; i = i + 1) xs.push(i)\n\
             n = xs.length\nfirst = xs[0]\nlast = xs[99]\nbeyond = xs[100]",
        )
        .unwrap();
        assert_eq!(global(&mut heap, "n").as_i32(), 100);
        assert_eq!(global(&mut heap, "first").as_i32(), 0);
        assert_eq!(global(&mut heap, "last").as_i32(), 99);
        assert!(global(&mut heap, "beyond").is_undefined());
    }

    #[test]
    fn string_keys_reach_the_interceptors() {
        let mut heap = eval("xs = [1, 2]\nn = xs[\"length\"]\nm = \"hello\".length").unwrap();
        assert_eq!(global(&mut heap, "n").as_i32(), 2);
        assert_eq!(global(&mut heap, "m").as_i32(), 5);
    }

    #[test]
    fn postfix_yields_the_old_value_prefix_the_new() {
        let mut heap = eval("i = 1\na = i++\nb = i\nc = ++i").unwrap();
        assert_eq!(global(&mut heap, "a").as_i32(), 1);
        assert_eq!(global(&mut heap, "b").as_i32(), 2);
        assert_eq!(global(&mut heap, "c").as_i32(), 3);
    }

    #[test]
    fn unbound_identifiers_read_as_undefined() {
        let mut heap = eval("x = missing").unwrap();
        assert!(global(&mut heap, "x").is_undefined());
    }

    #[test]
    fn assignment_yields_the_stored_value() {
        let mut heap = eval("x = (y = 5)").unwrap();
        assert_eq!(global(&mut heap, "x").as_i32(), 5);
        assert_eq!(global(&mut heap, "y").as_i32(), 5);
    }

    #[test]
    fn calling_a_non_function_is_an_error() {
        let error = eval("x = 1\nx()").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::NotAFunction));
    }

    #[test]
    fn incrementing_a_literal_is_a_reference_error() {
        let error = eval("++1").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::ReferenceError));
    }

    #[test]
    fn blocks_scope_their_bindings_dynamically() {
        // Inner blocks see and may shadow outer bindings; fresh names created inside a block
        // disappear with it.
        let mut heap = eval("x = 1\n{ x = 2\ninner = 3 }\ny = inner").unwrap();
        assert_eq!(global(&mut heap, "x").as_i32(), 2);
        assert!(global(&mut heap, "y").is_undefined());
    }

    #[test]
    fn assert_builtin_raises_on_falsehood() {
        assert!(eval("Assert(1 == 1)").is_ok());
        let error = eval("Assert(1 == 2)").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::AssertionFailed));
    }

    #[test]
    fn loop_allocated_strings_are_collected() {
        // A hot loop of short-lived strings must be absorbed by young collections, with the
        // loop-carried accumulator surviving them.
        let mut heap = Heap::new(16 * 1024, 1024 * 1024, 2);
        crate::corelib::install(&mut heap).unwrap();
        eval_in(
            &mut heap,
            "keep = \"\"\n\
             for (i = 0; i < 2000; i = i + 1) {\n\
                 s = \"string \" + i\n\
                 if (i % 500 == 0) { keep = keep + \"x\" }\n\
             }",
        )
        .unwrap();
        assert!(heap.stats().young_collections > 0);
        assert_eq!(global_string(&mut heap, "keep"), "xxxx");
    }

    #[test]
    fn arrays_survive_a_young_collection_intact() {
        let mut heap = eval(
            "xs = []\nfor (i = 0; i < 1000; i = i + 1) xs.push(i)\nn = xs.length",
        )
        .unwrap();
        assert_eq!(global(&mut heap, "n").as_i32(), 1000);
        heap.collect(crate::ll::heap::AllocationSpace::New);
        let xs = global(&mut heap, "xs");
        let xs = heap.make_handle(xs);
        for i in 0..1000 {
            assert_eq!(heap.ks_array_get(xs.get(), i).as_i32(), i);
        }
    }

    #[test]
    fn an_empty_array_has_length_zero() {
        let mut heap = eval("xs = []\nn = xs.length").unwrap();
        assert_eq!(global(&mut heap, "n").as_i32(), 0);
    }
}
