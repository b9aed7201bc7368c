//! The abstract syntax tree.
//!
//! Nodes are stored in a flat arena addressed by [`NodeId`]. Each node has a kind, a pair of
//! child references, and optionally a number, a string, or a list of children.

use std::fmt;
use std::rc::Rc;

use crate::ll::error::{Error, ErrorKind, Location};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const EMPTY: Self = NodeId(0);
}

#[derive(Debug)]
pub struct Ast {
    module_name: Rc<str>,

    nodes: Vec<(NodeKind, (u32, u32))>,
    locations: Vec<Location>,

    data: Vec<Option<NodeData>>,
}

#[derive(Debug)]
enum NodeData {
    Number(f64),
    String(String),
    Children(Vec<NodeId>),
}

impl Ast {
    pub fn new(module_name: Rc<str>) -> Self {
        let mut ast = Self {
            module_name,
            nodes: Vec::new(),
            locations: Vec::new(),
            data: Vec::new(),
        };
        let _empty = ast.create_node(NodeKind::Empty, ());
        ast
    }

    pub fn module_name(&self) -> &Rc<str> {
        &self.module_name
    }

    fn create_node(&mut self, kind: NodeKind, pair: impl ToNodePair) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push((kind, pair.to_node_pair()));
        self.locations.push(Location::UNINIT);
        self.data.push(None);
        NodeId(id as u32)
    }

    pub fn build_node(&mut self, kind: NodeKind, pair: impl ToNodePair) -> NodeBuilder<'_> {
        let node = self.create_node(kind, pair);
        NodeBuilder { ast: self, node }
    }

    pub fn kind(&self, node: NodeId) -> NodeKind {
        unsafe { self.nodes.get_unchecked(node.0 as usize).0 }
    }

    pub fn pair(&self, node: NodeId) -> (u32, u32) {
        unsafe { self.nodes.get_unchecked(node.0 as usize).1 }
    }

    pub fn location(&self, node: NodeId) -> Location {
        unsafe { *self.locations.get_unchecked(node.0 as usize) }
    }

    pub fn number(&self, node: NodeId) -> Option<f64> {
        if let &Some(NodeData::Number(n)) = unsafe { self.data.get_unchecked(node.0 as usize) } {
            return Some(n);
        }
        None
    }

    pub fn string(&self, node: NodeId) -> Option<&str> {
        if let Some(NodeData::String(s)) = unsafe { self.data.get_unchecked(node.0 as usize) } {
            return Some(s);
        }
        None
    }

    pub fn children(&self, node: NodeId) -> Option<&[NodeId]> {
        if let Some(NodeData::Children(c)) = unsafe { self.data.get_unchecked(node.0 as usize) } {
            return Some(c);
        }
        None
    }

    pub fn node_pair(&self, node: NodeId) -> (NodeId, NodeId) {
        let (left, right) = self.pair(node);
        (NodeId(left), NodeId(right))
    }

    pub fn error(&self, node: NodeId, kind: ErrorKind) -> Error {
        Error::Compile {
            module_name: Rc::clone(&self.module_name),
            kind,
            location: self.location(node),
        }
    }

    pub fn runtime_error(&self, node: NodeId, kind: ErrorKind) -> Error {
        Error::Runtime {
            module_name: Rc::clone(&self.module_name),
            kind,
            location: self.location(node),
        }
    }
}

pub struct NodeBuilder<'a> {
    ast: &'a mut Ast,
    node: NodeId,
}

impl<'a> NodeBuilder<'a> {
    pub fn with_location(self, location: Location) -> Self {
        unsafe {
            *self.ast.locations.get_unchecked_mut(self.node.0 as usize) = location;
        }
        self
    }

    pub fn with_number(self, number: f64) -> Self {
        unsafe {
            *self.ast.data.get_unchecked_mut(self.node.0 as usize) = Some(NodeData::Number(number));
        }
        self
    }

    pub fn with_string(self, string: String) -> Self {
        unsafe {
            *self.ast.data.get_unchecked_mut(self.node.0 as usize) = Some(NodeData::String(string));
        }
        self
    }

    pub fn with_children(self, children: Vec<NodeId>) -> Self {
        unsafe {
            *self.ast.data.get_unchecked_mut(self.node.0 as usize) =
                Some(NodeData::Children(children));
        }
        self
    }

    pub fn done(self) -> NodeId {
        self.node
    }
}

pub trait ToNodePair {
    fn to_node_pair(&self) -> (u32, u32);
}

impl ToNodePair for (u32, u32) {
    fn to_node_pair(&self) -> (u32, u32) {
        *self
    }
}

impl ToNodePair for (NodeId, NodeId) {
    fn to_node_pair(&self) -> (u32, u32) {
        (self.0 .0, self.1 .0)
    }
}

impl ToNodePair for NodeId {
    fn to_node_pair(&self) -> (u32, u32) {
        (self.0, 0)
    }
}

impl ToNodePair for () {
    fn to_node_pair(&self) -> (u32, u32) {
        (0, 0)
    }
}

/// The kind of an AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    /// An empty node. Use `NodeId::EMPTY` to refer to an AST's empty node.
    Empty,

    True,
    False,
    Null,
    Undefined,
    /// An integer literal; carries its value as number data.
    Int,
    /// A decimal literal; always a double.
    Number,
    String,

    /// A name in expression position, resolved against the context chain.
    Identifier,
    /// A name used as data: a dotted member name, a parameter, or an object-literal key.
    IdentifierName,

    Negate,
    UnaryPlus,
    Not,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,

    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,

    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,

    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    ModuloAssign,

    /// `condition ? a : b`; children are `[condition, then, else]`.
    Conditional,
    /// `target[key]`; pair is `(target, key)`.
    Index,
    /// `target.name`; pair is `(target, IdentifierName)`.
    Dot,
    /// `f(a, b)`; pair is the target, children are the arguments.
    Call,
    /// `[a, b, c]`; children are the elements.
    Array,
    /// `{k: v}`; children are `Pair` nodes.
    Object,
    /// One `key: value` of an object literal; pair is `(key, value)`.
    Pair,

    /// The whole translation unit; children are declarations and statements.
    Main,
    /// `{ ... }`; children are the statements.
    Block,
    /// `if (c) s else s`; pair is `(condition, then)`, children are `[else]` or empty.
    If,
    /// `while (c) s`; pair is `(condition, body)`.
    While,
    /// `for (init; c; update) s`; children are `[init, condition, update, body]`, with
    /// `NodeId::EMPTY` for omitted parts.
    For,
    /// `return e;`; pair is the value or `NodeId::EMPTY`.
    Return,
    Break,
    Continue,

    /// `function name(params) { ... }`; pair is `(name, Parameters)`, children are the body.
    Func,
    /// The parameter list of a function; children are `IdentifierName` nodes.
    Parameters,
}

/// A `Debug` formatter that pretty-prints ASTs.
pub struct DumpAst<'a>(pub &'a Ast, pub NodeId);

impl fmt::Debug for DumpAst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let DumpAst(ast, root_node) = self;

        fn write_indent(f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
            for _ in 0..level {
                f.write_str("  ")?;
            }
            Ok(())
        }

        fn dump_tree_rec(
            f: &mut fmt::Formatter<'_>,
            ast: &Ast,
            node: NodeId,
            indent: usize,
            prefix: &str,
        ) -> fmt::Result {
            write_indent(f, indent)?;
            f.write_str(prefix)?;
            write!(f, "{:?} ", ast.kind(node))?;
            if let Some(n) = ast.number(node) {
                write!(f, "{}", n)?;
            }
            if let Some(s) = ast.string(node) {
                write!(f, "{:?}", s)?;
            }
            if ast.children(node).map(|children| children.is_empty()).unwrap_or(false) {
                write!(f, " (children empty)")?;
            }
            writeln!(f)?;

            let (left, right) = ast.node_pair(node);
            if left != NodeId::EMPTY {
                dump_tree_rec(f, ast, left, indent + 1, "L: ")?;
            }
            if right != NodeId::EMPTY {
                dump_tree_rec(f, ast, right, indent + 1, "R: ")?;
            }

            if let Some(children) = ast.children(node) {
                if !children.is_empty() {
                    for &child in children {
                        dump_tree_rec(f, ast, child, indent + 1, "")?;
                    }
                }
            }

            Ok(())
        }

        dump_tree_rec(f, ast, *root_node, 0, "")
    }
}
