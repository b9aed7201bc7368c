//! Kipper is an embeddable, JavaScript-like scripting language for Rust.
//!
//! The runtime is a tree-walking interpreter over a NaN-boxed value
//! representation and a generational garbage-collected heap: a semispace
//! copying young generation that tenures survivors into a mark-compact old
//! generation. The [high-level API][Engine] compiles and runs scripts and
//! converts values at the boundary; the [low-level `ll` module][ll] exposes
//! the heap, collector, and evaluator themselves.
//!
//! ```no_run
//! use kipper::{Engine, Value};
//!
//! let mut engine = Engine::new();
//! engine.eval("(example)", "x = 2 + 3")?;
//! assert_eq!(engine.get_global("x"), Some(Value::Number(5.0)));
//! # Ok::<(), kipper::Error>(())
//! ```

mod corelib;
mod hl;
pub mod ll;

pub use hl::*;
pub use ll::error::{Error, ErrorKind, Location};
pub use ll::heap::AllocationSpace;
