//! skiff-kernel: the core of the skiff embeddable command shell.
//!
//! This crate provides:
//!
//! - **Parser**: Hand-written scanner producing the token tree (words with
//!   interpolation parts, closures, executions, arrays, expressions)
//! - **Values**: The tagged union of scalars, lists, maps, callables, and
//!   opaque host handles
//! - **Session**: Per-client variable bindings, stream triad, and close
//!   semantics
//! - **Closure**: The tree-walking evaluator and statement driver
//! - **Dispatch**: Command resolution with scoped lookup and a guarded
//!   `default` fallback, plus host method dispatch
//! - **Pipeline**: Concurrent stage execution with inter-stage byte pipes
//! - **Expr**: The default arithmetic/logical expression evaluator
//!
//! # Embedding
//!
//! ```no_run
//! use std::sync::Arc;
//! use skiff_kernel::{Shell, Streams, Value};
//!
//! # async fn demo() -> skiff_kernel::Result<()> {
//! let shell = Arc::new(Shell::new());
//! shell.register_fn("greet", |_session, args| {
//!     Ok(Value::Text(format!("hello {}", args.first().cloned().unwrap_or(Value::Null))))
//! });
//!
//! let session = shell.open_session(Streams::host());
//! let result = session.execute("greet world").await?;
//! assert_eq!(result, Value::Text("hello world".into()));
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod closure;
pub mod error;
pub mod expr;
pub mod parser;
pub mod session;
pub mod shell;
pub mod stream;
pub mod value;

mod dispatch;
mod expand;
mod pipeline;

pub use closure::Closure;
pub use error::{Result, ShellError};
pub use expr::DefaultExprEvaluator;
pub use session::{Session, COMMANDS, LOCATION, VARIABLES};
pub use shell::{ExecutionListener, ExprEvaluator, FnCallable, HostInvoker, NoHostInvoker, Shell};
pub use stream::{pipe, pipe_default, InStream, OutStream, PipeReader, PipeWriter, SharedBuffer, Streams};
pub use value::{json_to_value, value_to_json, ArgList, Callable, OpaqueValue, Value};
