//! Command and method dispatch.
//!
//! Command resolution ladder: the frame's `get` (which already consults
//! variables and the scoped registry), then the `*` scope, then the
//! `default` handler under a per-session re-entry lock, then
//! `CommandNotFound`. Method calls — including `.`-chained calls and list
//! indexing — are resolved here as well; anything the shell cannot handle
//! itself is delegated to the host invoker.

use std::sync::Arc;

use crate::closure::Closure;
use crate::error::{Result, ShellError};
use crate::session::Session;
use crate::value::Value;

/// Hidden session variable guarding default-handler re-entry.
pub(crate) const DEFAULT_LOCK: &str = ".defaultLock";

/// Holds the default-lock for the duration of a default-handler
/// invocation; released on drop, including when the invocation future is
/// dropped mid-flight.
struct DefaultLockGuard<'a> {
    session: &'a Session,
}

impl<'a> DefaultLockGuard<'a> {
    fn acquire(session: &'a Session) -> Self {
        session.put(DEFAULT_LOCK, Value::Bool(true));
        Self { session }
    }
}

impl Drop for DefaultLockGuard<'_> {
    fn drop(&mut self) {
        self.session.remove(DEFAULT_LOCK);
    }
}

/// Resolve and invoke a command by name.
pub(crate) async fn execute_cmd(
    closure: &Arc<Closure>,
    name: &str,
    mut args: Vec<Value>,
) -> Result<Value> {
    let session = closure.session();

    if let Some(Value::Callable(command)) = closure.get(name).await {
        return command.invoke(session, args).await;
    }

    if !name.contains(':') {
        if let Some(Value::Callable(command)) = closure.get(&format!("*:{name}")).await {
            return command.invoke(session, args).await;
        }
    }

    if session.variable(DEFAULT_LOCK).is_none() {
        let handler = match closure.get("default").await {
            Some(Value::Callable(handler)) => Some(handler),
            _ => match closure.get("*:default").await {
                Some(Value::Callable(handler)) => Some(handler),
                _ => None,
            },
        };
        if let Some(handler) = handler {
            let _lock = DefaultLockGuard::acquire(session);
            args.insert(0, Value::Text(name.to_string()));
            return handler.invoke(session, args).await;
        }
    }

    Err(ShellError::CommandNotFound {
        name: name.to_string(),
    })
}

/// Invoke a method on a target value.
///
/// With no arguments the statement's value is the target itself. A leading
/// `.` argument enters chain mode: arguments accumulate until the next `.`
/// or the end, each boundary invoking the named method and making its
/// result the new target. A list target with a single argument is indexed
/// (`length` yields the element count). A callable target is invoked
/// directly. Everything else goes to the host invoker.
pub(crate) async fn execute_method(
    closure: &Arc<Closure>,
    target: Value,
    mut values: Vec<Value>,
) -> Result<Value> {
    let session = closure.session();
    if values.is_empty() {
        return Ok(target);
    }

    if values.len() > 1 && is_dot(&values[0]) {
        values.remove(0);
        let invoker = session.shell().host_invoker();
        let mut target = target;
        let mut args: Vec<Value> = Vec::new();
        for value in values {
            if is_dot(&value) {
                if args.is_empty() {
                    return Err(ShellError::HostInvoke(
                        "missing method name in chain".to_string(),
                    ));
                }
                let method = args.remove(0).to_string();
                target = invoker
                    .invoke(session, &target, &method, std::mem::take(&mut args))
                    .await?;
            } else {
                args.push(value);
            }
        }
        if args.is_empty() {
            return Ok(target);
        }
        let method = args.remove(0).to_string();
        return invoker.invoke(session, &target, &method, args).await;
    }

    if let Value::Callable(command) = &target {
        return command.invoke(session, values).await;
    }

    if let Value::List(items) = &target {
        if values.len() == 1 {
            let index = values[0].to_string();
            if index == "length" {
                return Ok(Value::Int(items.len() as i64));
            }
            let index: usize = index
                .parse()
                .map_err(|_| ShellError::HostInvoke(format!("invalid index: {index}")))?;
            return items
                .get(index)
                .cloned()
                .ok_or_else(|| ShellError::HostInvoke(format!("index out of bounds: {index}")));
        }
    }

    let method = values.remove(0).to_string();
    session
        .shell()
        .host_invoker()
        .invoke(session, &target, &method, values)
        .await
}

fn is_dot(value: &Value) -> bool {
    value.to_string() == "."
}
