//! The shell processor: command registry, host hooks, and session factory.
//!
//! A [`Shell`] owns everything shared between sessions — registered
//! commands, constants, execution listeners, the host method invoker, and
//! the expression evaluator. Sessions are opened from it and keep it alive
//! through an `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Result, ShellError};
use crate::expr::DefaultExprEvaluator;
use crate::session::Session;
use crate::stream::Streams;
use crate::value::{Callable, Value};

/// Host-side reflective method dispatch.
///
/// The evaluator never inspects host values itself; every method call on a
/// non-shell target is delegated here.
#[async_trait]
pub trait HostInvoker: Send + Sync {
    async fn invoke(
        &self,
        session: &Arc<Session>,
        target: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value>;
}

/// Default invoker: rejects every method call.
pub struct NoHostInvoker;

#[async_trait]
impl HostInvoker for NoHostInvoker {
    async fn invoke(
        &self,
        _session: &Arc<Session>,
        target: &Value,
        method: &str,
        _args: Vec<Value>,
    ) -> Result<Value> {
        Err(ShellError::HostInvoke(format!(
            "no host dispatcher for method '{method}' on {}",
            target.type_name()
        )))
    }
}

/// Pluggable evaluator behind `%( .. )` tokens.
pub trait ExprEvaluator: Send + Sync {
    fn eval(&self, session: &Session, source: &str) -> Result<Value>;
}

/// Observer notified around every top-level execute.
pub trait ExecutionListener: Send + Sync {
    fn before_execute(&self, _session: &Session, _source: &str) {}

    fn after_execute(
        &self,
        _session: &Session,
        _source: &str,
        _outcome: std::result::Result<&Value, &ShellError>,
    ) {
    }
}

/// Adapter turning a plain function into a [`Callable`].
pub struct FnCallable<F> {
    name: String,
    f: F,
}

impl<F> FnCallable<F>
where
    F: Fn(&Arc<Session>, Vec<Value>) -> Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Callable for FnCallable<F>
where
    F: Fn(&Arc<Session>, Vec<Value>) -> Result<Value> + Send + Sync,
{
    async fn invoke(&self, session: &Arc<Session>, args: Vec<Value>) -> Result<Value> {
        (self.f)(session, args)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// The shell processor.
pub struct Shell {
    /// Commands stored under `scope:name` keys; unscoped registrations land
    /// in the `*` scope.
    commands: RwLock<HashMap<String, Arc<dyn Callable>>>,
    constants: RwLock<HashMap<String, Value>>,
    listeners: RwLock<Vec<Arc<dyn ExecutionListener>>>,
    invoker: RwLock<Arc<dyn HostInvoker>>,
    expr: RwLock<Arc<dyn ExprEvaluator>>,
}

impl Shell {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            constants: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            invoker: RwLock::new(Arc::new(NoHostInvoker)),
            expr: RwLock::new(Arc::new(DefaultExprEvaluator)),
        }
    }

    /// Open a session bound to the given stream triad.
    pub fn open_session(self: &Arc<Self>, streams: Streams) -> Arc<Session> {
        Session::open(Arc::clone(self), streams)
    }

    /// Register a command. `name` may carry an explicit `scope:`; bare
    /// names register into the `*` scope.
    pub fn register(&self, name: &str, command: Arc<dyn Callable>) {
        let key = scoped_key(name);
        self.commands
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, command);
    }

    /// Register a plain function as a command.
    pub fn register_fn<F>(&self, name: &str, f: F)
    where
        F: Fn(&Arc<Session>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnCallable::new(name, f)));
    }

    /// Remove a command registration.
    pub fn unregister(&self, name: &str) {
        let key = scoped_key(name);
        self.commands
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    /// All registered `scope:name` keys, sorted.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Resolve a command name against the registry.
    ///
    /// Scoped names resolve directly. Unscoped names are tried against each
    /// scope in the session's `SCOPE` variable (colon-separated, defaulting
    /// to `*`); the `*` scope matches any registered scope, in sorted key
    /// order for determinism.
    pub fn lookup_command(&self, name: &str, scope: Option<Value>) -> Option<Arc<dyn Callable>> {
        let commands = self.commands.read().unwrap_or_else(|e| e.into_inner());
        if name.contains(':') {
            return commands.get(name).cloned();
        }

        let scopes = scope
            .map(|v| v.to_string())
            .unwrap_or_else(|| "*".to_string());
        for scope in scopes.split(':') {
            if scope == "*" {
                let suffix = format!(":{name}");
                let mut keys: Vec<&String> = commands.keys().collect();
                keys.sort();
                for key in keys {
                    if key.ends_with(&suffix) {
                        return commands.get(key).cloned();
                    }
                }
            } else if let Some(command) = commands.get(&format!("{scope}:{name}")) {
                return Some(Arc::clone(command));
            }
        }
        None
    }

    /// Define a constant visible to every session, ahead of variables in
    /// the lookup order.
    pub fn constant(&self, name: &str, value: Value) {
        self.constants
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value);
    }

    pub(crate) fn get_constant(&self, name: &str) -> Option<Value> {
        self.constants
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn add_listener(&self, listener: Arc<dyn ExecutionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Replace the host method invoker.
    pub fn set_host_invoker(&self, invoker: Arc<dyn HostInvoker>) {
        *self.invoker.write().unwrap_or_else(|e| e.into_inner()) = invoker;
    }

    pub(crate) fn host_invoker(&self) -> Arc<dyn HostInvoker> {
        Arc::clone(&self.invoker.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replace the expression evaluator behind `%( .. )`.
    pub fn set_expr_evaluator(&self, expr: Arc<dyn ExprEvaluator>) {
        *self.expr.write().unwrap_or_else(|e| e.into_inner()) = expr;
    }

    pub(crate) fn expr_evaluator(&self) -> Arc<dyn ExprEvaluator> {
        Arc::clone(&self.expr.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub(crate) fn notify_before(&self, session: &Session, source: &str) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener.before_execute(session, source);
        }
    }

    pub(crate) fn notify_after(
        &self,
        session: &Session,
        source: &str,
        outcome: std::result::Result<&Value, &ShellError>,
    ) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener.after_execute(session, source, outcome);
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

fn scoped_key(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("*:{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_unscoped() {
        let shell = Shell::new();
        shell.register_fn("probe", |_, _| Ok(Value::Int(1)));

        assert!(shell.lookup_command("probe", None).is_some());
        assert!(shell.lookup_command("*:probe", None).is_some());
        assert!(shell.lookup_command("missing", None).is_none());
    }

    #[test]
    fn scoped_lookup_honours_scope_list() {
        let shell = Shell::new();
        shell.register_fn("net:probe", |_, _| Ok(Value::Int(1)));

        // Not visible through an unrelated scope.
        assert!(shell
            .lookup_command("probe", Some(Value::Text("fs".into())))
            .is_none());
        // Visible through its own scope and through `*`.
        assert!(shell
            .lookup_command("probe", Some(Value::Text("fs:net".into())))
            .is_some());
        assert!(shell.lookup_command("probe", None).is_some());
    }

    #[test]
    fn wildcard_scope_is_deterministic() {
        let shell = Shell::new();
        shell.register_fn("b:probe", |_, _| Ok(Value::Int(2)));
        shell.register_fn("a:probe", |_, _| Ok(Value::Int(1)));

        let command = shell.lookup_command("probe", None).expect("resolved");
        assert_eq!(command.describe(), "a:probe");
    }

    #[test]
    fn unregister_removes() {
        let shell = Shell::new();
        shell.register_fn("gone", |_, _| Ok(Value::Null));
        shell.unregister("gone");
        assert!(shell.lookup_command("gone", None).is_none());
    }

    #[test]
    fn command_names_sorted() {
        let shell = Shell::new();
        shell.register_fn("zeta", |_, _| Ok(Value::Null));
        shell.register_fn("alpha", |_, _| Ok(Value::Null));
        assert_eq!(shell.command_names(), vec!["*:alpha", "*:zeta"]);
    }
}
