//! Sessions: the per-client binding environment.
//!
//! A session owns a mutable variable map, the current stream triad, and the
//! closed flag. Variable reads go through a ladder: reserved names
//! (`.variables`, `.commands`), shell constants, computed `#name` function
//! variables, plain variables, and finally the command registry consulted
//! with the session's `SCOPE`.
//!
//! Closing a session is final: every subsequent execute fails with
//! `SessionClosed` before any token is evaluated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::closure::Closure;
use crate::dispatch::DEFAULT_LOCK;
use crate::error::{Result, ShellError};
use crate::pipeline;
use crate::shell::Shell;
use crate::stream::Streams;
use crate::value::Value;

/// Reserved name returning the set of variable names.
pub const VARIABLES: &str = ".variables";
/// Reserved name returning the command registry view.
pub const COMMANDS: &str = ".commands";
/// Variable holding the last error location.
pub const LOCATION: &str = ".location";

/// A process-scoped binding environment serving arbitrarily many executes.
pub struct Session {
    shell: Arc<Shell>,
    variables: Mutex<HashMap<String, Value>>,
    streams: Mutex<Streams>,
    closed: AtomicBool,
    /// First reported error location of the current execute.
    location: Mutex<Option<String>>,
}

impl Session {
    pub(crate) fn open(shell: Arc<Shell>, streams: Streams) -> Arc<Self> {
        Arc::new(Self {
            shell,
            variables: Mutex::new(HashMap::new()),
            streams: Mutex::new(streams),
            closed: AtomicBool::new(false),
            location: Mutex::new(None),
        })
    }

    pub fn shell(&self) -> &Arc<Shell> {
        &self.shell
    }

    /// Run a command line and return the value of its last pipeline.
    pub async fn execute(self: &Arc<Self>, source: &str) -> Result<Value> {
        if self.is_closed() {
            return Err(ShellError::SessionClosed);
        }
        self.shell.notify_before(self, source);
        let result = self.execute_inner(source).await;
        self.shell.notify_after(self, source, result.as_ref());
        result
    }

    async fn execute_inner(self: &Arc<Self>, source: &str) -> Result<Value> {
        self.clear_location();
        let closure = Closure::new(Arc::clone(self), None, source)?;
        closure.execute(None).await
    }

    /// Mark the session closed. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // --- Variables ---

    /// Full variable-read ladder; `None` when the name resolves nowhere.
    pub async fn get(self: &Arc<Self>, name: &str) -> Option<Value> {
        if name == VARIABLES {
            let names = self
                .variable_names()
                .into_iter()
                .map(Value::Text)
                .collect();
            return Some(Value::List(names));
        }
        if name == COMMANDS {
            let names = self
                .shell
                .command_names()
                .into_iter()
                .map(Value::Text)
                .collect();
            return Some(Value::List(names));
        }
        if let Some(value) = self.shell.get_constant(name) {
            return Some(value);
        }

        // A `#name` variable holding a callable is invoked on read of
        // `name`; its failures read as an unset variable.
        match self.variable(&format!("#{name}")) {
            Some(Value::Callable(f)) => {
                return f.invoke(self, Vec::new()).await.ok();
            }
            Some(value) => return Some(value),
            None => {}
        }

        if let Some(value) = self.variable(name) {
            return Some(value);
        }
        self.shell
            .lookup_command(name, self.variable("SCOPE"))
            .map(Value::Callable)
    }

    /// Plain variable read, skipping constants, computed variables, and the
    /// command registry.
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.vars().get(name).cloned()
    }

    /// Bind a variable; returns the previous value if any.
    pub fn put(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars().insert(name.into(), value)
    }

    /// Remove a variable; returns the removed value if any.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars().remove(name)
    }

    /// Sorted variable names.
    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars().keys().cloned().collect();
        names.sort();
        names
    }

    fn vars(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.variables.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- Streams ---

    /// The session's stream triad.
    pub fn streams(&self) -> Streams {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the session's stream triad.
    pub fn set_streams(&self, streams: Streams) {
        *self.streams.lock().unwrap_or_else(|e| e.into_inner()) = streams;
    }

    /// The effective triad: a pipeline stage's own streams when called from
    /// inside a stage, the session triad otherwise.
    pub fn current_streams(&self) -> Streams {
        pipeline::stage_streams().unwrap_or_else(|| self.streams())
    }

    // --- Expressions ---

    /// Evaluate `%( .. )` expression text with the configured evaluator.
    pub fn expr(&self, source: &str) -> Result<Value> {
        self.shell.expr_evaluator().eval(self, source)
    }

    // --- Error locations ---

    pub(crate) fn clear_location(&self) {
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.remove(LOCATION);
    }

    /// The first error location reported since the last execute began.
    pub fn last_location(&self) -> Option<String> {
        self.location
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Enrich an error with the earliest touched source position.
    ///
    /// The first annotation in an execute wins; later calls only prepend
    /// the script name when the stored location lacks one. Suppressed
    /// entirely while the default-command lock is held.
    pub(crate) fn annotate_error(
        &self,
        script: Option<&Value>,
        error: ShellError,
        fallback: Option<(usize, usize)>,
    ) -> ShellError {
        if self.variable(DEFAULT_LOCK).is_some() {
            return error;
        }

        let location = {
            let mut slot = self.location.lock().unwrap_or_else(|e| e.into_inner());
            match &mut *slot {
                None => {
                    let pos = error.position().or(fallback);
                    let mut loc = match script {
                        Some(script) => format!("{script}:"),
                        None => String::new(),
                    };
                    if let Some((line, column)) = pos {
                        loc.push_str(&format!("{line}.{column}"));
                    }
                    if loc.is_empty() {
                        return error;
                    }
                    *slot = Some(loc.clone());
                    loc
                }
                Some(loc) => {
                    if let Some(script) = script {
                        if !loc.contains(':') {
                            *loc = format!("{script}:{loc}");
                        }
                    }
                    loc.clone()
                }
            }
        };

        self.put(LOCATION, Value::Text(location.clone()));
        error.with_location(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Arc<Session> {
        Arc::new(Shell::new()).open_session(Streams::null())
    }

    #[test]
    fn put_get_remove() {
        let session = session();
        assert!(session.put("x", Value::Int(1)).is_none());
        assert_eq!(session.variable("x"), Some(Value::Int(1)));
        assert_eq!(session.remove("x"), Some(Value::Int(1)));
        assert_eq!(session.variable("x"), None);
    }

    #[tokio::test]
    async fn reserved_variable_names() {
        let session = session();
        session.put("a", Value::Int(1));
        session.put("b", Value::Int(2));

        let Some(Value::List(names)) = session.get(VARIABLES).await else {
            panic!("expected list");
        };
        assert_eq!(
            names,
            vec![Value::Text("a".into()), Value::Text("b".into())]
        );
    }

    #[tokio::test]
    async fn reserved_commands_view() {
        let session = session();
        session.shell().register_fn("probe", |_, _| Ok(Value::Null));

        let Some(Value::List(names)) = session.get(COMMANDS).await else {
            panic!("expected list");
        };
        assert_eq!(names, vec![Value::Text("*:probe".into())]);
    }

    #[tokio::test]
    async fn constants_shadow_variables() {
        let session = session();
        session.shell().constant("version", Value::Text("0.3".into()));
        session.put("version", Value::Text("shadowed".into()));
        assert_eq!(
            session.get("version").await,
            Some(Value::Text("0.3".into()))
        );
    }

    #[tokio::test]
    async fn computed_variable_is_invoked() {
        let session = session();
        session.put(
            "#now",
            Value::Callable(Arc::new(crate::shell::FnCallable::new("now", |_, _| {
                Ok(Value::Int(1234))
            }))),
        );
        assert_eq!(session.get("now").await, Some(Value::Int(1234)));
    }

    #[tokio::test]
    async fn registry_is_last_resort() {
        let session = session();
        session.shell().register_fn("probe", |_, _| Ok(Value::Null));

        let value = session.get("probe").await.expect("resolves to command");
        assert!(matches!(value, Value::Callable(_)));

        // A plain variable shadows the registry.
        session.put("probe", Value::Int(7));
        assert_eq!(session.get("probe").await, Some(Value::Int(7)));
    }

    #[tokio::test]
    async fn closed_session_rejects_execute() {
        let session = session();
        session.close();
        let err = session.execute("x = 1").await.expect_err("closed");
        assert!(matches!(err, ShellError::SessionClosed));
        // Nothing was evaluated.
        assert_eq!(session.variable("x"), None);
    }

    #[test]
    fn annotation_first_wins() {
        let session = session();
        let err = ShellError::CommandNotFound { name: "a".into() };
        let err = session.annotate_error(None, err, Some((2, 5)));
        assert_eq!(err.location(), Some("2.5"));

        let second = ShellError::CommandNotFound { name: "b".into() };
        let second = session.annotate_error(None, second, Some((9, 9)));
        assert_eq!(second.location(), Some("2.5"));
        assert_eq!(session.last_location().as_deref(), Some("2.5"));
    }

    #[test]
    fn annotation_prefixes_script_later() {
        let session = session();
        let err = ShellError::CommandNotFound { name: "a".into() };
        let err = session.annotate_error(None, err, Some((1, 1)));
        assert_eq!(err.location(), Some("1.1"));

        let script = Value::Text("boot".into());
        let second = ShellError::CommandNotFound { name: "b".into() };
        let second = session.annotate_error(Some(&script), second, None);
        assert_eq!(second.location(), Some("boot:1.1"));
    }

    #[test]
    fn annotation_suppressed_under_default_lock() {
        let session = session();
        session.put(DEFAULT_LOCK, Value::Bool(true));
        let err = ShellError::CommandNotFound { name: "a".into() };
        let err = session.annotate_error(None, err, Some((3, 3)));
        assert_eq!(err.location(), None);
        assert!(session.last_location().is_none());
    }
}
