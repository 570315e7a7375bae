//! End-to-end evaluator tests: assignment, dispatch, expansion, arrays,
//! closures, method chaining, and error locations.

use std::any::Any;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use skiff_kernel::{
    HostInvoker, OpaqueValue, Result, Session, SharedBuffer, Shell, ShellError, Streams, Value,
};

fn shell() -> Arc<Shell> {
    let shell = Arc::new(Shell::new());
    // Returns its materialised argument list.
    shell.register_fn("list", |_, args| Ok(Value::List(args)));
    shell
}

fn session(shell: &Arc<Shell>) -> (Arc<Session>, SharedBuffer, SharedBuffer) {
    let (streams, out, err) = Streams::capture();
    (shell.open_session(streams), out, err)
}

async fn eval(session: &Arc<Session>, source: &str) -> Result<Value> {
    session.execute(source).await
}

// --- Assignment ---

#[tokio::test]
async fn assignment_binds_and_returns() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let result = eval(&session, "x = 42").await.unwrap();
    assert_eq!(result, Value::Int(42));
    assert_eq!(session.get("x").await, Some(Value::Int(42)));
}

#[tokio::test]
async fn assignment_without_rhs_removes() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "x = keepme").await.unwrap();
    let removed = eval(&session, "x =").await.unwrap();
    assert_eq!(removed, Value::Text("keepme".into()));
    assert_eq!(session.variable("x"), None);

    // Removing an unbound variable yields null.
    assert_eq!(eval(&session, "y =").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn assignment_with_nested_invocation() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let result = eval(&session, "x = list 1 2").await.unwrap();
    let expected = Value::List(vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(result, expected);
    assert_eq!(session.variable("x"), Some(expected));
}

#[tokio::test]
async fn typed_assignment_ladder() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    assert_eq!(eval(&session, "a = null").await.unwrap(), Value::Null);
    assert_eq!(eval(&session, "b = true").await.unwrap(), Value::Bool(true));
    assert_eq!(eval(&session, "c = 3").await.unwrap(), Value::Int(3));
    assert_eq!(eval(&session, "d = 3.5").await.unwrap(), Value::Float(3.5));
    assert_eq!(
        eval(&session, "e = word").await.unwrap(),
        Value::Text("word".into())
    );
    // Quoting suppresses the ladder.
    assert_eq!(
        eval(&session, "f = \"3\"").await.unwrap(),
        Value::Text("3".into())
    );
}

// --- Dispatch ---

#[tokio::test]
async fn default_fallback_receives_command_name() {
    let shell = Arc::new(Shell::new());
    shell.register_fn("default", |_, args| Ok(Value::List(args)));
    let (session, _, _) = session(&shell);

    let result = eval(&session, "ls -la").await.unwrap();
    assert_eq!(
        result,
        Value::List(vec![Value::Text("ls".into()), Value::Text("-la".into())])
    );
}

#[tokio::test]
async fn command_not_found_leaves_variables_unchanged() {
    let shell = shell();
    let (session, _, _) = session(&shell);
    eval(&session, "x = 1").await.unwrap();
    let names_before = session.variable_names();

    let err = eval(&session, "no-such-thing a b").await.unwrap_err();
    assert!(
        matches!(err.root(), ShellError::CommandNotFound { name } if name == "no-such-thing"),
        "got {err:?}"
    );

    let mut names_after = session.variable_names();
    // The error location variable is session bookkeeping, not user state.
    names_after.retain(|n| n != ".location");
    assert_eq!(names_before, names_after);
    assert_eq!(session.variable("x"), Some(Value::Int(1)));
}

#[tokio::test]
async fn default_lock_stops_recursion() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    // A default handler that itself dispatches a missing command must not
    // recurse into itself.
    eval(&session, "default = { nope }").await.unwrap();
    let err = eval(&session, "missing").await.unwrap_err();
    assert!(
        matches!(err.root(), ShellError::CommandNotFound { name } if name == "nope"),
        "got {err:?}"
    );

    // The lock is released afterwards: the default handler still runs.
    eval(&session, "default = { list $args }").await.unwrap();
    let result = eval(&session, "ghost arg").await.unwrap();
    assert_eq!(
        result,
        Value::List(vec![Value::Text("ghost".into()), Value::Text("arg".into())])
    );
}

#[tokio::test]
async fn scoped_commands_resolve_through_scope_variable() {
    let shell = Arc::new(Shell::new());
    shell.register_fn("net:probe", |_, _| Ok(Value::Text("net".into())));
    shell.register_fn("fs:probe", |_, _| Ok(Value::Text("fs".into())));
    let (session, _, _) = session(&shell);

    session.put("SCOPE", Value::Text("fs:net".into()));
    assert_eq!(
        eval(&session, "probe").await.unwrap(),
        Value::Text("fs".into())
    );

    session.put("SCOPE", Value::Text("net:fs".into()));
    assert_eq!(
        eval(&session, "probe").await.unwrap(),
        Value::Text("net".into())
    );
}

#[tokio::test]
async fn null_head_with_args_fails() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    // A null head alone is just null.
    assert_eq!(eval(&session, "$unset").await.unwrap(), Value::Null);

    let err = eval(&session, "$unset arg").await.unwrap_err();
    assert!(matches!(err.root(), ShellError::CommandNameNull { .. }));
}

// --- Closures and parameters ---

#[tokio::test]
async fn closure_literal_is_deferred() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let value = eval(&session, "f = { list $args }").await.unwrap();
    assert!(matches!(value, Value::Callable(_)));

    let result = eval(&session, "f 1 2").await.unwrap();
    assert_eq!(result, Value::List(vec![Value::Int(1), Value::Int(2)]));
}

#[tokio::test]
async fn positional_parameters() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "f = { list $2 $1 }").await.unwrap();
    let result = eval(&session, "f a b").await.unwrap();
    assert_eq!(
        result,
        Value::List(vec![Value::Text("b".into()), Value::Text("a".into())])
    );
}

#[tokio::test]
async fn out_of_range_positional_is_null() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "f = { list $3 }").await.unwrap();
    let result = eval(&session, "f only").await.unwrap();
    assert_eq!(result, Value::List(vec![Value::Null]));
}

#[tokio::test]
async fn it_is_the_first_parameter() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "f = { list $it }").await.unwrap();
    let result = eval(&session, "f 7 8").await.unwrap();
    assert_eq!(result, Value::List(vec![Value::Int(7)]));
}

#[tokio::test]
async fn args_joins_with_spaces_in_words() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    // Concatenated into a word, the joined view stringifies with single
    // spaces: a$args with (1, 2) gives "a1 2".
    eval(&session, "f = { list a$args }").await.unwrap();
    let result = eval(&session, "f 1 2").await.unwrap();
    assert_eq!(result, Value::List(vec![Value::Text("a1 2".into())]));
}

#[tokio::test]
async fn execution_inherits_parameters() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "f = { list (list $1) }").await.unwrap();
    let result = eval(&session, "f inner").await.unwrap();
    assert_eq!(
        result,
        Value::List(vec![Value::List(vec![Value::Text("inner".into())])])
    );
}

#[tokio::test]
async fn session_args_seed_top_level_parameters() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    session.put(
        "args",
        Value::List(vec![Value::Text("seed".into()), Value::Int(2)]),
    );
    let result = eval(&session, "list $args").await.unwrap();
    assert_eq!(
        result,
        Value::List(vec![Value::Text("seed".into()), Value::Int(2)])
    );
}

#[tokio::test]
async fn single_execution_statement_passes_value_through() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let result = eval(&session, "(list 1 2)").await.unwrap();
    assert_eq!(result, Value::List(vec![Value::Int(1), Value::Int(2)]));
}

// --- Expansion ---

#[tokio::test]
async fn single_substitution_preserves_type() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "x = 5").await.unwrap();
    assert_eq!(eval(&session, "y = $x").await.unwrap(), Value::Int(5));

    // Mixed words stringify.
    assert_eq!(
        eval(&session, "z = v$x").await.unwrap(),
        Value::Text("v5".into())
    );
    // Quoted substitution stringifies too.
    assert_eq!(
        eval(&session, "w = \"$x\"").await.unwrap(),
        Value::Text("5".into())
    );
}

#[tokio::test]
async fn embedded_execution_substitutes() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "one = { list 1 }").await.unwrap();
    let result = eval(&session, "x = pre-$(one)-post").await.unwrap();
    assert_eq!(result, Value::Text("pre-[1]-post".into()));
}

#[tokio::test]
async fn reserved_names_are_readable() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "a = 1").await.unwrap();
    let Value::List(vars) = eval(&session, "${.variables}").await.unwrap() else {
        panic!("expected list");
    };
    assert!(vars.contains(&Value::Text("a".into())));

    let Value::List(commands) = eval(&session, "${.commands}").await.unwrap() else {
        panic!("expected list");
    };
    assert!(commands.contains(&Value::Text("*:list".into())));
}

// --- Arrays and expressions ---

#[tokio::test]
async fn array_literal_positional() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let result = eval(&session, "[1 2.5 word]").await.unwrap();
    assert_eq!(
        result,
        Value::List(vec![
            Value::Int(1),
            Value::Float(2.5),
            Value::Text("word".into())
        ])
    );
}

#[tokio::test]
async fn array_splices_nested_lists_one_level() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let result = eval(&session, "[1 (list 2 3) 4]").await.unwrap();
    assert_eq!(
        result,
        Value::List(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Int(4)
        ])
    );
}

#[tokio::test]
async fn array_map_form() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let Value::Map(map) = eval(&session, "[a=1 b=two]").await.unwrap() else {
        panic!("expected map");
    };
    assert_eq!(map.get("a"), Some(&Value::Int(1)));
    assert_eq!(map.get("b"), Some(&Value::Text("two".into())));
}

#[tokio::test]
async fn map_key_must_be_text() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let err = eval(&session, "[3=x]").await.unwrap_err();
    match err.root() {
        ShellError::Syntax { message, .. } => {
            assert!(message.contains("map key null or not String"), "{message}");
        }
        other => panic!("expected syntax error, got {other:?}"),
    }
}

#[tokio::test]
async fn expression_token_delegates_to_evaluator() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    assert_eq!(eval(&session, "x = %(1 + 2 * 3)").await.unwrap(), Value::Int(7));
    eval(&session, "n = 5").await.unwrap();
    assert_eq!(
        eval(&session, "%($n > 4)").await.unwrap(),
        Value::Bool(true)
    );
}

#[tokio::test]
async fn list_indexing_through_head_value() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "x = [10 20 30]").await.unwrap();
    assert_eq!(eval(&session, "$x length").await.unwrap(), Value::Int(3));
    assert_eq!(eval(&session, "$x 1").await.unwrap(), Value::Int(20));

    let err = eval(&session, "$x 9").await.unwrap_err();
    assert!(matches!(err.root(), ShellError::HostInvoke(_)));
}

// --- Method chaining ---

#[derive(Debug)]
struct HostObj(String);

impl OpaqueValue for HostObj {
    fn type_name(&self) -> &str {
        "host"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn render(&self) -> String {
        self.0.clone()
    }
}

struct RecordingInvoker {
    calls: Mutex<Vec<(String, String, Vec<String>)>>,
}

#[async_trait]
impl HostInvoker for RecordingInvoker {
    async fn invoke(
        &self,
        _session: &Arc<Session>,
        target: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.calls.lock().unwrap().push((
            target.to_string(),
            method.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        Ok(Value::Opaque(Arc::new(HostObj(format!(
            "{target}/{method}"
        )))))
    }
}

#[tokio::test]
async fn dotted_chaining_invokes_sequentially() {
    let shell = Arc::new(Shell::new());
    shell.register_fn("bundle", |_, args| {
        Ok(Value::Opaque(Arc::new(HostObj(format!(
            "bundle{}",
            args.first().cloned().unwrap_or(Value::Null)
        )))))
    });
    let invoker = Arc::new(RecordingInvoker {
        calls: Mutex::new(Vec::new()),
    });
    shell.set_host_invoker(invoker.clone());
    let (session, _, _) = session(&shell);

    let result = eval(
        &session,
        "(bundle 0) . loadClass java.net.InetAddress . localhost . hostname",
    )
    .await
    .unwrap();

    let calls = invoker.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![
            (
                "bundle0".to_string(),
                "loadClass".to_string(),
                vec!["java.net.InetAddress".to_string()]
            ),
            (
                "bundle0/loadClass".to_string(),
                "localhost".to_string(),
                vec![]
            ),
            (
                "bundle0/loadClass/localhost".to_string(),
                "hostname".to_string(),
                vec![]
            ),
        ]
    );
    assert_eq!(
        result.to_string(),
        "bundle0/loadClass/localhost/hostname"
    );
}

#[tokio::test]
async fn plain_method_call_goes_to_host() {
    let shell = Arc::new(Shell::new());
    shell.register_fn("obj", |_, _| Ok(Value::Opaque(Arc::new(HostObj("o".into())))));
    let invoker = Arc::new(RecordingInvoker {
        calls: Mutex::new(Vec::new()),
    });
    shell.set_host_invoker(invoker.clone());
    let (session, _, _) = session(&shell);

    eval(&session, "(obj) ping 1 2").await.unwrap();
    let calls = invoker.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![(
            "o".to_string(),
            "ping".to_string(),
            vec!["1".to_string(), "2".to_string()]
        )]
    );
}

#[tokio::test]
async fn method_calls_without_invoker_fail() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    eval(&session, "x = [1 2]").await.unwrap();
    let err = eval(&session, "$x frob now").await.unwrap_err();
    assert!(matches!(err.root(), ShellError::HostInvoke(_)));
}

// --- Tracing ---

#[tokio::test]
async fn xtrace_prints_raw_statement() {
    let shell = shell();
    let (session, _, err) = session(&shell);

    session.put("echo", Value::Bool(true));
    eval(&session, "list 1").await.unwrap();
    assert!(err.text().contains("+ list 1"), "err: {}", err.text());
}

#[tokio::test]
async fn verbose_trace_only_when_expansion_differs() {
    let shell = shell();
    let (session, _, err) = session(&shell);

    session.put("echo", Value::Text("verbose".into()));
    eval(&session, "list 1").await.unwrap();
    let text = err.take_text();
    assert!(text.contains("+ list 1"));
    assert!(!text.contains("++"), "no second trace for identical text: {text}");

    session.put("x", Value::Int(5));
    eval(&session, "list $x").await.unwrap();
    let text = err.take_text();
    assert!(text.contains("+ list $x"));
    assert!(text.contains("++ list 5"), "expanded trace differs: {text}");
}

// --- Errors and locations ---

#[tokio::test]
async fn incomplete_input_is_distinguished() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let err = eval(&session, "f = { unterminated").await.unwrap_err();
    assert!(err.is_incomplete());
}

#[tokio::test]
async fn error_location_is_recorded() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let err = eval(&session, "  nope-here").await.unwrap_err();
    assert_eq!(err.location(), Some("1.3"));
    assert_eq!(
        session.variable(".location"),
        Some(Value::Text("1.3".into()))
    );
}

#[tokio::test]
async fn script_name_prefixes_location() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    session.put("0", Value::Text("boot".into()));
    let err = eval(&session, "nope").await.unwrap_err();
    assert_eq!(err.location(), Some("boot:1.1"));
}

#[tokio::test]
async fn location_resets_between_executes() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    let first = eval(&session, "  nope").await.unwrap_err();
    assert_eq!(first.location(), Some("1.3"));

    let second = eval(&session, "also-missing").await.unwrap_err();
    assert_eq!(second.location(), Some("1.1"));
}

// --- Computed variables ---

#[tokio::test]
async fn computed_variables_resolve_on_read() {
    let shell = shell();
    let (session, _, _) = session(&shell);

    // `#`-prefixed names are set through the API; in source, `#` starts a
    // comment.
    eval(&session, "f = { list now }").await.unwrap();
    let computed = session.variable("f").unwrap();
    session.put("#when", computed);

    let result = eval(&session, "x = $when").await.unwrap();
    assert_eq!(result, Value::List(vec![Value::Text("now".into())]));
}
