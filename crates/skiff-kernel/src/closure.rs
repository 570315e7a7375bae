//! The closure evaluator: the entry point for running parsed programs.
//!
//! A closure pairs a parsed program with its session and an optional parent
//! frame. Executing it walks the program pipeline by pipeline, evaluating
//! each statement's tokens, classifying the statement (assignment, command
//! invocation, method invocation, bare value), and dispatching through
//! [`crate::dispatch`].
//!
//! Parameters are seeded per execute: explicit arguments win, then the
//! parent frame's parameters, then the session's `args` variable. `$args`
//! and `$argv` are two views over the same storage (see
//! [`ArgList`](crate::value::ArgList)); a bare `$args` token is recognised
//! by storage identity and spliced into the statement in place.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::ast::{Program, Statement, Token, TokenKind};
use crate::dispatch;
use crate::error::{Result, ShellError};
use crate::expand::{self, Expansion};
use crate::parser;
use crate::pipeline;
use crate::session::Session;
use crate::value::{ArgList, Callable, Value};

/// A captured frame: program, session, parent, and parameter views.
pub struct Closure {
    session: Arc<Session>,
    parent: Option<Arc<Closure>>,
    source: String,
    program: Program,
    /// `$0` at construction time, by convention the script name.
    script: Option<Value>,
    params: Mutex<Option<Params>>,
}

/// The two parameter views of a frame, sharing element storage.
#[derive(Clone)]
pub(crate) struct Params {
    /// Display-joined view behind `$args`.
    pub parms: ArgList,
    /// Raw view behind `$argv`.
    pub parmv: ArgList,
}

impl Params {
    fn new(list: ArgList) -> Self {
        Self {
            parms: list.joined_view(),
            parmv: list.raw_view(),
        }
    }
}

/// Result of evaluating one token: a value, or the assignment marker only
/// the statement driver understands.
pub(crate) enum Evaluated {
    Val(Value),
    Assign,
}

impl Closure {
    /// Parse `source` into a new frame. The program is immutable from here
    /// on; parse failures are annotated with the script name and position.
    pub fn new(
        session: Arc<Session>,
        parent: Option<Arc<Closure>>,
        source: &str,
    ) -> Result<Arc<Closure>> {
        let script = session.variable("0");
        let program = parser::parse(source)
            .map_err(|e| session.annotate_error(script.as_ref(), e, None))?;
        Ok(Arc::new(Self {
            session,
            parent,
            source: source.to_string(),
            program,
            script,
            params: Mutex::new(None),
        }))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run the program. `values` becomes the parameter list when given;
    /// otherwise parameters are inherited (parent frame, then the session's
    /// `args` variable).
    pub fn execute<'a>(
        self: &'a Arc<Self>,
        values: Option<ArgList>,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            self.seed_params(values);
            let mut last = Value::Null;
            for pipeline in &self.program.pipelines {
                last = pipeline::run_pipeline(self, pipeline).await?;
            }
            Ok(last)
        })
    }

    fn seed_params(&self, values: Option<ArgList>) {
        let mut slot = self.params.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = values {
            *slot = Some(Params::new(list));
        } else if let Some(parent) = &self.parent {
            *slot = parent
                .params
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
        } else if let Some(Value::List(items)) = self.session.variable("args") {
            *slot = Some(Params::new(ArgList::new(items)));
        }
    }

    pub(crate) fn params(&self) -> Option<Params> {
        self.params.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Parameter-aware variable lookup: reserved parameter names first,
    /// then the session ladder.
    pub async fn get(self: &Arc<Self>, name: &str) -> Option<Value> {
        if let Some(params) = self.params() {
            match name {
                "args" => return Some(Value::Args(params.parms.clone())),
                "argv" => return Some(Value::Args(params.parmv.clone())),
                "it" => return Some(params.parms.get(0)),
                _ => {
                    let mut chars = name.chars();
                    if let (Some(c), None) = (chars.next(), chars.next()) {
                        if let Some(digit) = c.to_digit(10) {
                            if digit > 0 {
                                return Some(params.parms.get((digit - 1) as usize));
                            }
                        }
                    }
                }
            }
        }
        self.session.get(name).await
    }

    /// Bind a session variable.
    pub fn put(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.session.put(name, value)
    }

    /// Evaluate one token.
    pub(crate) fn eval<'a>(
        self: &'a Arc<Self>,
        token: &'a Token,
    ) -> Pin<Box<dyn Future<Output = Result<Evaluated>> + Send + 'a>> {
        Box::pin(async move {
            match token.kind {
                TokenKind::Word => match expand::expand(self, token).await? {
                    // No substitution applied: the literal text goes
                    // through the typed-value ladder.
                    Expansion::Literal => Ok(Evaluated::Val(coerce(&token.body))),
                    Expansion::Value(value) => Ok(Evaluated::Val(value)),
                },
                TokenKind::Closure => {
                    let closure =
                        Closure::new(Arc::clone(&self.session), Some(Arc::clone(self)), &token.body)?;
                    Ok(Evaluated::Val(Value::Callable(Arc::new(ClosureValue(
                        closure,
                    )))))
                }
                TokenKind::Execution => {
                    let closure =
                        Closure::new(Arc::clone(&self.session), Some(Arc::clone(self)), &token.body)?;
                    Ok(Evaluated::Val(closure.execute(None).await?))
                }
                TokenKind::Array => Ok(Evaluated::Val(self.array(token).await?)),
                TokenKind::Assign => Ok(Evaluated::Assign),
                TokenKind::Expr => Ok(Evaluated::Val(self.session.expr(&token.body)?)),
            }
        })
    }

    /// Evaluate a token that must yield a value.
    async fn eval_value(self: &Arc<Self>, token: &Token) -> Result<Value> {
        match self.eval(token).await? {
            Evaluated::Val(value) => Ok(value),
            Evaluated::Assign => Err(ShellError::syntax(
                token.line,
                token.column,
                "unexpected token: assign",
            )),
        }
    }

    /// Re-parse and evaluate an array token into a list or map.
    async fn array(self: &Arc<Self>, token: &Token) -> Result<Value> {
        let (list, entries) = parser::parse_array(token)?;
        if entries.is_empty() {
            let mut items = Vec::new();
            for element in &list {
                match self.eval_value(element).await? {
                    // An array-valued element splices in place, one level.
                    Value::List(nested) => items.extend(nested),
                    other => items.push(other),
                }
            }
            Ok(Value::List(items))
        } else {
            let mut map = IndexMap::new();
            for (key_token, value_token) in &entries {
                let key = match self.eval_value(key_token).await? {
                    Value::Text(key) => key,
                    _ => {
                        return Err(ShellError::syntax(
                            key_token.line,
                            key_token.column,
                            format!("map key null or not String: {key_token}"),
                        ));
                    }
                };
                map.insert(key, self.eval_value(value_token).await?);
            }
            Ok(Value::Map(map))
        }
    }

    /// Execute one statement; errors are annotated with the head token's
    /// position (first annotation in the session wins).
    pub(crate) async fn execute_statement(self: &Arc<Self>, statement: &Statement) -> Result<Value> {
        let result = self.statement_inner(statement).await;
        result.map_err(|e| {
            let pos = statement.tokens.first().map(|t| (t.line, t.column));
            self.session.annotate_error(self.script.as_ref(), e, pos)
        })
    }

    async fn statement_inner(self: &Arc<Self>, statement: &Statement) -> Result<Value> {
        let tokens = &statement.tokens;
        if tokens.is_empty() {
            return Ok(Value::Null);
        }

        // `set -x` style execution trace. Read as a plain variable: the
        // registry fallthrough would see a registered `echo` command.
        let echo = self.session.variable("echo");
        let mut xtrace = None;
        if let Some(echo) = &echo {
            if echo.to_string() != "false" {
                let trace = format!("+ {}", statement.source());
                self.session
                    .current_streams()
                    .err
                    .write_line(&trace)
                    .await
                    .ok();
                xtrace = Some(trace);
            }
        }
        let verbose = matches!(&echo, Some(v) if v.to_string() == "verbose");

        let params = self.params();
        let mut values: Vec<StmtVal> = Vec::new();
        for token in tokens {
            let evaluated = self.eval(token).await?;

            if token.kind == TokenKind::Execution && tokens.len() == 1 {
                return match evaluated {
                    Evaluated::Val(value) => Ok(value),
                    Evaluated::Assign => unreachable!("execution token cannot be assign"),
                };
            }

            match evaluated {
                Evaluated::Assign => values.push(StmtVal::Assign),
                Evaluated::Val(Value::Args(list))
                    if list.is_joined()
                        && params.as_ref().is_some_and(|p| p.parms.same(&list)) =>
                {
                    // A bare `$args` explodes into the statement in place.
                    for item in list.to_vec() {
                        values.push(StmtVal::Val(item));
                    }
                }
                Evaluated::Val(value) => values.push(StmtVal::Val(value)),
            }
        }

        if values.is_empty() {
            // Every token was an empty `$args` splice.
            return Ok(Value::Null);
        }
        let head = match values.remove(0) {
            StmtVal::Val(value) => value,
            StmtVal::Assign => {
                return Err(ShellError::syntax(
                    tokens[0].line,
                    tokens[0].column,
                    "unexpected assignment",
                ));
            }
        };

        if head.is_null() {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            return Err(ShellError::CommandNameNull {
                near: tokens[0].source.clone(),
            });
        }

        if matches!(values.first(), Some(StmtVal::Assign)) {
            let name = match &head {
                Value::Text(name) => name.clone(),
                _ => {
                    return Err(ShellError::syntax(
                        tokens[1].line,
                        tokens[1].column,
                        "unexpected assignment",
                    ));
                }
            };
            values.remove(0);

            // `x =` removes the binding and yields its prior value.
            if values.is_empty() {
                return Ok(self.session.remove(&name).unwrap_or(Value::Null));
            }

            if values.len() == 1 {
                let value = take_values(values, tokens)?.remove(0);
                self.session.put(name, value.clone());
                return Ok(value);
            }

            // Multiple right-hand values: a nested invocation whose result
            // is bound.
            let mut args = take_values(values, tokens)?;
            let inner_head = args.remove(0);
            if inner_head.is_null() {
                return Err(ShellError::CommandNameNull {
                    near: tokens[2].source.clone(),
                });
            }
            self.trace2(verbose, xtrace.as_deref(), &inner_head, &args)
                .await;
            let value = if bareword(&tokens[2]) {
                dispatch::execute_cmd(self, &inner_head.to_string(), args).await?
            } else {
                dispatch::execute_method(self, inner_head, args).await?
            };
            self.session.put(name, value.clone());
            return Ok(value);
        }

        let args = take_values(values, tokens)?;
        self.trace2(verbose, xtrace.as_deref(), &head, &args).await;
        if bareword(&tokens[0]) {
            dispatch::execute_cmd(self, &head.to_string(), args).await
        } else {
            dispatch::execute_method(self, head, args).await
        }
    }

    /// Post-expansion trace, printed only when it differs from the raw
    /// trace. Both are normalised by single-space joining.
    async fn trace2(&self, verbose: bool, trace1: Option<&str>, cmd: &Value, args: &[Value]) {
        if !verbose {
            return;
        }
        let mut trace = format!("+ {cmd}");
        for arg in args {
            trace.push(' ');
            trace.push_str(&arg.to_string());
        }
        if Some(trace.as_str()) != trace1 {
            self.session
                .current_streams()
                .err
                .write_line(&format!("+{trace}"))
                .await
                .ok();
        }
    }
}

enum StmtVal {
    Val(Value),
    Assign,
}

fn take_values(values: Vec<StmtVal>, tokens: &[Token]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            StmtVal::Val(value) => out.push(value),
            StmtVal::Assign => {
                return Err(ShellError::syntax(
                    tokens[0].line,
                    tokens[0].column,
                    "unexpected assignment",
                ));
            }
        }
    }
    Ok(out)
}

/// A command is named by a bare word: an unquoted, substitution-free token
/// whose ladder value is still text.
fn bareword(token: &Token) -> bool {
    token.is_pure_literal() && matches!(coerce(&token.body), Value::Text(_))
}

/// The typed-value ladder for literal words. The order is load-bearing:
/// the float parse catches `3.5` while the following integer parse narrows
/// `3` to `Int`.
pub(crate) fn coerce(text: &str) -> Value {
    match text {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if !looks_numeric(text) {
                return Value::Text(text.to_string());
            }
            match text.parse::<f64>() {
                Ok(x) => match text.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::Float(x),
                },
                Err(_) => Value::Text(text.to_string()),
            }
        }
    }
}

/// Words like `nan` or `inf` stay text even though the float parser would
/// accept them; only digit-led forms enter the number ladder.
fn looks_numeric(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+' | '-' | '.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// The callable face of a closure literal.
struct ClosureValue(Arc<Closure>);

#[async_trait]
impl Callable for ClosureValue {
    async fn invoke(&self, _session: &Arc<Session>, args: Vec<Value>) -> Result<Value> {
        // A closure always runs against its captured session.
        self.0.execute(Some(ArgList::new(args))).await
    }

    fn describe(&self) -> String {
        let normalized: Vec<&str> = self.0.source.split_whitespace().collect();
        format!("{{{}}}", normalized.join(" "))
    }
}
