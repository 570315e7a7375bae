//! Word expansion: `$name`, `${name}`, and nested `$( .. )` substitution.
//!
//! This is the only place textual interpolation happens; token evaluation
//! never re-interpolates. A word whose parts apply no substitution is
//! reported as [`Expansion::Literal`] so the evaluator can run the
//! typed-value ladder over its text. A word that is exactly one
//! substitution yields the substituted value with its type intact; mixed
//! words stringify and concatenate.

use std::sync::Arc;

use crate::ast::{Token, WordPart};
use crate::closure::Closure;
use crate::error::Result;
use crate::value::Value;

/// Outcome of expanding a word token.
pub(crate) enum Expansion {
    /// No substitution applied; the token stands as written.
    Literal,
    /// Substitution produced a value.
    Value(Value),
}

/// Expand a word token against the active frame.
pub(crate) async fn expand(closure: &Arc<Closure>, token: &Token) -> Result<Expansion> {
    if token.is_pure_literal() {
        return Ok(Expansion::Literal);
    }

    // A single unquoted substitution keeps the value's type: `$xs` yields
    // the list itself, not its text.
    if !token.quoted && token.parts.len() == 1 {
        match &token.parts[0] {
            WordPart::Var(name) => {
                let value = closure.get(name).await.unwrap_or(Value::Null);
                return Ok(Expansion::Value(value));
            }
            WordPart::Exec(source) => {
                return Ok(Expansion::Value(run_nested(closure, source).await?));
            }
            WordPart::Literal(_) => {}
        }
    }

    let mut out = String::new();
    for part in &token.parts {
        match part {
            WordPart::Literal(text) => out.push_str(text),
            WordPart::Var(name) => {
                let value = closure.get(name).await.unwrap_or(Value::Null);
                out.push_str(&value.to_string());
            }
            WordPart::Exec(source) => {
                let value = run_nested(closure, source).await?;
                out.push_str(&value.to_string());
            }
        }
    }
    Ok(Expansion::Value(Value::Text(out)))
}

/// Run an embedded execution; parameters are inherited from the enclosing
/// frame.
async fn run_nested(closure: &Arc<Closure>, source: &str) -> Result<Value> {
    let nested = Closure::new(
        Arc::clone(closure.session()),
        Some(Arc::clone(closure)),
        source,
    )?;
    nested.execute(None).await
}
