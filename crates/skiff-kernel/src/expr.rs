//! Default evaluator for `%( .. )` expression tokens.
//!
//! A small recursive-descent parser over shell values: integer and float
//! arithmetic, comparisons, boolean operators, parentheses, literals, and
//! variable references (`x`, `$x`, `${x}`). Hosts that want a richer
//! language plug their own [`ExprEvaluator`](crate::shell::ExprEvaluator)
//! into the shell.

use anyhow::{bail, Context};

use crate::error::{Result, ShellError};
use crate::session::Session;
use crate::shell::ExprEvaluator;
use crate::value::Value;

/// The built-in arithmetic/logical expression evaluator.
pub struct DefaultExprEvaluator;

impl ExprEvaluator for DefaultExprEvaluator {
    fn eval(&self, session: &Session, source: &str) -> Result<Value> {
        let mut parser = ExprParser::new(source, session);
        let value = parser.parse_or().map_err(ShellError::from)?;
        parser.expect_end().map_err(ShellError::from)?;
        Ok(value)
    }
}

struct ExprParser<'a> {
    chars: Vec<char>,
    pos: usize,
    session: &'a Session,
}

impl<'a> ExprParser<'a> {
    fn new(source: &str, session: &'a Session) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            session,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.get(self.pos), Some(' ' | '\t' | '\n' | '\r')) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn peek_raw_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        Some(c)
    }

    /// Consume `text` if it appears next (after whitespace).
    fn eat(&mut self, text: &str) -> bool {
        self.skip_ws();
        let candidate: String = self
            .chars
            .iter()
            .skip(self.pos)
            .take(text.chars().count())
            .collect();
        if candidate == text {
            self.pos += text.chars().count();
            true
        } else {
            false
        }
    }

    fn expect_end(&mut self) -> anyhow::Result<()> {
        self.skip_ws();
        if self.pos < self.chars.len() {
            let rest: String = self.chars[self.pos..].iter().collect();
            bail!("unexpected trailing input in expression: {rest:?}");
        }
        Ok(())
    }

    fn parse_or(&mut self) -> anyhow::Result<Value> {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            let right = self.parse_and()?;
            left = Value::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> anyhow::Result<Value> {
        let mut left = self.parse_comparison()?;
        while self.eat("&&") {
            let right = self.parse_comparison()?;
            left = Value::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> anyhow::Result<Value> {
        let left = self.parse_additive()?;
        // Two-character operators are tried first.
        for (op, cmp) in [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::NotEq),
            ("<=", CmpOp::LtEq),
            (">=", CmpOp::GtEq),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ] {
            if self.eat(op) {
                let right = self.parse_additive()?;
                return compare(cmp, &left, &right);
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> anyhow::Result<Value> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            match self.chars.get(self.pos) {
                Some('+') => {
                    self.advance();
                    let right = self.parse_multiplicative()?;
                    left = arith(ArithOp::Add, &left, &right)?;
                }
                // Not a '-' that begins a negative literal: binary minus
                // only follows a complete operand, so a bare '-' here is
                // always the operator.
                Some('-') => {
                    self.advance();
                    let right = self.parse_multiplicative()?;
                    left = arith(ArithOp::Sub, &left, &right)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> anyhow::Result<Value> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            // '||' must be left for parse_or; a lone '|' is not an operator.
            match (self.chars.get(self.pos), self.peek_raw_at(1)) {
                (Some('*'), _) => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = arith(ArithOp::Mul, &left, &right)?;
                }
                (Some('/'), _) => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = arith(ArithOp::Div, &left, &right)?;
                }
                (Some('%'), _) => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = arith(ArithOp::Rem, &left, &right)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> anyhow::Result<Value> {
        match self.peek() {
            Some('-') => {
                self.advance();
                let value = self.parse_unary()?;
                match to_num(&value)? {
                    Num::Int(i) => Ok(Value::Int(
                        i.checked_neg().context("arithmetic overflow in negation")?,
                    )),
                    Num::Float(x) => Ok(Value::Float(-x)),
                }
            }
            Some('!') if self.peek_raw_at(1) != Some('=') => {
                self.advance();
                let value = self.parse_unary()?;
                Ok(Value::Bool(!value.truthy()))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> anyhow::Result<Value> {
        match self.peek() {
            Some('(') => {
                self.advance();
                let value = self.parse_or()?;
                if self.peek() != Some(')') {
                    bail!("expected ')' in expression");
                }
                self.advance();
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || (c == '.' && self.digit_follows()) => {
                self.parse_number()
            }
            Some(q @ ('\'' | '"')) => {
                self.advance();
                let mut text = String::new();
                loop {
                    match self.advance() {
                        None => bail!("unterminated string in expression"),
                        Some(c) if c == q => break,
                        Some(c) => text.push(c),
                    }
                }
                Ok(Value::Text(text))
            }
            Some('$') => {
                self.advance();
                let name = if self.chars.get(self.pos) == Some(&'{') {
                    self.advance();
                    let mut name = String::new();
                    loop {
                        match self.advance() {
                            None => bail!("missing '}}' in expression"),
                            Some('}') => break,
                            Some(c) => name.push(c),
                        }
                    }
                    name
                } else {
                    self.parse_name()?
                };
                Ok(self.session.variable(&name).unwrap_or(Value::Null))
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let name = self.parse_name()?;
                match name.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    _ => Ok(self.session.variable(&name).unwrap_or(Value::Null)),
                }
            }
            Some(c) => bail!("unexpected character in expression: {c:?}"),
            None => bail!("unexpected end of expression"),
        }
    }

    fn digit_follows(&self) -> bool {
        self.peek_raw_at(1).is_some_and(|c| c.is_ascii_digit())
    }

    fn parse_name(&mut self) -> anyhow::Result<String> {
        let mut name = String::new();
        while let Some(&c) = self.chars.get(self.pos) {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if name.is_empty() {
            bail!("expected a name in expression");
        }
        Ok(name)
    }

    fn parse_number(&mut self) -> anyhow::Result<Value> {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(&c) = self.chars.get(self.pos) {
            if c.is_ascii_digit() {
                text.push(c);
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
                self.pos += 1;
            } else if (c == 'e' || c == 'E') && !text.is_empty() {
                is_float = true;
                text.push(c);
                self.pos += 1;
                if matches!(self.chars.get(self.pos), Some('+' | '-')) {
                    text.push(self.chars[self.pos]);
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
        if is_float {
            let x: f64 = text.parse().with_context(|| format!("bad number {text:?}"))?;
            Ok(Value::Float(x))
        } else {
            let i: i64 = text.parse().with_context(|| format!("bad number {text:?}"))?;
            Ok(Value::Int(i))
        }
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(&self) -> f64 {
        match self {
            Num::Int(i) => *i as f64,
            Num::Float(x) => *x,
        }
    }
}

fn to_num(value: &Value) -> anyhow::Result<Num> {
    match value {
        Value::Int(i) => Ok(Num::Int(*i)),
        Value::Float(x) => Ok(Num::Float(*x)),
        Value::Text(s) => {
            if let Ok(i) = s.parse::<i64>() {
                Ok(Num::Int(i))
            } else if let Ok(x) = s.parse::<f64>() {
                Ok(Num::Float(x))
            } else {
                bail!("not a number: {s:?}")
            }
        }
        other => bail!("not a number: {other}"),
    }
}

enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

fn arith(op: ArithOp, left: &Value, right: &Value) -> anyhow::Result<Value> {
    let (a, b) = (to_num(left)?, to_num(right)?);
    if let (Num::Int(a), Num::Int(b)) = (&a, &b) {
        let (a, b) = (*a, *b);
        let out = match op {
            ArithOp::Add => a.checked_add(b).context("arithmetic overflow")?,
            ArithOp::Sub => a.checked_sub(b).context("arithmetic overflow")?,
            ArithOp::Mul => a.checked_mul(b).context("arithmetic overflow")?,
            ArithOp::Div => {
                if b == 0 {
                    bail!("division by zero");
                }
                a.checked_div(b).context("arithmetic overflow")?
            }
            ArithOp::Rem => {
                if b == 0 {
                    bail!("modulo by zero");
                }
                a.checked_rem(b).context("arithmetic overflow")?
            }
        };
        return Ok(Value::Int(out));
    }

    let (a, b) = (a.as_f64(), b.as_f64());
    let out = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b == 0.0 {
                bail!("division by zero");
            }
            a / b
        }
        ArithOp::Rem => {
            if b == 0.0 {
                bail!("modulo by zero");
            }
            a % b
        }
    };
    Ok(Value::Float(out))
}

enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> anyhow::Result<Value> {
    let result = match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::NotEq => !values_equal(left, right),
        ordered => {
            let ordering = order(left, right)?;
            match ordered {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::LtEq => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::GtEq => ordering.is_ge(),
                CmpOp::Eq | CmpOp::NotEq => unreachable!(),
            }
        }
    };
    Ok(Value::Bool(result))
}

/// Equality with numeric cross-type comparison: `3 == 3.0` holds.
fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Ok(a), Ok(b)) = (to_num(left), to_num(right)) {
        return a.as_f64() == b.as_f64();
    }
    left == right
}

fn order(left: &Value, right: &Value) -> anyhow::Result<std::cmp::Ordering> {
    if let (Ok(a), Ok(b)) = (to_num(left), to_num(right)) {
        return a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .context("values are not comparable");
    }
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        _ => bail!("cannot compare {} with {}", left.type_name(), right.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::Shell;
    use crate::stream::Streams;
    use std::sync::Arc;

    fn eval(source: &str) -> Result<Value> {
        let session = Arc::new(Shell::new()).open_session(Streams::null());
        DefaultExprEvaluator.eval(&session, source)
    }

    fn eval_with(source: &str, vars: &[(&str, Value)]) -> Result<Value> {
        let session = Arc::new(Shell::new()).open_session(Streams::null());
        for (name, value) in vars {
            session.put(*name, value.clone());
        }
        DefaultExprEvaluator.eval(&session, source)
    }

    #[test]
    fn integer_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Value::Int(9));
        assert_eq!(eval("7 % 4").unwrap(), Value::Int(3));
        assert_eq!(eval("-5 + 2").unwrap(), Value::Int(-3));
    }

    #[test]
    fn float_arithmetic() {
        assert_eq!(eval("1.5 + 2").unwrap(), Value::Float(3.5));
        assert_eq!(eval("10 / 4.0").unwrap(), Value::Float(2.5));
    }

    #[test]
    fn integer_division_truncates() {
        assert_eq!(eval("10 / 4").unwrap(), Value::Int(2));
    }

    #[test]
    fn division_by_zero_fails() {
        assert!(eval("1 / 0").is_err());
        assert!(eval("1 % 0").is_err());
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("2 < 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("3 <= 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("3 == 3.0").unwrap(), Value::Bool(true));
        assert_eq!(eval("'abc' == 'abc'").unwrap(), Value::Bool(true));
        assert_eq!(eval("'abc' < 'abd'").unwrap(), Value::Bool(true));
    }

    #[test]
    fn boolean_operators() {
        assert_eq!(eval("true && false").unwrap(), Value::Bool(false));
        assert_eq!(eval("true || false").unwrap(), Value::Bool(true));
        assert_eq!(eval("!false").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 < 2 && 2 < 3").unwrap(), Value::Bool(true));
    }

    #[test]
    fn variables_resolve() {
        assert_eq!(
            eval_with("x + 1", &[("x", Value::Int(41))]).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            eval_with("$x * 2", &[("x", Value::Int(21))]).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            eval_with("${x} == 'on'", &[("x", Value::Text("on".into()))]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn unset_variable_is_null() {
        assert_eq!(eval("missing == null").unwrap(), Value::Bool(true));
    }

    #[test]
    fn numeric_text_coerces() {
        assert_eq!(
            eval_with("x + 1", &[("x", Value::Text("5".into()))]).unwrap(),
            Value::Int(6)
        );
    }

    #[test]
    fn trailing_garbage_fails() {
        assert!(eval("1 + 2 )").is_err());
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(eval("9223372036854775807 + 1").is_err());
    }
}
