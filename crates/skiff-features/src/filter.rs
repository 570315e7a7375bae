//! Minimal LDAP-style filter expressions for matching capability
//! attributes.
//!
//! Supported forms: `(key=value)`, presence `(key=*)`, conjunction
//! `(&(a=1)(b=2))`, disjunction `(|..)`, and negation `(!(..))`. Values
//! compare as text.

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("invalid filter at offset {offset}: {message}")]
    Invalid { offset: usize, message: String },
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `(key=value)`
    Eq { key: String, value: String },
    /// `(key=*)`
    Present { key: String },
    /// `(&(..)(..))`
    And(Vec<Filter>),
    /// `(|(..)(..))`
    Or(Vec<Filter>),
    /// `(!(..))`
    Not(Box<Filter>),
}

impl Filter {
    /// Parse a filter expression like `(&(n=1)(m=*))`.
    pub fn parse(text: &str) -> Result<Filter, FilterError> {
        let chars: Vec<char> = text.chars().collect();
        let mut pos = 0;
        let filter = parse_node(&chars, &mut pos)?;
        skip_ws(&chars, &mut pos);
        if pos != chars.len() {
            return Err(invalid(pos, "trailing input after filter"));
        }
        Ok(filter)
    }

    /// Match against an attribute map.
    pub fn matches(&self, attributes: &IndexMap<String, String>) -> bool {
        match self {
            Filter::Eq { key, value } => attributes.get(key).is_some_and(|v| v == value),
            Filter::Present { key } => attributes.contains_key(key),
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(attributes)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(attributes)),
            Filter::Not(clause) => !clause.matches(attributes),
        }
    }
}

fn invalid(offset: usize, message: impl Into<String>) -> FilterError {
    FilterError::Invalid {
        offset,
        message: message.into(),
    }
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while matches!(chars.get(*pos), Some(' ' | '\t')) {
        *pos += 1;
    }
}

fn parse_node(chars: &[char], pos: &mut usize) -> Result<Filter, FilterError> {
    skip_ws(chars, pos);
    if chars.get(*pos) != Some(&'(') {
        return Err(invalid(*pos, "expected '('"));
    }
    *pos += 1;
    skip_ws(chars, pos);

    let filter = match chars.get(*pos) {
        Some('&') => {
            *pos += 1;
            Filter::And(parse_clauses(chars, pos)?)
        }
        Some('|') => {
            *pos += 1;
            Filter::Or(parse_clauses(chars, pos)?)
        }
        Some('!') => {
            *pos += 1;
            Filter::Not(Box::new(parse_node(chars, pos)?))
        }
        Some(_) => parse_comparison(chars, pos)?,
        None => return Err(invalid(*pos, "unexpected end of filter")),
    };

    skip_ws(chars, pos);
    if chars.get(*pos) != Some(&')') {
        return Err(invalid(*pos, "expected ')'"));
    }
    *pos += 1;
    Ok(filter)
}

fn parse_clauses(chars: &[char], pos: &mut usize) -> Result<Vec<Filter>, FilterError> {
    let mut clauses = Vec::new();
    loop {
        skip_ws(chars, pos);
        match chars.get(*pos) {
            Some('(') => clauses.push(parse_node(chars, pos)?),
            _ => break,
        }
    }
    if clauses.is_empty() {
        return Err(invalid(*pos, "expected at least one clause"));
    }
    Ok(clauses)
}

fn parse_comparison(chars: &[char], pos: &mut usize) -> Result<Filter, FilterError> {
    let mut key = String::new();
    while let Some(&c) = chars.get(*pos) {
        if c == '=' || c == ')' {
            break;
        }
        key.push(c);
        *pos += 1;
    }
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(invalid(*pos, "empty attribute name"));
    }
    if chars.get(*pos) != Some(&'=') {
        return Err(invalid(*pos, "expected '='"));
    }
    *pos += 1;

    let mut value = String::new();
    while let Some(&c) = chars.get(*pos) {
        if c == ')' {
            break;
        }
        value.push(c);
        *pos += 1;
    }
    if value == "*" {
        Ok(Filter::Present { key })
    } else {
        Ok(Filter::Eq { key, value })
    }
}
