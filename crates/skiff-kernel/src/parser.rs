//! Tokenizer and parser producing the token tree the evaluator consumes.
//!
//! The scanner is hand-written: words carry their interpolation directives
//! (`$name`, `${name}`, `$(..)`), while closure/execution/array/expression
//! tokens capture a balanced bracketed body verbatim to be re-parsed when
//! evaluated. Running off the end of the input inside a bracket or quote is
//! an [`ShellError::Incomplete`], which interactive clients use as a signal
//! to read more input.

use crate::ast::{Pipeline, Program, Statement, Token, TokenKind, WordPart};
use crate::error::{Result, ShellError};

/// Parse a complete program.
pub fn parse(source: &str) -> Result<Program> {
    Scanner::new(source).program()
}

/// Re-parse an array token's body into either positional tokens or
/// key/value entry pairs. The two forms are exclusive: the presence of any
/// `=` makes the body a map literal.
pub(crate) fn parse_array(token: &Token) -> Result<(Vec<Token>, Vec<(Token, Token)>)> {
    let mut scanner = Scanner::new_at(&token.body, token.line, token.column + 1);
    let mut tokens = Vec::new();

    loop {
        scanner.skip_blank(true);
        match scanner.peek() {
            None => break,
            Some(c @ (';' | '|')) => {
                return Err(ShellError::syntax(
                    scanner.line,
                    scanner.column,
                    format!("unexpected '{c}' in array"),
                ));
            }
            Some(_) => tokens.push(scanner.next_token()?),
        }
    }

    if !tokens.iter().any(|t| t.kind == TokenKind::Assign) {
        return Ok((tokens, Vec::new()));
    }

    let mut entries = Vec::new();
    let mut it = tokens.into_iter();
    while let Some(key) = it.next() {
        if key.kind == TokenKind::Assign {
            return Err(ShellError::syntax(key.line, key.column, "map key missing"));
        }
        match it.next() {
            Some(eq) if eq.kind == TokenKind::Assign => {}
            Some(other) => {
                return Err(ShellError::syntax(
                    other.line,
                    other.column,
                    "expected '=' in map literal",
                ));
            }
            None => {
                return Err(ShellError::syntax(
                    key.line,
                    key.column,
                    "expected '=' in map literal",
                ));
            }
        }
        match it.next() {
            Some(value) if value.kind != TokenKind::Assign => entries.push((key, value)),
            Some(value) => {
                return Err(ShellError::syntax(value.line, value.column, "map value missing"));
            }
            None => {
                return Err(ShellError::syntax(key.line, key.column, "map value missing"));
            }
        }
    }
    Ok((Vec::new(), entries))
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self::new_at(source, 1, 1)
    }

    fn new_at(source: &str, line: usize, column: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn slice_from(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    /// Skip spaces, tabs, comments, and escaped newlines. With
    /// `newlines_too`, bare newlines are whitespace as well (array bodies).
    fn skip_blank(&mut self, newlines_too: bool) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\n') if newlines_too => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn program(&mut self) -> Result<Program> {
        let mut pipelines = Vec::new();
        let mut statements: Vec<Statement> = Vec::new();
        let mut tokens: Vec<Token> = Vec::new();

        loop {
            self.skip_blank(false);
            match self.peek() {
                None => break,
                Some('\n' | ';') => {
                    self.advance();
                    if !tokens.is_empty() {
                        statements.push(Statement {
                            tokens: std::mem::take(&mut tokens),
                        });
                    } else if !statements.is_empty() {
                        // A pipeline split across lines: `a |` then newline.
                        continue;
                    }
                    if !statements.is_empty() {
                        pipelines.push(Pipeline {
                            statements: std::mem::take(&mut statements),
                        });
                    }
                }
                Some('|') => {
                    let (line, column) = (self.line, self.column);
                    self.advance();
                    if tokens.is_empty() {
                        return Err(ShellError::syntax(line, column, "empty pipeline stage"));
                    }
                    statements.push(Statement {
                        tokens: std::mem::take(&mut tokens),
                    });
                }
                Some(_) => tokens.push(self.next_token()?),
            }
        }

        if !tokens.is_empty() {
            statements.push(Statement { tokens });
        } else if !statements.is_empty() {
            return Err(ShellError::incomplete("pipeline ends with '|'"));
        }
        if !statements.is_empty() {
            pipelines.push(Pipeline { statements });
        }
        Ok(Program { pipelines })
    }

    fn next_token(&mut self) -> Result<Token> {
        match self.peek() {
            Some('{') => self.bracketed(TokenKind::Closure, '{', '}'),
            Some('(') => self.bracketed(TokenKind::Execution, '(', ')'),
            Some('[') => self.bracketed(TokenKind::Array, '[', ']'),
            Some('%') if self.peek_at(1) == Some('(') => {
                let (line, column, start) = (self.line, self.column, self.pos);
                self.advance();
                let mut token = self.bracketed(TokenKind::Expr, '(', ')')?;
                token.line = line;
                token.column = column;
                token.source = self.slice_from(start);
                Ok(token)
            }
            Some('=') => {
                let (line, column) = (self.line, self.column);
                self.advance();
                Ok(Token::new(TokenKind::Assign, "=".to_string(), line, column))
            }
            Some(c @ ('}' | ')' | ']')) => Err(ShellError::syntax(
                self.line,
                self.column,
                format!("unexpected '{c}'"),
            )),
            _ => self.word(),
        }
    }

    /// Scan a balanced bracketed token; the body is captured verbatim and
    /// re-parsed lazily by the evaluator.
    fn bracketed(&mut self, kind: TokenKind, open: char, close: char) -> Result<Token> {
        let (line, column, start) = (self.line, self.column, self.pos);
        self.advance(); // opening bracket
        let mut body = String::new();
        let mut depth = 1usize;

        loop {
            match self.peek() {
                None => {
                    return Err(ShellError::incomplete(format!("missing closing '{close}'")));
                }
                Some(c) if c == open => {
                    depth += 1;
                    body.push(c);
                    self.advance();
                }
                Some(c) if c == close => {
                    self.advance();
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    body.push(c);
                }
                Some(q @ ('\'' | '"')) => {
                    body.push(q);
                    self.advance();
                    loop {
                        match self.peek() {
                            None => {
                                return Err(ShellError::incomplete("unterminated quote"));
                            }
                            Some('\\') if q == '"' => {
                                body.push('\\');
                                self.advance();
                                if let Some(c) = self.advance() {
                                    body.push(c);
                                }
                            }
                            Some(c) => {
                                body.push(c);
                                self.advance();
                                if c == q {
                                    break;
                                }
                            }
                        }
                    }
                }
                Some('\\') => {
                    body.push('\\');
                    self.advance();
                    match self.advance() {
                        Some(c) => body.push(c),
                        None => return Err(ShellError::incomplete("dangling escape")),
                    }
                }
                Some(c) => {
                    body.push(c);
                    self.advance();
                }
            }
        }

        let mut token = Token::new(kind, self.slice_from(start), line, column);
        token.body = body;
        Ok(token)
    }

    fn word(&mut self) -> Result<Token> {
        let (line, column, start) = (self.line, self.column, self.pos);
        let mut parts: Vec<WordPart> = Vec::new();
        let mut cur = String::new();
        let mut quoted = false;

        loop {
            match self.peek() {
                None => break,
                Some(c) if is_word_break(c) => break,
                Some('\'') => {
                    quoted = true;
                    self.advance();
                    loop {
                        match self.advance() {
                            None => return Err(ShellError::incomplete("unterminated quote")),
                            Some('\'') => break,
                            Some(c) => cur.push(c),
                        }
                    }
                }
                Some('"') => {
                    quoted = true;
                    self.advance();
                    self.double_quoted(&mut parts, &mut cur)?;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some(c) => cur.push(c),
                        None => return Err(ShellError::incomplete("dangling escape")),
                    }
                }
                Some('$') => self.dollar(&mut parts, &mut cur)?,
                Some(c) => {
                    cur.push(c);
                    self.advance();
                }
            }
        }

        if !cur.is_empty() || parts.is_empty() {
            parts.push(WordPart::Literal(cur));
        }

        let mut token = Token::new(TokenKind::Word, self.slice_from(start), line, column);
        token.body = parts
            .iter()
            .filter_map(|p| match p {
                WordPart::Literal(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        token.parts = parts;
        token.quoted = quoted;
        Ok(token)
    }

    fn double_quoted(&mut self, parts: &mut Vec<WordPart>, cur: &mut String) -> Result<()> {
        loop {
            match self.peek() {
                None => return Err(ShellError::incomplete("unterminated quote")),
                Some('"') => {
                    self.advance();
                    return Ok(());
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some(c) => cur.push(c),
                        None => return Err(ShellError::incomplete("dangling escape")),
                    }
                }
                Some('$') => self.dollar(parts, cur)?,
                Some(c) => {
                    cur.push(c);
                    self.advance();
                }
            }
        }
    }

    /// Scan a `$` interpolation directive into a word part.
    fn dollar(&mut self, parts: &mut Vec<WordPart>, cur: &mut String) -> Result<()> {
        self.advance(); // '$'
        match self.peek() {
            Some('{') => {
                self.advance();
                let mut name = String::new();
                let mut depth = 1usize;
                loop {
                    match self.advance() {
                        None => return Err(ShellError::incomplete("missing closing '}'")),
                        Some('{') => {
                            depth += 1;
                            name.push('{');
                        }
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            name.push('}');
                        }
                        Some(c) => name.push(c),
                    }
                }
                flush(parts, cur);
                parts.push(WordPart::Var(name));
            }
            Some('(') => {
                self.advance();
                let mut body = String::new();
                let mut depth = 1usize;
                loop {
                    match self.advance() {
                        None => return Err(ShellError::incomplete("missing closing ')'")),
                        Some('(') => {
                            depth += 1;
                            body.push('(');
                        }
                        Some(')') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            body.push(')');
                        }
                        Some(c) => body.push(c),
                    }
                }
                flush(parts, cur);
                parts.push(WordPart::Exec(body));
            }
            Some(c) if is_name_char(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if !is_name_char(c) {
                        break;
                    }
                    name.push(c);
                    self.advance();
                }
                flush(parts, cur);
                parts.push(WordPart::Var(name));
            }
            _ => cur.push('$'),
        }
        Ok(())
    }
}

fn flush(parts: &mut Vec<WordPart>, cur: &mut String) {
    if !cur.is_empty() {
        parts.push(WordPart::Literal(std::mem::take(cur)));
    }
}

fn is_word_break(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t' | '\r' | '\n' | ';' | '|' | '=' | '{' | '(' | '[' | '}' | ')' | ']'
    )
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_statement(source: &str) -> Statement {
        let program = parse(source).expect("parse");
        assert_eq!(program.pipelines.len(), 1, "one pipeline in {source:?}");
        assert_eq!(program.pipelines[0].statements.len(), 1);
        program.pipelines[0].statements[0].clone()
    }

    #[test]
    fn words_and_positions() {
        let stmt = single_statement("echo hello world");
        let kinds: Vec<_> = stmt.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Word; 3]);
        assert_eq!(stmt.tokens[1].source, "hello");
        assert_eq!(stmt.tokens[1].line, 1);
        assert_eq!(stmt.tokens[1].column, 6);
    }

    #[test]
    fn assignment_tokens() {
        let stmt = single_statement("x = 42");
        assert_eq!(stmt.tokens.len(), 3);
        assert_eq!(stmt.tokens[1].kind, TokenKind::Assign);
    }

    #[test]
    fn assignment_without_spaces() {
        let stmt = single_statement("x=42");
        assert_eq!(stmt.tokens.len(), 3);
        assert_eq!(stmt.tokens[1].kind, TokenKind::Assign);
        assert_eq!(stmt.tokens[2].body, "42");
    }

    #[test]
    fn pipelines_and_sequences() {
        let program = parse("a | b | c; d").expect("parse");
        assert_eq!(program.pipelines.len(), 2);
        assert_eq!(program.pipelines[0].statements.len(), 3);
        assert_eq!(program.pipelines[1].statements.len(), 1);
    }

    #[test]
    fn pipeline_continues_after_newline() {
        let program = parse("a |\nb").expect("parse");
        assert_eq!(program.pipelines.len(), 1);
        assert_eq!(program.pipelines[0].statements.len(), 2);
    }

    #[test]
    fn closure_body_verbatim() {
        let stmt = single_statement("{ echo $it }");
        assert_eq!(stmt.tokens.len(), 1);
        let token = &stmt.tokens[0];
        assert_eq!(token.kind, TokenKind::Closure);
        assert_eq!(token.body, " echo $it ");
        assert_eq!(token.source, "{ echo $it }");
    }

    #[test]
    fn nested_brackets_balance() {
        let stmt = single_statement("{ a { b } c }");
        assert_eq!(stmt.tokens[0].body, " a { b } c ");
    }

    #[test]
    fn execution_and_expr_tokens() {
        let stmt = single_statement("(bundle 0) %(1 + 2)");
        assert_eq!(stmt.tokens[0].kind, TokenKind::Execution);
        assert_eq!(stmt.tokens[0].body, "bundle 0");
        assert_eq!(stmt.tokens[1].kind, TokenKind::Expr);
        assert_eq!(stmt.tokens[1].body, "1 + 2");
        assert_eq!(stmt.tokens[1].source, "%(1 + 2)");
    }

    #[test]
    fn word_interpolation_parts() {
        let stmt = single_statement("a${x}b");
        let token = &stmt.tokens[0];
        assert_eq!(
            token.parts,
            vec![
                WordPart::Literal("a".into()),
                WordPart::Var("x".into()),
                WordPart::Literal("b".into()),
            ]
        );
        assert!(!token.is_pure_literal());
    }

    #[test]
    fn bare_dollar_name() {
        let stmt = single_statement("$args");
        assert_eq!(stmt.tokens[0].parts, vec![WordPart::Var("args".into())]);
    }

    #[test]
    fn exec_part_inside_word() {
        let stmt = single_statement("pre$(inner cmd)post");
        let token = &stmt.tokens[0];
        assert_eq!(
            token.parts,
            vec![
                WordPart::Literal("pre".into()),
                WordPart::Exec("inner cmd".into()),
                WordPart::Literal("post".into()),
            ]
        );
    }

    #[test]
    fn quoting_marks_word() {
        let stmt = single_statement("\"3\"");
        let token = &stmt.tokens[0];
        assert!(token.quoted);
        assert!(!token.is_pure_literal());
        assert_eq!(token.body, "3");

        let stmt = single_statement("plain");
        assert!(stmt.tokens[0].is_pure_literal());
    }

    #[test]
    fn single_quotes_do_not_interpolate() {
        let stmt = single_statement("'$x'");
        assert_eq!(stmt.tokens[0].parts, vec![WordPart::Literal("$x".into())]);
    }

    #[test]
    fn double_quotes_interpolate() {
        let stmt = single_statement("\"a $x\"");
        assert_eq!(
            stmt.tokens[0].parts,
            vec![WordPart::Literal("a ".into()), WordPart::Var("x".into())]
        );
    }

    #[test]
    fn comments_skipped() {
        let program = parse("a # trailing\n# whole line\nb").expect("parse");
        assert_eq!(program.pipelines.len(), 2);
    }

    #[test]
    fn incomplete_closure() {
        let err = parse("{ echo").expect_err("must fail");
        assert!(err.is_incomplete(), "got {err:?}");
    }

    #[test]
    fn incomplete_quote() {
        let err = parse("echo 'abc").expect_err("must fail");
        assert!(err.is_incomplete());
    }

    #[test]
    fn incomplete_trailing_pipe() {
        let err = parse("a |").expect_err("must fail");
        assert!(err.is_incomplete());
    }

    #[test]
    fn stray_closer_is_syntax_error() {
        let err = parse("echo )").expect_err("must fail");
        assert!(matches!(err.root(), ShellError::Syntax { .. }));
        assert!(!err.is_incomplete());
    }

    #[test]
    fn empty_stage_is_syntax_error() {
        let err = parse("| b").expect_err("must fail");
        assert!(matches!(err.root(), ShellError::Syntax { .. }));
    }

    #[test]
    fn array_positional_form() {
        let stmt = single_statement("[a b 3]");
        let (list, map) = parse_array(&stmt.tokens[0]).expect("array");
        assert_eq!(list.len(), 3);
        assert!(map.is_empty());
    }

    #[test]
    fn array_map_form() {
        let stmt = single_statement("[a=1 b=2]");
        let (list, map) = parse_array(&stmt.tokens[0]).expect("array");
        assert!(list.is_empty());
        assert_eq!(map.len(), 2);
        assert_eq!(map[0].0.body, "a");
        assert_eq!(map[1].1.body, "2");
    }

    #[test]
    fn array_map_missing_value() {
        let stmt = single_statement("[a=]");
        assert!(parse_array(&stmt.tokens[0]).is_err());
    }

    #[test]
    fn array_spanning_lines() {
        let stmt = single_statement("[a\nb]");
        let (list, _) = parse_array(&stmt.tokens[0]).expect("array");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn quoted_bracket_does_not_close() {
        let stmt = single_statement("{ echo '}' }");
        assert_eq!(stmt.tokens[0].body, " echo '}' ");
    }
}
