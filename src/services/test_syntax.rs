//! Well-formedness check for test assertion bodies.
//!
//! Bodies are never executed. A lexical pass first checks that the body is
//! non-empty, that string literals and comments terminate, and that brackets
//! balance. Rust bodies are then parsed as a block with `syn`, including the
//! arguments of assertion macros, and Python bodies as a module with
//! `rustpython-parser`. Other languages get the lexical pass only.

use std::fmt;

use rustpython_parser::{ast, Parse};
use syn::punctuated::Punctuated;
use syn::visit::Visit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Rust,
    Python,
    CFamily,
}

impl Dialect {
    fn for_language(language: &str) -> Self {
        match language.to_ascii_lowercase().as_str() {
            "rust" | "rs" => Self::Rust,
            "python" | "py" => Self::Python,
            _ => Self::CFamily,
        }
    }

    const fn lexes_like_c(self) -> bool {
        matches!(self, Self::Rust | Self::CFamily)
    }
}

/// Macros whose arguments are parsed as comma-separated expressions.
const ASSERTION_MACROS: &[&str] = &[
    "assert",
    "assert_eq",
    "assert_ne",
    "debug_assert",
    "debug_assert_eq",
    "debug_assert_ne",
];

const fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Check that `body` is well-formed standalone code in `language`.
pub fn check(body: &str, language: &str) -> Result<(), SyntaxError> {
    if body.trim().is_empty() {
        return Err(SyntaxError {
            line: 1,
            reason: "empty assertion body".to_string(),
        });
    }

    let dialect = Dialect::for_language(language);
    lexical(body, dialect)?;
    match dialect {
        Dialect::Rust => parse_rust(body),
        Dialect::Python => parse_python(body),
        Dialect::CFamily => Ok(()),
    }
}

fn lexical(body: &str, dialect: Dialect) -> Result<(), SyntaxError> {
    let chars: Vec<char> = body.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => line += 1,
            '/' if dialect.lexes_like_c() && next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if dialect.lexes_like_c() && next == Some('*') => {
                i = skip_block_comment(&chars, i, &mut line)?;
                continue;
            }
            '#' if dialect == Dialect::Python => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '"' | '\'' if dialect == Dialect::Python => {
                i = skip_python_string(&chars, i, &mut line)?;
                continue;
            }
            '"' => {
                i = skip_quoted(&chars, i, '"', &mut line)?;
                continue;
            }
            '\'' => {
                i = skip_char_literal(&chars, i);
                continue;
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if closing_for(open) == c => {}
                Some((open, open_line)) => {
                    return Err(SyntaxError {
                        line,
                        reason: format!(
                            "'{c}' does not match '{open}' opened on line {open_line}"
                        ),
                    })
                }
                None => {
                    return Err(SyntaxError {
                        line,
                        reason: format!("unexpected '{c}'"),
                    })
                }
            },
            _ => {}
        }
        i += 1;
    }

    if let Some((open, open_line)) = stack.pop() {
        return Err(SyntaxError {
            line: open_line,
            reason: format!("'{open}' is never closed"),
        });
    }
    Ok(())
}

/// Parse the body as the statements of a block. `syn` keeps macro arguments
/// as raw tokens, so assertion macro arguments are parsed separately.
fn parse_rust(body: &str) -> Result<(), SyntaxError> {
    // The opening brace shares line 1 with the body so spans keep its lines
    let block: syn::Block = syn::parse_str(&format!("{{{body}\n}}")).map_err(rust_error)?;
    let mut args = AssertionArgs::default();
    args.visit_block(&block);
    args.error.map_or(Ok(()), |err| Err(rust_error(err)))
}

fn rust_error(err: syn::Error) -> SyntaxError {
    SyntaxError {
        line: err.span().start().line.max(1),
        reason: err.to_string(),
    }
}

#[derive(Default)]
struct AssertionArgs {
    error: Option<syn::Error>,
}

impl<'ast> Visit<'ast> for AssertionArgs {
    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        if self.error.is_some() {
            return;
        }
        let is_assertion = mac
            .path
            .segments
            .last()
            .is_some_and(|segment| ASSERTION_MACROS.contains(&segment.ident.to_string().as_str()));
        if !is_assertion {
            return;
        }
        match mac.parse_body_with(Punctuated::<syn::Expr, syn::Token![,]>::parse_terminated) {
            Ok(parsed) => {
                let mut nested = Self::default();
                for arg in &parsed {
                    nested.visit_expr(arg);
                }
                self.error = nested.error;
            }
            Err(err) => self.error = Some(err),
        }
    }
}

fn parse_python(body: &str) -> Result<(), SyntaxError> {
    let source = dedent(body);
    ast::Suite::parse(&source, "<test>").map(|_| ()).map_err(|err| {
        let offset = usize::try_from(u32::from(err.offset)).unwrap_or(0);
        let line = source
            .get(..offset)
            .map_or(1, |before| before.matches('\n').count() + 1);
        SyntaxError {
            line,
            reason: err.error.to_string(),
        }
    })
}

/// Strip the indentation shared by every non-blank line.
fn dedent(body: &str) -> String {
    let indent = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    body.lines()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Skip a nested `/* */` comment starting at `start`. Returns the index after it.
fn skip_block_comment(chars: &[char], start: usize, line: &mut usize) -> Result<usize, SyntaxError> {
    let opened_on = *line;
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        match (chars[i], chars.get(i + 1).copied()) {
            ('/', Some('*')) => {
                depth += 1;
                i += 2;
            }
            ('*', Some('/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Ok(i);
                }
            }
            ('\n', _) => {
                *line += 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Err(SyntaxError {
        line: opened_on,
        reason: "unterminated block comment".to_string(),
    })
}

/// Skip a string delimited by `quote`, honouring backslash escapes.
fn skip_quoted(chars: &[char], start: usize, quote: char, line: &mut usize) -> Result<usize, SyntaxError> {
    let opened_on = *line;
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' => {
                *line += 1;
                i += 1;
            }
            c if c == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(SyntaxError {
        line: opened_on,
        reason: "unterminated string literal".to_string(),
    })
}

/// Skip `'x'` or `'\n'`. Anything else after a quote is a lifetime or label,
/// so only the quote itself is consumed.
fn skip_char_literal(chars: &[char], start: usize) -> usize {
    match (chars.get(start + 1), chars.get(start + 2), chars.get(start + 3)) {
        (Some('\\'), Some(_), _) => {
            let mut i = start + 2;
            while i < chars.len() && i < start + 12 {
                if chars[i] == '\'' {
                    return i + 1;
                }
                i += 1;
            }
            start + 1
        }
        (Some(_), Some('\''), _) => start + 3,
        _ => start + 1,
    }
}

fn skip_python_string(chars: &[char], start: usize, line: &mut usize) -> Result<usize, SyntaxError> {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    if !triple {
        let end = skip_quoted(chars, start, quote, line)?;
        return Ok(end);
    }
    let opened_on = *line;
    let mut i = start + 3;
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == '\n' {
            *line += 1;
        }
        if chars[i] == quote
            && chars.get(i + 1) == Some(&quote)
            && chars.get(i + 2) == Some(&quote)
        {
            return Ok(i + 3);
        }
        i += 1;
    }
    Err(SyntaxError {
        line: opened_on,
        reason: "unterminated triple-quoted string".to_string(),
    })
}
