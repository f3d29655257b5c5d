//! Command line parser
//!
//! Turns one raw input line into pipeline stages using monch parse results.
//! The grammar is intentionally small: quoting, `|` pipes, the redirects
//! `>`, `>>`, `2>`, `2>>` and `<`, and a trailing `&` background marker.
//! There are no sequences, subshells, globs or substitutions.
//!
//! The parser never fails. Unbalanced quotes are kept as literal characters
//! for the rest of the line and a redirect operator without a target is kept
//! as a literal argument.

use std::fmt;

use monch::{ParseError, ParseErrorFailure, ParseResult};
use serde::Serialize;
use tracing::debug;

// ============================================================================
// AST Types
// ============================================================================

/// A fully parsed input line: a pipeline plus the background flag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ParsedLine {
    pub commands: Vec<ParsedCommand>,
    pub background: bool,
}

impl ParsedLine {
    /// True when the line contains no stage to run.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// True when the line needs the pipeline executor (pipes or redirects).
    pub fn has_pipeline_features(&self) -> bool {
        self.commands.len() > 1 || self.commands.iter().any(|c| !c.redirects.is_empty())
    }

    /// First stage of the pipeline, if any.
    pub fn first(&self) -> Option<&ParsedCommand> {
        self.commands.first()
    }

    /// The pipeline rendered back to text, without the `&` marker.
    pub fn command_text(&self) -> String {
        self.commands
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl fmt::Display for ParsedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_text())?;
        if self.background {
            f.write_str(" &")?;
        }
        Ok(())
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedCommand {
    pub command: String,
    pub args: Vec<String>,
    pub redirects: Vec<Redirect>,
}

impl ParsedCommand {
    /// Create a stage without redirects.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            redirects: Vec::new(),
        }
    }

    /// Command name followed by its arguments.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::with_capacity(self.args.len() + 1);
        tokens.push(self.command.clone());
        tokens.extend(self.args.iter().cloned());
        tokens
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_for_display(&self.command))?;
        for arg in &self.args {
            write!(f, " {}", quote_for_display(arg))?;
        }
        for redirect in &self.redirects {
            write!(f, " {}", redirect)?;
        }
        Ok(())
    }
}

/// I/O redirection attached to a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub target: String,
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.operator(), quote_for_display(&self.target))
    }
}

/// Redirect operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RedirectKind {
    /// `>` - write stdout, truncating
    StdoutTruncate,
    /// `>>` - append stdout
    StdoutAppend,
    /// `2>` - write stderr, truncating
    StderrTruncate,
    /// `2>>` - append stderr
    StderrAppend,
    /// `<` - read stdin from file
    Stdin,
}

impl RedirectKind {
    /// Operator text as typed by the user.
    pub fn operator(&self) -> &'static str {
        match self {
            RedirectKind::StdoutTruncate => ">",
            RedirectKind::StdoutAppend => ">>",
            RedirectKind::StderrTruncate => "2>",
            RedirectKind::StderrAppend => "2>>",
            RedirectKind::Stdin => "<",
        }
    }

    /// True for the append variants.
    pub fn is_append(&self) -> bool {
        matches!(self, RedirectKind::StdoutAppend | RedirectKind::StderrAppend)
    }
}

// ============================================================================
// Parser Implementation
// ============================================================================

/// Parse a raw command line.
///
/// An empty line, or a line that is empty once the `&` marker is stripped,
/// yields zero stages.
pub fn parse_line(raw: &str) -> ParsedLine {
    let (body, background) = strip_background(raw);

    let commands = split_pipeline(body)
        .into_iter()
        .filter_map(|segment| {
            let stage = parse_stage(segment);
            if stage.is_none() && !segment.trim().is_empty() {
                debug!(segment = %segment, "parser.stage_without_command");
            }
            stage
        })
        .collect();

    ParsedLine {
        commands,
        background,
    }
}

/// Detect and strip a trailing, unescaped `&`.
pub fn strip_background(raw: &str) -> (&str, bool) {
    let trimmed = raw.trim_end();
    match trimmed.strip_suffix('&') {
        Some(rest) if !rest.ends_with('\\') => (rest.trim_end(), true),
        _ => (trimmed, false),
    }
}

/// Split a line on `|` characters that are outside quotes.
pub fn split_pipeline(line: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut pos = 0;

    while pos < line.len() {
        let rest = &line[pos..];
        let Some(c) = rest.chars().next() else {
            break;
        };

        match c {
            '\\' => {
                pos += c.len_utf8();
                if let Some(next) = line[pos..].chars().next() {
                    pos += next.len_utf8();
                }
            }
            '\'' | '"' => match find_closing_quote(&rest[1..], c) {
                Some(end) => pos += 1 + end + 1,
                None => pos += 1,
            },
            '|' => {
                segments.push(&line[start..pos]);
                pos += 1;
                start = pos;
            }
            _ => pos += c.len_utf8(),
        }
    }

    segments.push(&line[start..]);
    segments
}

/// Parse a single pipeline stage. Returns `None` when no command word remains.
fn parse_stage(segment: &str) -> Option<ParsedCommand> {
    let mut words = Vec::new();
    let mut redirects = Vec::new();
    let mut remaining = skip_whitespace(segment);

    while !remaining.is_empty() {
        if at_token_start_redirect(remaining) {
            match parse_redirect(remaining) {
                Ok((rest, redirect)) => {
                    redirects.push(redirect);
                    remaining = skip_whitespace(rest);
                    continue;
                }
                Err(ParseError::Failure(failure)) => {
                    debug!(input = %segment, reason = %failure.message, "parser.redirect_without_target");
                    let (rest, literal) = take_operator(remaining);
                    words.push(literal.to_string());
                    remaining = skip_whitespace(rest);
                    continue;
                }
                Err(ParseError::Backtrace) => {}
            }
        }

        match parse_word(remaining) {
            Ok((rest, word)) => {
                words.push(word);
                remaining = skip_whitespace(rest);
            }
            Err(_) => {
                // A lone operator character that did not form a redirect.
                let (rest, literal) = take_operator(remaining);
                words.push(literal.to_string());
                remaining = skip_whitespace(rest);
            }
        }
    }

    let mut words = words.into_iter();
    let command = words.next()?;
    Some(ParsedCommand {
        command,
        args: words.collect(),
        redirects,
    })
}

/// True when the input starts with a redirect operator.
fn at_token_start_redirect(input: &str) -> bool {
    input.starts_with('>') || input.starts_with('<') || input.starts_with("2>")
}

/// Parse a redirect operator and its target word.
fn parse_redirect(input: &str) -> ParseResult<'_, Redirect> {
    let (kind, rest) = if let Some(r) = input.strip_prefix("2>>") {
        (RedirectKind::StderrAppend, r)
    } else if let Some(r) = input.strip_prefix("2>") {
        (RedirectKind::StderrTruncate, r)
    } else if let Some(r) = input.strip_prefix(">>") {
        (RedirectKind::StdoutAppend, r)
    } else if let Some(r) = input.strip_prefix('>') {
        (RedirectKind::StdoutTruncate, r)
    } else if let Some(r) = input.strip_prefix('<') {
        (RedirectKind::Stdin, r)
    } else {
        return Err(ParseError::Backtrace);
    };

    let rest = skip_whitespace(rest);
    if rest.is_empty() || rest.starts_with(['>', '<']) {
        return Err(ParseError::Failure(ParseErrorFailure::new(
            input,
            format!("Missing target for '{}'", kind.operator()),
        )));
    }

    let (rest, target) = parse_word(rest).map_err(|_| {
        ParseError::Failure(ParseErrorFailure::new(
            input,
            format!("Invalid target for '{}'", kind.operator()),
        ))
    })?;

    Ok((rest, Redirect { kind, target }))
}

/// Parse one word, stripping quotes and resolving escapes.
///
/// The word ends at unquoted whitespace or an unquoted `>`/`<`.
fn parse_word(input: &str) -> ParseResult<'_, String> {
    let mut word = String::new();
    let mut consumed_any = false;
    let mut remaining = input;

    while let Some(c) = remaining.chars().next() {
        if c.is_whitespace() || c == '>' || c == '<' {
            break;
        }
        consumed_any = true;

        match c {
            '\\' => {
                let after = &remaining[1..];
                match after.chars().next() {
                    Some(escaped) => {
                        word.push(escaped);
                        remaining = &after[escaped.len_utf8()..];
                    }
                    None => {
                        word.push('\\');
                        remaining = after;
                    }
                }
            }
            '\'' | '"' => {
                let after = &remaining[1..];
                match find_closing_quote(after, c) {
                    Some(end) => {
                        word.push_str(&unescape_quoted(&after[..end], c));
                        remaining = &after[end + 1..];
                    }
                    None => {
                        debug!(quote = %c, "parser.unbalanced_quote");
                        word.push(c);
                        remaining = after;
                    }
                }
            }
            _ => {
                word.push(c);
                remaining = &remaining[c.len_utf8()..];
            }
        }
    }

    if !consumed_any {
        return Err(ParseError::Backtrace);
    }

    Ok((remaining, word))
}

/// Consume a run of operator characters as a literal token.
fn take_operator(input: &str) -> (&str, &str) {
    let end = input
        .find(|c: char| !matches!(c, '>' | '<' | '2'))
        .unwrap_or(input.len())
        .max(1);
    (&input[end..], &input[..end])
}

/// Find the byte offset of the closing `quote`, skipping backslash escapes.
fn find_closing_quote(input: &str, quote: char) -> Option<usize> {
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == quote {
            return Some(idx);
        }
    }
    None
}

/// Resolve backslash escapes inside a quoted region.
fn unescape_quoted(content: &str, quote: char) -> String {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if next == quote || next == '\\' => {
                    result.push(next);
                    chars.next();
                }
                _ => result.push(c),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn skip_whitespace(input: &str) -> &str {
    input.trim_start()
}

fn quote_for_display(token: &str) -> String {
    if token.is_empty() {
        "''".to_string()
    } else if token.contains(|c: char| c.is_whitespace() || matches!(c, '|' | '>' | '<' | '&' | '"' | '\'')) {
        format!("'{}'", token.replace('\'', "\\'"))
    } else {
        token.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
