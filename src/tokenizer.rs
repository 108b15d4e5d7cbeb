use log::debug;
use winnow::ascii::space0;
use winnow::combinator::{delimited, terminated};
use winnow::error::{ContextError, ErrMode, ModalResult};
use winnow::prelude::*;
use winnow::token::{one_of, take_till, take_while};

use crate::error::{Error, Position, Result};
use crate::token::{Keyword, Token, TokenKind};

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut line_count = 0;

    for (idx, line) in source.lines().enumerate() {
        let mut raw = line;
        if idx == 0 {
            raw = raw.trim_start_matches('\u{feff}');
        }
        LineLexer::new(raw, idx).run(&mut tokens)?;
        line_count += 1;
    }

    debug!("tokenized {} lines into {} tokens", line_count, tokens.len());
    Ok(tokens)
}

/// Cursor over a single source line. Nothing carries over between lines.
struct LineLexer<'s> {
    code: &'s str,
    line: usize,
    offset: usize,
}

impl<'s> LineLexer<'s> {
    fn new(code: &'s str, line: usize) -> Self {
        Self {
            code,
            line,
            offset: 0,
        }
    }

    fn rest(&self) -> &'s str {
        &self.code[self.offset..]
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.code[..self.offset].chars().count())
    }

    fn push(&self, kind: TokenKind, position: Position, tokens: &mut Vec<Token>) {
        tokens.push(Token { kind, position });
    }

    fn run(mut self, tokens: &mut Vec<Token>) -> Result<()> {
        while let Some(c) = self.rest().chars().next() {
            let position = self.position();
            let rest = self.rest();

            match c {
                c if c.is_whitespace() => {
                    self.offset += c.len_utf8();
                }
                '/' => {
                    if rest.starts_with("//") {
                        return Ok(());
                    }
                    return Err(Error::lex("unexpected `/`", position));
                }
                '"' => {
                    let len = scan_string_literal(rest)
                        .ok_or_else(|| Error::lex("unterminated `\"`", position))?;
                    let value = serde_json::from_str::<String>(&rest[..len]).map_err(|_| {
                        Error::lex("invalid escape sequence in string literal", position)
                    })?;
                    self.push(TokenKind::String { value }, position, tokens);
                    self.offset += len;
                }
                '=' => {
                    // A header must occupy the entire line.
                    if self.offset == 0 {
                        if let Ok(name) = segment_header.parse(self.code) {
                            let name = name.to_string();
                            self.push(TokenKind::SegmentHeader { name }, position, tokens);
                            return Ok(());
                        }
                    }
                    return Err(Error::lex("unexpected `=`", position));
                }
                '-' => {
                    // So must a divert, from the arrow onwards.
                    if let Ok(target) = divert_target.parse(rest) {
                        let target = target.to_string();
                        self.push(TokenKind::Divert { target }, position, tokens);
                        return Ok(());
                    }
                    return Err(Error::lex("unexpected `-`", position));
                }
                '[' => {
                    let (expr, len) = consume(rest, condition)
                        .ok_or_else(|| Error::lex("unterminated `[`", position))?;
                    if expr.trim().is_empty() {
                        return Err(Error::lex("empty condition", position));
                    }
                    let expr = expr.to_string();
                    self.push(TokenKind::Condition { expr }, position, tokens);
                    self.offset += len;
                }
                '{' => {
                    // Script blocks are single-line only.
                    let (code, len) = consume(rest, inline_script)
                        .ok_or_else(|| Error::lex("unterminated `{`", position))?;
                    let code = code.trim();
                    if code.is_empty() {
                        return Err(Error::lex("empty script block", position));
                    }
                    let code = code.to_string();
                    self.push(TokenKind::InlineScript { code }, position, tokens);
                    self.offset += len;
                }
                '*' => {
                    if self.offset == 0 && rest[1..].starts_with(' ') {
                        self.push(TokenKind::ChoiceMarker, position, tokens);
                        self.offset += 1;
                    } else {
                        return Err(Error::lex("unexpected `*`", position));
                    }
                }
                c if c.is_ascii_lowercase() => {
                    let (ident, len) = consume(rest, identifier)
                        .ok_or_else(|| Error::Internal("identifier scan failed".to_string()))?;
                    let ident = ident.to_string();

                    if rest[len..].starts_with(':') {
                        self.push(TokenKind::ActorLine { actor: ident }, position, tokens);
                        self.offset += len + 1;
                    } else if let Some(keyword) = Keyword::from_ident(&ident) {
                        self.push(TokenKind::ControlFlow { keyword }, position, tokens);
                        self.offset += len;
                    } else {
                        self.push(TokenKind::Symbol { value: ident }, position, tokens);
                        self.offset += len;
                    }
                }
                other => {
                    return Err(Error::lex(
                        format!("unexpected character `{}`", other),
                        position,
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Runs `parser` against the head of `input`, returning its output and the
/// number of bytes it consumed.
fn consume<'s>(
    input: &'s str,
    mut parser: impl Parser<&'s str, &'s str, ErrMode<ContextError>>,
) -> Option<(&'s str, usize)> {
    let mut remaining = input;
    let out = parser.parse_next(&mut remaining).ok()?;
    Some((out, input.len() - remaining.len()))
}

/// Length in bytes of the literal at the start of `s`, quotes included.
fn scan_string_literal(s: &str) -> Option<usize> {
    let mut chars = s.char_indices();
    if chars.next()?.1 != '"' {
        return None;
    }

    let mut escaped = false;
    for (idx, ch) in chars {
        if escaped {
            escaped = false;
        } else if ch == '"' {
            return Some(idx + 1);
        } else if ch == '\\' {
            escaped = true;
        }
    }
    None
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `=== name ===`, with at least two `=` on each side.
fn segment_header<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    (
        take_while(2.., '='),
        one_of(char::is_whitespace),
        take_while(1.., is_word),
        take_while(1.., char::is_whitespace),
        terminated(take_while(2.., '='), space0),
    )
        .map(|(_, _, name, _, _)| name)
        .parse_next(input)
}

/// `-> target`, where the target starts with a letter.
fn divert_target<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    delimited(
        "-> ",
        (one_of(|c: char| c.is_ascii_alphabetic()), take_while(0.., is_word)).take(),
        space0,
    )
    .parse_next(input)
}

fn identifier<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_').parse_next(input)
}

fn condition<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    delimited('[', take_till(0.., ']'), ']').parse_next(input)
}

fn inline_script<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    delimited('{', take_till(0.., '}'), '}').parse_next(input)
}
