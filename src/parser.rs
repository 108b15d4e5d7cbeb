use log::{debug, trace};

use crate::ast::*;
use crate::error::{Error, Position, Result};
use crate::token::{Keyword, Token, TokenKind};

pub fn parse(tokens: &[Token]) -> Result<Vec<Segment>> {
    Parser::new(tokens).run()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    Consequent,
    Alternate,
    Closed,
}

/// An open statement-level `if` (or `elif`) whose branches are still being
/// collected.
struct Scope {
    state: ScopeState,
    node: Conditional,
    opened_at: Position,
}

impl Scope {
    fn push(&mut self, node: Node) -> Result<()> {
        match self.state {
            ScopeState::Consequent => self.node.consequent.push(node),
            ScopeState::Alternate => self.node.alternate.push(node),
            ScopeState::Closed => {
                return Err(Error::Internal(
                    "node routed into a closed conditional scope".to_string(),
                ))
            }
        }
        Ok(())
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    cursor: usize,
    segments: Vec<Segment>,
    scopes: Vec<Scope>,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            cursor: 0,
            segments: vec![Segment::new("")],
            scopes: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Segment>> {
        while let Some(token) = self.advance() {
            self.dispatch(token)?;
        }
        self.ensure_no_open_scope()?;

        let mut segments = self.segments;
        if segments
            .first()
            .is_some_and(|s| s.is_anonymous() && s.children.is_empty())
        {
            segments.remove(0);
        }

        debug!("parsed {} segments", segments.len());
        Ok(segments)
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.cursor)
    }

    /// Next token, only if it sits on `line`.
    fn peek_on_line(&self, line: usize) -> Option<&'t Token> {
        self.peek().filter(|t| t.line() == line)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.cursor)?;
        self.cursor += 1;
        Some(token)
    }

    fn end_position(&self) -> Position {
        self.tokens.last().map(|t| t.position).unwrap_or_default()
    }

    fn dispatch(&mut self, token: &'t Token) -> Result<()> {
        match &token.kind {
            TokenKind::SegmentHeader { name } => {
                self.ensure_no_open_scope()?;
                self.segments.push(Segment::new(name.clone()));
            }
            TokenKind::ControlFlow { keyword } => self.control_flow(*keyword, token)?,
            TokenKind::ChoiceMarker => {
                let choice = self.choice(token)?;
                self.emit(choice)?;
            }
            TokenKind::ActorLine { actor } => {
                let line = match self.peek_on_line(token.line()) {
                    Some(Token {
                        kind: TokenKind::String { value },
                        ..
                    }) => {
                        self.advance();
                        value.clone()
                    }
                    _ => {
                        return Err(Error::syntax(
                            format!("expected a string after `{}:`", actor),
                            token.position,
                        ))
                    }
                };
                self.emit(Node::ActorLine {
                    actor: actor.clone(),
                    line,
                })?;
            }
            TokenKind::Divert { target } => self.emit(Node::Divert {
                target: target.clone(),
            })?,
            TokenKind::InlineScript { code } => {
                self.emit(Node::InlineScript { code: code.clone() })?
            }
            TokenKind::Symbol { value } => {
                let args = self.macro_args(token)?;
                self.emit(Node::Macro {
                    name: value.clone(),
                    args,
                })?;
            }
            TokenKind::String { .. } | TokenKind::Condition { .. } => {
                return Err(Error::syntax(
                    format!("unexpected {}", token.kind.describe()),
                    token.position,
                ))
            }
        }
        Ok(())
    }

    /// Adds `node` to the innermost open branch, or to the current segment
    /// when no conditional is open.
    fn emit(&mut self, node: Node) -> Result<()> {
        match self.scopes.last_mut() {
            Some(scope) => scope.push(node),
            None => {
                self.current_segment()?.children.push(node);
                Ok(())
            }
        }
    }

    fn current_segment(&mut self) -> Result<&mut Segment> {
        self.segments
            .last_mut()
            .ok_or_else(|| Error::Internal("no segment to append to".to_string()))
    }

    fn ensure_no_open_scope(&self) -> Result<()> {
        match self.scopes.last() {
            Some(scope) => Err(Error::syntax("unclosed conditional", scope.opened_at)),
            None => Ok(()),
        }
    }

    fn top_state(&self) -> Option<ScopeState> {
        self.scopes.last().map(|s| s.state)
    }

    fn control_flow(&mut self, keyword: Keyword, token: &'t Token) -> Result<()> {
        match keyword {
            Keyword::If => {
                let conditions = self.conditions(token)?;
                trace!("open conditional, depth {}", self.scopes.len() + 1);
                self.scopes.push(Scope {
                    state: ScopeState::Consequent,
                    node: Conditional::new(conditions),
                    opened_at: token.position,
                });
            }
            Keyword::Elif => {
                match self.top_state() {
                    Some(ScopeState::Consequent) => {}
                    Some(ScopeState::Alternate) => {
                        return Err(Error::syntax("elif after else", token.position))
                    }
                    Some(ScopeState::Closed) => {
                        return Err(Error::Internal("elif on a closed scope".to_string()))
                    }
                    None => {
                        return Err(Error::syntax("no if continued by elif", token.position))
                    }
                }
                let conditions = self.conditions(token)?;
                if let Some(top) = self.scopes.last_mut() {
                    top.state = ScopeState::Closed;
                }
                trace!("chain elif, depth {}", self.scopes.len() + 1);
                self.scopes.push(Scope {
                    state: ScopeState::Consequent,
                    node: Conditional::new(conditions),
                    opened_at: token.position,
                });
            }
            Keyword::Else => match self.scopes.last_mut() {
                Some(top) if top.state == ScopeState::Consequent => {
                    top.state = ScopeState::Alternate;
                }
                Some(top) if top.state == ScopeState::Alternate => {
                    return Err(Error::syntax("duplicate else", token.position))
                }
                Some(_) => return Err(Error::Internal("else on a closed scope".to_string())),
                None => return Err(Error::syntax("no if continued by else", token.position)),
            },
            Keyword::Endif => {
                match self.scopes.last_mut() {
                    Some(top) if top.state != ScopeState::Closed => {
                        top.state = ScopeState::Closed;
                    }
                    Some(_) => {
                        return Err(Error::Internal("endif on a closed scope".to_string()))
                    }
                    None => return Err(Error::syntax("no if closed by endif", token.position)),
                }
                self.collapse_closed_scopes()?;
            }
        }
        Ok(())
    }

    /// Pops every trailing closed scope. A popped `elif` becomes the alternate
    /// of the scope below it; the head of the chain goes to whatever encloses
    /// it.
    fn collapse_closed_scopes(&mut self) -> Result<()> {
        while self.top_state() == Some(ScopeState::Closed) {
            let Some(scope) = self.scopes.pop() else {
                break;
            };
            trace!("close conditional, depth {}", self.scopes.len() + 1);
            let node = Node::Conditional(scope.node);

            match self.scopes.last_mut() {
                Some(parent) if parent.state == ScopeState::Closed => {
                    parent.node.alternate.push(node)
                }
                Some(parent) => parent.push(node)?,
                None => self.current_segment()?.children.push(node),
            }
        }
        Ok(())
    }

    /// One or more conditions following `keyword` on its own line.
    fn conditions(&mut self, keyword: &'t Token) -> Result<Vec<String>> {
        let mut conditions = Vec::new();
        while let Some(Token {
            kind: TokenKind::Condition { expr },
            ..
        }) = self.peek_on_line(keyword.line())
        {
            conditions.push(expr.clone());
            self.advance();
        }

        if conditions.is_empty() {
            return Err(Error::syntax(
                format!("expected a condition after {}", keyword.kind.describe()),
                keyword.position,
            ));
        }
        Ok(conditions)
    }

    fn trailing_divert(&mut self, line: usize) -> Option<String> {
        match self.peek_on_line(line) {
            Some(Token {
                kind: TokenKind::Divert { target },
                ..
            }) => {
                self.advance();
                Some(target.clone())
            }
            _ => None,
        }
    }

    fn choice(&mut self, marker: &'t Token) -> Result<Node> {
        match self.peek() {
            Some(
                token @ Token {
                    kind: TokenKind::String { value },
                    ..
                },
            ) => {
                self.advance();
                let mut conditions = Vec::new();
                while let Some(Token {
                    kind: TokenKind::Condition { expr },
                    ..
                }) = self.peek_on_line(token.line())
                {
                    conditions.push(expr.clone());
                    self.advance();
                }
                let divert = self.trailing_divert(token.line());
                Ok(Node::SimpleChoice(SimpleChoice {
                    line: value.clone(),
                    conditions,
                    divert,
                }))
            }
            Some(Token {
                kind: TokenKind::ControlFlow {
                    keyword: Keyword::If,
                },
                ..
            }) => Ok(Node::ComplexChoice(self.parse_complex_choice(Keyword::If)?)),
            Some(other) => Err(Error::syntax(
                format!("expected a string or `if` after `*`, found {}", other.kind.describe()),
                other.position,
            )),
            None => Err(Error::syntax(
                "expected a string or `if` after `*`",
                marker.position,
            )),
        }
    }

    fn expect_keyword(&mut self, expected: Keyword) -> Result<&'t Token> {
        match self.advance() {
            Some(
                token @ Token {
                    kind: TokenKind::ControlFlow { keyword },
                    ..
                },
            ) if *keyword == expected => Ok(token),
            Some(other) => Err(Error::syntax(
                format!("expected `{}`, found {}", expected, other.kind.describe()),
                other.position,
            )),
            None => Err(Error::syntax(
                format!("expected `{}` before end of input", expected),
                self.end_position(),
            )),
        }
    }

    /// `if [cond] <body> (elif ... | else <body> endif | endif)` where each
    /// body is a single line. Nesting is carried by the call stack.
    fn parse_complex_choice(&mut self, expected: Keyword) -> Result<ComplexChoice> {
        let keyword = self.expect_keyword(expected)?;
        let condition = match self.advance() {
            Some(Token {
                kind: TokenKind::Condition { expr },
                ..
            }) => expr.clone(),
            _ => {
                return Err(Error::syntax(
                    format!("expected a condition after `{}`", expected),
                    keyword.position,
                ))
            }
        };

        let consequent = self.parse_choice_body()?;

        let alternate = match self.peek().map(|t| (&t.kind, t.position)) {
            Some((TokenKind::ControlFlow { keyword: Keyword::Elif }, _)) => {
                Some(self.parse_complex_choice(Keyword::Elif)?)
            }
            Some((TokenKind::ControlFlow { keyword: Keyword::Else }, _)) => {
                self.advance();
                let alternate = self.parse_choice_body()?;
                self.expect_keyword(Keyword::Endif)?;
                alternate
            }
            Some((TokenKind::ControlFlow { keyword: Keyword::Endif }, _)) => {
                self.advance();
                None
            }
            Some((kind, position)) => {
                return Err(Error::syntax(
                    format!("expected `elif`, `else` or `endif`, found {}", kind.describe()),
                    position,
                ))
            }
            None => {
                return Err(Error::syntax(
                    "unclosed conditional choice",
                    keyword.position,
                ))
            }
        };

        Ok(ComplexChoice::ControlFlowChoice {
            condition,
            consequent: consequent.map(Box::new),
            alternate: alternate.map(Box::new),
        })
    }

    /// `None` when the branch offers no line at all.
    fn parse_choice_body(&mut self) -> Result<Option<ComplexChoice>> {
        match self.peek() {
            Some(
                token @ Token {
                    kind: TokenKind::String { value },
                    ..
                },
            ) => {
                self.advance();
                let divert = self.trailing_divert(token.line());
                Ok(Some(ComplexChoice::UnconditionalChoice {
                    line: value.clone(),
                    divert,
                }))
            }
            Some(Token {
                kind: TokenKind::ControlFlow { keyword },
                ..
            }) => match keyword {
                Keyword::If => Ok(Some(self.parse_complex_choice(Keyword::If)?)),
                Keyword::Elif | Keyword::Else | Keyword::Endif => Ok(None),
            },
            Some(other) => Err(Error::syntax(
                format!("invalid choice body: {}", other.kind.describe()),
                other.position,
            )),
            None => Err(Error::syntax(
                "unexpected end of input in choice",
                self.end_position(),
            )),
        }
    }

    /// Everything after the macro name on the same source line.
    fn macro_args(&mut self, name: &'t Token) -> Result<Vec<String>> {
        let mut args = Vec::new();
        while let Some(token) = self.peek_on_line(name.line()) {
            match &token.kind {
                TokenKind::Symbol { value } | TokenKind::String { value } => {
                    args.push(value.clone())
                }
                other => {
                    return Err(Error::syntax(
                        format!(
                            "macro argument must be a symbol or string, found {}",
                            other.describe()
                        ),
                        token.position,
                    ))
                }
            }
            self.advance();
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;
    use rstest::rstest;

    fn parse_source(source: &str) -> Vec<Segment> {
        parse(&tokenize(source).unwrap()).unwrap()
    }

    fn syntax_error(source: &str) -> (String, Position) {
        match parse(&tokenize(source).unwrap()) {
            Err(Error::Syntax { message, position }) => (message, position),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    fn say(actor: &str, line: &str) -> Node {
        Node::ActorLine {
            actor: actor.to_string(),
            line: line.to_string(),
        }
    }

    fn unconditional(line: &str, divert: Option<&str>) -> Option<Box<ComplexChoice>> {
        Some(Box::new(ComplexChoice::UnconditionalChoice {
            line: line.to_string(),
            divert: divert.map(str::to_string),
        }))
    }

    #[test]
    fn test_segments_in_order_and_empty_prelude_dropped() {
        let segments = parse_source("// intro\n=== a ===\nalice: \"hi\"\n\n=== b ===\n");
        assert_eq!(
            segments,
            vec![
                Segment {
                    name: "a".to_string(),
                    children: vec![say("alice", "hi")],
                },
                Segment::new("b"),
            ]
        );
    }

    #[test]
    fn test_leading_content_stays_in_anonymous_segment() {
        let segments = parse_source("alice: \"early\"\n=== a ===\n");
        assert_eq!(segments.len(), 2);
        assert!(segments[0].is_anonymous());
        assert_eq!(segments[0].children, vec![say("alice", "early")]);
    }

    #[test]
    fn test_simple_choice() {
        let segments = parse_source("=== a ===\n* \"x\" [cond] -> y\n");
        assert_eq!(
            segments[0].children,
            vec![Node::SimpleChoice(SimpleChoice {
                line: "x".to_string(),
                conditions: vec!["cond".to_string()],
                divert: Some("y".to_string()),
            })]
        );
    }

    #[test]
    fn test_choice_does_not_absorb_next_line_divert() {
        let segments = parse_source("=== a ===\n* \"x\"\n-> b\n");
        assert_eq!(
            segments[0].children,
            vec![
                Node::SimpleChoice(SimpleChoice {
                    line: "x".to_string(),
                    conditions: vec![],
                    divert: None,
                }),
                Node::Divert {
                    target: "b".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_control_flow_choice() {
        let source = r#"=== delores_dev ===

* if [!inInventory(Inventory.camera)]
    "Where did you say the camera was again?" -> where_is_camera
  elif [Note.isDone()]
    "I think I'm done with the assignment." -> assignment_done
  else
    "Can I get some more film?" -> film
  endif
* "Want to see my work so far?" [temponce] [!Note.isDone() && !YACK(natalie_seen_work)]
"#;
        let segments = parse_source(source);
        assert_eq!(
            segments,
            vec![Segment {
                name: "delores_dev".to_string(),
                children: vec![
                    Node::ComplexChoice(ComplexChoice::ControlFlowChoice {
                        condition: "!inInventory(Inventory.camera)".to_string(),
                        consequent: unconditional(
                            "Where did you say the camera was again?",
                            Some("where_is_camera"),
                        ),
                        alternate: Some(Box::new(ComplexChoice::ControlFlowChoice {
                            condition: "Note.isDone()".to_string(),
                            consequent: unconditional(
                                "I think I'm done with the assignment.",
                                Some("assignment_done"),
                            ),
                            alternate: unconditional("Can I get some more film?", Some("film")),
                        })),
                    }),
                    Node::SimpleChoice(SimpleChoice {
                        line: "Want to see my work so far?".to_string(),
                        conditions: vec![
                            "temponce".to_string(),
                            "!Note.isDone() && !YACK(natalie_seen_work)".to_string(),
                        ],
                        divert: None,
                    }),
                ],
            }]
        );
    }

    #[test]
    fn test_control_flow_choice_with_empty_branches() {
        let source = "=== a ===\n* if [x]\n  else\n    \"only otherwise\"\n  endif\n* if [y]\n    if [z]\n      \"both\"\n    endif\n  endif\n";
        let segments = parse_source(source);
        assert_eq!(
            segments[0].children,
            vec![
                Node::ComplexChoice(ComplexChoice::ControlFlowChoice {
                    condition: "x".to_string(),
                    consequent: None,
                    alternate: unconditional("only otherwise", None),
                }),
                Node::ComplexChoice(ComplexChoice::ControlFlowChoice {
                    condition: "y".to_string(),
                    consequent: Some(Box::new(ComplexChoice::ControlFlowChoice {
                        condition: "z".to_string(),
                        consequent: unconditional("both", None),
                        alternate: None,
                    })),
                    alternate: None,
                }),
            ]
        );
    }

    #[rstest]
    #[case("=== a ===\n* if [x]\n  \"a\"\n  \"b\"\n  endif\n", "expected `elif`, `else` or `endif`")]
    #[case("=== a ===\n* if\n  \"a\"\n  endif\n", "expected a condition after `if`")]
    #[case("=== a ===\n* if [x]\n  alice: \"a\"\n  endif\n", "invalid choice body")]
    #[case("=== a ===\n* if [x]\n  \"a\"\n", "unclosed conditional choice")]
    #[case("=== a ===\n* if [x]\n  else\n  \"a\"\n  \"b\"\n", "expected `endif`")]
    #[case("=== a ===\n* -> b\n", "expected a string or `if` after `*`")]
    fn test_choice_errors(#[case] source: &str, #[case] expected: &str) {
        let (message, _) = syntax_error(source);
        assert!(message.starts_with(expected), "{}", message);
    }

    #[test]
    fn test_statement_conditional_collects_multiline_branches() {
        let source = "=== a ===\nif [x] [y]\n  alice: \"one\"\n  alice: \"two\"\nelse\n  -> b\nendif\nalice: \"after\"\n";
        let segments = parse_source(source);
        assert_eq!(
            segments[0].children,
            vec![
                Node::Conditional(Conditional {
                    conditions: vec!["x".to_string(), "y".to_string()],
                    consequent: vec![say("alice", "one"), say("alice", "two")],
                    alternate: vec![Node::Divert {
                        target: "b".to_string()
                    }],
                }),
                say("alice", "after"),
            ]
        );
    }

    #[test]
    fn test_nested_conditionals_attach_to_enclosing_branch() {
        let source = "=== a ===\nif [outer]\n  if [inner]\n    alice: \"deep\"\n  endif\nelif [other]\n  alice: \"elif\"\nelse\n  if [last]\n    alice: \"else\"\n  endif\nendif\n";
        let segments = parse_source(source);
        assert_eq!(
            segments[0].children,
            vec![Node::Conditional(Conditional {
                conditions: vec!["outer".to_string()],
                consequent: vec![Node::Conditional(Conditional {
                    conditions: vec!["inner".to_string()],
                    consequent: vec![say("alice", "deep")],
                    alternate: vec![],
                })],
                alternate: vec![Node::Conditional(Conditional {
                    conditions: vec!["other".to_string()],
                    consequent: vec![say("alice", "elif")],
                    alternate: vec![Node::Conditional(Conditional {
                        conditions: vec!["last".to_string()],
                        consequent: vec![say("alice", "else")],
                        alternate: vec![],
                    })],
                })],
            })]
        );
    }

    /// Number of conditionals along the alternate chain, and the body that
    /// terminates it.
    fn walk_chain(node: &Node) -> (usize, Vec<Node>) {
        let Node::Conditional(cond) = node else {
            panic!("expected conditional, got {:?}", node);
        };
        match cond.alternate.as_slice() {
            [next @ Node::Conditional(inner)] if inner.conditions[0].starts_with("branch") => {
                let (depth, tail) = walk_chain(next);
                (depth + 1, tail)
            }
            tail => (1, tail.to_vec()),
        }
    }

    #[rstest]
    fn test_elif_chain_depth(
        #[values(1, 2, 3, 7)] branches: usize,
        #[values(false, true)] with_else: bool,
    ) {
        let mut source = String::from("=== a ===\nif [branch0]\n  alice: \"0\"\n");
        for i in 1..branches {
            source.push_str(&format!("elif [branch{}]\n  alice: \"{}\"\n", i, i));
        }
        if with_else {
            source.push_str("else\n  alice: \"else\"\n");
        }
        source.push_str("endif\n-> a\n");

        let segments = parse_source(&source);
        let children = &segments[0].children;
        assert_eq!(children.len(), 2);

        let (depth, tail) = walk_chain(&children[0]);
        assert_eq!(depth, branches);
        if with_else {
            assert_eq!(tail, vec![say("alice", "else")]);
        } else {
            assert!(tail.is_empty());
        }
    }

    #[test]
    fn test_elif_without_if_is_rejected() {
        let (message, position) = syntax_error("=== a ===\nalice: \"hi\"\nelif [x]\n");
        assert_eq!(message, "no if continued by elif");
        assert_eq!(position, Position::new(2, 0));
    }

    #[rstest]
    #[case("=== a ===\nelse\n", "no if continued by else")]
    #[case("=== a ===\nendif\n", "no if closed by endif")]
    #[case("=== a ===\nif [x]\nelse\nelif [y]\nendif\n", "elif after else")]
    #[case("=== a ===\nif [x]\nelse\nelse\nendif\n", "duplicate else")]
    #[case("=== a ===\nif\nendif\n", "expected a condition after `if`")]
    #[case("=== a ===\n\"loose\"\n", "unexpected string \"loose\"")]
    #[case("=== a ===\n[x]\n", "unexpected condition `[x]`")]
    #[case("=== a ===\nalice:\n\"hi\"\n", "expected a string after `alice:`")]
    #[case("=== a ===\nplay_sound -> b\n", "macro argument must be a symbol or string, found divert to `b`")]
    fn test_syntax_errors(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(syntax_error(source).0, expected);
    }

    #[test]
    fn test_header_inside_open_conditional() {
        let (message, position) =
            syntax_error("=== a ===\nif [x]\n  alice: \"hi\"\n=== b ===\n");
        assert_eq!(message, "unclosed conditional");
        assert_eq!(position, Position::new(1, 0));
    }

    #[test]
    fn test_end_of_input_inside_open_conditional() {
        let (message, position) =
            syntax_error("=== a ===\nif [x]\nelif [y]\n  alice: \"hi\"\n");
        assert_eq!(message, "unclosed conditional");
        assert_eq!(position, Position::new(2, 0));
    }

    #[test]
    fn test_macro_takes_rest_of_line() {
        let segments = parse_source("=== a ===\nwait_for seconds \"2\"\nshake\n{ camera.reset() }\n");
        assert_eq!(
            segments[0].children,
            vec![
                Node::Macro {
                    name: "wait_for".to_string(),
                    args: vec!["seconds".to_string(), "2".to_string()],
                },
                Node::Macro {
                    name: "shake".to_string(),
                    args: vec![],
                },
                Node::InlineScript {
                    code: "camera.reset()".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_choices_inside_conditional() {
        let segments = parse_source("=== a ===\nif [x]\n* \"one\"\n* \"two\" -> b\nendif\n");
        let Node::Conditional(cond) = &segments[0].children[0] else {
            panic!("expected conditional");
        };
        assert_eq!(cond.consequent.len(), 2);
        assert!(cond.consequent.iter().all(Node::is_choice));
    }
}
