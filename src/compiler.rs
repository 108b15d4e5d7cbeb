use log::debug;
use serde::Serialize;

use crate::ast::{Conditional, Node, Segment};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Spaces per nesting level. GDScript uses 4.
    pub indent_width: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { indent_width: 4 }
    }
}

/// Segment children after consecutive choices have been grouped.
enum Step<'a> {
    /// One menu presenting every choice of a contiguous run.
    Dialog(Vec<&'a Node>),
    Node(&'a Node),
}

impl Step<'_> {
    fn is_divert(&self) -> bool {
        matches!(self, Step::Node(Node::Divert { .. }))
    }
}

fn normalize(children: &[Node]) -> Vec<Step<'_>> {
    let mut out: Vec<Step<'_>> = Vec::new();
    for child in children {
        if child.is_choice() {
            if let Some(Step::Dialog(choices)) = out.last_mut() {
                choices.push(child);
                continue;
            }
            out.push(Step::Dialog(vec![child]));
        } else {
            out.push(Step::Node(child));
        }
    }
    out
}

/// Per-call generation state: output buffer, indentation and the counter for
/// temporaries.
pub struct CodeGenerator {
    options: CompileOptions,
    code: String,
    indent: usize,
    next_var: usize,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::with_options(CompileOptions::default())
    }
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Self {
            options,
            code: String::new(),
            indent: 0,
            next_var: 0,
        }
    }

    pub fn generate(mut self, segments: &[Segment]) -> Result<String> {
        self.state_controller(segments);

        for (idx, segment) in segments.iter().enumerate() {
            let next = segments.get(idx + 1).map(|s| s.name.as_str());
            self.segment(segment, next)?;
        }

        debug!(
            "generated {} bytes for {} segments",
            self.code.len(),
            segments.len()
        );
        Ok(self.code)
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.code.push(' ');
        }
        self.code.push_str(text);
        self.code.push('\n');
    }

    fn blank_lines(&mut self, count: usize) {
        for _ in 0..count {
            self.code.push('\n');
        }
    }

    fn indent(&mut self) {
        self.indent += self.options.indent_width;
    }

    fn unindent(&mut self) {
        self.indent = self.indent.saturating_sub(self.options.indent_width);
    }

    fn fresh_var(&mut self) -> String {
        let id = self.next_var;
        self.next_var += 1;
        format!("__genvar_{}", id)
    }

    /// Loops on the current state name, dispatching to the matching segment
    /// routine until one of them returns `null`.
    fn state_controller(&mut self, segments: &[Segment]) {
        self.line("func main(init_state):");
        self.indent();
        self.line("var state = init_state");
        self.line("while state != null:");
        self.indent();
        self.line("match state:");
        self.indent();

        for segment in segments {
            self.line(&format!("{}:", quote(&segment.name)));
            self.indent();
            self.line(&format!(
                "state = yield {}()",
                function_name(&segment.name)
            ));
            self.unindent();
        }

        self.unindent();
        self.unindent();
        self.unindent();
        self.blank_lines(2);
    }

    fn segment(&mut self, segment: &Segment, next: Option<&str>) -> Result<()> {
        self.line(&format!("func {}() -> String:", function_name(&segment.name)));
        self.indent();

        let steps = self.block(&segment.children)?;

        // Fall through to the next segment unless control already left.
        if !steps.last().is_some_and(Step::is_divert) {
            let target = next.map(quote).unwrap_or_else(|| "null".to_string());
            self.line(&format!("return {}", target));
        }

        self.unindent();
        self.blank_lines(2);
        Ok(())
    }

    fn block<'a>(&mut self, children: &'a [Node]) -> Result<Vec<Step<'a>>> {
        let steps = normalize(children);
        if steps.is_empty() {
            self.line("pass");
            return Ok(steps);
        }

        for step in &steps {
            match step {
                Step::Dialog(choices) => self.dialog(choices)?,
                Step::Node(node) => self.node(node)?,
            }
        }
        Ok(steps)
    }

    fn node(&mut self, node: &Node) -> Result<()> {
        match node {
            Node::ActorLine { actor, line } => {
                self.line(&format!("sayLine({}, {})", actor, quote(line)));
            }
            Node::Divert { target } => {
                self.line(&format!("return {}", quote(target)));
            }
            Node::Conditional(conditional) => self.conditional(conditional)?,
            Node::Macro { name, args } => {
                let args: Vec<String> = args.iter().map(|a| quote(a)).collect();
                self.line(&format!("call_macro({}, [{}])", quote(name), args.join(",")));
            }
            Node::InlineScript { code } => self.line(code),
            Node::SimpleChoice(_) | Node::ComplexChoice(_) => {
                return Err(Error::Internal(
                    "choice outside of a dialog group".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Presents the choices and returns early when the selection diverts.
    fn dialog(&mut self, choices: &[&Node]) -> Result<()> {
        let selected = self.fresh_var();
        self.line(&format!("var {} = yield menu([", selected));
        self.indent();

        for choice in choices {
            let literal = self.to_pretty_json(choice)?;
            let mut lines = literal.lines().peekable();
            while let Some(text) = lines.next() {
                if lines.peek().is_some() {
                    self.line(text);
                } else {
                    self.line(&format!("{},", text));
                }
            }
        }

        self.unindent();
        self.line("])");
        self.line(&format!("if {} != null:", selected));
        self.indent();
        self.line(&format!("return {}", selected));
        self.unindent();
        Ok(())
    }

    fn conditional(&mut self, node: &Conditional) -> Result<()> {
        let predicate: Vec<String> = node
            .conditions
            .iter()
            .map(|c| format!("eval_cond({})", quote(c)))
            .collect();
        self.line(&format!("if {}:", predicate.join(" && ")));
        self.indent();
        self.block(&node.consequent)?;
        self.unindent();

        if !node.alternate.is_empty() {
            self.line("else:");
            self.indent();
            self.block(&node.alternate)?;
            self.unindent();
        }
        Ok(())
    }

    fn to_pretty_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let indent = " ".repeat(self.options.indent_width);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value
            .serialize(&mut ser)
            .map_err(|e| Error::Internal(format!("menu serialization failed: {}", e)))?;
        String::from_utf8(buf).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn function_name(segment: &str) -> String {
    format!("__knot__{}", segment)
}

/// Double-quoted literal with JSON escaping.
fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}
