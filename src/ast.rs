use serde::Serialize;

/// A named unit of dialogue logic, `=== name ===` in source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "knot")]
pub struct Segment {
    pub name: String,
    pub children: Vec<Node>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// The unnamed segment that collects anything before the first header.
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Divert {
        target: String,
    },
    ActorLine {
        actor: String,
        line: String,
    },
    SimpleChoice(SimpleChoice),
    Conditional(Conditional),
    Macro {
        name: String,
        args: Vec<String>,
    },
    #[serde(rename = "script")]
    InlineScript {
        code: String,
    },
    /// Serialized with its own `type` tag.
    #[serde(untagged)]
    ComplexChoice(ComplexChoice),
}

impl Node {
    pub fn is_choice(&self) -> bool {
        matches!(self, Node::SimpleChoice(_) | Node::ComplexChoice(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleChoice {
    pub line: String,
    pub conditions: Vec<String>,
    pub divert: Option<String>,
}

/// A single dialogue option whose text depends on `if`/`elif`/`else`.
/// A `None` branch means there is nothing to offer on that path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComplexChoice {
    UnconditionalChoice {
        line: String,
        divert: Option<String>,
    },
    ControlFlowChoice {
        condition: String,
        consequent: Option<Box<ComplexChoice>>,
        alternate: Option<Box<ComplexChoice>>,
    },
}

/// Statement-level `if`. An `elif` is stored as the sole element of the
/// enclosing alternate.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Conditional {
    pub conditions: Vec<String>,
    pub consequent: Vec<Node>,
    pub alternate: Vec<Node>,
}

impl Conditional {
    pub fn new(conditions: Vec<String>) -> Self {
        Self {
            conditions,
            ..Self::default()
        }
    }
}
