//! Rule models: the JSON boundary shape and the compiled condition tree.
//!
//! A [`RuleDefinition`] is what the rules store hands over, every field
//! optional so validation can name exactly what is missing. The
//! [`RuleEvaluator`](crate::rules::RuleEvaluator) turns it into a [`Rule`]
//! whose operands are already resolved to literals or indicator references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A rule exactly as stored by the rules collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub logic: Option<String>,
    pub conditions: Option<Vec<ConditionDefinition>>,
    pub cooldown_sec: Option<i64>,
    #[serde(default)]
    pub is_system: bool,
}

/// One `{left, op, right}` entry of a stored rule. Operands are either a
/// JSON number or an indicator name string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub left: Option<serde_json::Value>,
    pub op: Option<String>,
    pub right: Option<serde_json::Value>,
}

impl ConditionDefinition {
    pub fn new(
        left: impl Into<serde_json::Value>,
        op: &str,
        right: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            left: Some(left.into()),
            op: Some(op.to_string()),
            right: Some(right.into()),
        }
    }
}

/// How condition results combine. Only conjunction is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Logic {
    And,
}

impl Logic {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "AND" => Some(Logic::And),
            _ => None,
        }
    }
}

/// Comparison operators available to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    /// Left was at or below right on the previous candle and is above it now.
    CrossUp,
    /// Left was at or above right on the previous candle and is below it now.
    CrossDown,
}

impl Operator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            ">=" => Some(Operator::Ge),
            "<=" => Some(Operator::Le),
            "CROSS_UP" => Some(Operator::CrossUp),
            "CROSS_DOWN" => Some(Operator::CrossDown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::CrossUp => "CROSS_UP",
            Operator::CrossDown => "CROSS_DOWN",
        }
    }

    pub fn is_crossover(&self) -> bool {
        matches!(self, Operator::CrossUp | Operator::CrossDown)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of an indicator's `{current, previous}` pair an operand reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndicatorField {
    Current,
    Previous,
}

/// A resolved condition operand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    Literal(f64),
    Indicator { name: String, field: IndicatorField },
}

impl Operand {
    pub fn current(name: impl Into<String>) -> Self {
        Operand::Indicator {
            name: name.into(),
            field: IndicatorField::Current,
        }
    }

    pub fn previous(name: impl Into<String>) -> Self {
        Operand::Indicator {
            name: name.into(),
            field: IndicatorField::Previous,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Indicator {
                name,
                field: IndicatorField::Current,
            } => f.write_str(name),
            Operand::Indicator {
                name,
                field: IndicatorField::Previous,
            } => write!(f, "{name}_PREV"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub left: Operand,
    pub op: Operator,
    pub right: Operand,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

/// A validated rule ready for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub logic: Logic,
    pub conditions: Vec<Condition>,
    pub cooldown_sec: u64,
    pub is_system: bool,
}
