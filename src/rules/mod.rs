//! Rule validation and evaluation.
//!
//! Rules are a fixed-grammar condition tree: `{left, op, right}` triples
//! joined by `AND`. Operands are resolved once, when the rule is validated,
//! into either a literal or a reference to an indicator's current or
//! previous value. Evaluation is a pure function of the rule and an
//! [`IndicatorSnapshot`].

pub mod store;

use serde_json::Value;

use crate::indicators::{IndicatorSnapshot, is_known_indicator};
use crate::models::rule::IndicatorField;
use crate::models::{Condition, ConditionDefinition, Logic, Operand, Operator, Rule, RuleDefinition};
use crate::{Result, SignalGenError};

pub use store::{DEFAULT_RULE_ID, MemoryRulesStore, RulesStore, default_rule};

/// Suffix selecting an indicator's previous value in the wire format.
const PREV_SUFFIX: &str = "_PREV";

/// Cooldown applied when a rule omits `cooldown_sec`.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Stateless rule validator and evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Parses a JSON rule definition and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Validation`] for malformed JSON as well as
    /// for any structural problem [`validate`](Self::validate) reports.
    pub fn parse(&self, json: &str) -> Result<Rule> {
        let definition: RuleDefinition = serde_json::from_str(json)
            .map_err(|e| SignalGenError::Validation(format!("invalid rule JSON: {e}")))?;
        self.validate(&definition)
    }

    /// Validates a stored definition and compiles it into a [`Rule`].
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Validation`] naming the offending field,
    /// e.g. `conditions[2].op`.
    pub fn validate(&self, definition: &RuleDefinition) -> Result<Rule> {
        let id = definition.id.ok_or_else(|| missing("id"))?;
        let name = definition.name.clone().ok_or_else(|| missing("name"))?;
        let kind = definition.kind.clone().ok_or_else(|| missing("type"))?;

        let raw_logic = definition.logic.as_deref().ok_or_else(|| missing("logic"))?;
        let logic = Logic::parse(raw_logic).ok_or_else(|| {
            SignalGenError::Validation(format!("logic: unsupported operator '{raw_logic}'"))
        })?;

        let raw_conditions = definition
            .conditions
            .as_ref()
            .ok_or_else(|| missing("conditions"))?;
        if raw_conditions.is_empty() {
            return Err(SignalGenError::Validation(
                "conditions: at least one condition is required".into(),
            ));
        }
        let conditions = raw_conditions
            .iter()
            .enumerate()
            .map(|(i, c)| compile_condition(i, c))
            .collect::<Result<Vec<_>>>()?;

        let cooldown_sec = match definition.cooldown_sec {
            None => DEFAULT_COOLDOWN_SECS,
            Some(secs) => u64::try_from(secs).map_err(|_| {
                SignalGenError::Validation(format!(
                    "cooldown_sec: must be a non-negative integer, got {secs}"
                ))
            })?,
        };

        Ok(Rule {
            id,
            name,
            kind,
            logic,
            conditions,
            cooldown_sec,
            is_system: definition.is_system,
        })
    }

    /// Evaluates every condition against `snapshot` and combines them with
    /// the rule's logic. An empty condition list never fires.
    ///
    /// All conditions are resolved even after one is false, so a missing
    /// indicator is reported regardless of condition order.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Evaluation`] when an operand's indicator (or
    /// its previous value) is absent from the snapshot.
    pub fn evaluate(&self, rule: &Rule, snapshot: &IndicatorSnapshot) -> Result<bool> {
        if rule.conditions.is_empty() {
            return Ok(false);
        }
        let results = rule
            .conditions
            .iter()
            .map(|condition| evaluate_condition(condition, snapshot))
            .collect::<Result<Vec<bool>>>()?;
        Ok(match rule.logic {
            Logic::And => results.into_iter().all(|r| r),
        })
    }

    /// Validates `definition`, then evaluates it.
    pub fn evaluate_definition(
        &self,
        definition: &RuleDefinition,
        snapshot: &IndicatorSnapshot,
    ) -> Result<bool> {
        let rule = self.validate(definition)?;
        self.evaluate(&rule, snapshot)
    }
}

fn missing(field: &str) -> SignalGenError {
    SignalGenError::Validation(format!("{field}: missing required field"))
}

fn compile_condition(index: usize, raw: &ConditionDefinition) -> Result<Condition> {
    let field = |name: &str| format!("conditions[{index}].{name}");

    let left = raw.left.as_ref().ok_or_else(|| missing(&field("left")))?;
    let raw_op = raw.op.as_deref().ok_or_else(|| missing(&field("op")))?;
    let right = raw.right.as_ref().ok_or_else(|| missing(&field("right")))?;

    let op = Operator::parse(raw_op).ok_or_else(|| {
        SignalGenError::Validation(format!("{}: unsupported operator '{raw_op}'", field("op")))
    })?;
    let left = compile_operand(&field("left"), left)?;
    let right = compile_operand(&field("right"), right)?;

    if op.is_crossover() {
        for (name, operand) in [("left", &left), ("right", &right)] {
            if matches!(
                operand,
                Operand::Indicator {
                    field: IndicatorField::Previous,
                    ..
                }
            ) {
                return Err(SignalGenError::Validation(format!(
                    "{}: {op} compares against the previous candle and cannot take a {PREV_SUFFIX} operand",
                    field(name)
                )));
            }
        }
    }

    Ok(Condition { left, op, right })
}

fn compile_operand(field: &str, raw: &Value) -> Result<Operand> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Operand::Literal)
            .ok_or_else(|| SignalGenError::Validation(format!("{field}: invalid number {n}"))),
        Value::String(s) => {
            let name = s.trim();
            if let Ok(value) = name.parse::<f64>() {
                if value.is_finite() {
                    return Ok(Operand::Literal(value));
                }
            }
            if is_known_indicator(name) {
                return Ok(Operand::current(name));
            }
            if let Some(base) = name.strip_suffix(PREV_SUFFIX) {
                if is_known_indicator(base) {
                    return Ok(Operand::previous(base));
                }
            }
            Err(SignalGenError::Validation(format!(
                "{field}: unsupported operand '{s}'"
            )))
        }
        other => Err(SignalGenError::Validation(format!(
            "{field}: operand must be a number or indicator name, got {other}"
        ))),
    }
}

fn evaluate_condition(condition: &Condition, snapshot: &IndicatorSnapshot) -> Result<bool> {
    let left = resolve(&condition.left, snapshot)?;
    let right = resolve(&condition.right, snapshot)?;
    Ok(match condition.op {
        Operator::Gt => left > right,
        Operator::Lt => left < right,
        Operator::Ge => left >= right,
        Operator::Le => left <= right,
        Operator::CrossUp => {
            let prev_left = resolve_previous(&condition.left, snapshot)?;
            let prev_right = resolve_previous(&condition.right, snapshot)?;
            prev_left <= prev_right && left > right
        }
        Operator::CrossDown => {
            let prev_left = resolve_previous(&condition.left, snapshot)?;
            let prev_right = resolve_previous(&condition.right, snapshot)?;
            prev_left >= prev_right && left < right
        }
    })
}

fn resolve(operand: &Operand, snapshot: &IndicatorSnapshot) -> Result<f64> {
    match operand {
        Operand::Literal(value) => Ok(*value),
        Operand::Indicator { name, field } => {
            let value = snapshot.get(name).ok_or_else(|| {
                SignalGenError::Evaluation(format!("missing indicator value for operand {name}"))
            })?;
            match field {
                IndicatorField::Current => Ok(value.current),
                IndicatorField::Previous => value.previous.ok_or_else(|| {
                    SignalGenError::Evaluation(format!("no previous value for {name}"))
                }),
            }
        }
    }
}

/// Value an operand had on the previous candle. A literal is its own
/// previous value.
fn resolve_previous(operand: &Operand, snapshot: &IndicatorSnapshot) -> Result<f64> {
    match operand {
        Operand::Literal(value) => Ok(*value),
        Operand::Indicator { name, .. } => snapshot.previous(name).ok_or_else(|| {
            SignalGenError::Evaluation(format!(
                "no previous value for {name}, needed by crossover"
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(conditions: Vec<ConditionDefinition>) -> RuleDefinition {
        RuleDefinition {
            id: Some(7),
            name: Some("test".into()),
            kind: Some("BUY".into()),
            logic: Some("AND".into()),
            conditions: Some(conditions),
            cooldown_sec: Some(60),
            is_system: false,
        }
    }

    fn snapshot(values: &[(&str, f64, Option<f64>)]) -> IndicatorSnapshot {
        let mut snap = IndicatorSnapshot::new();
        for (name, current, previous) in values {
            snap.insert(*name, *current, *previous);
        }
        snap
    }

    #[test]
    fn price_above_ma20() {
        let evaluator = RuleEvaluator::new();
        let rule = evaluator
            .validate(&definition(vec![ConditionDefinition::new("PRICE", ">", "MA20")]))
            .unwrap();

        let up = snapshot(&[("PRICE", 105.0, None), ("MA20", 100.0, None)]);
        let down = snapshot(&[("PRICE", 95.0, None), ("MA20", 100.0, None)]);
        assert!(evaluator.evaluate(&rule, &up).unwrap());
        assert!(!evaluator.evaluate(&rule, &down).unwrap());
    }

    #[test]
    fn compiles_literals_and_prev_operands() {
        let rule = RuleEvaluator::new()
            .validate(&definition(vec![
                ConditionDefinition::new("RSI14", ">", "RSI14_PREV"),
                ConditionDefinition::new("RSI14", "<", 55),
                ConditionDefinition::new("PRICE_EMA20_DIFF_PCT", "<=", "0.002"),
            ]))
            .unwrap();
        assert_eq!(rule.conditions[0].right, Operand::previous("RSI14"));
        assert_eq!(rule.conditions[1].right, Operand::Literal(55.0));
        assert_eq!(rule.conditions[2].right, Operand::Literal(0.002));
        assert_eq!(rule.cooldown_sec, 60);
    }

    #[test]
    fn validation_names_the_field() {
        let evaluator = RuleEvaluator::new();

        let mut def = definition(vec![ConditionDefinition::new("PRICE", ">", "MA20")]);
        def.kind = None;
        let err = evaluator.validate(&def).unwrap_err();
        assert!(err.to_string().contains("type"), "{err}");

        let def = definition(vec![
            ConditionDefinition::new("PRICE", ">", "MA20"),
            ConditionDefinition::new("PRICE", "==", "MA20"),
        ]);
        let err = evaluator.validate(&def).unwrap_err();
        assert!(err.to_string().contains("conditions[1].op"), "{err}");

        let def = definition(vec![ConditionDefinition::new("VWAP", ">", "MA20")]);
        let err = evaluator.validate(&def).unwrap_err();
        assert!(err.to_string().contains("conditions[0].left"), "{err}");

        let mut def = definition(vec![ConditionDefinition::new("PRICE", ">", "MA20")]);
        def.cooldown_sec = Some(-1);
        let err = evaluator.validate(&def).unwrap_err();
        assert!(err.to_string().contains("cooldown_sec"), "{err}");

        let mut def = definition(vec![]);
        def.logic = Some("OR".into());
        assert!(matches!(
            evaluator.validate(&def),
            Err(SignalGenError::Validation(_))
        ));

        assert!(evaluator.validate(&definition(vec![])).is_err());
    }

    #[test]
    fn missing_indicator_is_evaluation_error() {
        let evaluator = RuleEvaluator::new();
        let rule = evaluator
            .validate(&definition(vec![
                ConditionDefinition::new("PRICE", "<", 0),
                ConditionDefinition::new("EMA6", ">", "EMA10"),
            ]))
            .unwrap();
        let snap = snapshot(&[("PRICE", 10.0, None), ("EMA6", 1.0, None)]);
        let err = evaluator.evaluate(&rule, &snap).unwrap_err();
        assert!(matches!(err, SignalGenError::Evaluation(_)));
    }

    #[test]
    fn cross_up_and_down() {
        let evaluator = RuleEvaluator::new();
        let up = evaluator
            .validate(&definition(vec![ConditionDefinition::new("EMA6", "CROSS_UP", "EMA10")]))
            .unwrap();
        let down = evaluator
            .validate(&definition(vec![ConditionDefinition::new(
                "EMA6",
                "CROSS_DOWN",
                "EMA10",
            )]))
            .unwrap();

        let crossed_up = snapshot(&[("EMA6", 11.0, Some(9.0)), ("EMA10", 10.0, Some(10.0))]);
        assert!(evaluator.evaluate(&up, &crossed_up).unwrap());
        assert!(!evaluator.evaluate(&down, &crossed_up).unwrap());

        let crossed_down = snapshot(&[("EMA6", 9.0, Some(10.0)), ("EMA10", 10.0, Some(10.0))]);
        assert!(!evaluator.evaluate(&up, &crossed_down).unwrap());
        assert!(evaluator.evaluate(&down, &crossed_down).unwrap());

        let still_above = snapshot(&[("EMA6", 12.0, Some(11.0)), ("EMA10", 10.0, Some(10.0))]);
        assert!(!evaluator.evaluate(&up, &still_above).unwrap());
    }

    #[test]
    fn crossovers_never_both_fire() {
        let evaluator = RuleEvaluator::new();
        let up = evaluator
            .validate(&definition(vec![ConditionDefinition::new("RSI14", "CROSS_UP", 50)]))
            .unwrap();
        let down = evaluator
            .validate(&definition(vec![ConditionDefinition::new("RSI14", "CROSS_DOWN", 50)]))
            .unwrap();
        for prev in [40.0, 50.0, 60.0] {
            for cur in [40.0, 50.0, 60.0] {
                let snap = snapshot(&[("RSI14", cur, Some(prev))]);
                let fired_up = evaluator.evaluate(&up, &snap).unwrap();
                let fired_down = evaluator.evaluate(&down, &snap).unwrap();
                assert!(!(fired_up && fired_down), "prev {prev} cur {cur}");
            }
        }
    }

    #[test]
    fn crossover_without_previous_fails() {
        let evaluator = RuleEvaluator::new();
        let rule = evaluator
            .validate(&definition(vec![ConditionDefinition::new("EMA6", "CROSS_UP", "EMA10")]))
            .unwrap();
        let snap = snapshot(&[("EMA6", 11.0, None), ("EMA10", 10.0, Some(10.0))]);
        assert!(matches!(
            evaluator.evaluate(&rule, &snap),
            Err(SignalGenError::Evaluation(_))
        ));
    }

    #[test]
    fn crossover_rejects_prev_operand() {
        let def = definition(vec![ConditionDefinition::new("EMA6", "CROSS_UP", "EMA10_PREV")]);
        assert!(RuleEvaluator::new().validate(&def).is_err());
    }

    #[test]
    fn empty_rule_never_fires() {
        let rule = Rule {
            id: 1,
            name: "empty".into(),
            kind: "BUY".into(),
            logic: Logic::And,
            conditions: Vec::new(),
            cooldown_sec: 0,
            is_system: false,
        };
        assert!(!RuleEvaluator::new()
            .evaluate(&rule, &IndicatorSnapshot::new())
            .unwrap());
    }

    #[test]
    fn parse_reports_bad_json_as_validation() {
        let evaluator = RuleEvaluator::new();
        assert!(matches!(
            evaluator.parse("{not json"),
            Err(SignalGenError::Validation(_))
        ));

        let json = json!({
            "id": 3,
            "name": "breakout",
            "type": "BUY",
            "logic": "AND",
            "conditions": [{"left": "PRICE", "op": ">=", "right": "BB_UPPER"}],
            "cooldown_sec": 120
        })
        .to_string();
        let rule = evaluator.parse(&json).unwrap();
        assert_eq!(rule.id, 3);
        assert_eq!(rule.conditions[0].to_string(), "PRICE >= BB_UPPER");
    }

    #[test]
    fn missing_cooldown_defaults_to_a_minute() {
        let json = json!({
            "id": 1,
            "name": "no cooldown given",
            "type": "BUY",
            "logic": "AND",
            "conditions": [{"left": "PRICE", "op": ">", "right": "MA5"}]
        })
        .to_string();
        let rule = RuleEvaluator::new().parse(&json).unwrap();
        assert_eq!(rule.cooldown_sec, DEFAULT_COOLDOWN_SECS);
        assert_eq!(rule.cooldown_sec, 60);

        let mut def = definition(vec![ConditionDefinition::new("PRICE", ">", "MA5")]);
        def.cooldown_sec = Some(0);
        assert_eq!(RuleEvaluator::new().validate(&def).unwrap().cooldown_sec, 0);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let evaluator = RuleEvaluator::new();
        let def = definition(vec![ConditionDefinition::new("PRICE", ">", "MA20")]);
        let snap = snapshot(&[("PRICE", 105.0, None), ("MA20", 100.0, None)]);
        let first = evaluator.evaluate_definition(&def, &snap).unwrap();
        for _ in 0..10 {
            assert_eq!(evaluator.evaluate_definition(&def, &snap).unwrap(), first);
        }
    }
}
