//! Logic nodes: a small condition language for `if_condition` and
//! `set_variable`.
//!
//! Conditions compare two operands, e.g. `fetch.status >= 400` or
//! `{{user.role}} == 'admin'`, and combine with `&&` / `||` (`&&` binds
//! tighter). Operands are quoted strings, numbers, `true`/`false`/`null`, or
//! input paths. A lone operand is tested for truthiness.

use crate::template;
use async_trait::async_trait;
use pipecore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, NodeSpec, NodeType, Value,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

// Two-character operators first so `>=` is not read as `>`.
const OPERATORS: &[(&str, Op)] = &[
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">=", Op::Ge),
    ("<=", Op::Le),
    (">", Op::Gt),
    ("<", Op::Lt),
    (" contains ", Op::Contains),
    (" startsWith ", Op::StartsWith),
    (" endsWith ", Op::EndsWith),
];

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Any(Vec<Condition>),
    All(Vec<Condition>),
    Compare(Operand, Op, Operand),
    Truthy(Operand),
}

/// Byte offsets of `pattern` in `expr` that sit outside quotes.
fn unquoted_matches(expr: &str, pattern: &str) -> Result<Vec<usize>, String> {
    let mut found = Vec::new();
    let mut quote: Option<char> = None;
    for (i, c) in expr.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if expr[i..].starts_with(pattern) => found.push(i),
            None => {}
        }
    }
    match quote {
        Some(q) => Err(format!("unterminated {} quote", q)),
        None => Ok(found),
    }
}

fn split_top<'e>(expr: &'e str, separator: &str) -> Result<Vec<&'e str>, String> {
    let mut parts = Vec::new();
    let mut start = 0;
    for at in unquoted_matches(expr, separator)? {
        if at >= start {
            parts.push(&expr[start..at]);
            start = at + separator.len();
        }
    }
    parts.push(&expr[start..]);
    Ok(parts)
}

fn parse(expr: &str) -> Result<Condition, String> {
    if expr.trim().is_empty() {
        return Err("condition is empty".to_string());
    }

    let any = split_top(expr, "||")?;
    if any.len() > 1 {
        return any.into_iter().map(parse).collect::<Result<_, _>>().map(Condition::Any);
    }
    let all = split_top(expr, "&&")?;
    if all.len() > 1 {
        return all.into_iter().map(parse).collect::<Result<_, _>>().map(Condition::All);
    }

    for (symbol, op) in OPERATORS {
        if let Some(&at) = unquoted_matches(expr, symbol)?.first() {
            let left = parse_operand(&expr[..at])?;
            let right = parse_operand(&expr[at + symbol.len()..])?;
            return Ok(Condition::Compare(left, *op, right));
        }
    }
    Ok(Condition::Truthy(parse_operand(expr)?))
}

fn parse_operand(raw: &str) -> Result<Operand, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("missing operand".to_string());
    }

    let quoted = raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')));
    if quoted {
        return Ok(Operand::Literal(Value::from(&raw[1..raw.len() - 1])));
    }

    let operand = match raw {
        "true" => Operand::Literal(Value::Bool(true)),
        "false" => Operand::Literal(Value::Bool(false)),
        "null" => Operand::Literal(Value::Null),
        _ => match raw.parse::<f64>() {
            Ok(n) => Operand::Literal(Value::Number(n)),
            Err(_) => {
                let path = raw
                    .strip_prefix("{{")
                    .and_then(|p| p.strip_suffix("}}"))
                    .unwrap_or(raw)
                    .trim();
                if path.is_empty() || path.contains(char::is_whitespace) {
                    return Err(format!("'{}' is not a valid operand", raw));
                }
                Operand::Path(path.to_string())
            }
        },
    };
    Ok(operand)
}

fn resolve(operand: &Operand, inputs: &HashMap<String, Value>) -> Value {
    match operand {
        Operand::Literal(value) => value.clone(),
        Operand::Path(path) => template::lookup(path, inputs).cloned().unwrap_or_default(),
    }
}

/// Numbers and numeric strings compare numerically.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(left: &Value, op: Op, right: &Value) -> bool {
    let numbers = as_number(left).zip(as_number(right));
    match op {
        Op::Eq => match numbers {
            Some((a, b)) => a == b,
            None => template::display(left) == template::display(right),
        },
        Op::Ne => !compare(left, Op::Eq, right),
        Op::Gt => numbers.is_some_and(|(a, b)| a > b),
        Op::Ge => numbers.is_some_and(|(a, b)| a >= b),
        Op::Lt => numbers.is_some_and(|(a, b)| a < b),
        Op::Le => numbers.is_some_and(|(a, b)| a <= b),
        Op::Contains => {
            let needle = template::display(right);
            match left {
                Value::Array(items) => items.iter().any(|item| template::display(item) == needle),
                Value::Object(map) => map.contains_key(&needle),
                other => template::display(other).contains(&needle),
            }
        }
        Op::StartsWith => template::display(left).starts_with(&template::display(right)),
        Op::EndsWith => template::display(left).ends_with(&template::display(right)),
    }
}

fn evaluate(condition: &Condition, inputs: &HashMap<String, Value>) -> bool {
    match condition {
        Condition::Any(parts) => parts.iter().any(|c| evaluate(c, inputs)),
        Condition::All(parts) => parts.iter().all(|c| evaluate(c, inputs)),
        Condition::Compare(left, op, right) => {
            compare(&resolve(left, inputs), *op, &resolve(right, inputs))
        }
        Condition::Truthy(operand) => resolve(operand, inputs).is_truthy(),
    }
}

/// Evaluate a condition string against a set of inputs.
pub fn evaluate_condition(expr: &str, inputs: &HashMap<String, Value>) -> Result<bool, String> {
    parse(expr).map(|condition| evaluate(&condition, inputs))
}

/// Evaluates `condition` and reports which branch the run took.
pub struct IfConditionNode;

#[async_trait]
impl NodeExecutor for IfConditionNode {
    fn node_type(&self) -> NodeType {
        NodeType::IfCondition
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let expr = node
            .require_config("condition")?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "condition".to_string(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })?;

        let outcome = evaluate_condition(expr, &ctx.inputs)
            .map_err(|e| NodeError::Configuration(format!("Invalid condition '{}': {}", expr, e)))?;
        ctx.events.info(format!("Condition '{}' is {}", expr, outcome));

        let mut result = HashMap::new();
        result.insert("result".to_string(), Value::Bool(outcome));
        result.insert(
            "branch".to_string(),
            Value::from(if outcome { "true" } else { "false" }),
        );
        Ok(NodeOutput::new(Value::Object(result)))
    }

    fn validate(&self, node: &NodeSpec) -> Vec<String> {
        match node.config("condition").and_then(Value::as_str) {
            Some(expr) if !expr.trim().is_empty() => parse(expr)
                .err()
                .map(|e| vec![format!("condition '{}' is invalid: {}", expr, e)])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Branch on a condition over upstream results".to_string(),
            category: "logic".to_string(),
        }
    }
}

/// Writes `value` (placeholders resolved) into the run variable `name`.
pub struct SetVariableNode;

#[async_trait]
impl NodeExecutor for SetVariableNode {
    fn node_type(&self) -> NodeType {
        NodeType::SetVariable
    }

    async fn execute(&self, node: &NodeSpec, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let name = node
            .require_config("name")?
            .as_str()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| NodeError::Configuration("Variable name must be a non-empty string".to_string()))?;
        let value = template::render_value(node.require_config("value")?, &ctx.inputs);

        ctx.events.info(format!("Setting variable {}", name));
        Ok(NodeOutput::new(value.clone()).with_variable(name, value))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Set a run variable".to_string(),
            category: "logic".to_string(),
        }
    }
}
