// Workflow Conditions - field predicates evaluated by the `condition` action

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single condition to evaluate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Field path to evaluate (dot notation for nested fields)
    pub field: String,
    pub operator: ConditionOperator,
    /// Operand; unused by the null/empty/boolean checks
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    #[default]
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
}

/// Group of conditions with AND/OR logic
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConditionGroup {
    #[serde(default)]
    pub logic: Logic,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Nested condition groups for complex logic
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
}

/// Condition operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    // Equality
    Equals,
    NotEquals,

    // String operations
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,

    // Numeric comparisons
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,

    // Array operations
    In,
    NotIn,
    ArrayContains,

    // Null/Empty checks
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,

    // Boolean
    IsTrue,
    IsFalse,
}

/// Resolve a dot-separated path inside a JSON document. Numeric segments index arrays.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        _ => false,
    }
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
            case_sensitive: false,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn is_null(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsNull, Value::Null)
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    /// Operand problems that would make the condition unevaluable
    pub fn check(&self) -> Option<String> {
        use ConditionOperator::*;
        match self.operator {
            Regex => match self.value.as_str() {
                Some(pattern) => regex::Regex::new(pattern)
                    .err()
                    .map(|e| format!("invalid regex: {}", e)),
                None => Some("regex operand must be a string".to_string()),
            },
            In | NotIn if !self.value.is_array() => {
                Some(format!("{:?} operand must be an array", self.operator))
            }
            GreaterThan | GreaterThanOrEquals | LessThan | LessThanOrEquals
                if !self.value.is_number() =>
            {
                Some("numeric comparison operand must be a number".to_string())
            }
            _ => None,
        }
    }

    fn text_pair(&self, field: Option<&Value>) -> Option<(String, String)> {
        let (s, pattern) = (field?.as_str()?, self.value.as_str()?);
        if self.case_sensitive {
            Some((s.to_string(), pattern.to_string()))
        } else {
            Some((s.to_lowercase(), pattern.to_lowercase()))
        }
    }

    fn numbers(&self, field: Option<&Value>) -> Option<(f64, f64)> {
        Some((field?.as_f64()?, self.value.as_f64()?))
    }

    pub fn evaluate(&self, scope: &Value) -> bool {
        use ConditionOperator::*;
        let field = lookup_path(scope, &self.field);

        match self.operator {
            Equals => field.map(|v| v == &self.value).unwrap_or(false),
            NotEquals => field.map(|v| v != &self.value).unwrap_or(true),
            Contains => self
                .text_pair(field)
                .map(|(s, p)| s.contains(&p))
                .unwrap_or(false),
            NotContains => self
                .text_pair(field)
                .map(|(s, p)| !s.contains(&p))
                .unwrap_or(true),
            StartsWith => self
                .text_pair(field)
                .map(|(s, p)| s.starts_with(&p))
                .unwrap_or(false),
            EndsWith => self
                .text_pair(field)
                .map(|(s, p)| s.ends_with(&p))
                .unwrap_or(false),
            Regex => {
                if let (Some(s), Some(pattern)) = (field.and_then(Value::as_str), self.value.as_str()) {
                    if let Ok(re) = regex::Regex::new(pattern) {
                        return re.is_match(s);
                    }
                }
                false
            }
            GreaterThan => self.numbers(field).map(|(v, c)| v > c).unwrap_or(false),
            GreaterThanOrEquals => self.numbers(field).map(|(v, c)| v >= c).unwrap_or(false),
            LessThan => self.numbers(field).map(|(v, c)| v < c).unwrap_or(false),
            LessThanOrEquals => self.numbers(field).map(|(v, c)| v <= c).unwrap_or(false),
            In => match (field, self.value.as_array()) {
                (Some(v), Some(arr)) => arr.contains(v),
                _ => false,
            },
            NotIn => match (field, self.value.as_array()) {
                (Some(v), Some(arr)) => !arr.contains(v),
                _ => true,
            },
            ArrayContains => field
                .and_then(Value::as_array)
                .map(|arr| arr.contains(&self.value))
                .unwrap_or(false),
            IsNull => matches!(field, None | Some(Value::Null)),
            IsNotNull => !matches!(field, None | Some(Value::Null)),
            IsEmpty => is_empty(field),
            IsNotEmpty => !is_empty(field),
            IsTrue => field == Some(&Value::Bool(true)),
            IsFalse => field == Some(&Value::Bool(false)),
        }
    }
}

impl ConditionGroup {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self {
            logic: Logic::And,
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self {
            logic: Logic::Or,
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn with_nested_group(mut self, group: ConditionGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// An empty group is true
    pub fn evaluate(&self, scope: &Value) -> bool {
        let mut results = self
            .conditions
            .iter()
            .map(|c| c.evaluate(scope))
            .chain(self.groups.iter().map(|g| g.evaluate(scope)));

        match self.logic {
            Logic::And => results.all(|r| r),
            Logic::Or => {
                if self.conditions.is_empty() && self.groups.is_empty() {
                    true
                } else {
                    results.any(|r| r)
                }
            }
        }
    }

    /// Collect operand problems as `(path, message)` pairs
    pub fn problems(&self, prefix: &str) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (i, condition) in self.conditions.iter().enumerate() {
            if let Some(message) = condition.check() {
                out.push((format!("{}conditions[{}]", prefix, i), message));
            }
        }
        for (i, group) in self.groups.iter().enumerate() {
            out.extend(group.problems(&format!("{}groups[{}].", prefix, i)));
        }
        out
    }
}
