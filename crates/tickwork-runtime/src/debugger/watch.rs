use serde::{Deserialize, Serialize};
use tickwork_events::Value;

use crate::error::EvalError;

/// An expression re-evaluated every time execution pauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchExpression {
    pub id: u64,
    pub expression: String,
    pub enabled: bool,
    pub last_value: Option<Value>,
    pub last_error: Option<String>,
}

impl WatchExpression {
    pub fn new(id: u64, expression: impl Into<String>) -> Self {
        Self {
            id,
            expression: expression.into(),
            enabled: true,
            last_value: None,
            last_error: None,
        }
    }

    /// Record the outcome of an evaluation
    pub fn record(&mut self, result: Result<Value, EvalError>) {
        match result {
            Ok(value) => {
                self.last_value = Some(value);
                self.last_error = None;
            }
            Err(e) => {
                self.last_value = None;
                self.last_error = Some(e.to_string());
            }
        }
    }

    /// Text shown for this watch: its value, or its error
    pub fn display_value(&self) -> String {
        match (&self.last_value, &self.last_error) {
            (_, Some(err)) => format!("<error: {}>", err),
            (Some(value), None) => value.to_string(),
            (None, None) => "<not evaluated>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_replaces_previous_outcome() {
        let mut watch = WatchExpression::new(1, "hp");
        assert_eq!(watch.display_value(), "<not evaluated>");

        watch.record(Err(EvalError::UndefinedVariable("hp".to_string())));
        assert_eq!(watch.display_value(), "<error: undefined variable 'hp'>");

        watch.record(Ok(Value::Int(7)));
        assert_eq!(watch.last_error, None);
        assert_eq!(watch.display_value(), "7");
    }
}
