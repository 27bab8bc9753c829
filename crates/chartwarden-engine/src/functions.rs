//! Global template functions

use minijinja::value::Rest;
use minijinja::{Error, ErrorKind, Value};

/// Abort rendering with a message
///
/// Usage: {{ fail("unsupported configuration") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

/// First defined, non-none argument
///
/// Usage: {{ coalesce(values.tag, chart.appVersion, "latest") }}
pub fn coalesce(args: Rest<Value>) -> Value {
    for value in args.iter() {
        if !value.is_undefined() && !value.is_none() {
            return value.clone();
        }
    }
    Value::UNDEFINED
}

/// Pick between two values based on a condition
///
/// Usage: {{ ternary(values.debug, "Debug", "Info") }}
pub fn ternary(condition: Value, if_true: Value, if_false: Value) -> Value {
    if condition.is_true() {
        if_true
    } else {
        if_false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_skips_undefined() {
        let result = coalesce(Rest(vec![
            Value::UNDEFINED,
            Value::from(()),
            Value::from("fallback"),
        ]));
        assert_eq!(result.as_str(), Some("fallback"));
    }

    #[test]
    fn test_ternary() {
        assert_eq!(
            ternary(Value::from(true), Value::from("a"), Value::from("b")).as_str(),
            Some("a")
        );
        assert_eq!(
            ternary(Value::from(false), Value::from("a"), Value::from("b")).as_str(),
            Some("b")
        );
    }

    #[test]
    fn test_fail() {
        assert!(fail("boom".to_string()).is_err());
    }
}
