//! # Schema Validation
//!
//! Compiles JSON Schemas once (at descriptor build or route registration) and turns every
//! violation of a value into a [`FieldError`], so one request reports all of its problems at
//! once.
//!
//! ## Error mapping
//!
//! | Keyword | `type` | `ctx` |
//! |---------|--------|-------|
//! | `minLength` / `maxLength` | `string_too_short` / `string_too_long` | `min_length` / `max_length` |
//! | `minimum` / `maximum` | `greater_than_equal` / `less_than_equal` | `ge` / `le` |
//! | `exclusiveMinimum` / `exclusiveMaximum` | `greater_than` / `less_than` | `gt` / `lt` |
//! | `pattern` | `string_pattern_mismatch` | `pattern` |
//! | `enum` | `enum` | `expected` |
//! | `type` | `int_parsing`, `float_parsing`, `bool_parsing`, `string_type`, `type_error` | |
//! | `required` | `missing` | |
//! | `additionalProperties` | `extra_forbidden` | |
//! | `minItems` / `maxItems` | `too_short` / `too_long` | `min_length` / `max_length` |
//! | `format` | `format_error` | `format` |
//! | anything else | `validation_error` | |
//!
//! ## Redaction
//!
//! Inputs echoed back in errors are scrubbed before they leave this module. A field whose
//! location mentions a sensitive name (`password`, `token`, `secret`, ...) or whose descriptor
//! is flagged sensitive has its input replaced with `"[REDACTED]"`; structured inputs have
//! sensitive keys replaced recursively.

use crate::problem::{FieldError, LocSegment};
use crate::runtime_config::RuntimeConfig;
use crate::value::{BoundaryMap, BoundaryValue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;

/// Placeholder for scrubbed inputs.
pub const REDACTED: &str = "[REDACTED]";

static SENSITIVE_NAME: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|secret|token|api[_-]?key|authorization|credential)").ok()
});

static QUOTED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).ok());

/// Whether a field or key name should never be echoed back.
#[must_use]
pub fn is_sensitive_name(name: &str) -> bool {
    SENSITIVE_NAME
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Copy of `value` with every sensitive map key's value replaced.
#[must_use]
pub fn redact_value(value: &BoundaryValue) -> BoundaryValue {
    match value {
        BoundaryValue::Map(map) => BoundaryValue::Map(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_name(k) {
                        BoundaryValue::Str(REDACTED.to_string())
                    } else {
                        redact_value(v)
                    };
                    (k.to_string(), v)
                })
                .collect::<BoundaryMap>(),
        ),
        BoundaryValue::List(items) => BoundaryValue::List(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// Scrub inputs in place. `force` redacts every input regardless of location.
pub fn redact_errors(errors: &mut [FieldError], force: bool) {
    for error in errors {
        let sensitive_loc = error
            .loc
            .iter()
            .any(|seg| matches!(seg, LocSegment::Key(k) if is_sensitive_name(k)));
        error.input = if force || sensitive_loc {
            BoundaryValue::Str(REDACTED.to_string())
        } else {
            redact_value(&error.input)
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub message: String,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid JSON schema: {}", self.message)
    }
}

impl std::error::Error for SchemaError {}

/// A compiled JSON Schema.
pub struct SchemaValidator {
    schema: Value,
    compiled: jsonschema::Validator,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("schema", &self.schema)
            .finish()
    }
}

impl SchemaValidator {
    /// Compile with format validation taken from [`RuntimeConfig::from_env`].
    pub fn compile(schema: Value) -> Result<Self, SchemaError> {
        Self::compile_with(schema, RuntimeConfig::from_env().validate_formats)
    }

    pub fn compile_with(schema: Value, validate_formats: bool) -> Result<Self, SchemaError> {
        let compiled = jsonschema::options()
            .should_validate_formats(validate_formats)
            .build(&schema)
            .map_err(|e| SchemaError {
                message: e.to_string(),
            })?;
        Ok(Self { schema, compiled })
    }

    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    #[must_use]
    pub fn is_valid(&self, value: &BoundaryValue) -> bool {
        value
            .to_json()
            .map(|json| self.compiled.is_valid(&json))
            .unwrap_or(false)
    }

    /// Every violation of `value`, located under `prefix`.
    ///
    /// Inputs are not redacted here; see [`redact_errors`].
    #[must_use]
    pub fn validate(&self, value: &BoundaryValue, prefix: &[LocSegment]) -> Vec<FieldError> {
        let json = match value.to_json() {
            Ok(json) => json,
            Err(e) => {
                return vec![FieldError::new(
                    "validation_error",
                    prefix.to_vec(),
                    e.to_string(),
                    value.clone(),
                )]
            }
        };

        let mut out = Vec::new();
        for error in self.compiled.iter_errors(&json) {
            let instance_path = error.instance_path().to_string();
            let schema_path = error.schema_path().to_string();
            let message = error.to_string();
            let mut loc = prefix.to_vec();
            loc.extend(pointer_to_loc(&json, &instance_path));
            let input = json
                .pointer(&instance_path)
                .cloned()
                .and_then(|v| BoundaryValue::from_json(v).ok())
                .unwrap_or(BoundaryValue::Null);
            let keyword = schema_path.rsplit('/').next().unwrap_or("");
            let limit = self.schema.pointer(&schema_path);
            out.extend(map_error(keyword, limit, &message, loc, input));
        }
        out
    }
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Convert a JSON pointer into loc segments, using integers where the parent is an array.
fn pointer_to_loc(root: &Value, pointer: &str) -> Vec<LocSegment> {
    let mut loc = Vec::new();
    let mut current = Some(root);
    for raw in pointer.split('/').skip(1) {
        let key = unescape(raw);
        match current {
            Some(Value::Array(items)) => match key.parse::<usize>() {
                Ok(i) => {
                    current = items.get(i);
                    loc.push(LocSegment::Index(i));
                }
                Err(_) => {
                    current = None;
                    loc.push(LocSegment::Key(key));
                }
            },
            Some(Value::Object(obj)) => {
                current = obj.get(&key);
                loc.push(LocSegment::Key(key));
            }
            _ => {
                current = None;
                loc.push(LocSegment::Key(key));
            }
        }
    }
    loc
}

fn limit_display(limit: Option<&Value>) -> String {
    match limit {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "?".to_string(),
    }
}

fn limit_value(limit: Option<&Value>) -> BoundaryValue {
    limit
        .cloned()
        .and_then(|v| BoundaryValue::from_json(v).ok())
        .unwrap_or(BoundaryValue::Null)
}

fn quoted_names(message: &str) -> Vec<String> {
    QUOTED.as_ref().map_or_else(Vec::new, |re| {
        re.captures_iter(message)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect()
    })
}

fn bounded(
    error_type: &str,
    ctx_key: &str,
    msg: String,
    limit: Option<&Value>,
    loc: Vec<LocSegment>,
    input: BoundaryValue,
) -> FieldError {
    FieldError::new(error_type, loc, msg, input).with_ctx(ctx_key, limit_value(limit))
}

fn map_error(
    keyword: &str,
    limit: Option<&Value>,
    message: &str,
    loc: Vec<LocSegment>,
    input: BoundaryValue,
) -> Vec<FieldError> {
    let n = limit_display(limit);
    let single = match keyword {
        "minLength" => bounded(
            "string_too_short",
            "min_length",
            format!("String should have at least {n} characters"),
            limit,
            loc,
            input,
        ),
        "maxLength" => bounded(
            "string_too_long",
            "max_length",
            format!("String should have at most {n} characters"),
            limit,
            loc,
            input,
        ),
        "minimum" => bounded(
            "greater_than_equal",
            "ge",
            format!("Input should be greater than or equal to {n}"),
            limit,
            loc,
            input,
        ),
        "maximum" => bounded(
            "less_than_equal",
            "le",
            format!("Input should be less than or equal to {n}"),
            limit,
            loc,
            input,
        ),
        "exclusiveMinimum" => bounded(
            "greater_than",
            "gt",
            format!("Input should be greater than {n}"),
            limit,
            loc,
            input,
        ),
        "exclusiveMaximum" => bounded(
            "less_than",
            "lt",
            format!("Input should be less than {n}"),
            limit,
            loc,
            input,
        ),
        "minItems" => bounded(
            "too_short",
            "min_length",
            format!("List should have at least {n} items"),
            limit,
            loc,
            input,
        ),
        "maxItems" => bounded(
            "too_long",
            "max_length",
            format!("List should have at most {n} items"),
            limit,
            loc,
            input,
        ),
        "pattern" => bounded(
            "string_pattern_mismatch",
            "pattern",
            format!("String should match pattern '{n}'"),
            limit,
            loc,
            input,
        ),
        "format" => bounded(
            "format_error",
            "format",
            format!("Input should be a valid {n}"),
            limit,
            loc,
            input,
        ),
        "enum" => {
            let options: Vec<String> = limit
                .and_then(Value::as_array)
                .map(|opts| opts.iter().map(|o| format!("'{}'", limit_display(Some(o)))).collect())
                .unwrap_or_default();
            let expected = match options.split_last() {
                Some((last, rest)) if !rest.is_empty() => format!("{} or {last}", rest.join(", ")),
                Some((last, _)) => last.clone(),
                None => String::new(),
            };
            FieldError::new("enum", loc, format!("Input should be {expected}"), input)
                .with_ctx("expected", expected)
        }
        "type" => {
            let expected = limit.and_then(Value::as_str).unwrap_or("");
            let (error_type, msg) = match expected {
                "integer" => ("int_parsing", "Input should be a valid integer"),
                "number" => ("float_parsing", "Input should be a valid number"),
                "boolean" => ("bool_parsing", "Input should be a valid boolean"),
                "string" => ("string_type", "Input should be a valid string"),
                "array" => ("list_type", "Input should be a valid list"),
                "object" => ("dict_type", "Input should be a valid dictionary"),
                _ => ("type_error", message),
            };
            FieldError::new(error_type, loc, msg, input)
        }
        "required" => {
            let names = quoted_names(message);
            let mut field_loc = loc;
            if let Some(name) = names.into_iter().next() {
                field_loc.push(LocSegment::Key(name));
            }
            FieldError::missing(field_loc, input)
        }
        "additionalProperties" => {
            return quoted_names(message)
                .into_iter()
                .map(|name| {
                    let extra = input.get(&name).cloned().unwrap_or(BoundaryValue::Null);
                    let mut field_loc = loc.clone();
                    field_loc.push(LocSegment::Key(name));
                    FieldError::new(
                        "extra_forbidden",
                        field_loc,
                        "Extra inputs are not permitted",
                        extra,
                    )
                })
                .collect();
        }
        _ => FieldError::new("validation_error", loc, message, input),
    };
    vec![single]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Vec<LocSegment> {
        vec![LocSegment::Key("body".into())]
    }

    fn validator(schema: Value) -> SchemaValidator {
        SchemaValidator::compile_with(schema, true).unwrap()
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let err = SchemaValidator::compile_with(json!({"type": 12}), false).unwrap_err();
        assert!(err.to_string().starts_with("invalid JSON schema"));
    }

    #[test]
    fn collects_every_violation() {
        let v = validator(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 3},
                "age": {"type": "integer", "minimum": 18},
                "email": {"type": "string"}
            },
            "required": ["name", "age", "email"]
        }));
        let value = BoundaryValue::from_json(json!({"name": "ab", "age": 5})).unwrap();
        let errors = v.validate(&value, &body());
        assert_eq!(errors.len(), 3);
        let types: Vec<&str> = errors.iter().map(|e| e.error_type.as_str()).collect();
        assert!(types.contains(&"string_too_short"));
        assert!(types.contains(&"greater_than_equal"));
        assert!(types.contains(&"missing"));

        let short = errors.iter().find(|e| e.error_type == "string_too_short").unwrap();
        assert_eq!(short.loc_string(), "body.name");
        assert_eq!(short.msg, "String should have at least 3 characters");
        assert_eq!(
            short.ctx.as_ref().and_then(|c| c.get("min_length")),
            Some(&BoundaryValue::Int(3))
        );

        let missing = errors.iter().find(|e| e.error_type == "missing").unwrap();
        assert_eq!(missing.loc_string(), "body.email");
        assert_eq!(missing.msg, "Field required");
    }

    #[test]
    fn array_indices_are_integers() {
        let v = validator(json!({
            "type": "object",
            "properties": {"items": {"type": "array", "items": {"type": "integer"}}}
        }));
        let value = BoundaryValue::from_json(json!({"items": [1, "two", 3]})).unwrap();
        let errors = v.validate(&value, &body());
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].loc,
            vec![
                LocSegment::Key("body".into()),
                LocSegment::Key("items".into()),
                LocSegment::Index(1)
            ]
        );
        assert_eq!(errors[0].error_type, "int_parsing");
        assert_eq!(errors[0].input, BoundaryValue::Str("two".into()));
    }

    #[test]
    fn pattern_message_and_ctx() {
        let v = validator(json!({"type": "string", "pattern": "^[a-z]+$"}));
        let errors = v.validate(
            &BoundaryValue::Str("ABC".into()),
            &[
                LocSegment::Key("query".into()),
                LocSegment::Key("slug".into()),
            ],
        );
        assert_eq!(errors[0].error_type, "string_pattern_mismatch");
        assert_eq!(errors[0].msg, "String should match pattern '^[a-z]+$'");
    }

    #[test]
    fn enum_lists_options() {
        let v = validator(json!({"enum": ["a", "b", "c"]}));
        let errors = v.validate(&BoundaryValue::Str("z".into()), &body());
        assert_eq!(errors[0].error_type, "enum");
        assert_eq!(errors[0].msg, "Input should be 'a', 'b' or 'c'");
    }

    #[test]
    fn sensitive_inputs_are_redacted() {
        let v = validator(json!({
            "type": "object",
            "properties": {"password": {"type": "string", "minLength": 12}},
            "required": ["username"]
        }));
        let value =
            BoundaryValue::from_json(json!({"password": "hunter2"})).unwrap();
        let mut errors = v.validate(&value, &body());
        redact_errors(&mut errors, false);
        let too_short = errors.iter().find(|e| e.error_type == "string_too_short").unwrap();
        assert_eq!(too_short.input, BoundaryValue::Str(REDACTED.into()));
        let missing = errors.iter().find(|e| e.error_type == "missing").unwrap();
        assert_eq!(
            missing.input.get("password"),
            Some(&BoundaryValue::Str(REDACTED.into()))
        );
    }

    #[test]
    fn sensitive_name_detection() {
        assert!(is_sensitive_name("user_password"));
        assert!(is_sensitive_name("X-Api-Key"));
        assert!(is_sensitive_name("refreshToken"));
        assert!(!is_sensitive_name("username"));
    }
}
