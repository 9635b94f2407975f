//! Parameter maps with environment variable substitution.
//!
//! Operator and port parameters arrive as JSON maps keyed by the external
//! camelCase names. String values may reference `${VAR_NAME}` environment
//! variables; references are resolved eagerly at configuration-load time so
//! missing variables fail before any state transition.

use std::sync::LazyLock;

use regex::Regex;

use flowline_types::error::{CoreError, CoreResult};

/// Raw parameter map as supplied by the pipeline definition.
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns a configuration [`CoreError`] naming every unresolved variable.
pub fn substitute_env_vars(input: &str) -> CoreResult<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => missing.push(var_name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(CoreError::configuration(
            "MISSING_ENV_VARS",
            format!("missing environment variable(s): {}", missing.join(", ")),
        ));
    }
    Ok(result)
}

/// Resolve environment references in every string value of the map,
/// recursing into nested maps and arrays.
///
/// # Errors
///
/// Returns a configuration [`CoreError`] on the first unresolved variable.
pub fn resolve_params(params: &mut ParamMap) -> CoreResult<()> {
    for value in params.values_mut() {
        resolve_value(value)?;
    }
    Ok(())
}

fn resolve_value(value: &mut serde_json::Value) -> CoreResult<()> {
    match value {
        serde_json::Value::String(s) => {
            *s = substitute_env_vars(s)?;
            Ok(())
        }
        serde_json::Value::Object(map) => resolve_params(map),
        serde_json::Value::Array(items) => {
            for item in items {
                resolve_value(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
