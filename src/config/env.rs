//! Environment variable overlay for configuration values.

use std::str::FromStr;

/// Environment variable name for a configuration key: upper-cased, with `-`
/// replaced by `_` (`parsing-capacity` → `PARSING_CAPACITY`).
#[must_use]
pub fn env_key(key: &str) -> String {
    key.to_uppercase().replace('-', "_")
}

/// Overwrite `value` with the parsed variable for `key`, if present.
///
/// A value that does not parse leaves `value` untouched.
pub fn env_int_var<T, F>(lookup: &F, value: &mut T, key: &str)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let name = env_key(key);
    let Some(raw) = lookup(&name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => {
            *value = parsed;
            tracing::debug!(variable = %name, value = %raw, "configuration overridden from environment");
        }
        Err(_) => {
            tracing::warn!(variable = %name, value = %raw, "ignoring unparseable environment override");
        }
    }
}
