use super::ConfigError;
use regex::{Captures, Regex};

const VAR_PATTERN: &str = r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)";

fn var_pattern() -> Result<Regex, ConfigError> {
    Regex::new(VAR_PATTERN).map_err(|e| ConfigError::Invalid {
        field: "variable pattern".to_string(),
        reason: e.to_string(),
    })
}

/// Replaces `${VAR}` and `$VAR` references in `value` using `lookup`.
///
/// The first unresolved variable fails the whole substitution.
pub fn substitute_vars<F>(value: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    replace_vars(&var_pattern()?, value, lookup)
}

fn replace_vars<F>(pattern: &Regex, value: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing: Option<String> = None;
    let replaced = pattern.replace_all(value, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        match lookup(name) {
            Some(resolved) => resolved,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::MissingVariable(name)),
        None => Ok(replaced.into_owned()),
    }
}

/// Walks a parsed TOML document and substitutes variables in every string,
/// including strings nested in tables and arrays.
pub fn substitute_in_value<F>(value: &mut toml::Value, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    walk(&var_pattern()?, value, lookup)
}

fn walk<F>(pattern: &Regex, value: &mut toml::Value, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        toml::Value::String(s) => {
            *s = replace_vars(pattern, s, lookup)?;
        }
        toml::Value::Array(items) => {
            for item in items {
                walk(pattern, item, lookup)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                walk(pattern, item, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}
