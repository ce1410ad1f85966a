//! `${VAR}` interpolation for config files.
//!
//! Applied to the raw YAML text before parsing, so secrets can live in the
//! environment instead of the file:
//!
//! - `${VAR}` — substitute the variable's value; an error if unset
//! - `${VAR:-default}` — substitute `default` when unset or empty
//! - `$$` — a literal `$`

use std::env;
use std::sync::LazyLock;

use regex::Regex;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("invalid interpolation pattern")
});

/// Result of interpolating one config document. Missing variables are
/// accumulated so the operator sees all of them at once.
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Substitute environment variables in `input`.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let full_match = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            if full_match == "$$" {
                return "$".to_string();
            }

            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let default = caps.get(2).map(|m| m.as_str());

            match env::var(name) {
                Ok(value) if value.is_empty() => match default {
                    Some(default) => default.to_string(),
                    None => value,
                },
                Ok(value) => value,
                Err(_) => match default {
                    Some(default) => default.to_string(),
                    None => {
                        errors.push(format!("environment variable {name:?} is not set"));
                        full_match.to_string()
                    }
                },
            }
        })
        .to_string();

    InterpolationResult { text, errors }
}
