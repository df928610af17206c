//! Prompt template interpolation.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_\-]*)\}").unwrap());

/// Names of every `{variable}` placeholder in `template`, in order of appearance.
pub fn template_variables(template: &str) -> Vec<String> {
    VARIABLE_PATTERN
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Interpolate `{key}` placeholders while leaving other braces (JSON
/// examples in a prompt, for instance) untouched.
///
/// # Errors
/// Returns an error naming the first placeholder with no value in `inputs`.
pub fn interpolate_only(
    input_string: &str,
    inputs: &HashMap<String, String>,
) -> Result<String, String> {
    if input_string.is_empty() || !input_string.contains('{') {
        return Ok(input_string.to_string());
    }

    let variables = template_variables(input_string);
    if let Some(missing) = variables.iter().find(|v| !inputs.contains_key(*v)) {
        return Err(format!(
            "Template variable '{}' not found in inputs dictionary",
            missing
        ));
    }

    // Single pass so substituted values containing `{...}` are not re-expanded.
    let result = VARIABLE_PATTERN.replace_all(input_string, |caps: &regex::Captures<'_>| {
        inputs
            .get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    });

    Ok(result.into_owned())
}
