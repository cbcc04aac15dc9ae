//! Post-process steps applied to a raw extracted string (spec §4.5:
//! `trim`, `lowercase`, `uppercase`, `replace(pattern, replacement)`,
//! `extract_number`).

use regex::Regex;
use sentinel_domain::model::PostProcessStep;

pub fn apply_post_process(raw: &str, steps: &[PostProcessStep]) -> String {
    steps.iter().fold(raw.to_string(), |value, step| apply_step(&value, step))
}

fn apply_step(value: &str, step: &PostProcessStep) -> String {
    match step {
        PostProcessStep::Trim => value.trim().to_string(),
        PostProcessStep::Lowercase => value.to_lowercase(),
        PostProcessStep::Uppercase => value.to_uppercase(),
        PostProcessStep::Replace { pattern, replacement } => match Regex::new(pattern) {
            Ok(re) => re.replace_all(value, replacement.as_str()).into_owned(),
            Err(e) => {
                tracing::warn!(error = %e, pattern, "invalid replace pattern; leaving value unchanged");
                value.to_string()
            }
        },
        PostProcessStep::ExtractNumber => extract_number(value),
    }
}

/// First run of digits (with embedded `.`/`,` separators) in `value`,
/// e.g. `"$19.99 (was $25)"` -> `"19.99"`.
fn extract_number(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let Some(start) = chars.iter().position(|c| c.is_ascii_digit()) else {
        return String::new();
    };
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.' || chars[end] == ',') {
        end += 1;
    }
    chars[start..end].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_strips_surrounding_whitespace() {
        assert_eq!(apply_post_process(" 19.99 ", &[PostProcessStep::Trim]), "19.99");
    }

    #[test]
    fn replace_applies_regex_substitution() {
        let steps = vec![PostProcessStep::Replace {
            pattern: "-".into(),
            replacement: "".into(),
        }];
        assert_eq!(apply_post_process("a-b-c", &steps), "abc");
    }

    #[test]
    fn extract_number_pulls_first_numeric_run() {
        let steps = vec![PostProcessStep::ExtractNumber];
        assert_eq!(apply_post_process("$19.99 USD (was $25.00)", &steps), "19.99");
    }

    #[test]
    fn extract_number_with_no_digits_is_empty() {
        let steps = vec![PostProcessStep::ExtractNumber];
        assert_eq!(apply_post_process("out of stock", &steps), "");
    }

    #[test]
    fn steps_apply_in_order() {
        let steps = vec![PostProcessStep::Uppercase, PostProcessStep::Trim];
        assert_eq!(apply_post_process("  in stock ", &steps), "IN STOCK");
    }
}
