//! G-code command templates.
//!
//! Templates are plain command lines with `{name}` placeholders, e.g.
//! `G29 S3 I{column} J{row} Z{z}`. Which placeholders a template may use
//! depends on the command; see [`crate::config::Gcodes`].

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Formats a length for a G-code word: three decimals at most, trailing zeros dropped.
pub fn format_mm(value: f64) -> String {
    let s = format!("{value:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^}]*)\}").expect("placeholder pattern"));

/// Substitutes `{name}` placeholders from `vars`; unknown names are left as written.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match vars.iter().find(|(var, _)| *var == name) {
                Some((_, value)) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Names of all `{...}` placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|name| name.as_str())
        .collect()
}

/// Rejects empty templates and placeholders outside `allowed`.
pub fn check(template: &str, allowed: &[&str]) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("empty G-code template".to_string());
    }
    if template.contains('\n') || template.contains('\r') {
        return Err(format!("template `{template}` spans several lines"));
    }
    match placeholders(template).into_iter().find(|name| !allowed.contains(name)) {
        Some(name) => Err(format!(
            "template `{template}` uses unknown placeholder {{{name}}} (allowed: {})",
            allowed.join(", ")
        )),
        None => Ok(()),
    }
}
