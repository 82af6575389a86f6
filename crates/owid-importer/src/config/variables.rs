use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::ValidationError;

/// Variables every template may reference.
pub const BUILTIN_VARIABLES: &[&str] = &[
    "URL",
    "NAME",
    "TITLE",
    "YEAR",
    "REGION",
    "COUNTRY",
    "START_YEAR",
    "END_YEAR",
];

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([A-Z][A-Z0-9_]*)").unwrap());

/// Values available to one substitution.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub url: String,
    pub name: String,
    pub title: String,
    pub year: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub start_year: Option<String>,
    pub end_year: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl TemplateVars {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "URL" => Some(&self.url),
            "NAME" => Some(&self.name),
            "TITLE" => Some(&self.title),
            "YEAR" => self.year.as_deref(),
            "REGION" => self.region.as_deref(),
            "COUNTRY" => self.country.as_deref(),
            "START_YEAR" => self.start_year.as_deref(),
            "END_YEAR" => self.end_year.as_deref(),
            other => self.params.get(other).map(String::as_str),
        }
    }
}

/// Expands `$VARIABLE` tokens in file name, description and page title
/// templates.
pub struct TemplateEngine;

impl TemplateEngine {
    /// Replaces every known token. Tokens without a value are left as written.
    pub fn substitute(template: &str, vars: &TemplateVars) -> String {
        TOKEN
            .replace_all(template, |caps: &Captures<'_>| match vars.lookup(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Like [`substitute`](Self::substitute), then makes the result usable as
    /// a remote file or page name.
    pub fn substitute_name(template: &str, vars: &TemplateVars) -> String {
        sanitize_name(&Self::substitute(template, vars))
    }

    /// Names of all tokens a template references, in order of appearance.
    pub fn variables(template: &str) -> Vec<String> {
        TOKEN
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Rejects empty templates and tokens that are neither built in nor
    /// one of `params`.
    pub fn check(
        field: &'static str,
        template: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), ValidationError> {
        if template.trim().is_empty() {
            return Err(ValidationError::Empty(field));
        }
        for variable in Self::variables(template) {
            if !BUILTIN_VARIABLES.contains(&variable.as_str()) && !params.contains_key(&variable) {
                return Err(ValidationError::UnknownVariable { field, variable });
            }
        }
        Ok(())
    }
}

/// Turns a chart parameter selection (`tab=map&time=1990..2020`) into
/// template variables (`$TAB`, `$TIME`).
pub fn chart_parameter_vars(selection: Option<&str>) -> BTreeMap<String, String> {
    let Some(selection) = selection else {
        return BTreeMap::new();
    };
    selection
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let name: String = key
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect();
            if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
                return None;
            }
            Some((name, value.to_string()))
        })
        .collect()
}

/// Replaces characters the media repository forbids in titles and
/// collapses runs of whitespace.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '#' | '<' | '>' | '[' | ']' | '|' | '{' | '}' => '-',
            c if c.is_whitespace() => ' ',
            c => c,
        })
        .collect::<String>()
        .split(' ')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
