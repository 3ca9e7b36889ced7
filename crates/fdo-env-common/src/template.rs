//! ---
//! fdo_section: "01-core-functionality"
//! fdo_subsection: "module"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Placeholder expansion for URLs, payloads, and service arguments."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
//! `{name}` placeholders are expanded from a parameter map. A brace that does not
//! enclose an identifier (`[A-Za-z0-9_]+`) is copied verbatim, so JSON text passes
//! through untouched.

use indexmap::IndexMap;
use thiserror::Error;

/// Named values substituted into templates.
pub type Params = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown template parameter `{0}`")]
    UnknownParameter(String),
}

/// Expand every `{name}` in `template` using `params`.
pub fn render(template: &str, params: &Params) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let ident_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());

        if ident_len > 0 && after[ident_len..].starts_with('}') {
            let name = &after[..ident_len];
            let value = params
                .get(name)
                .ok_or_else(|| TemplateError::UnknownParameter(name.to_owned()))?;
            out.push_str(value);
            rest = &after[ident_len + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);

    Ok(out)
}

/// Names of all placeholders referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let ident_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if ident_len > 0 && after[ident_len..].starts_with('}') {
            names.push(&after[..ident_len]);
            rest = &after[ident_len + 1..];
        } else {
            rest = after;
        }
    }
    names
}
