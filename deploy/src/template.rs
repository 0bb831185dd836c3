//! `{{ name }}` placeholder rendering
//!
//! Supports a single filter, `default`, taking a quoted string or a bare
//! number: `{{ interval | default('30s') }}`.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use svcmgr_core::{Error, Result};

/// Template parameters
pub type Params = BTreeMap<String, Value>;

const PLACEHOLDER: &str = r#"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\|\s*default\(\s*(?:'([^']*)'|"([^"]*)"|(-?\d+(?:\.\d+)?))\s*\)\s*)?\}\}"#;

fn placeholder() -> Result<&'static Regex> {
    static RE: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = RE.get() {
        return Ok(re);
    }
    let re = Regex::new(PLACEHOLDER).map_err(|e| Error::Template(e.to_string()))?;
    Ok(RE.get_or_init(|| re))
}

/// Text a parameter value renders as
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn default_literal<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(2)
        .or_else(|| caps.get(3))
        .or_else(|| caps.get(4))
        .map(|m| m.as_str())
}

/// Substitute every placeholder in `template`
///
/// A variable missing from `params` without a default is an error.
pub fn render_template(template: &str, params: &Params) -> Result<String> {
    let re = placeholder()?;
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in re.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];

        let value = match (params.get(name), default_literal(&caps)) {
            (Some(value), _) => display(value),
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                return Err(Error::Template(format!("undefined variable '{}'", name)));
            }
        };

        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}
