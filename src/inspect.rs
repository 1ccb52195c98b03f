//! One-shot inspection commands: `kcov classify` and `kcov normalize`.
//!
//! Both render plain text so the pattern tables and alias maps can be
//! checked against a sample without running a full reconciliation.

use key_coverage_core::classify::{classify, prepare_context};
use key_coverage_core::normalize::{
    expand_year_range, normalize_make, normalize_model, normalize_tool, parse_year_span,
};

pub fn classify_report(text: &str) -> String {
    let result = classify(text);
    let categories: Vec<&str> = result.categories.iter().map(|c| c.as_str()).collect();
    let cables: Vec<&str> = result.cables.iter().map(String::as_str).collect();

    let mut out = String::new();
    out.push_str(&format!("context: {}\n", prepare_context(text)));
    out.push_str(&format!("categories: {}\n", categories.join(", ")));
    out.push_str(&format!(
        "cables: {}\n",
        if cables.is_empty() { "-".to_string() } else { cables.join(", ") }
    ));
    out
}

pub fn normalize_report(
    make: Option<&str>,
    model: Option<&str>,
    tool: Option<&str>,
    years: Option<&str>,
    horizon: u16,
) -> String {
    let mut out = String::new();
    if let Some(raw) = make {
        out.push_str(&format!("make: {} -> {}\n", raw, normalize_make(raw)));
    }
    if let Some(raw) = model {
        out.push_str(&format!("model: {} -> {}\n", raw, normalize_model(raw)));
    }
    if let Some(raw) = tool {
        let family = normalize_tool(raw).map_or("(unmapped)", |f| f.as_str());
        out.push_str(&format!("tool: {} -> {}\n", raw, family));
    }
    if let Some(raw) = years {
        match parse_year_span(raw) {
            Some(span) => {
                let expanded = expand_year_range(span.start, span.end, horizon);
                let list: Vec<String> = expanded.iter().map(u16::to_string).collect();
                out.push_str(&format!(
                    "years: {} -> [{}] (horizon {})\n",
                    raw,
                    list.join(", "),
                    horizon
                ));
            }
            None => out.push_str(&format!("years: {} -> (unparseable)\n", raw)),
        }
    }
    out
}
