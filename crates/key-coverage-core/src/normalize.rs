//! Identity normalization: make, model and tool spellings, and year spans.
//!
//! Everything here is pure and deterministic. Unknown makes and models pass
//! through in a canonical casing rather than failing, so ambiguous input is
//! preserved for later stages instead of being rejected.
//!
//! # Lookup keys
//!
//! Alias tables are keyed on the raw text lower-cased with every
//! non-alphanumeric character removed, so `"Mercedes Benz"`,
//! `"mercedes-benz"` and `"MercedesBenz"` all resolve the same way.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::{BTreeSet, HashMap};

use crate::models::{ToolFamily, VehicleKey};

/// Make spellings seen in upstream material, mapped to the canonical make.
/// Canonical names are added as self-mappings when the table is built.
const MAKE_ALIASES: &[(&str, &str)] = &[
    ("chevy", "Chevrolet"),
    ("chev", "Chevrolet"),
    ("vw", "Volkswagen"),
    ("volkswagon", "Volkswagen"),
    ("mercedes", "Mercedes-Benz"),
    ("merc", "Mercedes-Benz"),
    ("benz", "Mercedes-Benz"),
    ("mb", "Mercedes-Benz"),
    ("dodge ram", "RAM"),
    ("ram trucks", "RAM"),
    ("range rover", "Land Rover"),
    ("landrover", "Land Rover"),
    ("alfa", "Alfa Romeo"),
    ("infinity", "Infiniti"),
    ("hyundia", "Hyundai"),
    ("mini cooper", "MINI"),
    ("caddy", "Cadillac"),
    ("bimmer", "BMW"),
];

const CANONICAL_MAKES: &[&str] = &[
    "Acura",
    "Alfa Romeo",
    "Audi",
    "BMW",
    "Buick",
    "Cadillac",
    "Chevrolet",
    "Chrysler",
    "Dodge",
    "Fiat",
    "Ford",
    "Genesis",
    "GMC",
    "Honda",
    "Hummer",
    "Hyundai",
    "Infiniti",
    "Jaguar",
    "Jeep",
    "Kia",
    "Land Rover",
    "Lexus",
    "Lincoln",
    "Mazda",
    "Mercedes-Benz",
    "Mercury",
    "MINI",
    "Mitsubishi",
    "Nissan",
    "Pontiac",
    "Porsche",
    "RAM",
    "Saturn",
    "Scion",
    "Subaru",
    "Suzuki",
    "Tesla",
    "Toyota",
    "Volkswagen",
    "Volvo",
];

/// Exact model spellings whose canonical form the casing rule cannot produce.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("f150", "F-150"),
    ("f250", "F-250"),
    ("f350", "F-350"),
    ("crv", "CR-V"),
    ("hrv", "HR-V"),
    ("cx5", "CX-5"),
    ("cx9", "CX-9"),
    ("cx30", "CX-30"),
    ("rav4", "RAV4"),
    ("4runner", "4Runner"),
    ("ram1500", "1500"),
    ("ram2500", "2500"),
    ("ram3500", "3500"),
    ("silverado", "Silverado 1500"),
    ("silverado1500", "Silverado 1500"),
    ("mx5", "MX-5 Miata"),
    ("miata", "MX-5 Miata"),
    ("mx5miata", "MX-5 Miata"),
    ("cclass", "C-Class"),
    ("eclass", "E-Class"),
    ("sclass", "S-Class"),
    ("3series", "3 Series"),
    ("5series", "5 Series"),
];

/// Raw tool mention fragments, checked in order; first hit wins.
const TOOL_ALIASES: &[(&str, ToolFamily)] = &[
    ("smartpro", ToolFamily::AdvancedDiagnostics),
    ("advanceddiagnostics", ToolFamily::AdvancedDiagnostics),
    ("ad100", ToolFamily::AdvancedDiagnostics),
    ("autel", ToolFamily::Autel),
    ("maxiim", ToolFamily::Autel),
    ("im508", ToolFamily::Autel),
    ("im608", ToolFamily::Autel),
    ("km100", ToolFamily::Autel),
    ("xhorse", ToolFamily::Xhorse),
    ("vvdi", ToolFamily::Xhorse),
    ("keytoolplus", ToolFamily::Xhorse),
    ("keytoolmax", ToolFamily::Xhorse),
    ("keytool", ToolFamily::Xhorse),
    ("lonsdor", ToolFamily::Lonsdor),
    ("k518", ToolFamily::Lonsdor),
    ("kh100", ToolFamily::Lonsdor),
    ("obdstar", ToolFamily::Obdstar),
    ("keymaster", ToolFamily::Obdstar),
    ("x300", ToolFamily::Obdstar),
    ("launch", ToolFamily::Launch),
    ("x431", ToolFamily::Launch),
    ("immoelite", ToolFamily::Launch),
    ("topdon", ToolFamily::Topdon),
    ("tninja", ToolFamily::Topdon),
];

static MAKE_TABLE: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for canonical in CANONICAL_MAKES {
        table.insert(lookup_key(canonical), *canonical);
    }
    for (alias, canonical) in MAKE_ALIASES {
        table.insert(lookup_key(alias), *canonical);
    }
    table
});

static MODEL_TABLE: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    MODEL_ALIASES
        .iter()
        .map(|(alias, canonical)| (lookup_key(alias), *canonical))
        .collect()
});

/// Ordered strip/replace patterns for model names. First match wins.
static MODEL_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // "Camry (XV70)", "3 Series (F30/F31)"
        (r"\s*\([^)]*\)\s*$", ""),
        // "Camry XV70", "X5 E70", "C-Class W205"
        (r"(?i)\s+[a-z]{1,3}\d{2,3}[a-z]?$", ""),
        // trailing trim and drivetrain words
        (
            r"(?i)(?:\s+(?:hybrid|plug-in|phev|awd|4wd|4x4|2wd|fwd|rwd|le|se|xle|xse|limited|touring|premium|platinum|base|lx|ex|ex-l|sr5|trd|lt|ls|ltz|slt|sle|sxt|xlt|lariat))+$",
            "",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

static YEAR_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{4})\s*(?:(\+)|(?:-|–|—|to|through)\s*(\d{4}|present|current|now|\+)?)?$")
        .expect("static year span pattern")
});

/// Lower-case, alphanumerics only.
pub fn lookup_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Canonical make for a raw spelling.
///
/// Unknown makes are returned title-cased with whitespace collapsed.
pub fn normalize_make(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    if let Some(canonical) = MAKE_TABLE.get(&lookup_key(&collapsed)) {
        return (*canonical).to_string();
    }
    collapsed
        .split(' ')
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Words with a digit or of at most three letters are upper-cased
/// (`RAV4`, `MDX`, `CR-V`); other words are capitalized.
fn model_case(word: &str) -> String {
    let letters = word.chars().filter(|c| c.is_alphabetic()).count();
    if word.chars().any(|c| c.is_ascii_digit()) || letters <= 3 {
        word.to_uppercase()
    } else {
        title_case_word(word)
    }
}

/// Canonical model for a raw spelling.
pub fn normalize_model(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    if let Some(canonical) = MODEL_TABLE.get(&lookup_key(&collapsed)) {
        return (*canonical).to_string();
    }

    // First matching pattern wins; repeat until nothing matches so that
    // stacked suffixes ("Camry XV70 LE") reach a fixed point.
    let mut stripped = collapsed;
    while let Some((pattern, replacement)) =
        MODEL_PATTERNS.iter().find(|(p, _)| p.is_match(&stripped))
    {
        let candidate = pattern.replace(&stripped, *replacement).trim().to_string();
        if candidate.is_empty() || candidate == stripped {
            break;
        }
        stripped = candidate;
    }

    if let Some(canonical) = MODEL_TABLE.get(&lookup_key(&stripped)) {
        return (*canonical).to_string();
    }
    stripped.split(' ').map(model_case).collect::<Vec<_>>().join(" ")
}

/// Resolve a raw product or brand mention to its tool family.
pub fn normalize_tool(raw: &str) -> Option<ToolFamily> {
    let key = lookup_key(raw);
    if key.is_empty() {
        return None;
    }
    TOOL_ALIASES
        .iter()
        .find(|(alias, _)| key.contains(alias))
        .map(|(_, family)| *family)
}

/// A parsed model-year span. `end == None` means open-ended (`2020+`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearSpan {
    pub start: u16,
    pub end: Option<u16>,
}

/// Parse `2019`, `2018-2022`, `2018–2022`, `2018 to 2022`, `2020+`,
/// `2020-present`.
pub fn parse_year_span(raw: &str) -> Option<YearSpan> {
    let caps = YEAR_SPAN.captures(raw.trim())?;
    let start: u16 = caps.get(1)?.as_str().parse().ok()?;
    if caps.get(2).is_some() {
        return Some(YearSpan { start, end: None });
    }
    let end = match caps.get(3).map(|m| m.as_str()) {
        None => {
            // A bare separator with nothing after it ("2019-") is open-ended;
            // a bare year is a single year.
            if raw.trim().len() > 4 {
                None
            } else {
                Some(start)
            }
        }
        Some(tail) => tail.parse::<u16>().ok(),
    };
    Some(YearSpan { start, end })
}

/// One entry per year in `[start, end]`, clipped to `horizon`.
///
/// Open-ended spans stop at `horizon`; inverted spans expand to nothing.
pub fn expand_year_range(start: u16, end: Option<u16>, horizon: u16) -> BTreeSet<u16> {
    let end = end.unwrap_or(horizon).min(horizon);
    if start > end {
        return BTreeSet::new();
    }
    (start..=end).collect()
}

/// Normalized identity for one evidence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub make: String,
    /// One key per stated model; empty when no model was stated.
    pub vehicles: BTreeSet<VehicleKey>,
    pub years: BTreeSet<u16>,
}

/// Canonicalize make, model list and year span in one step.
///
/// `models` may name several models separated by `/` or `;`. Returns `None`
/// when the make is blank or the span expands to no years under `horizon`.
pub fn resolve_identity(
    make: &str,
    models: Option<&str>,
    span: YearSpan,
    horizon: u16,
) -> Option<ResolvedIdentity> {
    let make = normalize_make(make);
    if make.is_empty() {
        return None;
    }
    let years = expand_year_range(span.start, span.end, horizon);
    let (first, last) = (*years.first()?, *years.last()?);

    let vehicles = models
        .into_iter()
        .flat_map(|m| m.split(['/', ';']))
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(normalize_model)
        .filter_map(|model| VehicleKey::new(make.clone(), model, first, last))
        .collect();

    Some(ResolvedIdentity {
        make,
        vehicles,
        years,
    })
}
