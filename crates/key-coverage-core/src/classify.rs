//! Limitation classifier and cable/adapter token extraction.
//!
//! Both tables are static, ordered data: each [`LimitationCategory`] owns a
//! list of case-insensitive patterns, and a separate table maps adapter and
//! cable mentions to canonical tokens. Contexts are whitespace-normalized
//! and truncated to [`MAX_CONTEXT_CHARS`] before matching.
//!
//! Categories are non-exclusive. When no category matches the context is
//! labelled [`LimitationCategory::General`] rather than discarded.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::BTreeSet;

use crate::models::LimitationCategory;

/// Upper bound on the context window considered by the classifier.
pub const MAX_CONTEXT_CHARS: usize = 600;

/// Ordered `(category, patterns)` table. A context satisfies a category if
/// any of its patterns matches.
const CATEGORY_PATTERNS: &[(LimitationCategory, &[&str])] = &[
    (
        LimitationCategory::AklBlocked,
        &[
            r"\bakl\b[^.]{0,40}\b(?:not|no|isn't|unsupported|blocked|impossible)",
            r"\b(?:no|not|cannot|can't|without)\b[^.]{0,20}\b(?:akl|all keys? lost)\b",
            r"\ball keys? lost\b[^.]{0,40}\b(?:not supported|not possible|unsupported|blocked)",
        ],
    ),
    (
        LimitationCategory::AddKeyOnly,
        &[
            r"\badd(?:ing)?(?: a)? keys? only\b",
            r"\bonly add(?:ing)?(?: a)? keys?\b",
            r"\b(?:requires?|needs?) (?:a |an )?(?:working|existing) key\b",
        ],
    ),
    (
        LimitationCategory::BenchRequired,
        &[
            r"\bbench\b",
            r"\bremov(?:e|al of|ing) the (?:bcm|ecu|ecm|immo(?:bilizer)?(?: box)?|cluster|fem|bdc)\b",
            r"\beeprom\b",
            r"\bsolder(?:ing)?\b",
        ],
    ),
    (
        LimitationCategory::AdapterRequired,
        &[
            r"\badapt(?:e|o)r\b",
            r"\bbypass cable\b",
            r"\bgateway bypass\b",
            r"\b12\s*\+\s*8\b",
            r"\b(?:g-?box|xp400|apb1\d\d)\b",
        ],
    ),
    (
        LimitationCategory::ServerRequired,
        &[
            r"\bserver\b",
            r"\bonline (?:calculation|account|connection)\b",
            r"\btokens?\b",
            r"\binternet connection\b",
        ],
    ),
    (
        LimitationCategory::DealerOnly,
        &[
            r"\bdealer(?:ship)?(?: tool)? only\b",
            r"\bonly (?:the |a )?dealer(?:ship)?\b",
            r"\bnastf\b",
            r"\boem (?:software|tool) (?:is )?required\b",
        ],
    ),
    (
        LimitationCategory::HighRisk,
        &[
            r"\brisk(?:y)?\b",
            r"\bbrick(?:ed|ing)?\b",
            r"\bmay (?:damage|corrupt|lock)\b",
            r"\bback ?up (?:the )?(?:data|eeprom|module)? ?first\b",
        ],
    ),
    (
        LimitationCategory::PartialSupport,
        &[
            r"\bpartial(?:ly)?\b",
            r"\bsome models\b",
            r"\blimited support\b",
            r"\bnot all\b",
            r"\bdepending on\b",
        ],
    ),
];

/// Cable and adapter mentions mapped to canonical tokens, in match order.
const CABLE_PATTERNS: &[(&str, &str)] = &[
    (r"\bg-?box ?[23]?\b", "G-Box"),
    (r"\bxp400(?: ?pro)?\b", "XP400"),
    (r"\bapb112\b", "APB112"),
    (r"\b12\s*\+\s*8\b", "12+8 Adapter"),
    (r"\bgateway bypass\b", "Gateway Bypass Cable"),
    (r"\bcan[ -]?fd\b", "CAN FD Adapter"),
    (r"\b(?:toyota )?8a (?:adapter|cable)\b", "Toyota 8A Adapter"),
    (r"\bmini ?prog\b", "Mini Prog"),
    (r"\bkey ?tool plus\b", "Key Tool Plus"),
    (r"\bacdp\b", "ACDP"),
    (r"\bobd (?:extension|splitter) cable\b", "OBD Extension Cable"),
];

static CATEGORY_TABLE: Lazy<Vec<(LimitationCategory, Vec<Regex>)>> = Lazy::new(|| {
    CATEGORY_PATTERNS
        .iter()
        .map(|(category, patterns)| (*category, compile(patterns.iter().copied())))
        .collect()
});

static CABLE_TABLE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    CABLE_PATTERNS
        .iter()
        .filter_map(|(pattern, token)| case_insensitive(pattern).map(|re| (re, *token)))
        .collect()
});

fn case_insensitive(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("(?i){}", pattern)).ok()
}

fn compile<'a>(patterns: impl Iterator<Item = &'a str>) -> Vec<Regex> {
    patterns.filter_map(case_insensitive).collect()
}

/// Collapse whitespace and clip to [`MAX_CONTEXT_CHARS`] on a char boundary.
pub fn prepare_context(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(MAX_CONTEXT_CHARS) {
        Some((cut, _)) => collapsed[..cut].to_string(),
        None => collapsed,
    }
}

/// Result of classifying one context window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub categories: BTreeSet<LimitationCategory>,
    pub cables: BTreeSet<String>,
}

impl Classification {
    /// Only the catch-all category matched.
    pub fn is_general_only(&self) -> bool {
        self.categories.len() == 1 && self.categories.contains(&LimitationCategory::General)
    }
}

/// Limitation categories the context satisfies. Never empty.
pub fn classify_limitations(context: &str) -> BTreeSet<LimitationCategory> {
    let text = prepare_context(context);
    let mut categories: BTreeSet<LimitationCategory> = CATEGORY_TABLE
        .iter()
        .filter(|(_, patterns)| patterns.iter().any(|re| re.is_match(&text)))
        .map(|(category, _)| *category)
        .collect();
    if categories.is_empty() {
        categories.insert(LimitationCategory::General);
    }
    categories
}

/// Canonical cable/adapter tokens mentioned in the context.
pub fn extract_cables(context: &str) -> BTreeSet<String> {
    let text = prepare_context(context);
    CABLE_TABLE
        .iter()
        .filter(|(re, _)| re.is_match(&text))
        .map(|(_, token)| (*token).to_string())
        .collect()
}

pub fn classify(context: &str) -> Classification {
    Classification {
        categories: classify_limitations(context),
        cables: extract_cables(context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(text: &str) -> Vec<&'static str> {
        classify_limitations(text).iter().map(|c| c.as_str()).collect()
    }

    #[test]
    fn bench_required_from_caveat() {
        assert_eq!(cats("bench required"), vec!["bench_required"]);
        assert!(cats("You must remove the BCM and read the EEPROM").contains(&"bench_required"));
    }

    #[test]
    fn akl_blocked_variants() {
        assert!(cats("AKL is not supported on this model").contains(&"akl_blocked"));
        assert!(cats("Cannot do all keys lost via OBD").contains(&"akl_blocked"));
        assert!(cats("All keys lost not possible yet").contains(&"akl_blocked"));
    }

    #[test]
    fn categories_are_non_exclusive() {
        let c = cats("Add key only. Requires server token and the 12+8 adapter; risk of bricking the BCM");
        assert!(c.contains(&"add_key_only"));
        assert!(c.contains(&"server_required"));
        assert!(c.contains(&"adapter_required"));
        assert!(c.contains(&"high_risk"));
        assert!(!c.contains(&"general"));
    }

    #[test]
    fn whitespace_and_case_are_normalized() {
        assert!(cats("DEALER\n\n   ONLY for 2021+").contains(&"dealer_only"));
        assert!(cats("Works on   some\tmodels").contains(&"partial_support"));
    }

    #[test]
    fn unmatched_context_is_general() {
        let c = classify("Programmed two keys in ten minutes with the Autel.");
        assert!(c.is_general_only());
        assert!(c.cables.is_empty());
    }

    #[test]
    fn general_with_cable_signal_is_kept() {
        let c = classify("Hooked up the XP400 Pro and it went fine");
        assert!(c.categories.contains(&LimitationCategory::AdapterRequired));
        assert!(c.cables.contains("XP400"));

        let c = classify("Used a CAN FD dongle on the truck");
        assert!(c.is_general_only());
        assert_eq!(c.cables.iter().collect::<Vec<_>>(), vec!["CAN FD Adapter"]);
    }

    #[test]
    fn cable_tokens_extracted() {
        let cables = extract_cables("Needs the Toyota 8A adapter or a G-Box 3, plus gateway bypass");
        let cables: Vec<_> = cables.iter().map(String::as_str).collect();
        assert_eq!(cables, vec!["G-Box", "Gateway Bypass Cable", "Toyota 8A Adapter"]);
    }

    #[test]
    fn context_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_CONTEXT_CHARS + 50);
        let prepared = prepare_context(&long);
        assert_eq!(prepared.chars().count(), MAX_CONTEXT_CHARS);
        let late = format!("{} bench", "x ".repeat(MAX_CONTEXT_CHARS));
        assert!(!classify_limitations(&late).contains(&LimitationCategory::BenchRequired));
    }

    #[test]
    fn every_table_pattern_compiles() {
        let compiled: usize = CATEGORY_TABLE.iter().map(|(_, p)| p.len()).sum();
        let declared: usize = CATEGORY_PATTERNS.iter().map(|(_, p)| p.len()).sum();
        assert_eq!(compiled, declared);
        assert_eq!(CABLE_TABLE.len(), CABLE_PATTERNS.len());
    }
}
