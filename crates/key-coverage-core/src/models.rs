//! Core data models shared by every stage of the reconciliation pipeline.
//!
//! Identity types ([`VehicleKey`], [`ToolFamily`]), the tagged [`Evidence`]
//! stream produced by upstream extractors, and the reconciled
//! [`CoverageEntry`] table with its audit records ([`Conflict`],
//! [`TransitionFlag`], [`ResearchFlag`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Normalized vehicle identity: canonical make and model plus an inclusive
/// model-year range.
///
/// Field order drives the derived `Ord`, which gives the export sort order
/// `(make, model, year_start, year_end)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleKey {
    pub make: String,
    pub model: String,
    pub year_start: u16,
    pub year_end: u16,
}

impl VehicleKey {
    /// Build a key, rejecting inverted year ranges.
    pub fn new(make: impl Into<String>, model: impl Into<String>, year_start: u16, year_end: u16) -> Option<Self> {
        if year_start > year_end {
            return None;
        }
        Some(Self {
            make: make.into(),
            model: model.into(),
            year_start,
            year_end,
        })
    }

    /// Key covering exactly one model year.
    pub fn single_year(make: impl Into<String>, model: impl Into<String>, year: u16) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
            year_start: year,
            year_end: year,
        }
    }

    pub fn contains_year(&self, year: u16) -> bool {
        (self.year_start..=self.year_end).contains(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = u16> {
        self.year_start..=self.year_end
    }

    /// Same vehicle restricted to one year of its range.
    pub fn at_year(&self, year: u16) -> Self {
        Self::single_year(self.make.clone(), self.model.clone(), year)
    }
}

impl fmt::Display for VehicleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.year_start == self.year_end {
            write!(f, "{} {} {}", self.make, self.model, self.year_start)
        } else {
            write!(
                f,
                "{} {} {}-{}",
                self.make, self.model, self.year_start, self.year_end
            )
        }
    }
}

/// Buyer-facing diagnostic tool family. Raw product mentions collapse into
/// one of these via [`crate::normalize::normalize_tool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ToolFamily {
    Autel,
    Xhorse,
    #[serde(rename = "Advanced Diagnostics")]
    AdvancedDiagnostics,
    Lonsdor,
    #[serde(rename = "OBDSTAR")]
    Obdstar,
    Launch,
    Topdon,
}

impl ToolFamily {
    pub const ALL: [ToolFamily; 7] = [
        ToolFamily::Autel,
        ToolFamily::Xhorse,
        ToolFamily::AdvancedDiagnostics,
        ToolFamily::Lonsdor,
        ToolFamily::Obdstar,
        ToolFamily::Launch,
        ToolFamily::Topdon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolFamily::Autel => "Autel",
            ToolFamily::Xhorse => "Xhorse",
            ToolFamily::AdvancedDiagnostics => "Advanced Diagnostics",
            ToolFamily::Lonsdor => "Lonsdor",
            ToolFamily::Obdstar => "OBDSTAR",
            ToolFamily::Launch => "Launch",
            ToolFamily::Topdon => "Topdon",
        }
    }
}

impl fmt::Display for ToolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence confidence. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// One step less certain, saturating at `Low`.
    pub fn step_down(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            Confidence::Medium | Confidence::Low => Confidence::Low,
        }
    }

    /// Parse the loose spellings upstream extractors emit (`"high"`, `"MED"`, `"3"`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "l" | "1" => Some(Confidence::Low),
            "medium" | "med" | "m" | "2" => Some(Confidence::Medium),
            "high" | "h" | "3" => Some(Confidence::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Coverage status. The derived order is the escalation order; status only
/// ever moves up it during a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    #[default]
    Unknown,
    Low,
    Partial,
    PartialCheck,
    Yes,
}

impl CoverageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageStatus::Unknown => "unknown",
            CoverageStatus::Low => "low",
            CoverageStatus::Partial => "partial",
            CoverageStatus::PartialCheck => "partial_check",
            CoverageStatus::Yes => "yes",
        }
    }
}

/// Fixed limitation taxonomy. Categories are non-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitationCategory {
    AklBlocked,
    AddKeyOnly,
    BenchRequired,
    AdapterRequired,
    ServerRequired,
    DealerOnly,
    HighRisk,
    PartialSupport,
    General,
}

impl LimitationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitationCategory::AklBlocked => "akl_blocked",
            LimitationCategory::AddKeyOnly => "add_key_only",
            LimitationCategory::BenchRequired => "bench_required",
            LimitationCategory::AdapterRequired => "adapter_required",
            LimitationCategory::ServerRequired => "server_required",
            LimitationCategory::DealerOnly => "dealer_only",
            LimitationCategory::HighRisk => "high_risk",
            LimitationCategory::PartialSupport => "partial_support",
            LimitationCategory::General => "general",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "akl_blocked" => Some(LimitationCategory::AklBlocked),
            "add_key_only" => Some(LimitationCategory::AddKeyOnly),
            "bench_required" => Some(LimitationCategory::BenchRequired),
            "adapter_required" => Some(LimitationCategory::AdapterRequired),
            "server_required" => Some(LimitationCategory::ServerRequired),
            "dealer_only" => Some(LimitationCategory::DealerOnly),
            "high_risk" => Some(LimitationCategory::HighRisk),
            "partial_support" => Some(LimitationCategory::PartialSupport),
            "general" => Some(LimitationCategory::General),
            _ => None,
        }
    }
}

impl fmt::Display for LimitationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity-bearing attribute tracked for conflicts and year-over-year transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    FccId,
    Chip,
}

impl IdentityField {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityField::FccId => "fcc_id",
            IdentityField::Chip => "chip",
        }
    }
}

/// Fields shared by every evidence kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceContext {
    pub source_file: String,
    /// Raw context window the extractor matched on, kept for audit.
    pub snippet: String,
    /// Canonical vehicles the evidence names. Empty when no model was stated.
    pub vehicles: BTreeSet<VehicleKey>,
    /// Canonical make, present even when `vehicles` is empty.
    pub make: Option<String>,
    pub years: BTreeSet<u16>,
    pub confidence: Confidence,
}

impl EvidenceContext {
    /// Evidence names a make and years but no concrete model.
    pub fn is_make_level(&self) -> bool {
        self.vehicles.is_empty() && self.make.is_some()
    }

    /// Every make the evidence touches, from named vehicles and the bare make.
    pub fn makes(&self) -> BTreeSet<&str> {
        let mut makes: BTreeSet<&str> = self.vehicles.iter().map(|v| v.make.as_str()).collect();
        if let Some(make) = &self.make {
            makes.insert(make.as_str());
        }
        makes
    }

    /// Explicit years plus every year covered by a named vehicle.
    pub fn all_years(&self) -> BTreeSet<u16> {
        let mut years = self.years.clone();
        for vehicle in &self.vehicles {
            years.extend(vehicle.years());
        }
        years
    }
}

/// "Tool X handles vehicle Y", optionally with a caveat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMentionEvidence {
    pub context: EvidenceContext,
    /// Raw product or brand mention, resolved to a family by the aggregator.
    pub tool: String,
    pub caveat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitationEvidence {
    pub context: EvidenceContext,
    pub tool: Option<String>,
    /// Pre-assigned categories. Empty means "classify the snippet".
    pub categories: BTreeSet<LimitationCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableEvidence {
    pub context: EvidenceContext,
    pub tool: Option<String>,
    pub cable: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FccEvidence {
    pub context: EvidenceContext,
    pub fcc_id: Option<String>,
    pub chip: Option<String>,
}

impl FccEvidence {
    /// Identity values carried by this record, by field.
    pub fn identity_values(&self) -> Vec<(IdentityField, &str)> {
        let mut values = Vec::with_capacity(2);
        if let Some(fcc) = self.fcc_id.as_deref().filter(|v| !v.is_empty()) {
            values.push((IdentityField::FccId, fcc));
        }
        if let Some(chip) = self.chip.as_deref().filter(|v| !v.is_empty()) {
            values.push((IdentityField::Chip, chip));
        }
        values
    }
}

/// One atomic fact mined by an upstream extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    ToolMention(ToolMentionEvidence),
    Limitation(LimitationEvidence),
    Cable(CableEvidence),
    Fcc(FccEvidence),
}

impl Evidence {
    pub fn context(&self) -> &EvidenceContext {
        match self {
            Evidence::ToolMention(e) => &e.context,
            Evidence::Limitation(e) => &e.context,
            Evidence::Cable(e) => &e.context,
            Evidence::Fcc(e) => &e.context,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Evidence::ToolMention(_) => "tool_mention",
            Evidence::Limitation(_) => "limitation",
            Evidence::Cable(_) => "cable",
            Evidence::Fcc(_) => "fcc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitationRecord {
    pub category: LimitationCategory,
    pub evidence_snippet: String,
    pub source_file: String,
}

/// Human-auditable marker for a make/year that needs manual verification.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchFlag {
    pub make: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub year: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolFamily>,
    pub reason: String,
}

impl ResearchFlag {
    /// Whether this flag applies to a single-year coverage cell.
    pub fn matches(&self, vehicle: &VehicleKey, tool: ToolFamily) -> bool {
        self.make == vehicle.make
            && vehicle.contains_year(self.year)
            && self.model.as_deref().map_or(true, |m| m == vehicle.model)
            && self.tool.map_or(true, |t| t == tool)
    }
}

impl fmt::Display for ResearchFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.make)?;
        if let Some(model) = &self.model {
            write!(f, " {}", model)?;
        }
        write!(f, " {}", self.year)?;
        if let Some(tool) = &self.tool {
            write!(f, " [{}]", tool)?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Two sources disagree on an identity value. No winner is chosen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub vehicle: VehicleKey,
    pub field: IdentityField,
    pub value_a: String,
    pub source_a: String,
    pub value_b: String,
    pub source_b: String,
}

/// An identity attribute changed between two consecutive model years.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionFlag {
    pub make: String,
    pub model: String,
    pub year_from: u16,
    pub year_to: u16,
    pub changed_field: IdentityField,
    pub value_from: String,
    pub value_to: String,
}

/// Reconciled answer for one (single-year vehicle, tool family) cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageEntry {
    pub vehicle: VehicleKey,
    pub tool: ToolFamily,
    pub status: CoverageStatus,
    /// `None` until a tool-mention signal contributes.
    pub confidence: Option<Confidence>,
    pub limitations: BTreeSet<LimitationRecord>,
    pub cables: BTreeSet<String>,
    pub flags: BTreeSet<ResearchFlag>,
    /// Source files of every tool-mention signal merged into this entry.
    pub sources: BTreeSet<String>,
}

impl CoverageEntry {
    pub fn new(vehicle: VehicleKey, tool: ToolFamily) -> Self {
        Self {
            vehicle,
            tool,
            status: CoverageStatus::Unknown,
            confidence: None,
            limitations: BTreeSet::new(),
            cables: BTreeSet::new(),
            flags: BTreeSet::new(),
            sources: BTreeSet::new(),
        }
    }

    /// Raise status to at least `target`. Never lowers it.
    pub fn escalate(&mut self, target: CoverageStatus) {
        if target > self.status {
            self.status = target;
        }
    }

    pub fn effective_confidence(&self) -> Confidence {
        self.confidence.unwrap_or(Confidence::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_key_rejects_inverted_range() {
        assert!(VehicleKey::new("Toyota", "Camry", 2022, 2018).is_none());
        let key = VehicleKey::new("Toyota", "Camry", 2018, 2022).unwrap();
        assert!(key.contains_year(2020));
        assert!(!key.contains_year(2023));
        assert_eq!(key.years().count(), 5);
    }

    #[test]
    fn status_escalation_never_lowers() {
        let mut entry = CoverageEntry::new(
            VehicleKey::single_year("Toyota", "Camry", 2020),
            ToolFamily::Autel,
        );
        entry.escalate(CoverageStatus::Yes);
        entry.escalate(CoverageStatus::Low);
        assert_eq!(entry.status, CoverageStatus::Yes);
    }

    #[test]
    fn confidence_parse_and_step_down() {
        assert_eq!(Confidence::parse("HIGH"), Some(Confidence::High));
        assert_eq!(Confidence::parse("med"), Some(Confidence::Medium));
        assert_eq!(Confidence::parse("maybe"), None);
        assert_eq!(Confidence::High.step_down(), Confidence::Medium);
        assert_eq!(Confidence::Low.step_down(), Confidence::Low);
    }

    #[test]
    fn research_flag_display_and_match() {
        let flag = ResearchFlag {
            make: "RAM".into(),
            model: None,
            year: 2020,
            tool: Some(ToolFamily::Autel),
            reason: "gateway bypass needed".into(),
        };
        assert_eq!(flag.to_string(), "RAM 2020 [Autel]: gateway bypass needed");
        let cell = VehicleKey::single_year("RAM", "1500", 2020);
        assert!(flag.matches(&cell, ToolFamily::Autel));
        assert!(!flag.matches(&cell, ToolFamily::Xhorse));
    }

    #[test]
    fn limitation_category_parse_accepts_spacing_variants() {
        assert_eq!(
            LimitationCategory::parse("Bench Required"),
            Some(LimitationCategory::BenchRequired)
        );
        assert_eq!(
            LimitationCategory::parse("akl-blocked"),
            Some(LimitationCategory::AklBlocked)
        );
        assert_eq!(LimitationCategory::parse("nonsense"), None);
    }
}
