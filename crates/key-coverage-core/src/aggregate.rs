//! Coverage aggregation: folds the evidence stream into one entry per
//! (single-year vehicle, tool family) cell.
//!
//! # Fold rules
//!
//! 1. A tool mention escalates its cells' status according to
//!    [`derive_status`]. Escalation is monotonic: status never goes down.
//! 2. Entry confidence is blended by the configured [`ConfidencePolicy`]
//!    (pessimistic minimum by default).
//! 3. Caveats, limitation snippets and cable mentions are classified and
//!    attached as [`LimitationRecord`]s and cable tokens.
//! 4. Identity values (FCC id, chip) are collected per cell for the
//!    conflict detector.
//!
//! Evidence whose targets depend on which entries exist (model-less tool
//! mentions, limitation and cable attachment) is buffered and resolved in
//! [`Aggregator::finish`], after every direct mention has been folded. Together
//! with commutative merges this makes the finished table independent of
//! evidence order.
//!
//! # Attachment modes
//!
//! | Mode | Limitation / cable evidence reaches |
//! |------|-------------------------------------|
//! | `broadcast` | every existing entry with the same make and a matched year |
//! | `strict` | only the vehicles the evidence names |

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::classify::{classify, classify_limitations, extract_cables, prepare_context};
use crate::detect::narrative_flags;
use crate::models::{
    CableEvidence, Confidence, CoverageEntry, CoverageStatus, Evidence, EvidenceContext,
    FccEvidence, IdentityField, LimitationCategory, LimitationEvidence, LimitationRecord,
    ResearchFlag, ToolFamily, ToolMentionEvidence, VehicleKey,
};
use crate::normalize::normalize_tool;
use crate::policy::{ConfidenceMerge, ConfidencePolicy};

pub const DEFAULT_POPULARITY_THRESHOLD: usize = 3;

/// How limitation and cable evidence picks its target entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachMode {
    #[default]
    Broadcast,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorOptions {
    pub attach_mode: AttachMode,
    /// A make needs mentions from more than this many distinct source files
    /// before its `Low` entries are promoted to `Medium`.
    pub popularity_threshold: usize,
    pub confidence_merge: ConfidenceMerge,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            attach_mode: AttachMode::Broadcast,
            popularity_threshold: DEFAULT_POPULARITY_THRESHOLD,
            confidence_merge: ConfidenceMerge::Min,
        }
    }
}

/// Counters describing one fold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoldStats {
    pub evidence_folded: usize,
    pub tool_mentions: usize,
    pub limitations: usize,
    pub cables: usize,
    pub identity_records: usize,
    /// Model-less tool mentions applied at reduced confidence.
    pub ambiguous: usize,
    pub unmapped_tools: usize,
    /// Evidence that found no entry to attach to.
    pub unattached: usize,
    pub popularity_boosted: usize,
}

/// (single-year vehicle, tool family)
pub type CellKey = (VehicleKey, ToolFamily);

/// Identity values seen for one cell: field → value → reporting sources.
pub type IdentityObservations = BTreeMap<IdentityField, BTreeMap<String, BTreeSet<String>>>;

/// The finished, frozen aggregation result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageTable {
    pub entries: BTreeMap<CellKey, CoverageEntry>,
    pub identity: BTreeMap<VehicleKey, IdentityObservations>,
    pub flags: BTreeSet<ResearchFlag>,
    pub stats: FoldStats,
}

impl CoverageTable {
    pub fn entry(&self, vehicle: &VehicleKey, tool: ToolFamily) -> Option<&CoverageEntry> {
        self.entries.get(&(vehicle.clone(), tool))
    }

    /// Every single-year vehicle with coverage or identity data.
    pub fn vehicles(&self) -> BTreeSet<&VehicleKey> {
        self.entries
            .keys()
            .map(|(vehicle, _)| vehicle)
            .chain(self.identity.keys())
            .collect()
    }
}

/// Status a single tool mention escalates its cells to.
pub fn derive_status(confidence: Confidence, has_caveat: bool) -> CoverageStatus {
    match (confidence, has_caveat) {
        (Confidence::High, false) => CoverageStatus::Yes,
        (Confidence::High, true) => CoverageStatus::PartialCheck,
        (Confidence::Medium, _) => CoverageStatus::Partial,
        (Confidence::Low, _) => CoverageStatus::Low,
    }
}

/// In-progress aggregation table. Feed it with [`ingest`](Self::ingest),
/// then freeze it with [`finish`](Self::finish).
#[derive(Debug)]
pub struct Aggregator {
    options: AggregatorOptions,
    policy: Box<dyn ConfidencePolicy>,
    entries: BTreeMap<CellKey, CoverageEntry>,
    identity: BTreeMap<VehicleKey, IdentityObservations>,
    make_sources: BTreeMap<String, BTreeSet<String>>,
    ambiguous: Vec<(ToolFamily, ToolMentionEvidence)>,
    /// Buffered with the tool family they are restricted to, if any.
    limitations: Vec<(Option<ToolFamily>, LimitationEvidence)>,
    cables: Vec<(Option<ToolFamily>, CableEvidence)>,
    flags: BTreeSet<ResearchFlag>,
    stats: FoldStats,
}

impl Aggregator {
    pub fn new(options: AggregatorOptions) -> Self {
        let policy = options.confidence_merge.policy();
        Self {
            options,
            policy,
            entries: BTreeMap::new(),
            identity: BTreeMap::new(),
            make_sources: BTreeMap::new(),
            ambiguous: Vec::new(),
            limitations: Vec::new(),
            cables: Vec::new(),
            flags: BTreeSet::new(),
            stats: FoldStats::default(),
        }
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    pub fn stats(&self) -> &FoldStats {
        &self.stats
    }

    /// Current state of a cell. Only direct tool mentions are visible before
    /// [`finish`](Self::finish).
    pub fn entry(&self, vehicle: &VehicleKey, tool: ToolFamily) -> Option<&CoverageEntry> {
        self.entries.get(&(vehicle.clone(), tool))
    }

    /// Research flags seeded by upstream curation.
    pub fn add_seed_flags(&mut self, flags: impl IntoIterator<Item = ResearchFlag>) {
        self.flags.extend(flags);
    }

    pub fn ingest_all(&mut self, evidence: impl IntoIterator<Item = Evidence>) {
        for item in evidence {
            self.ingest(item);
        }
    }

    pub fn ingest(&mut self, evidence: Evidence) {
        self.stats.evidence_folded += 1;
        match evidence {
            Evidence::ToolMention(mention) => self.ingest_mention(mention),
            Evidence::Limitation(limitation) => {
                self.stats.limitations += 1;
                let Some(tool) = self.restrict_to_tool(limitation.tool.as_deref(), &limitation.context)
                else {
                    return;
                };
                self.flags.extend(narrative_flags(&limitation.context, tool));
                self.limitations.push((tool, limitation));
            }
            Evidence::Cable(cable) => {
                self.stats.cables += 1;
                let Some(tool) = self.restrict_to_tool(cable.tool.as_deref(), &cable.context) else {
                    return;
                };
                self.cables.push((tool, cable));
            }
            Evidence::Fcc(fcc) => self.ingest_identity(fcc),
        }
    }

    /// Tool restriction for limitation and cable evidence.
    ///
    /// `Some(None)` when no tool is named (every family is a target),
    /// `Some(Some(family))` for a mapped name, and `None` when the name maps
    /// to no family, in which case the evidence is counted and dropped.
    fn restrict_to_tool(&mut self, raw: Option<&str>, ctx: &EvidenceContext) -> Option<Option<ToolFamily>> {
        let Some(raw) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
            return Some(None);
        };
        match normalize_tool(raw) {
            Some(family) => Some(Some(family)),
            None => {
                self.stats.unmapped_tools += 1;
                warn!(
                    tool = raw,
                    source = %ctx.source_file,
                    "limitation or cable names a tool outside the known families; skipped"
                );
                None
            }
        }
    }

    fn ingest_mention(&mut self, mention: ToolMentionEvidence) {
        self.stats.tool_mentions += 1;
        let Some(tool) = normalize_tool(&mention.tool) else {
            self.stats.unmapped_tools += 1;
            warn!(
                tool = %mention.tool,
                source = %mention.context.source_file,
                "tool mention does not map to a known tool family; skipped"
            );
            return;
        };

        for make in mention.context.makes() {
            self.make_sources
                .entry(make.to_string())
                .or_default()
                .insert(mention.context.source_file.clone());
        }

        if mention.context.is_make_level() {
            self.stats.ambiguous += 1;
            debug!(
                make = ?mention.context.make,
                tool = %tool,
                source = %mention.context.source_file,
                "model-less tool mention deferred"
            );
            self.ambiguous.push((tool, mention));
            return;
        }
        if mention.context.vehicles.is_empty() {
            self.stats.unattached += 1;
            return;
        }

        let caveat = mention.caveat.as_deref().filter(|c| !c.trim().is_empty());
        let ctx = &mention.context;
        for vehicle in &ctx.vehicles {
            for year in vehicle.years() {
                self.apply_mention(
                    vehicle.at_year(year),
                    tool,
                    ctx.confidence,
                    caveat,
                    &ctx.source_file,
                );
            }
        }
    }

    fn apply_mention(
        &mut self,
        cell: VehicleKey,
        tool: ToolFamily,
        confidence: Confidence,
        caveat: Option<&str>,
        source: &str,
    ) {
        let entry = self
            .entries
            .entry((cell.clone(), tool))
            .or_insert_with(|| CoverageEntry::new(cell, tool));

        entry.escalate(derive_status(confidence, caveat.is_some()));
        entry.confidence = Some(match entry.confidence {
            Some(current) => self.policy.merge(current, confidence),
            None => confidence,
        });
        entry.sources.insert(source.to_string());

        if let Some(caveat) = caveat {
            let classification = classify(caveat);
            attach_records(entry, &classification.categories, &classification.cables, caveat, source);
        }
    }

    fn ingest_identity(&mut self, fcc: FccEvidence) {
        self.stats.identity_records += 1;
        if fcc.context.vehicles.is_empty() {
            self.stats.unattached += 1;
            debug!(
                source = %fcc.context.source_file,
                "identity record names no model; not attributable"
            );
            return;
        }
        let values: Vec<(IdentityField, String)> = fcc
            .identity_values()
            .into_iter()
            .map(|(field, value)| (field, value.trim().to_uppercase()))
            .collect();
        for vehicle in &fcc.context.vehicles {
            for year in vehicle.years() {
                let observed = self.identity.entry(vehicle.at_year(year)).or_default();
                for (field, value) in &values {
                    observed
                        .entry(*field)
                        .or_default()
                        .entry(value.clone())
                        .or_default()
                        .insert(fcc.context.source_file.clone());
                }
            }
        }
    }

    /// Resolve deferred evidence and freeze the table.
    pub fn finish(mut self) -> CoverageTable {
        self.resolve_ambiguous();
        self.resolve_attachments();
        self.apply_popularity();
        self.attach_flags();

        debug!(
            entries = self.entries.len(),
            vehicles = self.known_vehicles().len(),
            flags = self.flags.len(),
            "aggregation finished"
        );

        CoverageTable {
            entries: self.entries,
            identity: self.identity,
            flags: self.flags,
            stats: self.stats,
        }
    }

    fn known_vehicles(&self) -> BTreeSet<VehicleKey> {
        self.entries
            .keys()
            .map(|(vehicle, _)| vehicle.clone())
            .chain(self.identity.keys().cloned())
            .collect()
    }

    /// Apply model-less mentions one confidence step lower to every known
    /// vehicle of the make in the matched years.
    fn resolve_ambiguous(&mut self) {
        let known = self.known_vehicles();
        for (tool, mention) in std::mem::take(&mut self.ambiguous) {
            let ctx = &mention.context;
            let Some(make) = ctx.make.as_deref() else {
                continue;
            };
            let years = ctx.all_years();
            let targets: Vec<&VehicleKey> = known
                .iter()
                .filter(|v| v.make == make && years.contains(&v.year_start))
                .collect();
            if targets.is_empty() {
                self.stats.unattached += 1;
                debug!(make, tool = %tool, "no known vehicle for model-less mention");
                continue;
            }
            let caveat = mention.caveat.as_deref().filter(|c| !c.trim().is_empty());
            for target in targets {
                self.apply_mention(
                    target.clone(),
                    tool,
                    ctx.confidence.step_down(),
                    caveat,
                    &ctx.source_file,
                );
            }
        }
    }

    fn resolve_attachments(&mut self) {
        let limitations = std::mem::take(&mut self.limitations);
        let cables = std::mem::take(&mut self.cables);

        // Named (vehicle, tool) pairs exist before any broadcast is resolved.
        let named = limitations
            .iter()
            .map(|(tool, l)| (&l.context, *tool))
            .chain(cables.iter().map(|(tool, c)| (&c.context, *tool)));
        for (ctx, tool) in named {
            let Some(tool) = tool else {
                continue;
            };
            for vehicle in &ctx.vehicles {
                for year in vehicle.years() {
                    let cell = vehicle.at_year(year);
                    self.entries
                        .entry((cell.clone(), tool))
                        .or_insert_with(|| CoverageEntry::new(cell, tool));
                }
            }
        }

        for (tool, limitation) in &limitations {
            let categories = if limitation.categories.is_empty() {
                classify_limitations(&limitation.context.snippet)
            } else {
                limitation.categories.clone()
            };
            let cables = extract_cables(&limitation.context.snippet);
            self.attach_to_targets(&limitation.context, *tool, &categories, &cables);
        }

        for (tool, cable) in &cables {
            let mut tokens = extract_cables(&cable.cable);
            if tokens.is_empty() && !cable.cable.trim().is_empty() {
                tokens.insert(cable.cable.trim().to_string());
            }
            self.attach_to_targets(&cable.context, *tool, &BTreeSet::new(), &tokens);
        }
    }

    fn attach_to_targets(
        &mut self,
        ctx: &EvidenceContext,
        tool: Option<ToolFamily>,
        categories: &BTreeSet<LimitationCategory>,
        cables: &BTreeSet<String>,
    ) {
        let targets = self.attachment_targets(ctx, tool);
        if targets.is_empty() {
            self.stats.unattached += 1;
            debug!(
                source = %ctx.source_file,
                mode = ?self.options.attach_mode,
                "attachment found no coverage entry"
            );
            return;
        }
        for key in targets {
            if let Some(entry) = self.entries.get_mut(&key) {
                attach_records(entry, categories, cables, &ctx.snippet, &ctx.source_file);
            }
        }
    }

    fn attachment_targets(&self, ctx: &EvidenceContext, tool: Option<ToolFamily>) -> Vec<CellKey> {
        let tool_matches = |t: ToolFamily| tool.map_or(true, |wanted| wanted == t);
        match self.options.attach_mode {
            AttachMode::Broadcast => {
                let makes = ctx.makes();
                let years = ctx.all_years();
                self.entries
                    .keys()
                    .filter(|(v, t)| {
                        tool_matches(*t)
                            && makes.contains(v.make.as_str())
                            && years.contains(&v.year_start)
                    })
                    .cloned()
                    .collect()
            }
            AttachMode::Strict => self
                .entries
                .keys()
                .filter(|(v, t)| {
                    tool_matches(*t)
                        && ctx.vehicles.iter().any(|named| {
                            named.make == v.make
                                && named.model == v.model
                                && named.contains_year(v.year_start)
                        })
                })
                .cloned()
                .collect(),
        }
    }

    fn apply_popularity(&mut self) {
        let threshold = self.options.popularity_threshold;
        for entry in self.entries.values_mut() {
            if entry.confidence != Some(Confidence::Low) {
                continue;
            }
            let distinct_sources = self
                .make_sources
                .get(&entry.vehicle.make)
                .map_or(0, BTreeSet::len);
            if distinct_sources > threshold {
                entry.confidence = Some(Confidence::Medium);
                self.stats.popularity_boosted += 1;
            }
        }
    }

    fn attach_flags(&mut self) {
        let mut by_make: BTreeMap<&str, Vec<&ResearchFlag>> = BTreeMap::new();
        for flag in &self.flags {
            by_make.entry(flag.make.as_str()).or_default().push(flag);
        }
        for entry in self.entries.values_mut() {
            let Some(candidates) = by_make.get(entry.vehicle.make.as_str()) else {
                continue;
            };
            for flag in candidates {
                if flag.matches(&entry.vehicle, entry.tool) {
                    entry.flags.insert((*flag).clone());
                }
            }
        }
    }
}

/// Add one limitation record per category plus cable tokens to an entry.
fn attach_records(
    entry: &mut CoverageEntry,
    categories: &BTreeSet<LimitationCategory>,
    cables: &BTreeSet<String>,
    snippet: &str,
    source: &str,
) {
    let snippet = prepare_context(snippet);
    for category in categories {
        entry.limitations.insert(LimitationRecord {
            category: *category,
            evidence_snippet: snippet.clone(),
            source_file: source.to_string(),
        });
    }
    entry.cables.extend(cables.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{parse_year_span, resolve_identity};
    use proptest::prelude::*;

    fn context(make: &str, model: Option<&str>, years: &str, confidence: Confidence, source: &str, snippet: &str) -> EvidenceContext {
        let span = parse_year_span(years).unwrap();
        let resolved = resolve_identity(make, model, span, 2030).unwrap();
        EvidenceContext {
            source_file: source.to_string(),
            snippet: snippet.to_string(),
            vehicles: resolved.vehicles,
            make: Some(resolved.make),
            years: resolved.years,
            confidence,
        }
    }

    fn mention(make: &str, model: Option<&str>, years: &str, tool: &str, confidence: Confidence, caveat: Option<&str>, source: &str) -> Evidence {
        Evidence::ToolMention(ToolMentionEvidence {
            context: context(make, model, years, confidence, source, caveat.unwrap_or("")),
            tool: tool.to_string(),
            caveat: caveat.map(str::to_string),
        })
    }

    fn limitation(make: &str, model: Option<&str>, years: &str, tool: Option<&str>, snippet: &str, source: &str) -> Evidence {
        Evidence::Limitation(LimitationEvidence {
            context: context(make, model, years, Confidence::Medium, source, snippet),
            tool: tool.map(str::to_string),
            categories: BTreeSet::new(),
        })
    }

    fn cell(make: &str, model: &str, year: u16) -> VehicleKey {
        VehicleKey::single_year(make, model, year)
    }

    #[test]
    fn later_low_mention_never_downgrades_yes() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(mention("Toyota", Some("Camry"), "2018-2022", "Autel", Confidence::High, None, "a.pdf"));
        agg.ingest(mention("Toyota", Some("Camry"), "2020", "Autel", Confidence::Low, Some("bench required"), "b.pdf"));
        let table = agg.finish();

        let entry = table.entry(&cell("Toyota", "Camry", 2020), ToolFamily::Autel).unwrap();
        assert_eq!(entry.status, CoverageStatus::Yes);
        assert_eq!(entry.confidence, Some(Confidence::Low));
        let categories: Vec<_> = entry.limitations.iter().map(|l| l.category).collect();
        assert_eq!(categories, vec![LimitationCategory::BenchRequired]);

        let neighbour = table.entry(&cell("Toyota", "Camry", 2019), ToolFamily::Autel).unwrap();
        assert_eq!(neighbour.confidence, Some(Confidence::High));
        assert!(neighbour.limitations.is_empty());
    }

    #[test]
    fn status_derivation_table() {
        assert_eq!(derive_status(Confidence::High, false), CoverageStatus::Yes);
        assert_eq!(derive_status(Confidence::High, true), CoverageStatus::PartialCheck);
        assert_eq!(derive_status(Confidence::Medium, false), CoverageStatus::Partial);
        assert_eq!(derive_status(Confidence::Low, true), CoverageStatus::Low);
    }

    #[test]
    fn alias_spellings_merge_into_one_entry() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(mention("Chevy", Some("Tahoe"), "2019", "Xhorse VVDI", Confidence::Medium, None, "a.html"));
        agg.ingest(mention("Chevrolet", Some("tahoe"), "2019", "Key Tool Plus", Confidence::High, None, "b.html"));
        let table = agg.finish();

        assert_eq!(table.entries.len(), 1);
        let entry = table.entry(&cell("Chevrolet", "Tahoe", 2019), ToolFamily::Xhorse).unwrap();
        assert_eq!(entry.status, CoverageStatus::Yes);
        assert_eq!(entry.sources.len(), 2);
    }

    #[test]
    fn model_less_limitation_broadcasts_by_make_and_year() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(mention("RAM", Some("1500"), "2019-2021", "Autel", Confidence::High, None, "a.pdf"));
        agg.ingest(mention("RAM", Some("2500"), "2020", "Smart Pro", Confidence::Medium, None, "b.pdf"));
        agg.ingest(mention("Jeep", Some("Wrangler"), "2020", "Autel", Confidence::High, None, "c.pdf"));
        agg.ingest(limitation("Ram", None, "2020", None, "RAM 2020 needs the 12+8 adapter", "notes.txt"));
        let table = agg.finish();

        for (model, tool) in [("1500", ToolFamily::Autel), ("2500", ToolFamily::AdvancedDiagnostics)] {
            let entry = table.entry(&cell("RAM", model, 2020), tool).unwrap();
            assert!(entry
                .limitations
                .iter()
                .any(|l| l.category == LimitationCategory::AdapterRequired));
            assert!(entry.cables.contains("12+8 Adapter"));
        }
        assert!(table.entry(&cell("RAM", "1500", 2019), ToolFamily::Autel).unwrap().limitations.is_empty());
        assert!(table.entry(&cell("Jeep", "Wrangler", 2020), ToolFamily::Autel).unwrap().limitations.is_empty());
        assert!(table.flags.iter().any(|f| f.make == "RAM" && f.year == 2020));
    }

    #[test]
    fn strict_mode_only_reaches_named_vehicles() {
        let options = AggregatorOptions {
            attach_mode: AttachMode::Strict,
            ..AggregatorOptions::default()
        };
        let mut agg = Aggregator::new(options);
        agg.ingest(mention("RAM", Some("1500"), "2020", "Autel", Confidence::High, None, "a.pdf"));
        agg.ingest(mention("RAM", Some("2500"), "2020", "Autel", Confidence::High, None, "a.pdf"));
        agg.ingest(limitation("RAM", None, "2020", None, "dealer only", "n1.txt"));
        agg.ingest(limitation("RAM", Some("2500"), "2020", None, "bench job", "n2.txt"));
        let table = agg.finish();

        let e1500 = table.entry(&cell("RAM", "1500", 2020), ToolFamily::Autel).unwrap();
        let e2500 = table.entry(&cell("RAM", "2500", 2020), ToolFamily::Autel).unwrap();
        assert!(e1500.limitations.is_empty());
        let cats: Vec<_> = e2500.limitations.iter().map(|l| l.category).collect();
        assert_eq!(cats, vec![LimitationCategory::BenchRequired]);
        assert_eq!(table.stats.unattached, 1);
        // model-less evidence still yields a research flag
        assert!(!e1500.flags.is_empty());
    }

    #[test]
    fn named_limitation_with_tool_creates_unknown_entry() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(limitation("Ford", Some("F150"), "2021", Some("Lonsdor K518"), "AKL not supported", "l.json"));
        let table = agg.finish();

        let entry = table.entry(&cell("Ford", "F-150", 2021), ToolFamily::Lonsdor).unwrap();
        assert_eq!(entry.status, CoverageStatus::Unknown);
        assert_eq!(entry.confidence, None);
        assert_eq!(entry.effective_confidence(), Confidence::Low);
        assert!(entry.limitations.iter().any(|l| l.category == LimitationCategory::AklBlocked));
    }

    #[test]
    fn model_less_mention_applies_one_step_lower() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(mention("Honda", Some("Civic"), "2018", "Autel", Confidence::High, None, "a.pdf"));
        agg.ingest(mention("Honda", None, "2018", "OBDSTAR X300", Confidence::High, None, "forum.html"));
        agg.ingest(mention("Honda", None, "2024", "OBDSTAR X300", Confidence::High, None, "forum.html"));
        let table = agg.finish();

        let entry = table.entry(&cell("Honda", "Civic", 2018), ToolFamily::Obdstar).unwrap();
        assert_eq!(entry.status, CoverageStatus::Partial);
        assert_eq!(entry.confidence, Some(Confidence::Medium));
        assert_eq!(table.stats.ambiguous, 2);
        assert_eq!(table.stats.unattached, 1);
    }

    #[test]
    fn popular_make_promotes_low_entries() {
        let mut agg = Aggregator::new(AggregatorOptions {
            popularity_threshold: 2,
            ..AggregatorOptions::default()
        });
        agg.ingest(mention("Kia", Some("Soul"), "2016", "Autel", Confidence::Low, None, "1.pdf"));
        agg.ingest(mention("Kia", Some("Optima"), "2016", "Autel", Confidence::High, None, "2.pdf"));
        agg.ingest(mention("Kia", Some("Forte"), "2016", "Autel", Confidence::High, None, "3.pdf"));
        agg.ingest(mention("Mazda", Some("CX5"), "2016", "Autel", Confidence::Low, None, "1.pdf"));
        let table = agg.finish();

        let soul = table.entry(&cell("Kia", "Soul", 2016), ToolFamily::Autel).unwrap();
        assert_eq!(soul.confidence, Some(Confidence::Medium));
        assert_eq!(soul.status, CoverageStatus::Low);
        let cx5 = table.entry(&cell("Mazda", "CX-5", 2016), ToolFamily::Autel).unwrap();
        assert_eq!(cx5.confidence, Some(Confidence::Low));
        assert_eq!(table.stats.popularity_boosted, 1);
    }

    #[test]
    fn unmapped_tool_is_counted_and_skipped() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(mention("Toyota", Some("Camry"), "2020", "Techstream", Confidence::High, None, "a.pdf"));
        let table = agg.finish();
        assert!(table.entries.is_empty());
        assert_eq!(table.stats.unmapped_tools, 1);
    }

    fn cable(make: &str, model: Option<&str>, years: &str, tool: Option<&str>, token: &str, source: &str) -> Evidence {
        Evidence::Cable(CableEvidence {
            context: context(make, model, years, Confidence::Medium, source, ""),
            tool: tool.map(str::to_string),
            cable: token.to_string(),
        })
    }

    #[test]
    fn limitation_and_cable_for_unmapped_tool_are_skipped() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(mention("Toyota", Some("Camry"), "2020", "Autel", Confidence::High, None, "a.pdf"));
        agg.ingest(mention("Toyota", Some("Camry"), "2020", "Xhorse", Confidence::High, None, "b.pdf"));
        agg.ingest(limitation("Toyota", Some("Camry"), "2020", Some("Techstream"), "Techstream: dealer only", "l.json"));
        agg.ingest(cable("Toyota", None, "2020", Some("Techstream"), "Mini Prog", "c.json"));
        let table = agg.finish();

        for tool in [ToolFamily::Autel, ToolFamily::Xhorse] {
            let entry = table.entry(&cell("Toyota", "Camry", 2020), tool).unwrap();
            assert!(entry.limitations.is_empty(), "{:?} picked up a foreign limitation", tool);
            assert!(entry.cables.is_empty());
            assert!(entry.flags.is_empty());
        }
        assert!(table.flags.is_empty());
        assert_eq!(table.stats.unmapped_tools, 2);
        assert_eq!(table.stats.limitations, 1);
        assert_eq!(table.stats.cables, 1);
    }

    fn ram_2020_entries(agg: &mut Aggregator) {
        agg.ingest(mention("RAM", Some("1500"), "2019-2020", "Autel", Confidence::High, None, "a.pdf"));
        agg.ingest(mention("RAM", Some("2500"), "2020", "Smart Pro", Confidence::Medium, None, "b.pdf"));
        agg.ingest(cable("RAM", None, "2020", None, "G-Box 3", "cables.json"));
    }

    #[test]
    fn model_less_cable_broadcasts_by_make_and_year() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        ram_2020_entries(&mut agg);
        let table = agg.finish();

        for (model, tool) in [("1500", ToolFamily::Autel), ("2500", ToolFamily::AdvancedDiagnostics)] {
            let entry = table.entry(&cell("RAM", model, 2020), tool).unwrap();
            assert!(entry.cables.contains("G-Box"), "{} {:?}", model, entry.cables);
        }
        assert!(table.entry(&cell("RAM", "1500", 2019), ToolFamily::Autel).unwrap().cables.is_empty());
        assert_eq!(table.stats.unattached, 0);
    }

    #[test]
    fn model_less_cable_is_unattached_in_strict_mode() {
        let mut agg = Aggregator::new(AggregatorOptions {
            attach_mode: AttachMode::Strict,
            ..AggregatorOptions::default()
        });
        ram_2020_entries(&mut agg);
        let table = agg.finish();

        assert!(table.entries.values().all(|e| e.cables.is_empty()));
        assert_eq!(table.stats.unattached, 1);
    }

    #[test]
    fn seed_flags_attach_to_matching_entries() {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(mention("Nissan", Some("Rogue"), "2021-2022", "Autel", Confidence::High, None, "a.pdf"));
        agg.add_seed_flags([ResearchFlag {
            make: "Nissan".into(),
            model: Some("Rogue".into()),
            year: 2022,
            tool: None,
            reason: "22-digit PIN required".into(),
        }]);
        let table = agg.finish();
        assert!(table.entry(&cell("Nissan", "Rogue", 2021), ToolFamily::Autel).unwrap().flags.is_empty());
        assert_eq!(table.entry(&cell("Nissan", "Rogue", 2022), ToolFamily::Autel).unwrap().flags.len(), 1);
    }

    fn sample_evidence() -> Vec<Evidence> {
        vec![
            mention("Toyota", Some("Camry"), "2018-2022", "Autel IM608", Confidence::High, None, "a.pdf"),
            mention("Toyota", Some("Camry"), "2020", "Autel", Confidence::Low, Some("bench required"), "b.pdf"),
            mention("Toyota", Some("Corolla"), "2019-2020", "Smart Pro", Confidence::Medium, None, "c.pdf"),
            mention("Toyota", None, "2020", "Xhorse", Confidence::High, Some("server token"), "d.pdf"),
            mention("RAM", Some("1500"), "2019-2021", "Lonsdor", Confidence::High, Some("12+8 adapter"), "e.pdf"),
            limitation("RAM", None, "2020", None, "gateway bypass needed, risk of bricking", "f.txt"),
            limitation("Toyota", Some("Camry"), "2021", Some("Autel"), "AKL not supported", "g.txt"),
            Evidence::Cable(CableEvidence {
                context: context("Toyota", Some("Camry"), "2019", Confidence::Medium, "h.json", ""),
                tool: Some("Autel".into()),
                cable: "G-Box 3".into(),
            }),
            Evidence::Fcc(FccEvidence {
                context: context("Toyota", Some("Camry"), "2018-2022", Confidence::High, "base.csv", ""),
                fcc_id: Some("HYQ14FBA".into()),
                chip: Some("H".into()),
            }),
        ]
    }

    fn fold(evidence: Vec<Evidence>, options: AggregatorOptions) -> CoverageTable {
        let mut agg = Aggregator::new(options);
        agg.ingest_all(evidence);
        agg.finish()
    }

    proptest! {
        #[test]
        fn fold_is_order_insensitive(shuffled in Just(sample_evidence()).prop_shuffle()) {
            let baseline = fold(sample_evidence(), AggregatorOptions::default());
            let permuted = fold(shuffled, AggregatorOptions::default());
            prop_assert_eq!(baseline, permuted);
        }

        #[test]
        fn status_never_decreases_during_fold(shuffled in Just(sample_evidence()).prop_shuffle()) {
            let mut agg = Aggregator::new(AggregatorOptions::default());
            let mut seen: BTreeMap<CellKey, CoverageStatus> = BTreeMap::new();
            for item in shuffled {
                agg.ingest(item);
                for (key, entry) in &agg.entries {
                    if let Some(previous) = seen.get(key) {
                        prop_assert!(entry.status >= *previous);
                    }
                    seen.insert(key.clone(), entry.status);
                }
            }
            let table = agg.finish();
            for (key, status) in &seen {
                prop_assert!(table.entries[key].status >= *status);
            }
        }

        #[test]
        fn confidence_stays_under_direct_signals(shuffled in Just(sample_evidence()).prop_shuffle()) {
            let options = AggregatorOptions { popularity_threshold: usize::MAX, ..AggregatorOptions::default() };
            let table = fold(shuffled.clone(), options);
            for item in &shuffled {
                let Evidence::ToolMention(m) = item else { continue };
                let Some(tool) = normalize_tool(&m.tool) else { continue };
                for vehicle in &m.context.vehicles {
                    for year in vehicle.years() {
                        let entry = table.entry(&vehicle.at_year(year), tool).unwrap();
                        prop_assert!(entry.effective_confidence() <= m.context.confidence);
                    }
                }
            }
        }
    }
}
