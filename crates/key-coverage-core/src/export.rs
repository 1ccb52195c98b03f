//! Unified export document.
//!
//! One [`VehicleRecord`] per vehicle and year range, with a sub-record for
//! every [`ToolFamily`]. Consecutive model years whose identity and tool
//! sub-records are identical are coalesced into one range. Everything is
//! emitted in sorted order so the same table always produces byte-identical
//! JSON.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::{CoverageTable, FoldStats};
use crate::detect::DetectionReport;
use crate::models::{
    Confidence, Conflict, CoverageEntry, CoverageStatus, IdentityField, LimitationRecord,
    ResearchFlag, ToolFamily, TransitionFlag, VehicleKey,
};

/// Counters reported by the input loaders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub records_loaded: usize,
    pub records_skipped: usize,
    pub seed_flags: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCoverage {
    pub status: CoverageStatus,
    pub confidence: Confidence,
    pub limitations: Vec<LimitationRecord>,
    pub cables_required: Vec<String>,
    /// Reasons of the research flags touching this cell.
    pub flags: Vec<String>,
}

impl ToolCoverage {
    fn untouched() -> Self {
        Self {
            status: CoverageStatus::Unknown,
            confidence: Confidence::Low,
            limitations: Vec::new(),
            cables_required: Vec::new(),
            flags: Vec::new(),
        }
    }

    fn from_entry(entry: &CoverageEntry) -> Self {
        let flags: BTreeSet<&str> = entry.flags.iter().map(|f| f.reason.as_str()).collect();
        Self {
            status: entry.status,
            confidence: entry.effective_confidence(),
            limitations: entry.limitations.iter().cloned().collect(),
            cables_required: entry.cables.iter().cloned().collect(),
            flags: flags.into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub fcc_ids: Vec<String>,
    pub chips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRecord {
    pub make: String,
    pub model: String,
    pub year_start: u16,
    pub year_end: u16,
    pub identity: IdentityRecord,
    pub tools: BTreeMap<ToolFamily, ToolCoverage>,
}

impl VehicleRecord {
    pub fn has_limitations(&self) -> bool {
        self.tools.values().any(|t| !t.limitations.is_empty())
    }

    pub fn has_flags(&self) -> bool {
        self.tools.values().any(|t| !t.flags.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_vehicles: usize,
    pub vehicles_with_limitations: usize,
    pub vehicles_with_flags: usize,
    pub make_count: usize,
    pub year_range: Option<YearRange>,
    pub conflict_count: usize,
    pub transition_count: usize,
    pub flag_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub inputs: InputStats,
    pub fold: FoldStats,
}

/// The exported artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageDocument {
    pub summary: Summary,
    pub vehicles: Vec<VehicleRecord>,
    pub conflicts: Vec<Conflict>,
    pub transitions: Vec<TransitionFlag>,
    pub flags: Vec<ResearchFlag>,
    pub run: RunStats,
}

type YearPayload = (IdentityRecord, BTreeMap<ToolFamily, ToolCoverage>);

fn identity_record(table: &CoverageTable, vehicle: &VehicleKey) -> IdentityRecord {
    let Some(observed) = table.identity.get(vehicle) else {
        return IdentityRecord::default();
    };
    let values = |field: IdentityField| -> Vec<String> {
        observed
            .get(&field)
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default()
    };
    IdentityRecord {
        fcc_ids: values(IdentityField::FccId),
        chips: values(IdentityField::Chip),
    }
}

fn year_payload(table: &CoverageTable, vehicle: &VehicleKey) -> YearPayload {
    let tools = ToolFamily::ALL
        .iter()
        .map(|tool| {
            let coverage = table
                .entry(vehicle, *tool)
                .map(ToolCoverage::from_entry)
                .unwrap_or_else(ToolCoverage::untouched);
            (*tool, coverage)
        })
        .collect();
    (identity_record(table, vehicle), tools)
}

/// Coalesce per-year cells into vehicle records.
pub fn vehicle_records(table: &CoverageTable) -> Vec<VehicleRecord> {
    let mut records: Vec<VehicleRecord> = Vec::new();
    // table.vehicles() iterates (make, model, year) in order
    for vehicle in table.vehicles() {
        let (identity, tools) = year_payload(table, vehicle);
        if let Some(last) = records.last_mut() {
            if last.make == vehicle.make
                && last.model == vehicle.model
                && last.year_end + 1 == vehicle.year_start
                && last.identity == identity
                && last.tools == tools
            {
                last.year_end = vehicle.year_start;
                continue;
            }
        }
        records.push(VehicleRecord {
            make: vehicle.make.clone(),
            model: vehicle.model.clone(),
            year_start: vehicle.year_start,
            year_end: vehicle.year_start,
            identity,
            tools,
        });
    }
    records
}

pub fn summarize(vehicles: &[VehicleRecord], report: &DetectionReport, flag_count: usize) -> Summary {
    let makes: BTreeSet<&str> = vehicles.iter().map(|v| v.make.as_str()).collect();
    let year_range = vehicles
        .iter()
        .map(|v| v.year_start)
        .min()
        .zip(vehicles.iter().map(|v| v.year_end).max())
        .map(|(start, end)| YearRange { start, end });
    Summary {
        total_vehicles: vehicles.len(),
        vehicles_with_limitations: vehicles.iter().filter(|v| v.has_limitations()).count(),
        vehicles_with_flags: vehicles.iter().filter(|v| v.has_flags()).count(),
        make_count: makes.len(),
        year_range,
        conflict_count: report.conflicts.len(),
        transition_count: report.transitions.len(),
        flag_count,
    }
}

/// Assemble the exported document from a finished table and its detections.
pub fn build_document(table: &CoverageTable, report: &DetectionReport, inputs: InputStats) -> CoverageDocument {
    let vehicles = vehicle_records(table);
    let summary = summarize(&vehicles, report, table.flags.len());
    CoverageDocument {
        summary,
        vehicles,
        conflicts: report.conflicts.clone(),
        transitions: report.transitions.clone(),
        flags: table.flags.iter().cloned().collect(),
        run: RunStats {
            inputs,
            fold: table.stats.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Aggregator, AggregatorOptions};
    use crate::detect::detect;
    use crate::models::{Evidence, EvidenceContext, FccEvidence, ToolMentionEvidence};
    use crate::normalize::{parse_year_span, resolve_identity};

    fn context(make: &str, model: &str, years: &str, confidence: Confidence, source: &str) -> EvidenceContext {
        let span = parse_year_span(years).unwrap();
        let resolved = resolve_identity(make, Some(model), span, 2030).unwrap();
        EvidenceContext {
            source_file: source.to_string(),
            snippet: String::new(),
            vehicles: resolved.vehicles,
            make: Some(resolved.make),
            years: resolved.years,
            confidence,
        }
    }

    fn camry_document() -> CoverageDocument {
        let mut agg = Aggregator::new(AggregatorOptions::default());
        agg.ingest(Evidence::ToolMention(ToolMentionEvidence {
            context: context("Toyota", "Camry", "2018-2022", Confidence::High, "a.pdf"),
            tool: "Autel".into(),
            caveat: None,
        }));
        agg.ingest(Evidence::ToolMention(ToolMentionEvidence {
            context: context("Toyota", "Camry", "2020", Confidence::Low, "b.pdf"),
            tool: "Autel".into(),
            caveat: Some("bench required".into()),
        }));
        agg.ingest(Evidence::Fcc(FccEvidence {
            context: context("Toyota", "Camry", "2018-2022", Confidence::High, "base.csv"),
            fcc_id: Some("HYQ14FBA".into()),
            chip: Some("H".into()),
        }));
        agg.ingest(Evidence::Fcc(FccEvidence {
            context: context("Toyota", "Corolla", "2019", Confidence::High, "base.csv"),
            fcc_id: Some("HYQ12BFB".into()),
            chip: None,
        }));
        let table = agg.finish();
        let report = detect(&table);
        build_document(&table, &report, InputStats::default())
    }

    #[test]
    fn identical_years_coalesce_around_a_changed_year() {
        let doc = camry_document();
        let camry: Vec<_> = doc
            .vehicles
            .iter()
            .filter(|v| v.model == "Camry")
            .map(|v| (v.year_start, v.year_end))
            .collect();
        assert_eq!(camry, vec![(2018, 2019), (2020, 2020), (2021, 2022)]);

        let y2020 = doc.vehicles.iter().find(|v| v.model == "Camry" && v.year_start == 2020).unwrap();
        let autel = &y2020.tools[&ToolFamily::Autel];
        assert_eq!(autel.status, CoverageStatus::Yes);
        assert_eq!(autel.confidence, Confidence::Low);
        assert_eq!(autel.limitations.len(), 1);
        assert_eq!(y2020.identity.fcc_ids, vec!["HYQ14FBA".to_string()]);
    }

    #[test]
    fn every_family_is_present_and_untouched_ones_are_unknown() {
        let doc = camry_document();
        for record in &doc.vehicles {
            assert_eq!(record.tools.len(), ToolFamily::ALL.len());
        }
        let corolla = doc.vehicles.iter().find(|v| v.model == "Corolla").unwrap();
        assert!(corolla
            .tools
            .values()
            .all(|t| t.status == CoverageStatus::Unknown && t.confidence == Confidence::Low));
    }

    #[test]
    fn summary_counts_records() {
        let doc = camry_document();
        assert_eq!(doc.summary.total_vehicles, 4);
        assert_eq!(doc.summary.vehicles_with_limitations, 1);
        assert_eq!(doc.summary.make_count, 1);
        assert_eq!(doc.summary.year_range, Some(YearRange { start: 2018, end: 2022 }));
        assert_eq!(doc.summary.conflict_count, 0);
    }

    #[test]
    fn json_shape_uses_camel_case_and_family_names() {
        let value = serde_json::to_value(camry_document()).unwrap();
        assert!(value["summary"]["totalVehicles"].is_number());
        let first = &value["vehicles"][0];
        assert_eq!(first["yearStart"], 2018);
        assert!(first["tools"]["Advanced Diagnostics"].is_object());
        assert_eq!(first["tools"]["Autel"]["status"], "yes");
        assert!(first["tools"]["OBDSTAR"]["cablesRequired"].is_array());
        assert!(value["run"]["fold"]["evidenceFolded"].is_number());
    }

    #[test]
    fn export_is_deterministic_and_reloadable() {
        let a = serde_json::to_string_pretty(&camry_document()).unwrap();
        let b = serde_json::to_string_pretty(&camry_document()).unwrap();
        assert_eq!(a, b);
        let back: CoverageDocument = serde_json::from_str(&a).unwrap();
        assert_eq!(back, camry_document());
    }

    #[test]
    fn empty_table_exports_empty_document() {
        let table = CoverageTable::default();
        let doc = build_document(&table, &DetectionReport::default(), InputStats::default());
        assert!(doc.vehicles.is_empty());
        assert_eq!(doc.summary.year_range, None);
    }
}
