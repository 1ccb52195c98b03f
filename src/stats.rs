//! Artifact statistics.
//!
//! Summarizes an exported coverage artifact: totals, per-make vehicle and
//! year counts, and how each tool family's sub-records break down by
//! status. Used by `kcov stats` to sanity-check a run without opening the
//! JSON.

use anyhow::Result;
use key_coverage_core::export::{CoverageDocument, VehicleRecord};
use key_coverage_core::models::{CoverageStatus, ToolFamily};
use std::collections::BTreeMap;
use std::path::Path;

use crate::export::read_artifact;

/// Per-make breakdown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MakeStats {
    pub records: usize,
    pub model_years: usize,
    pub with_limitations: usize,
    pub with_flags: usize,
}

/// Status counts for one tool family, in model years.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ToolStats {
    pub yes: usize,
    pub partial: usize,
    pub low: usize,
    pub unknown: usize,
}

fn model_years(record: &VehicleRecord) -> usize {
    usize::from(record.year_end.saturating_sub(record.year_start)) + 1
}

pub fn make_stats(document: &CoverageDocument) -> BTreeMap<String, MakeStats> {
    let mut by_make: BTreeMap<String, MakeStats> = BTreeMap::new();
    for record in &document.vehicles {
        let stats = by_make.entry(record.make.clone()).or_default();
        stats.records += 1;
        stats.model_years += model_years(record);
        if record.has_limitations() {
            stats.with_limitations += 1;
        }
        if record.has_flags() {
            stats.with_flags += 1;
        }
    }
    by_make
}

pub fn tool_stats(document: &CoverageDocument) -> BTreeMap<ToolFamily, ToolStats> {
    let mut by_tool: BTreeMap<ToolFamily, ToolStats> = BTreeMap::new();
    for record in &document.vehicles {
        let years = model_years(record);
        for (tool, coverage) in &record.tools {
            let stats = by_tool.entry(*tool).or_default();
            match coverage.status {
                CoverageStatus::Yes => stats.yes += years,
                CoverageStatus::Partial | CoverageStatus::PartialCheck => stats.partial += years,
                CoverageStatus::Low => stats.low += years,
                CoverageStatus::Unknown => stats.unknown += years,
            }
        }
    }
    by_tool
}

/// Run the stats command: read an artifact and print a summary.
pub fn run_stats(path: &Path) -> Result<()> {
    let document = read_artifact(path)?;
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let summary = &document.summary;

    println!("Key Coverage: Artifact Stats");
    println!("============================");
    println!();
    println!("  Artifact:    {}", path.display());
    println!("  Size:        {}", format_bytes(size));
    println!();
    println!("  Vehicles:    {}", summary.total_vehicles);
    println!("  Makes:       {}", summary.make_count);
    match summary.year_range {
        Some(range) => println!("  Years:       {}-{}", range.start, range.end),
        None => println!("  Years:       -"),
    }
    println!("  Conflicts:   {}", summary.conflict_count);
    println!("  Transitions: {}", summary.transition_count);
    println!("  Flags:       {}", summary.flag_count);

    let by_make = make_stats(&document);
    if !by_make.is_empty() {
        println!();
        println!("  By make:");
        println!(
            "  {:<20} {:>8} {:>11} {:>12} {:>8}",
            "MAKE", "RECORDS", "MODEL YEARS", "LIMITATIONS", "FLAGS"
        );
        println!("  {}", "-".repeat(63));
        for (make, s) in &by_make {
            println!(
                "  {:<20} {:>8} {:>11} {:>12} {:>8}",
                make, s.records, s.model_years, s.with_limitations, s.with_flags
            );
        }
    }

    let by_tool = tool_stats(&document);
    if !by_tool.is_empty() {
        println!();
        println!("  By tool (model years):");
        println!(
            "  {:<22} {:>6} {:>8} {:>6} {:>8}",
            "TOOL", "YES", "PARTIAL", "LOW", "UNKNOWN"
        );
        println!("  {}", "-".repeat(54));
        for (tool, s) in &by_tool {
            println!(
                "  {:<22} {:>6} {:>8} {:>6} {:>8}",
                tool.as_str(),
                s.yes,
                s.partial,
                s.low,
                s.unknown
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use key_coverage_core::export::{IdentityRecord, ToolCoverage};
    use key_coverage_core::models::Confidence;

    fn record(make: &str, start: u16, end: u16, autel: CoverageStatus) -> VehicleRecord {
        let tools = ToolFamily::ALL
            .iter()
            .map(|tool| {
                let status = if *tool == ToolFamily::Autel { autel } else { CoverageStatus::Unknown };
                (
                    *tool,
                    ToolCoverage {
                        status,
                        confidence: Confidence::Low,
                        limitations: vec![],
                        cables_required: vec![],
                        flags: vec![],
                    },
                )
            })
            .collect();
        VehicleRecord {
            make: make.into(),
            model: "X".into(),
            year_start: start,
            year_end: end,
            identity: IdentityRecord::default(),
            tools,
        }
    }

    #[test]
    fn breakdowns_count_model_years() {
        let document = CoverageDocument {
            vehicles: vec![
                record("Kia", 2014, 2016, CoverageStatus::Yes),
                record("Kia", 2017, 2017, CoverageStatus::PartialCheck),
                record("Mazda", 2020, 2021, CoverageStatus::Low),
            ],
            ..CoverageDocument::default()
        };
        let makes = make_stats(&document);
        assert_eq!(makes["Kia"].records, 2);
        assert_eq!(makes["Kia"].model_years, 4);
        assert_eq!(makes["Mazda"].model_years, 2);

        let tools = tool_stats(&document);
        let autel = &tools[&ToolFamily::Autel];
        assert_eq!((autel.yes, autel.partial, autel.low, autel.unknown), (3, 1, 2, 0));
        assert_eq!(tools[&ToolFamily::Topdon].unknown, 6);
    }

    #[test]
    fn inverted_year_range_counts_one_model_year() {
        let document = CoverageDocument {
            vehicles: vec![record("Kia", 2021, 2019, CoverageStatus::Yes)],
            ..CoverageDocument::default()
        };
        assert_eq!(make_stats(&document)["Kia"].model_years, 1);
        assert_eq!(tool_stats(&document)[&ToolFamily::Autel].yes, 1);
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
