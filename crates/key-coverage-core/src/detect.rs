//! Conflict and flag detection over a finished [`CoverageTable`].
//!
//! Identity conflicts are found per model year and then coalesced: a run of
//! consecutive years carrying the same value pair and sources becomes one
//! [`Conflict`] spanning the run. Transitions compare the value sets of two
//! consecutive years of the same make and model.

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::{CoverageTable, IdentityObservations};
use crate::classify::prepare_context;
use crate::models::{
    Conflict, EvidenceContext, IdentityField, ResearchFlag, ToolFamily, TransitionFlag, VehicleKey,
};

/// Audit records derived from the coverage table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub conflicts: Vec<Conflict>,
    pub transitions: Vec<TransitionFlag>,
}

pub fn detect(table: &CoverageTable) -> DetectionReport {
    DetectionReport {
        conflicts: detect_conflicts(&table.identity),
        transitions: detect_transitions(&table.identity),
    }
}

/// Sort key for a per-year conflict: everything except the year.
type ConflictRun = (String, String, IdentityField, String, String, String, String);

pub fn detect_conflicts(identity: &BTreeMap<VehicleKey, IdentityObservations>) -> Vec<Conflict> {
    let mut per_year: Vec<(ConflictRun, u16)> = Vec::new();
    for (vehicle, fields) in identity {
        for (field, values) in fields {
            let reported: Vec<(&String, &String)> = values
                .iter()
                .filter_map(|(value, sources)| sources.first().map(|source| (value, source)))
                .collect();
            for (i, (value_a, source_a)) in reported.iter().enumerate() {
                for (value_b, source_b) in &reported[i + 1..] {
                    per_year.push((
                        (
                            vehicle.make.clone(),
                            vehicle.model.clone(),
                            *field,
                            (*value_a).clone(),
                            (*source_a).clone(),
                            (*value_b).clone(),
                            (*source_b).clone(),
                        ),
                        vehicle.year_start,
                    ));
                }
            }
        }
    }
    per_year.sort();

    let mut conflicts: Vec<Conflict> = Vec::new();
    let mut previous: Option<&ConflictRun> = None;
    for (run, year) in &per_year {
        let extends = previous == Some(run)
            && conflicts
                .last()
                .is_some_and(|last| last.vehicle.year_end + 1 == *year);
        match conflicts.last_mut() {
            Some(last) if extends => last.vehicle.year_end = *year,
            _ => {
                let (make, model, field, value_a, source_a, value_b, source_b) = run.clone();
                conflicts.push(Conflict {
                    vehicle: VehicleKey::single_year(make, model, *year),
                    field,
                    value_a,
                    source_a,
                    value_b,
                    source_b,
                });
            }
        }
        previous = Some(run);
    }
    conflicts.sort();
    conflicts
}

pub fn detect_transitions(identity: &BTreeMap<VehicleKey, IdentityObservations>) -> Vec<TransitionFlag> {
    let mut by_model: BTreeMap<(&str, &str), BTreeMap<u16, &IdentityObservations>> = BTreeMap::new();
    for (vehicle, fields) in identity {
        by_model
            .entry((vehicle.make.as_str(), vehicle.model.as_str()))
            .or_default()
            .insert(vehicle.year_start, fields);
    }

    let mut transitions = Vec::new();
    for ((make, model), years) in &by_model {
        for (year, fields) in years {
            let Some(next) = year.checked_add(1).and_then(|y| years.get(&y)) else {
                continue;
            };
            for (field, values) in *fields {
                let Some(next_values) = next.get(field) else {
                    continue;
                };
                let from: BTreeSet<&String> = values.keys().collect();
                let to: BTreeSet<&String> = next_values.keys().collect();
                if from.is_empty() || to.is_empty() || from == to {
                    continue;
                }
                transitions.push(TransitionFlag {
                    make: make.to_string(),
                    model: model.to_string(),
                    year_from: *year,
                    year_to: year + 1,
                    changed_field: *field,
                    value_from: join_values(&from),
                    value_to: join_values(&to),
                });
            }
        }
    }
    transitions.sort();
    transitions
}

fn join_values(values: &BTreeSet<&String>) -> String {
    values.iter().map(|v| v.as_str()).collect::<Vec<_>>().join("/")
}

/// Research flags for every (make, year) a limitation record implicates.
pub fn narrative_flags(context: &EvidenceContext, tool: Option<ToolFamily>) -> Vec<ResearchFlag> {
    let mut reason = prepare_context(&context.snippet);
    if reason.is_empty() {
        reason = format!("limitation reported in {}", context.source_file);
    }
    let years = context.all_years();
    context
        .makes()
        .into_iter()
        .flat_map(|make| {
            let reason = &reason;
            years.iter().map(move |year| ResearchFlag {
                make: make.to_string(),
                model: None,
                year: *year,
                tool,
                reason: reason.clone(),
            })
        })
        .collect()
}
