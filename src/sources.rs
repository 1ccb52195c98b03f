use anyhow::Result;

use crate::config::Config;
use crate::inputs::discover_evidence_files;
use crate::stats::format_bytes;

/// One row of the `kcov inputs` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputStatus {
    pub name: String,
    pub status: &'static str,
    pub required: bool,
    pub detail: String,
}

pub fn input_statuses(config: &Config) -> Vec<InputStatus> {
    let mut rows: Vec<InputStatus> = config
        .inputs
        .files()
        .into_iter()
        .map(|(kind, input)| {
            let (status, detail) = match std::fs::metadata(&input.path) {
                Ok(meta) => ("OK", format_bytes(meta.len())),
                Err(_) => ("MISSING", "-".to_string()),
            };
            InputStatus {
                name: kind.to_string(),
                status,
                required: input.required,
                detail: format!("{}  {}", detail, input.path.display()),
            }
        })
        .collect();

    if let Some(dir) = &config.inputs.evidence_dir {
        let (status, detail) = if dir.root.exists() {
            match discover_evidence_files(dir) {
                Ok(found) if found.errors.is_empty() => ("OK", format!("{} files", found.files.len())),
                Ok(found) => (
                    "OK",
                    format!("{} files, {} unreadable", found.files.len(), found.errors.len()),
                ),
                Err(err) => ("ERROR", err.to_string()),
            }
        } else {
            ("MISSING", "-".to_string())
        };
        rows.push(InputStatus {
            name: "evidence_dir".to_string(),
            status,
            required: false,
            detail: format!("{}  {}", detail, dir.root.display()),
        });
    }
    rows
}

pub fn list_sources(config: &Config) -> Result<()> {
    let rows = input_statuses(config);
    println!("{:<16} {:<10} {:<9} DETAIL", "INPUT", "STATUS", "REQUIRED");
    if rows.is_empty() {
        println!("(no inputs configured)");
    }
    for row in &rows {
        println!(
            "{:<16} {:<10} {:<9} {}",
            row.name, row.status, row.required, row.detail
        );
    }
    Ok(())
}
