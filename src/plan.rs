//! Preview and summary tables
//!
//! Without `--yes` the CLI only prints what a rolling update would touch.

use std::collections::BTreeMap;

use crate::cloud::CloudInstanceGroup;
use crate::crd::InstanceGroupRole;
use crate::orchestrator::{GroupStatus, RollingUpdateReport};

/// Columns of the preview table
pub const PLAN_HEADERS: [&str; 8] = [
    "NAME",
    "ROLE",
    "STATUS",
    "NEEDUPDATE",
    "READY",
    "MIN",
    "MAX",
    "NODES",
];

/// Columns of the run summary table
pub const REPORT_HEADERS: [&str; 4] = ["NAME", "ROLE", "STATUS", "INSTANCES"];

/// Whether a group has anything to roll
pub fn group_status(group: &CloudInstanceGroup, force: bool) -> &'static str {
    if !group.need_update().is_empty() || (force && !group.ready().is_empty()) {
        "NeedsUpdate"
    } else {
        "Ready"
    }
}

/// One preview row per group, in rolling update order
pub fn plan_rows(groups: &BTreeMap<String, CloudInstanceGroup>, force: bool) -> Vec<Vec<String>> {
    InstanceGroupRole::ORDERED
        .iter()
        .flat_map(|role| groups.values().filter(move |g| g.role() == *role))
        .map(|g| {
            vec![
                g.name(),
                g.role().to_string(),
                group_status(g, force).to_string(),
                g.need_update().len().to_string(),
                g.ready().len().to_string(),
                g.min_size.to_string(),
                g.max_size.to_string(),
                g.registered_nodes().to_string(),
            ]
        })
        .collect()
}

/// Returns true if a run with these groups would replace anything
pub fn needs_update(groups: &BTreeMap<String, CloudInstanceGroup>, force: bool) -> bool {
    groups
        .values()
        .any(|g| group_status(g, force) == "NeedsUpdate")
}

/// One summary row per processed group
pub fn report_rows(report: &RollingUpdateReport) -> Vec<Vec<String>> {
    report
        .groups
        .iter()
        .map(|outcome| {
            let (status, instances) = match &outcome.status {
                GroupStatus::Updated { instances } => ("Updated".to_string(), instances.to_string()),
                GroupStatus::UpToDate => ("UpToDate".to_string(), "0".to_string()),
                GroupStatus::Failed { message } => (format!("Failed: {message}"), "-".to_string()),
            };
            vec![outcome.group.clone(), outcome.role.to_string(), status, instances]
        })
        .collect()
}

/// Render rows as a column-aligned table with headers
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.len());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{cell:<w$}")
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(headers.to_vec());
    for row in rows {
        out.push('\n');
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

/// Print rows as a column-aligned table with headers
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    println!("{}", render_table(headers, rows));
}
