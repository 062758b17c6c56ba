use std::fmt::Write;

use serde::Serialize;

use crate::models::{AppState, LogStatus, Role};
use crate::progress::program_progress;

/// Completion below this share of requirements marks a student at risk.
const AT_RISK_BELOW_PCT: u32 = 25;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentSummary {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub program_id: String,
    pub cohort_id: String,
    pub total_requirements: usize,
    pub completed_requirements: usize,
    pub completion_pct: u32,
    pub approved_hours: f64,
    pub approved_skills: usize,
    pub pending_items: usize,
}

impl StudentSummary {
    pub fn is_at_risk(&self) -> bool {
        self.total_requirements > 0 && self.completion_pct < AT_RISK_BELOW_PCT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub student_count: usize,
    pub average_completion_pct: u32,
    pub total_approved_hours: f64,
    pub at_risk_count: usize,
}

/// Which students a report covers. `None` means all.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub program_id: Option<String>,
    pub cohort_id: Option<String>,
}

impl ReportFilter {
    fn label(&self, state: &AppState) -> String {
        let program = self.program_id.as_deref().map(|id| {
            state
                .programs
                .iter()
                .find(|p| p.id == id)
                .map_or(id, |p| p.name.as_str())
        });
        let cohort = self.cohort_id.as_deref().map(|id| {
            state
                .cohorts
                .iter()
                .find(|c| c.id == id)
                .map_or(id, |c| c.name.as_str())
        });
        match (program, cohort) {
            (Some(p), Some(c)) => format!("{p} / {c}"),
            (Some(p), None) => p.to_string(),
            (None, Some(c)) => c.to_string(),
            (None, None) => "all programs".to_string(),
        }
    }
}

/// One row per matching student, highest completion first.
pub fn summarize_students(state: &AppState, filter: &ReportFilter) -> Vec<StudentSummary> {
    let mut summaries: Vec<StudentSummary> = state
        .profiles
        .iter()
        .filter(|p| p.role == Role::Student)
        .filter(|p| {
            filter
                .program_id
                .as_deref()
                .map_or(true, |id| p.program_id.as_deref() == Some(id))
        })
        .filter(|p| {
            filter
                .cohort_id
                .as_deref()
                .map_or(true, |id| p.cohort_id.as_deref() == Some(id))
        })
        .map(|student| {
            let progress = program_progress(state, &student.id);
            let total_requirements = progress.len();
            let completed_requirements = progress.iter().filter(|(_, p)| p.is_complete()).count();
            let completion_pct = if total_requirements == 0 {
                0
            } else {
                (completed_requirements as f64 / total_requirements as f64 * 100.0).round() as u32
            };

            let approved_hours = state
                .shift_logs
                .iter()
                .filter(|s| s.student_id == student.id && s.status == LogStatus::Approved)
                .map(|s| s.computed_hours)
                .sum();
            let approved_skills = state
                .skill_logs
                .iter()
                .filter(|s| s.student_id == student.id && s.status == LogStatus::Approved)
                .count();
            let pending_items = state
                .shift_logs
                .iter()
                .filter(|s| s.student_id == student.id && s.status == LogStatus::Submitted)
                .count()
                + state
                    .skill_logs
                    .iter()
                    .filter(|s| s.student_id == student.id && s.status == LogStatus::Submitted)
                    .count();

            StudentSummary {
                student_id: student.id.clone(),
                name: student.name.clone(),
                email: student.email.clone(),
                program_id: student.program_id.clone().unwrap_or_default(),
                cohort_id: student.cohort_id.clone().unwrap_or_default(),
                total_requirements,
                completed_requirements,
                completion_pct,
                approved_hours,
                approved_skills,
                pending_items,
            }
        })
        .collect();

    summaries.sort_by(|a, b| b.completion_pct.cmp(&a.completion_pct));
    summaries
}

pub fn overview(summaries: &[StudentSummary]) -> Overview {
    let student_count = summaries.len();
    let average_completion_pct = if student_count == 0 {
        0
    } else {
        let total: u32 = summaries.iter().map(|s| s.completion_pct).sum();
        (f64::from(total) / student_count as f64).round() as u32
    };

    Overview {
        student_count,
        average_completion_pct,
        total_approved_hours: summaries.iter().map(|s| s.approved_hours).sum(),
        at_risk_count: summaries.iter().filter(|s| s.is_at_risk()).count(),
    }
}

pub fn build_report(state: &AppState, filter: &ReportFilter) -> String {
    let summaries = summarize_students(state, filter);
    let totals = overview(&summaries);

    let mut output = String::new();

    let _ = writeln!(output, "# Clinical Progress Report");
    let _ = writeln!(output, "Generated for {}", filter.label(state));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Students: {}", totals.student_count);
    let _ = writeln!(output, "- Average completion: {}%", totals.average_completion_pct);
    let _ = writeln!(output, "- Approved hours: {:.1}", totals.total_approved_hours);
    let _ = writeln!(output, "- At risk: {}", totals.at_risk_count);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students match this filter.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) {}/{} requirements ({}%), {:.1} hours, {} skills, {} awaiting review",
                summary.name,
                summary.email,
                summary.completed_requirements,
                summary.total_requirements,
                summary.completion_pct,
                summary.approved_hours,
                summary.approved_skills,
                summary.pending_items
            );
        }
    }

    let at_risk: Vec<&StudentSummary> = summaries.iter().filter(|s| s.is_at_risk()).collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## At Risk");

    if at_risk.is_empty() {
        let _ = writeln!(output, "No students below {AT_RISK_BELOW_PCT}% completion.");
    } else {
        for summary in at_risk {
            let _ = writeln!(
                output,
                "- {} at {}% with {} items awaiting review",
                summary.name, summary.completion_pct, summary.pending_items
            );
        }
    }

    output
}

/// Writes the summaries as CSV with a header row.
pub fn write_csv<W: std::io::Write>(
    summaries: &[StudentSummary],
    out: W,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    for summary in summaries {
        writer.serialize(summary)?;
    }
    writer.flush()?;
    Ok(())
}
