use chrono::{NaiveDate, NaiveTime, Utc};

use crate::error::DomainError;
use crate::ids::new_id;
use crate::models::{
    AppState, LogStatus, ProgressStatus, RequirementCategory, RequirementTemplate,
    StudentRequirementProgress,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl CompletionStatus {
    pub fn from_counts(current: f64, target: f64) -> Self {
        if current >= target {
            CompletionStatus::Completed
        } else if current > 0.0 {
            CompletionStatus::InProgress
        } else {
            CompletionStatus::NotStarted
        }
    }
}

/// How approved skill logs are matched against a Skills template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkillMatch {
    /// Every approved skill log counts.
    #[default]
    Any,
    /// Only logs whose skill name or type equals the template name (case-insensitive).
    TemplateName,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequirementProgress {
    pub current: f64,
    pub target: f64,
    pub status: CompletionStatus,
}

impl RequirementProgress {
    pub fn is_complete(&self) -> bool {
        self.status == CompletionStatus::Completed
    }

    /// Share of the target reached, capped at 1.0.
    pub fn fraction(&self) -> f64 {
        if self.target <= 0.0 {
            1.0
        } else {
            (self.current / self.target).min(1.0)
        }
    }
}

/// Length of a shift in hours: `(end - start) - break`, floored at zero. An end time earlier
/// than the start is read as the next morning, so overnight shifts count in full.
pub fn compute_hours(start: NaiveTime, end: NaiveTime, break_minutes: u32) -> f64 {
    let mut minutes = (end - start).num_minutes();
    if minutes < 0 {
        minutes += 24 * 60;
    }
    let worked = minutes - i64::from(break_minutes);
    worked.max(0) as f64 / 60.0
}

pub fn compute_progress(
    state: &AppState,
    student_id: &str,
    template: &RequirementTemplate,
) -> RequirementProgress {
    compute_progress_with(state, student_id, template, SkillMatch::Any)
}

/// Live progress toward `template`. Hours and Skills are derived from approved logs on every
/// call; Documents and Evaluations read the persisted counter.
pub fn compute_progress_with(
    state: &AppState,
    student_id: &str,
    template: &RequirementTemplate,
    skill_match: SkillMatch,
) -> RequirementProgress {
    let current = match template.category {
        RequirementCategory::Hours => {
            let approved = approved_shifts(state, student_id);
            if template.counts_clock_hours() {
                approved.map(|s| s.computed_hours).sum()
            } else {
                approved.count() as f64
            }
        }
        RequirementCategory::Skills => state
            .skill_logs
            .iter()
            .filter(|s| s.student_id == student_id && s.status == LogStatus::Approved)
            .filter(|s| match skill_match {
                SkillMatch::Any => true,
                SkillMatch::TemplateName => {
                    s.skill_name.eq_ignore_ascii_case(&template.name)
                        || s.skill_type.eq_ignore_ascii_case(&template.name)
                }
            })
            .count() as f64,
        RequirementCategory::Documents | RequirementCategory::Evaluations => {
            find_record(state, student_id, &template.id)
                .map(|p| f64::from(p.current_count))
                .unwrap_or(0.0)
        }
    };

    let target = f64::from(template.target_count);
    RequirementProgress {
        current,
        target,
        status: CompletionStatus::from_counts(current, target),
    }
}

fn approved_shifts<'a>(
    state: &'a AppState,
    student_id: &'a str,
) -> impl Iterator<Item = &'a crate::models::ShiftLog> + 'a {
    state
        .shift_logs
        .iter()
        .filter(move |s| s.student_id == student_id && s.status == LogStatus::Approved)
}

fn find_record<'a>(
    state: &'a AppState,
    student_id: &str,
    template_id: &str,
) -> Option<&'a StudentRequirementProgress> {
    state
        .student_progress
        .iter()
        .find(|p| p.student_id == student_id && p.template_id == template_id)
}

/// Records one piece of evidence toward a Documents or Evaluations template, creating the
/// counter on first use. Repeated calls each count.
pub fn add_evidence(
    mut state: AppState,
    student_id: &str,
    template: &RequirementTemplate,
    expiration_date: Option<NaiveDate>,
) -> Result<AppState, DomainError> {
    if !template.category.takes_evidence() {
        return Err(DomainError::EvidenceNotAccepted {
            template: template.id.clone(),
            category: template.category,
        });
    }

    let now = Utc::now();
    let index = match state
        .student_progress
        .iter()
        .position(|p| p.student_id == student_id && p.template_id == template.id)
    {
        Some(index) => index,
        None => {
            state.student_progress.push(StudentRequirementProgress {
                id: new_id("progress"),
                student_id: student_id.to_string(),
                template_id: template.id.clone(),
                current_count: 0,
                status: ProgressStatus::InProgress,
                expiration_date: None,
                updated_at: now,
            });
            state.student_progress.len() - 1
        }
    };

    let record = &mut state.student_progress[index];
    record.current_count = record.current_count.saturating_add(1);
    record.status = if record.current_count >= template.target_count {
        ProgressStatus::Completed
    } else {
        ProgressStatus::InProgress
    };
    if expiration_date.is_some() {
        record.expiration_date = expiration_date;
    }
    record.updated_at = now;

    Ok(state)
}

/// Counter records whose expiration date falls before `today`.
pub fn expired_evidence<'a>(
    state: &'a AppState,
    student_id: &'a str,
    today: NaiveDate,
) -> Vec<&'a StudentRequirementProgress> {
    state
        .student_progress
        .iter()
        .filter(|p| p.student_id == student_id)
        .filter(|p| p.expiration_date.is_some_and(|d| d < today))
        .collect()
}

/// Progress for every template of the student's program, in template order.
pub fn program_progress<'a>(
    state: &'a AppState,
    student_id: &str,
) -> Vec<(&'a RequirementTemplate, RequirementProgress)> {
    let Some(program_id) = state
        .profile(student_id)
        .and_then(|p| p.program_id.as_deref())
    else {
        return Vec::new();
    };

    state
        .templates_for_program(program_id)
        .into_iter()
        .map(|template| (template, compute_progress(state, student_id, template)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ShiftLog, SkillLog, SkillMode, SkillOutcome};
    use crate::seed::default_state;

    const STUDENT: &str = "user-student-1";

    fn t(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn shift(id: &str, hours: f64, status: LogStatus) -> ShiftLog {
        ShiftLog {
            id: id.to_string(),
            student_id: STUDENT.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            start_time: t(8, 0),
            end_time: t(16, 0),
            break_minutes: 0,
            computed_hours: hours,
            site_id: "site-city-er".to_string(),
            preceptor_id: None,
            status,
            notes: None,
            no_phi: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn skill(id: &str, name: &str, status: LogStatus) -> SkillLog {
        SkillLog {
            id: id.to_string(),
            student_id: STUDENT.to_string(),
            skill_name: name.to_string(),
            skill_type: "Skills".to_string(),
            outcome: SkillOutcome::Success,
            mode: SkillMode::Independent,
            shift_log_id: None,
            status,
            notes: None,
            no_phi: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn template(state: &AppState, id: &str) -> RequirementTemplate {
        state.template(id).unwrap().clone()
    }

    #[test]
    fn hours_subtract_break() {
        assert_eq!(compute_hours(t(9, 0), t(17, 30), 30), 8.0);
        assert_eq!(compute_hours(t(8, 0), t(16, 30), 30), 8.0);
    }

    #[test]
    fn hours_cross_midnight() {
        assert_eq!(compute_hours(t(22, 0), t(6, 0), 0), 8.0);
        assert_eq!(compute_hours(t(19, 0), t(7, 0), 60), 11.0);
    }

    #[test]
    fn hours_floor_at_zero() {
        assert_eq!(compute_hours(t(9, 0), t(9, 0), 0), 0.0);
        assert_eq!(compute_hours(t(9, 0), t(9, 30), 45), 0.0);
    }

    #[test]
    fn hours_templates_count_only_approved_shifts() {
        let mut state = default_state();
        state.shift_logs = vec![
            shift("s1", 8.0, LogStatus::Approved),
            shift("s2", 12.0, LogStatus::Approved),
            shift("s3", 10.0, LogStatus::Submitted),
            shift("s4", 6.0, LogStatus::Rejected),
        ];

        let clock = compute_progress(&state, STUDENT, &template(&state, "rt-ems-hours"));
        assert_eq!(clock.current, 20.0);
        assert_eq!(clock.target, 240.0);
        assert_eq!(clock.status, CompletionStatus::InProgress);

        let shifts = compute_progress(&state, STUDENT, &template(&state, "rt-ems-shifts"));
        assert_eq!(shifts.current, 2.0);
    }

    #[test]
    fn other_students_do_not_count() {
        let mut state = default_state();
        let mut theirs = shift("s1", 8.0, LogStatus::Approved);
        theirs.student_id = "user-student-2".to_string();
        state.shift_logs.push(theirs);

        let progress = compute_progress(&state, STUDENT, &template(&state, "rt-ems-hours"));
        assert_eq!(progress.current, 0.0);
        assert_eq!(progress.status, CompletionStatus::NotStarted);
    }

    #[test]
    fn skills_support_both_views() {
        let mut state = default_state();
        state.skill_logs = vec![
            skill("k1", "IV Insertion", LogStatus::Approved),
            skill("k2", "iv insertion", LogStatus::Approved),
            skill("k3", "Intubation", LogStatus::Approved),
            skill("k4", "IV Insertion", LogStatus::Submitted),
        ];
        let iv = template(&state, "rt-ems-iv");

        assert_eq!(compute_progress(&state, STUDENT, &iv).current, 3.0);
        assert_eq!(
            compute_progress_with(&state, STUDENT, &iv, SkillMatch::TemplateName).current,
            2.0
        );
    }

    #[test]
    fn evidence_counts_up_and_completes() {
        let state = default_state();
        let evals = template(&state, "rt-ems-eval");
        assert_eq!(evals.target_count, 3);

        let mut state = state;
        let mut last = 0;
        for expected in 1..=4u32 {
            state = add_evidence(state, STUDENT, &evals, None).unwrap();
            let records: Vec<_> = state
                .student_progress
                .iter()
                .filter(|p| p.template_id == evals.id)
                .collect();
            assert_eq!(records.len(), 1);
            let record = records[0];
            assert!(record.current_count >= last);
            assert_eq!(record.current_count, expected);
            assert_eq!(
                record.status == ProgressStatus::Completed,
                record.current_count >= evals.target_count
            );
            last = record.current_count;
        }

        let progress = compute_progress(&state, STUDENT, &evals);
        assert_eq!(progress.current, 4.0);
        assert!(progress.is_complete());
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn evidence_refused_for_log_derived_templates() {
        let state = default_state();
        let hours = template(&state, "rt-ems-hours");
        let err = add_evidence(state, STUDENT, &hours, None).unwrap_err();
        assert!(matches!(err, DomainError::EvidenceNotAccepted { .. }));
    }

    #[test]
    fn expiration_is_stamped_and_reported() {
        let state = default_state();
        let bls = template(&state, "rt-ems-cpr");
        let lapsed = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let state = add_evidence(state, STUDENT, &bls, Some(lapsed)).unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        assert_eq!(expired_evidence(&state, STUDENT, today).len(), 1);
        assert!(expired_evidence(&state, STUDENT, lapsed).is_empty());
    }

    #[test]
    fn program_progress_covers_enrolled_program() {
        let state = default_state();
        let rows = program_progress(&state, STUDENT);
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|(_, p)| p.status == CompletionStatus::NotStarted));
        assert!(program_progress(&state, "user-preceptor-1").is_empty());
    }
}
