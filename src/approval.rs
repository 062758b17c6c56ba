//! Shift and skill log lifecycle: authoring, submission and reviewer decisions.
//!
//! Every function takes the current document by value and returns the next one, so the
//! container can apply them atomically through `Store::try_update`.

use chrono::{NaiveDate, NaiveTime, Utc};

use crate::error::DomainError;
use crate::ids::new_id;
use crate::models::{
    AppState, Approval, Decision, LogKind, LogStatus, ShiftLog, SkillLog, SkillMode, SkillOutcome,
};
use crate::progress::compute_hours;
use crate::store::{audit_event, notification};

const REVIEWER_FALLBACK: &str = "A reviewer";

/// Form input for a shift log.
#[derive(Debug, Clone)]
pub struct ShiftDraft {
    pub student_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub break_minutes: u32,
    pub site_id: String,
    pub preceptor_id: Option<String>,
    pub notes: Option<String>,
    pub no_phi: bool,
}

/// Form input for a skill log.
#[derive(Debug, Clone)]
pub struct SkillDraft {
    pub student_id: String,
    pub skill_name: String,
    pub skill_type: String,
    pub outcome: SkillOutcome,
    pub mode: SkillMode,
    pub shift_log_id: Option<String>,
    pub notes: Option<String>,
    pub no_phi: bool,
}

impl ShiftDraft {
    fn hours(&self) -> Result<f64, DomainError> {
        if !self.no_phi {
            return Err(DomainError::PhiNotConfirmed);
        }
        let hours = compute_hours(self.start_time, self.end_time, self.break_minutes);
        if hours <= 0.0 {
            return Err(DomainError::InvalidShiftTimes);
        }
        Ok(hours)
    }
}

impl ShiftLog {
    /// A new pending log with its duration computed from the draft.
    pub fn new(draft: ShiftDraft) -> Result<Self, DomainError> {
        let computed_hours = draft.hours()?;
        let now = Utc::now();
        Ok(ShiftLog {
            id: new_id("shift"),
            student_id: draft.student_id,
            date: draft.date,
            start_time: draft.start_time,
            end_time: draft.end_time,
            break_minutes: draft.break_minutes,
            computed_hours,
            site_id: draft.site_id,
            preceptor_id: draft.preceptor_id,
            status: LogStatus::Pending,
            notes: draft.notes,
            no_phi: true,
            created_at: now,
            updated_at: now,
        })
    }
}

impl SkillLog {
    pub fn new(draft: SkillDraft) -> Result<Self, DomainError> {
        if !draft.no_phi {
            return Err(DomainError::PhiNotConfirmed);
        }
        let now = Utc::now();
        Ok(SkillLog {
            id: new_id("skill"),
            student_id: draft.student_id,
            skill_name: draft.skill_name,
            skill_type: draft.skill_type,
            outcome: draft.outcome,
            mode: draft.mode,
            shift_log_id: draft.shift_log_id,
            status: LogStatus::Pending,
            notes: draft.notes,
            no_phi: true,
            created_at: now,
            updated_at: now,
        })
    }
}

pub fn add_shift_log(mut state: AppState, draft: ShiftDraft) -> Result<AppState, DomainError> {
    let log = ShiftLog::new(draft)?;
    state.push_audit(audit_event(
        "create",
        LogKind::Shift.as_str(),
        &log.id,
        &log.student_id,
        Some(&format!("{:.2} hours on {}", log.computed_hours, log.date)),
    ));
    state.shift_logs.push(log);
    Ok(state)
}

pub fn add_skill_log(mut state: AppState, draft: SkillDraft) -> Result<AppState, DomainError> {
    let log = SkillLog::new(draft)?;
    state.push_audit(audit_event(
        "create",
        LogKind::Skill.as_str(),
        &log.id,
        &log.student_id,
        Some(&log.skill_name),
    ));
    state.skill_logs.push(log);
    Ok(state)
}

/// Rewrites a pending or rejected shift log in place. The status is left as it was; a
/// rejected log goes back to review only through [`submit`].
pub fn edit_shift_log(
    mut state: AppState,
    id: &str,
    draft: ShiftDraft,
) -> Result<AppState, DomainError> {
    let computed_hours = draft.hours()?;
    let log = state
        .shift_logs
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| DomainError::not_found("shift log", id))?;

    if !log.status.is_editable() {
        return Err(DomainError::illegal_log_transition(
            "shift log",
            id,
            log.status,
            log.status,
        ));
    }

    log.date = draft.date;
    log.start_time = draft.start_time;
    log.end_time = draft.end_time;
    log.break_minutes = draft.break_minutes;
    log.computed_hours = computed_hours;
    log.site_id = draft.site_id;
    log.preceptor_id = draft.preceptor_id;
    log.notes = draft.notes;
    log.updated_at = Utc::now();

    let student_id = log.student_id.clone();
    state.push_audit(audit_event("update", LogKind::Shift.as_str(), id, &student_id, None));
    Ok(state)
}

/// Hands a pending or rejected log to reviewers.
pub fn submit(
    state: AppState,
    kind: LogKind,
    id: &str,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let mut state = transition(state, kind, id, LogStatus::Submitted)?.0;
    state.push_audit(audit_event("submit", kind.as_str(), id, actor_id, None));
    Ok(state)
}

/// Records a reviewer's verdict on a submitted log: the status change, one `Approval`,
/// one audit event and one notification to the log's student.
pub fn decide(
    state: AppState,
    kind: LogKind,
    id: &str,
    decision: Decision,
    reviewer_id: &str,
    comment: Option<&str>,
) -> Result<AppState, DomainError> {
    let comment = comment.map(str::trim).filter(|c| !c.is_empty());
    let (mut state, student_id) = transition(state, kind, id, decision.log_status())?;

    state.approvals.push(Approval {
        id: new_id("appr"),
        entity_type: kind,
        entity_id: id.to_string(),
        reviewer_id: reviewer_id.to_string(),
        decision,
        comments: comment.map(str::to_string),
        decided_at: Utc::now(),
    });

    let details = comment.map(|c| format!("Comment: {c}"));
    state.push_audit(audit_event(
        decision.as_str(),
        kind.as_str(),
        id,
        reviewer_id,
        details.as_deref(),
    ));

    let reviewer = state
        .profile(reviewer_id)
        .map(|p| p.name.as_str())
        .unwrap_or(REVIEWER_FALLBACK);
    let mut message = format!("{reviewer} {decision} your {}", kind.label());
    if let Some(comment) = comment {
        message.push_str(&format!(": \"{comment}\""));
    }
    let title = format!("{} {decision}", capitalized(kind.as_str()));
    let note = notification(
        &student_id,
        &title,
        &message,
        decision.notification_type(),
        Some(kind.link()),
    );
    state.push_notification(note);

    tracing::debug!(kind = %kind, id, %decision, reviewer_id, "log decided");
    Ok(state)
}

/// Submitted logs waiting for a reviewer, shifts then skills, oldest first.
pub fn pending_reviews(state: &AppState) -> (Vec<&ShiftLog>, Vec<&SkillLog>) {
    let mut shifts: Vec<_> = state
        .shift_logs
        .iter()
        .filter(|s| s.status == LogStatus::Submitted)
        .collect();
    shifts.sort_by_key(|s| s.updated_at);
    let mut skills: Vec<_> = state
        .skill_logs
        .iter()
        .filter(|s| s.status == LogStatus::Submitted)
        .collect();
    skills.sort_by_key(|s| s.updated_at);
    (shifts, skills)
}

/// Moves one log to `next` if the state machine allows it. Returns the new document and
/// the owning student's id.
fn transition(
    mut state: AppState,
    kind: LogKind,
    id: &str,
    next: LogStatus,
) -> Result<(AppState, String), DomainError> {
    let now = Utc::now();
    let (status, student_id) = match kind {
        LogKind::Shift => {
            let log = state
                .shift_logs
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| DomainError::not_found(kind.label(), id))?;
            let previous = log.status;
            if previous.can_transition_to(next) {
                log.status = next;
                log.updated_at = now;
            }
            (previous, log.student_id.clone())
        }
        LogKind::Skill => {
            let log = state
                .skill_logs
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| DomainError::not_found(kind.label(), id))?;
            let previous = log.status;
            if previous.can_transition_to(next) {
                log.status = next;
                log.updated_at = now;
            }
            (previous, log.student_id.clone())
        }
    };

    if !status.can_transition_to(next) {
        return Err(DomainError::illegal_log_transition(
            kind.label(),
            id,
            status,
            next,
        ));
    }
    Ok((state, student_id))
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
