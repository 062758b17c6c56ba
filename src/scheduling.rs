use chrono::{NaiveDate, Utc};

use crate::error::DomainError;
use crate::ids::new_id;
use crate::models::{
    AppState, Decision, NotificationType, ScheduleRequest, ScheduleStatus, SiteCapacity,
};
use crate::store::{audit_event, notification};

const SCHEDULE_LINK: &str = "/scheduling";
const UPCOMING_LIMIT: usize = 5;

/// Filled versus advertised places for one site on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityStatus {
    pub filled: usize,
    /// `None` when no capacity has been set for the date.
    pub total: Option<u32>,
}

impl CapacityStatus {
    pub fn is_full(&self) -> bool {
        self.total
            .is_some_and(|total| self.filled >= total as usize)
    }

    pub fn remaining(&self) -> Option<usize> {
        self.total
            .map(|total| (total as usize).saturating_sub(self.filled))
    }
}

pub fn approved_count_for(state: &AppState, site_id: &str, date: NaiveDate) -> usize {
    state
        .schedule_requests
        .iter()
        .filter(|r| r.site_id == site_id && r.date == date && r.status == ScheduleStatus::Approved)
        .count()
}

pub fn capacity_for(state: &AppState, site_id: &str, date: NaiveDate) -> Option<u32> {
    state
        .capacities
        .iter()
        .find(|c| c.site_id == site_id && c.date == date)
        .map(|c| c.capacity_count)
}

pub fn capacity_status(state: &AppState, site_id: &str, date: NaiveDate) -> CapacityStatus {
    CapacityStatus {
        filled: approved_count_for(state, site_id, date),
        total: capacity_for(state, site_id, date),
    }
}

/// A message for the requester or approver when the date is already at capacity.
/// Informational only.
pub fn capacity_warning(state: &AppState, site_id: &str, date: NaiveDate) -> Option<String> {
    let status = capacity_status(state, site_id, date);
    let total = status.total?;
    if !status.is_full() {
        return None;
    }
    Some(format!(
        "{} is at capacity on {date} ({}/{total} placements approved)",
        state.site_name(site_id),
        status.filled
    ))
}

/// Records a student's request for a slot. Never refused for capacity.
pub fn request_slot(
    mut state: AppState,
    student_id: &str,
    site_id: &str,
    date: NaiveDate,
    notes: Option<&str>,
) -> AppState {
    if let Some(warning) = capacity_warning(&state, site_id, date) {
        tracing::info!(site_id, %date, "{warning}; request recorded anyway");
    }

    let request = new_request(student_id, site_id, date, ScheduleStatus::Requested, notes, None);
    state.push_audit(audit_event(
        "request",
        "scheduleRequest",
        &request.id,
        student_id,
        Some(&format!("{site_id} on {date}")),
    ));
    state.schedule_requests.push(request);
    state
}

/// Approves or rejects a pending request. Capacity is not checked here; callers confirm
/// over-capacity approvals beforehand.
pub fn decide_request(
    mut state: AppState,
    request_id: &str,
    decision: Decision,
    approver_id: &str,
) -> Result<AppState, DomainError> {
    let request = state
        .schedule_requests
        .iter_mut()
        .find(|r| r.id == request_id)
        .ok_or_else(|| DomainError::not_found("schedule request", request_id))?;

    if request.status != ScheduleStatus::Requested {
        return Err(DomainError::IllegalTransition {
            kind: "schedule request",
            id: request_id.to_string(),
            from: request.status.to_string(),
            to: decision.schedule_status().to_string(),
        });
    }

    request.status = decision.schedule_status();
    request.decided_by = Some(approver_id.to_string());
    request.updated_at = Utc::now();
    let (student_id, site_id, date) = (
        request.student_id.clone(),
        request.site_id.clone(),
        request.date,
    );

    let approver = state.profile_name(approver_id).to_string();
    let site = state.site_name(&site_id).to_string();
    let note = notification(
        &student_id,
        &format!("Schedule request {decision}"),
        &format!("{approver} {decision} your request for {site} on {date}"),
        decision.notification_type(),
        Some(SCHEDULE_LINK),
    );
    state.push_notification(note);
    state.push_audit(audit_event(
        decision.as_str(),
        "scheduleRequest",
        request_id,
        approver_id,
        None,
    ));
    Ok(state)
}

/// Places a student directly, skipping the request step.
pub fn assign_student(
    mut state: AppState,
    student_id: &str,
    site_id: &str,
    date: NaiveDate,
    assigner_id: &str,
    notes: Option<&str>,
) -> AppState {
    if let Some(warning) = capacity_warning(&state, site_id, date) {
        tracing::info!(site_id, %date, "{warning}; assignment recorded anyway");
    }

    let request = new_request(
        student_id,
        site_id,
        date,
        ScheduleStatus::Approved,
        notes,
        Some(assigner_id),
    );

    let assigner = state.profile_name(assigner_id).to_string();
    let site = state.site_name(site_id).to_string();
    let note = notification(
        student_id,
        "New clinical assignment",
        &format!("{assigner} assigned you to {site} on {date}"),
        NotificationType::Info,
        Some(SCHEDULE_LINK),
    );
    state.push_notification(note);
    state.push_audit(audit_event(
        "assign",
        "scheduleRequest",
        &request.id,
        assigner_id,
        Some(&format!("{student_id} to {site_id} on {date}")),
    ));
    state.schedule_requests.push(request);
    state
}

/// Sets the capacity for a site and date, replacing any earlier figure for that pair.
pub fn set_capacity(
    mut state: AppState,
    site_id: &str,
    date: NaiveDate,
    capacity_count: u32,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    if state.site(site_id).is_none() {
        return Err(DomainError::not_found("site", site_id));
    }

    let (action, id) = match state
        .capacities
        .iter_mut()
        .find(|c| c.site_id == site_id && c.date == date)
    {
        Some(existing) => {
            existing.capacity_count = capacity_count;
            ("update", existing.id.clone())
        }
        None => {
            let id = new_id("cap");
            state.capacities.push(SiteCapacity {
                id: id.clone(),
                site_id: site_id.to_string(),
                date,
                capacity_count,
            });
            ("create", id)
        }
    };

    state.push_audit(audit_event(
        action,
        "capacity",
        &id,
        actor_id,
        Some(&format!("{capacity_count} places on {date}")),
    ));
    Ok(state)
}

/// The student's next approved placements from `today` on, soonest first.
pub fn upcoming_for<'a>(
    state: &'a AppState,
    student_id: &str,
    today: NaiveDate,
) -> Vec<&'a ScheduleRequest> {
    let mut upcoming: Vec<_> = state
        .schedule_requests
        .iter()
        .filter(|r| {
            r.student_id == student_id && r.status == ScheduleStatus::Approved && r.date >= today
        })
        .collect();
    upcoming.sort_by_key(|r| r.date);
    upcoming.truncate(UPCOMING_LIMIT);
    upcoming
}

fn new_request(
    student_id: &str,
    site_id: &str,
    date: NaiveDate,
    status: ScheduleStatus,
    notes: Option<&str>,
    decided_by: Option<&str>,
) -> ScheduleRequest {
    let now = Utc::now();
    ScheduleRequest {
        id: new_id("sched"),
        student_id: student_id.to_string(),
        site_id: site_id.to_string(),
        date,
        status,
        notes: notes.map(str::to_string),
        decided_by: decided_by.map(str::to_string),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::default_state;

    const STUDENT: &str = "user-student-1";
    const COORDINATOR: &str = "user-coordinator-1";
    const SITE: &str = "site-city-er";

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn one_place_state() -> AppState {
        let state = default_state();
        set_capacity(state, SITE, d(20), 1, COORDINATOR).unwrap()
    }

    #[test]
    fn capacity_status_reflects_approved_requests_only() {
        let state = one_place_state();
        let state = request_slot(state, STUDENT, SITE, d(20), None);
        assert_eq!(
            capacity_status(&state, SITE, d(20)),
            CapacityStatus { filled: 0, total: Some(1) }
        );

        let state = assign_student(state, "user-student-2", SITE, d(20), COORDINATOR, None);
        let status = capacity_status(&state, SITE, d(20));
        assert_eq!(status.filled, 1);
        assert!(status.is_full());
        assert_eq!(status.remaining(), Some(0));
        assert!(capacity_warning(&state, SITE, d(20)).is_some());
    }

    #[test]
    fn requests_are_recorded_even_at_capacity() {
        let state = assign_student(
            one_place_state(),
            "user-student-2",
            SITE,
            d(20),
            COORDINATOR,
            None,
        );
        let state = request_slot(state, STUDENT, SITE, d(20), Some("Any shift"));

        let last = state.schedule_requests.last().unwrap();
        assert_eq!(last.status, ScheduleStatus::Requested);
        assert_eq!(last.notes.as_deref(), Some("Any shift"));
        assert_eq!(state.schedule_requests.len(), 2);
    }

    #[test]
    fn uncapped_dates_never_warn() {
        let state = assign_student(default_state(), STUDENT, SITE, d(25), COORDINATOR, None);
        assert_eq!(capacity_status(&state, SITE, d(25)).total, None);
        assert!(capacity_warning(&state, SITE, d(25)).is_none());
    }

    #[test]
    fn deciding_a_request_notifies_and_audits() {
        let state = request_slot(default_state(), STUDENT, SITE, d(10), None);
        let id = state.schedule_requests[0].id.clone();
        let state = decide_request(state, &id, Decision::Approved, COORDINATOR).unwrap();

        let request = &state.schedule_requests[0];
        assert_eq!(request.status, ScheduleStatus::Approved);
        assert_eq!(request.decided_by.as_deref(), Some(COORDINATOR));

        let note = state.notifications.last().unwrap();
        assert_eq!(note.user_id, STUDENT);
        assert_eq!(note.notification_type, NotificationType::Approval);
        assert_eq!(
            note.message,
            "Jamie Coordinator approved your request for City General Hospital ER on 2026-03-10"
        );

        let audit = state.audit.last().unwrap();
        assert_eq!(audit.action, "approved");
        assert_eq!(audit.user_id, COORDINATOR);

        let again = decide_request(state, &id, Decision::Rejected, COORDINATOR);
        assert!(matches!(again, Err(DomainError::IllegalTransition { .. })));
    }

    #[test]
    fn assignment_is_approved_immediately() {
        let state = assign_student(
            default_state(),
            STUDENT,
            SITE,
            d(12),
            COORDINATOR,
            Some("Nights"),
        );
        let request = &state.schedule_requests[0];
        assert_eq!(request.status, ScheduleStatus::Approved);
        assert_eq!(request.decided_by.as_deref(), Some(COORDINATOR));
        assert_eq!(state.notifications[0].notification_type, NotificationType::Info);
        assert_eq!(state.audit.last().unwrap().action, "assign");
    }

    #[test]
    fn set_capacity_replaces_existing_date() {
        let state = one_place_state();
        let state = set_capacity(state, SITE, d(20), 3, COORDINATOR).unwrap();
        let matching: Vec<_> = state
            .capacities
            .iter()
            .filter(|c| c.site_id == SITE && c.date == d(20))
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].capacity_count, 3);

        assert!(set_capacity(state, "site-nowhere", d(20), 1, COORDINATOR).is_err());
    }

    #[test]
    fn upcoming_is_sorted_capped_and_future_only() {
        let mut state = default_state();
        for day in [28, 3, 15, 20, 18, 25, 22] {
            state = assign_student(state, STUDENT, SITE, d(day), COORDINATOR, None);
        }
        state = request_slot(state, STUDENT, SITE, d(16), None);

        let upcoming = upcoming_for(&state, STUDENT, d(10));
        let days: Vec<NaiveDate> = upcoming.iter().map(|r| r.date).collect();
        assert_eq!(days, vec![d(15), d(18), d(20), d(22), d(25)]);
    }
}
