//! Program configuration: programs, cohorts, sites, requirement templates, profiles and
//! dated site capacities. Every change leaves an audit event behind.

use crate::error::DomainError;
use crate::models::{
    AppState, Cohort, Program, Record, RequirementTemplate, Site, SiteCapacity, UserProfile,
};
use crate::store::audit_event;

/// Inserts `record`, or replaces the record sharing its id in place.
fn upsert_in<T, F>(
    mut state: AppState,
    record: T,
    entity_type: &str,
    actor_id: &str,
    collection: F,
) -> AppState
where
    T: Record,
    F: Fn(&mut AppState) -> &mut Vec<T>,
{
    let id = record.id().to_string();
    let records = collection(&mut state);
    let action = match records.iter_mut().find(|r| r.id() == id) {
        Some(existing) => {
            *existing = record;
            "update"
        }
        None => {
            records.push(record);
            "create"
        }
    };
    state.push_audit(audit_event(action, entity_type, &id, actor_id, None));
    state
}

fn delete_in<T, F>(
    mut state: AppState,
    id: &str,
    kind: &'static str,
    entity_type: &str,
    actor_id: &str,
    collection: F,
) -> Result<AppState, DomainError>
where
    T: Record,
    F: Fn(&mut AppState) -> &mut Vec<T>,
{
    let records = collection(&mut state);
    let before = records.len();
    records.retain(|r| r.id() != id);
    if records.len() == before {
        return Err(DomainError::not_found(kind, id));
    }
    state.push_audit(audit_event("delete", entity_type, id, actor_id, None));
    Ok(state)
}

pub fn upsert_program(state: AppState, program: Program, actor_id: &str) -> AppState {
    upsert_in(state, program, "program", actor_id, |s| &mut s.programs)
}

pub fn delete_program(state: AppState, id: &str, actor_id: &str) -> Result<AppState, DomainError> {
    delete_in(state, id, "program", "program", actor_id, |s| &mut s.programs)
}

pub fn upsert_cohort(state: AppState, cohort: Cohort, actor_id: &str) -> AppState {
    upsert_in(state, cohort, "cohort", actor_id, |s| &mut s.cohorts)
}

pub fn delete_cohort(state: AppState, id: &str, actor_id: &str) -> Result<AppState, DomainError> {
    delete_in(state, id, "cohort", "cohort", actor_id, |s| &mut s.cohorts)
}

pub fn upsert_site(state: AppState, site: Site, actor_id: &str) -> AppState {
    upsert_in(state, site, "site", actor_id, |s| &mut s.sites)
}

pub fn delete_site(state: AppState, id: &str, actor_id: &str) -> Result<AppState, DomainError> {
    delete_in(state, id, "site", "site", actor_id, |s| &mut s.sites)
}

pub fn upsert_template(state: AppState, template: RequirementTemplate, actor_id: &str) -> AppState {
    upsert_in(state, template, "requirementTemplate", actor_id, |s| {
        &mut s.requirement_templates
    })
}

pub fn delete_template(state: AppState, id: &str, actor_id: &str) -> Result<AppState, DomainError> {
    delete_in(
        state,
        id,
        "requirement template",
        "requirementTemplate",
        actor_id,
        |s| &mut s.requirement_templates,
    )
}

pub fn upsert_profile(state: AppState, profile: UserProfile, actor_id: &str) -> AppState {
    upsert_in(state, profile, "profile", actor_id, |s| &mut s.profiles)
}

/// Removes a profile. Logs out first if it was the active one.
pub fn delete_profile(state: AppState, id: &str, actor_id: &str) -> Result<AppState, DomainError> {
    let mut state = delete_in(state, id, "profile", "profile", actor_id, |s| &mut s.profiles)?;
    if state.active_profile_id.as_deref() == Some(id) {
        state.active_profile_id = None;
        state.is_logged_in = false;
    }
    Ok(state)
}

pub fn upsert_capacity(state: AppState, capacity: SiteCapacity, actor_id: &str) -> AppState {
    upsert_in(state, capacity, "capacity", actor_id, |s| &mut s.capacities)
}
