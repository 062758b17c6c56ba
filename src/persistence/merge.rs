use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::models::{AppState, Record};

/// Unions two documents collection by collection. Records are keyed by id and
/// `incoming` wins on collision, except audit events, which are only ever appended.
/// Scalar fields come from `current`.
pub fn merge(current: &AppState, incoming: &AppState) -> AppState {
    AppState {
        version: current.version,
        last_saved_at: Utc::now(),
        profiles: merge_by_id(&current.profiles, &incoming.profiles),
        programs: merge_by_id(&current.programs, &incoming.programs),
        cohorts: merge_by_id(&current.cohorts, &incoming.cohorts),
        sites: merge_by_id(&current.sites, &incoming.sites),
        capacities: merge_by_id(&current.capacities, &incoming.capacities),
        requirement_templates: merge_by_id(
            &current.requirement_templates,
            &incoming.requirement_templates,
        ),
        student_progress: merge_by_id(&current.student_progress, &incoming.student_progress),
        shift_logs: merge_by_id(&current.shift_logs, &incoming.shift_logs),
        skill_logs: merge_by_id(&current.skill_logs, &incoming.skill_logs),
        approvals: merge_by_id(&current.approvals, &incoming.approvals),
        schedule_requests: merge_by_id(&current.schedule_requests, &incoming.schedule_requests),
        notifications: merge_by_id(&current.notifications, &incoming.notifications),
        audit: append_new(&current.audit, &incoming.audit),
        evaluation_templates: merge_by_id(
            &current.evaluation_templates,
            &incoming.evaluation_templates,
        ),
        quizzes: merge_by_id(&current.quizzes, &incoming.quizzes),
        quiz_attempts: merge_by_id(&current.quiz_attempts, &incoming.quiz_attempts),
        ce_classes: merge_by_id(&current.ce_classes, &incoming.ce_classes),
        ce_attendances: merge_by_id(&current.ce_attendances, &incoming.ce_attendances),
        active_profile_id: current.active_profile_id.clone(),
        is_logged_in: current.is_logged_in,
        has_seen_onboarding: current.has_seen_onboarding,
    }
}

/// Keeps `current` order, replaces colliding records in place, then appends the rest of
/// `incoming` in its own order.
pub fn merge_by_id<T: Record + Clone>(current: &[T], incoming: &[T]) -> Vec<T> {
    let mut replacements: HashMap<&str, &T> = HashMap::new();
    for record in incoming {
        replacements.insert(record.id(), record);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::with_capacity(current.len() + incoming.len());

    for record in current {
        if !seen.insert(record.id()) {
            continue;
        }
        let chosen = replacements.get(record.id()).copied().unwrap_or(record);
        merged.push(chosen.clone());
    }
    for record in incoming {
        if seen.insert(record.id()) {
            merged.push(replacements[record.id()].clone());
        }
    }

    merged
}

/// `current` untouched, followed by every `incoming` record with an unseen id.
pub fn append_new<T: Record + Clone>(current: &[T], incoming: &[T]) -> Vec<T> {
    let mut seen: HashSet<&str> = current.iter().map(Record::id).collect();
    let mut merged = current.to_vec();
    for record in incoming {
        if seen.insert(record.id()) {
            merged.push(record.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditEvent, Site};
    use crate::seed::default_state;

    fn site(id: &str, name: &str) -> Site {
        Site {
            id: id.to_string(),
            name: name.to_string(),
            address: None,
            notes: None,
        }
    }

    fn audit(id: &str, action: &str) -> AuditEvent {
        AuditEvent {
            id: id.to_string(),
            action: action.to_string(),
            entity_type: "site".to_string(),
            entity_id: "site-a".to_string(),
            user_id: "user-admin-1".to_string(),
            timestamp: Utc::now(),
            details: None,
        }
    }

    #[test]
    fn incoming_wins_on_collision_and_union_keeps_everything() {
        let current = vec![site("a", "Old A"), site("b", "B")];
        let incoming = vec![site("c", "C"), site("a", "New A")];

        let merged = merge_by_id(&current, &incoming);
        let names: Vec<&str> = merged.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["New A", "B", "C"]);
    }

    #[test]
    fn merging_twice_does_not_duplicate() {
        let current = vec![site("a", "A")];
        let incoming = vec![site("a", "A2"), site("b", "B")];
        let once = merge_by_id(&current, &incoming);
        let twice = merge_by_id(&once, &incoming);
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[test]
    fn audit_history_is_never_overwritten() {
        let current = vec![audit("ev-1", "create"), audit("ev-2", "update")];
        let incoming = vec![audit("ev-2", "tampered"), audit("ev-3", "delete")];

        let merged = append_new(&current, &incoming);
        let actions: Vec<&str> = merged.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["create", "update", "delete"]);
    }

    #[test]
    fn scalars_come_from_current() {
        let mut current = default_state();
        current.active_profile_id = Some("user-student-1".to_string());
        current.is_logged_in = true;

        let mut incoming = default_state();
        incoming.active_profile_id = Some("user-admin-1".to_string());
        incoming.has_seen_onboarding = true;
        incoming.sites.push(site("site-new", "New Site"));

        let merged = merge(&current, &incoming);
        assert_eq!(merged.active_profile_id.as_deref(), Some("user-student-1"));
        assert!(merged.is_logged_in);
        assert!(!merged.has_seen_onboarding);
        assert_eq!(merged.sites.len(), current.sites.len() + 1);
        assert_eq!(merged.profiles.len(), current.profiles.len());
        assert!(merged.last_saved_at >= current.last_saved_at);
    }

    #[test]
    fn training_collections_are_merged_by_id() {
        let current = default_state();
        let mut incoming = default_state();
        incoming.quizzes[0].passing_score = 85;
        incoming.evaluation_templates[0].version = 3;
        let mut extra_class = incoming.ce_classes[1].clone();
        extra_class.id = "ce-new".to_string();
        incoming.ce_classes.push(extra_class);

        let merged = merge(&current, &incoming);
        assert_eq!(merged.quizzes.len(), 1);
        assert_eq!(merged.quizzes[0].passing_score, 85);
        assert_eq!(merged.evaluation_templates[0].version, 3);
        assert_eq!(merged.ce_classes.len(), current.ce_classes.len() + 1);
        assert_eq!(merged.ce_classes.last().unwrap().id, "ce-new");
    }
}
