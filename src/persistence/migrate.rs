//! Schema upgrades for stored documents.
//!
//! Every step is a pure `Value -> Value` function that lifts a document by exactly one
//! version. [`migrate`] runs them in order until the document reaches
//! [`CURRENT_SCHEMA_VERSION`] and then deserializes it.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::error::MigrationError;
use crate::models::{AppState, CURRENT_SCHEMA_VERSION};

type Step = fn(Value) -> Result<Value, MigrationError>;

/// `(from_version, step)` pairs; each step produces `from_version + 1`.
const STEPS: &[(u32, Step)] = &[(1, legacy_to_v2)];

/// Version a raw document claims. Anything carrying a `profiles` array is current-shape
/// whatever its version says; the first release wrote `users` and a semver string instead.
pub fn detect_version(raw: &Value) -> Result<u32, MigrationError> {
    let version = raw
        .get("version")
        .filter(|v| is_truthy(v))
        .ok_or(MigrationError::Unversioned)?;
    let claimed = version.as_u64().and_then(|v| u32::try_from(v).ok());

    if raw.get("profiles").is_some_and(Value::is_array) {
        return Ok(match claimed {
            Some(v) if v > CURRENT_SCHEMA_VERSION => v,
            _ => CURRENT_SCHEMA_VERSION,
        });
    }
    if raw.get("users").is_some() {
        return Ok(1);
    }
    Ok(claimed.unwrap_or(1))
}

/// JavaScript-style truthiness, as the backup shape check has always applied it.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn migrate(mut raw: Value) -> Result<AppState, MigrationError> {
    let mut version = detect_version(&raw)?;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(MigrationError::Unsupported(version));
    }

    while version < CURRENT_SCHEMA_VERSION {
        let step = STEPS
            .iter()
            .find(|(from, _)| *from == version)
            .map(|(_, step)| *step)
            .ok_or(MigrationError::Unsupported(version))?;
        raw = step(raw)?;
        tracing::info!(from = version, to = version + 1, "migrated stored document");
        version += 1;
    }

    if !raw.get("profiles").is_some_and(Value::is_array) {
        return Err(MigrationError::MissingCollection("profiles"));
    }
    if let Some(obj) = raw.as_object_mut() {
        obj.insert("version".to_string(), json!(CURRENT_SCHEMA_VERSION));
        obj.entry("lastSavedAt").or_insert_with(|| json!(now_string()));
    }

    Ok(serde_json::from_value(raw)?)
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn array<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    obj.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn text(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required(value: &Value, key: &str, what: &str) -> Result<String, MigrationError> {
    text(value, key).ok_or_else(|| MigrationError::Malformed(format!("{what} without {key}")))
}

/// Lifts the first-release document (`users`, `skills`, `requirements`, `shiftHours`,
/// counter-carrying `sites`) into the version 2 layout.
fn legacy_to_v2(raw: Value) -> Result<Value, MigrationError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| MigrationError::Malformed("document is not an object".to_string()))?;
    if !obj.contains_key("users") {
        return Err(MigrationError::MissingCollection("users"));
    }
    let now = now_string();

    let profiles = array(obj, "users")
        .iter()
        .map(|user| {
            let role = match user.get("role").and_then(Value::as_str) {
                Some("Admin") => "ProgramAdmin".to_string(),
                Some(other) => other.to_string(),
                None => "Student".to_string(),
            };
            Ok(json!({
                "id": required(user, "id", "user")?,
                "name": text(user, "name").unwrap_or_default(),
                "email": text(user, "email").unwrap_or_default(),
                "role": role,
            }))
        })
        .collect::<Result<Vec<_>, MigrationError>>()?;

    let sites = array(obj, "sites")
        .iter()
        .map(|site| {
            Ok(json!({
                "id": required(site, "id", "site")?,
                "name": text(site, "name").unwrap_or_default(),
            }))
        })
        .collect::<Result<Vec<_>, MigrationError>>()?;

    let shift_logs = array(obj, "shiftHours")
        .iter()
        .map(|shift| {
            let stamp = text(shift, "submittedDate").unwrap_or_else(|| now.clone());
            let mut log = json!({
                "id": required(shift, "id", "shift")?,
                "studentId": required(shift, "studentId", "shift")?,
                "date": required(shift, "date", "shift")?,
                "startTime": required(shift, "startTime", "shift")?,
                "endTime": required(shift, "endTime", "shift")?,
                "breakMinutes": 0,
                "computedHours": shift.get("hours").and_then(Value::as_f64).unwrap_or(0.0).max(0.0),
                "siteId": required(shift, "siteId", "shift")?,
                "status": text(shift, "status").unwrap_or_else(|| "pending".to_string()),
                "noPHI": shift.get("noPHI").and_then(Value::as_bool).unwrap_or(false),
                "createdAt": stamp,
                "updatedAt": stamp,
            });
            copy_optional(shift, &mut log, &["preceptorId", "notes"]);
            Ok(log)
        })
        .collect::<Result<Vec<_>, MigrationError>>()?;

    let skills = array(obj, "skills");
    let skill_logs = array(obj, "requirements")
        .iter()
        .map(|req| {
            let skill_id = required(req, "skillId", "requirement")?;
            let skill = skills
                .iter()
                .find(|s| s.get("id").and_then(Value::as_str) == Some(skill_id.as_str()));
            let skill_name = skill
                .and_then(|s| text(s, "name"))
                .unwrap_or_else(|| skill_id.clone());
            let skill_type = skill
                .and_then(|s| text(s, "category"))
                .unwrap_or_else(|| "Skills".to_string());
            let created = text(req, "submittedDate").unwrap_or_else(|| now.clone());
            let updated = text(req, "approvedDate").unwrap_or_else(|| created.clone());
            let mut log = json!({
                "id": required(req, "id", "requirement")?,
                "studentId": required(req, "studentId", "requirement")?,
                "skillName": skill_name,
                "skillType": skill_type,
                "outcome": "success",
                "mode": "independent",
                "status": text(req, "status").unwrap_or_else(|| "pending".to_string()),
                "noPHI": req.get("noPHI").and_then(Value::as_bool).unwrap_or(false),
                "createdAt": created,
                "updatedAt": updated,
            });
            copy_optional(req, &mut log, &["notes"]);
            Ok(log)
        })
        .collect::<Result<Vec<_>, MigrationError>>()?;

    let active_profile_id = text(&raw, "currentUserId");

    Ok(json!({
        "version": 2,
        "lastSavedAt": now,
        "profiles": profiles,
        "programs": [],
        "cohorts": [],
        "sites": sites,
        "capacities": [],
        "requirementTemplates": [],
        "studentProgress": [],
        "shiftLogs": shift_logs,
        "skillLogs": skill_logs,
        "approvals": [],
        "scheduleRequests": [],
        "notifications": [],
        "audit": [],
        "activeProfileId": active_profile_id,
        "isLoggedIn": false,
        "hasSeenOnboarding": raw.get("hasSeenOnboarding").and_then(Value::as_bool).unwrap_or(false),
    }))
}

fn copy_optional(from: &Value, to: &mut Value, keys: &[&str]) {
    for key in keys {
        if let (Some(value), Some(target)) = (from.get(*key), to.as_object_mut()) {
            if !value.is_null() {
                target.insert((*key).to_string(), value.clone());
            }
        }
    }
}
