use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every persisted document.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Anything stored in an `AppState` collection.
pub trait Record {
    fn id(&self) -> &str;
}

macro_rules! impl_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Record for $ty {
                fn id(&self) -> &str {
                    &self.id
                }
            }
        )+
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Preceptor,
    Instructor,
    Coordinator,
    ProgramAdmin,
}

impl Role {
    /// Roles offered the approval queue. Advisory only.
    pub fn is_reviewer(self) -> bool {
        !matches!(self, Role::Student)
    }

    /// Roles offered direct schedule assignment. Advisory only.
    pub fn can_assign(self) -> bool {
        matches!(
            self,
            Role::Instructor | Role::Coordinator | Role::ProgramAdmin
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Submitted,
    Approved,
    Rejected,
}

impl LogStatus {
    pub fn allowed_transitions(self) -> &'static [LogStatus] {
        use LogStatus::*;
        match self {
            Pending => &[Submitted],
            Submitted => &[Approved, Rejected],
            Rejected => &[Submitted],
            Approved => &[],
        }
    }

    pub fn can_transition_to(self, next: LogStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Logs the student may still change.
    pub fn is_editable(self) -> bool {
        matches!(self, LogStatus::Pending | LogStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Submitted => "submitted",
            LogStatus::Approved => "approved",
            LogStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer's verdict on a submitted log or a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }

    pub fn log_status(self) -> LogStatus {
        match self {
            Decision::Approved => LogStatus::Approved,
            Decision::Rejected => LogStatus::Rejected,
        }
    }

    pub fn schedule_status(self) -> ScheduleStatus {
        match self {
            Decision::Approved => ScheduleStatus::Approved,
            Decision::Rejected => ScheduleStatus::Rejected,
        }
    }

    pub fn notification_type(self) -> NotificationType {
        match self {
            Decision::Approved => NotificationType::Approval,
            Decision::Rejected => NotificationType::Rejection,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Requested,
    Approved,
    Rejected,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScheduleStatus::Requested => "requested",
            ScheduleStatus::Approved => "approved",
            ScheduleStatus::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequirementCategory {
    Skills,
    Hours,
    Documents,
    Evaluations,
}

impl RequirementCategory {
    /// Categories whose progress is a persisted counter rather than derived from logs.
    pub fn takes_evidence(self) -> bool {
        matches!(
            self,
            RequirementCategory::Documents | RequirementCategory::Evaluations
        )
    }
}

impl fmt::Display for RequirementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequirementCategory::Skills => "Skills",
            RequirementCategory::Hours => "Hours",
            RequirementCategory::Documents => "Documents",
            RequirementCategory::Evaluations => "Evaluations",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillOutcome {
    Success,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillMode {
    Assisted,
    Independent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Approval,
    Rejection,
    Reminder,
    Info,
}

/// The kind of log an approval refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Shift,
    Skill,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Shift => "shift",
            LogKind::Skill => "skill",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LogKind::Shift => "shift log",
            LogKind::Skill => "skill log",
        }
    }

    pub fn link(self) -> &'static str {
        match self {
            LogKind::Shift => "/shift-hours",
            LogKind::Skill => "/skills",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cohort {
    pub id: String,
    pub program_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Advisory number of approved placements a site takes on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteCapacity {
    pub id: String,
    pub site_id: String,
    pub date: NaiveDate,
    pub capacity_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementTemplate {
    pub id: String,
    pub program_id: String,
    pub name: String,
    pub category: RequirementCategory,
    pub target_count: u32,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RequirementTemplate {
    /// Hours templates measured in clock hours rather than shift count.
    pub fn counts_clock_hours(&self) -> bool {
        self.category == RequirementCategory::Hours && self.unit.eq_ignore_ascii_case("hours")
    }
}

/// Persisted counter for a Documents or Evaluations template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRequirementProgress {
    pub id: String,
    pub student_id: String,
    pub template_id: String,
    pub current_count: u32,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftLog {
    pub id: String,
    pub student_id: String,
    pub date: NaiveDate,
    #[serde(with = "clock_time")]
    pub start_time: NaiveTime,
    #[serde(with = "clock_time")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub break_minutes: u32,
    pub computed_hours: f64,
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preceptor_id: Option<String>,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "noPHI")]
    pub no_phi: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillLog {
    pub id: String,
    pub student_id: String,
    pub skill_name: String,
    pub skill_type: String,
    pub outcome: SkillOutcome,
    pub mode: SkillMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_log_id: Option<String>,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "noPHI")]
    pub no_phi: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of one reviewer decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: String,
    pub entity_type: LogKind,
    pub entity_id: String,
    pub reviewer_id: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub id: String,
    pub student_id: String,
    pub site_id: String,
    pub date: NaiveDate,
    pub status: ScheduleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationFieldType {
    Text,
    Textarea,
    Rating,
    Select,
    Checkbox,
    Number,
}

impl EvaluationFieldType {
    /// Types answered on a numeric scale.
    pub fn is_scaled(self) -> bool {
        matches!(self, EvaluationFieldType::Rating | EvaluationFieldType::Number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: EvaluationFieldType,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i32>,
}

/// A preceptor evaluation form. Every edit bumps `version`; retired forms stay in the
/// document with `is_active` cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationTemplate {
    pub id: String,
    pub program_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: u32,
    pub fields: Vec<EvaluationField>,
    #[serde(default)]
    pub preceptor_identification: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    MultiSelect,
    TrueFalse,
    FillBlank,
    Matching,
}

/// A single choice or, for multi-select questions, a set of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    One(String),
    Many(Vec<String>),
}

impl Answer {
    pub fn choices(&self) -> &[String] {
        match self {
            Answer::One(choice) => std::slice::from_ref(choice),
            Answer::Many(choices) => choices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub correct_answer: Answer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    /// Percentage needed to pass, 0 to 100.
    pub passing_score: u32,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
    #[serde(default)]
    pub allow_retakes: bool,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub shuffle_options: bool,
    pub questions: Vec<QuizQuestion>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: String,
    pub quiz_id: String,
    pub student_id: String,
    /// Keyed by question id.
    #[serde(default)]
    pub answers: BTreeMap<String, Answer>,
    pub score: u32,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A continuing-education session. A linked quiz must be passed before credit is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CeClass {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    pub ce_hours: f64,
    pub instructor: String,
    pub date: NaiveDate,
    /// Minutes.
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CeAttendance {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub attended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_passed: Option<bool>,
    pub certificate_number: String,
    pub verification_code: String,
}

impl_record!(
    UserProfile,
    Program,
    Cohort,
    Site,
    SiteCapacity,
    RequirementTemplate,
    StudentRequirementProgress,
    ShiftLog,
    SkillLog,
    Approval,
    ScheduleRequest,
    Notification,
    AuditEvent,
    EvaluationTemplate,
    Quiz,
    QuizAttempt,
    CeClass,
    CeAttendance,
);

/// The single document holding everything the application knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub version: u32,
    pub last_saved_at: DateTime<Utc>,
    #[serde(default)]
    pub profiles: Vec<UserProfile>,
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub cohorts: Vec<Cohort>,
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub capacities: Vec<SiteCapacity>,
    #[serde(default)]
    pub requirement_templates: Vec<RequirementTemplate>,
    #[serde(default)]
    pub student_progress: Vec<StudentRequirementProgress>,
    #[serde(default)]
    pub shift_logs: Vec<ShiftLog>,
    #[serde(default)]
    pub skill_logs: Vec<SkillLog>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    #[serde(default)]
    pub schedule_requests: Vec<ScheduleRequest>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub audit: Vec<AuditEvent>,
    #[serde(default)]
    pub evaluation_templates: Vec<EvaluationTemplate>,
    #[serde(default)]
    pub quizzes: Vec<Quiz>,
    #[serde(default)]
    pub quiz_attempts: Vec<QuizAttempt>,
    #[serde(default)]
    pub ce_classes: Vec<CeClass>,
    #[serde(default)]
    pub ce_attendances: Vec<CeAttendance>,
    #[serde(default)]
    pub active_profile_id: Option<String>,
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub has_seen_onboarding: bool,
}

impl AppState {
    pub fn profile(&self, id: &str) -> Option<&UserProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn active_profile(&self) -> Option<&UserProfile> {
        self.active_profile_id
            .as_deref()
            .and_then(|id| self.profile(id))
    }

    pub fn site(&self, id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == id)
    }

    pub fn template(&self, id: &str) -> Option<&RequirementTemplate> {
        self.requirement_templates.iter().find(|t| t.id == id)
    }

    pub fn quiz(&self, id: &str) -> Option<&Quiz> {
        self.quizzes.iter().find(|q| q.id == id)
    }

    pub fn ce_class(&self, id: &str) -> Option<&CeClass> {
        self.ce_classes.iter().find(|c| c.id == id)
    }

    pub fn templates_for_program(&self, program_id: &str) -> Vec<&RequirementTemplate> {
        self.requirement_templates
            .iter()
            .filter(|t| t.program_id == program_id)
            .collect()
    }

    /// Display name for a profile id, falling back to the id itself.
    pub fn profile_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.profile(id).map(|p| p.name.as_str()).unwrap_or(id)
    }

    pub fn site_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.site(id).map(|s| s.name.as_str()).unwrap_or(id)
    }

    pub fn push_audit(&mut self, event: AuditEvent) {
        self.audit.push(event);
    }

    pub fn push_notification(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }
}

/// `HH:MM` clock times, accepting a trailing `:SS` on input.
pub mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
    }
}
