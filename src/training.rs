//! Preceptor evaluation forms, quizzes and continuing-education credit.
//!
//! Like the log workflows, every update takes the document by value and returns the next
//! one with an audit event appended.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::DomainError;
use crate::ids::{certificate_number, new_id, verification_code};
use crate::models::{
    Answer, AppState, CeAttendance, CeClass, EvaluationField, EvaluationFieldType,
    EvaluationTemplate, NotificationType, QuestionType, Quiz, QuizAttempt, QuizQuestion,
};
use crate::store::{audit_event, notification};

const DEFAULT_SCALE: (i32, i32) = (1, 5);
const DEFAULT_PASSING_SCORE: u32 = 70;
const TRAINING_LINK: &str = "/quizzes";

fn trimmed(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

// Evaluation templates

/// Form input for an evaluation template.
#[derive(Debug, Clone)]
pub struct EvaluationDraft {
    pub program_id: String,
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<EvaluationField>,
    pub preceptor_identification: bool,
}

impl EvaluationDraft {
    fn validated(self) -> Result<Self, DomainError> {
        const KIND: &str = "evaluation template";
        if self.name.trim().is_empty() {
            return Err(DomainError::incomplete(KIND, "a name"));
        }
        if self.program_id.trim().is_empty() {
            return Err(DomainError::incomplete(KIND, "a program"));
        }
        if self.fields.is_empty() {
            return Err(DomainError::incomplete(KIND, "at least one field"));
        }
        if self.fields.iter().any(|f| f.label.trim().is_empty()) {
            return Err(DomainError::incomplete(KIND, "a label on every field"));
        }

        Ok(EvaluationDraft {
            name: self.name.trim().to_string(),
            description: trimmed(self.description),
            fields: self.fields.into_iter().map(normalize_field).collect(),
            ..self
        })
    }
}

/// Drops settings that do not apply to the field's type and fills in a 1 to 5 scale.
fn normalize_field(mut field: EvaluationField) -> EvaluationField {
    if field.id.is_empty() {
        field.id = new_id("field");
    }
    field.label = field.label.trim().to_string();

    field.options = match field.field_type {
        EvaluationFieldType::Select => field.options.map(|options| {
            options
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect()
        }),
        _ => None,
    };

    if field.field_type.is_scaled() {
        field.min_value.get_or_insert(DEFAULT_SCALE.0);
        field.max_value.get_or_insert(DEFAULT_SCALE.1);
    } else {
        field.min_value = None;
        field.max_value = None;
    }
    field
}

fn active_template_mut<'a>(
    state: &'a mut AppState,
    id: &str,
) -> Result<&'a mut EvaluationTemplate, DomainError> {
    let template = state
        .evaluation_templates
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| DomainError::not_found("evaluation template", id))?;
    if !template.is_active {
        return Err(DomainError::inactive("evaluation template", id));
    }
    Ok(template)
}

pub fn create_evaluation_template(
    mut state: AppState,
    draft: EvaluationDraft,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let draft = draft.validated()?;
    let now = Utc::now();
    let template = EvaluationTemplate {
        id: new_id("eval-tmpl"),
        program_id: draft.program_id,
        name: draft.name,
        description: draft.description,
        version: 1,
        fields: draft.fields,
        preceptor_identification: draft.preceptor_identification,
        created_at: now,
        updated_at: now,
        created_by: actor_id.to_string(),
        is_active: true,
    };
    state.push_audit(audit_event(
        "create",
        "evaluationTemplate",
        &template.id,
        actor_id,
        Some(&template.name),
    ));
    state.evaluation_templates.push(template);
    Ok(state)
}

/// Replaces an active template's content and bumps its version.
pub fn update_evaluation_template(
    mut state: AppState,
    id: &str,
    draft: EvaluationDraft,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let draft = draft.validated()?;
    let template = active_template_mut(&mut state, id)?;
    template.program_id = draft.program_id;
    template.name = draft.name;
    template.description = draft.description;
    template.fields = draft.fields;
    template.preceptor_identification = draft.preceptor_identification;
    template.version += 1;
    template.updated_at = Utc::now();
    let details = format!("version {}", template.version);

    state.push_audit(audit_event(
        "update",
        "evaluationTemplate",
        id,
        actor_id,
        Some(&details),
    ));
    Ok(state)
}

/// Retires a template. It stays in the document for existing evaluations to refer to.
pub fn deactivate_evaluation_template(
    mut state: AppState,
    id: &str,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let template = active_template_mut(&mut state, id)?;
    template.is_active = false;
    template.updated_at = Utc::now();
    state.push_audit(audit_event(
        "deactivate",
        "evaluationTemplate",
        id,
        actor_id,
        None,
    ));
    Ok(state)
}

/// Copies a template under a new id, starting again at version 1.
pub fn duplicate_evaluation_template(
    mut state: AppState,
    id: &str,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let source = state
        .evaluation_templates
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| DomainError::not_found("evaluation template", id))?;
    let now = Utc::now();
    let copy = EvaluationTemplate {
        id: new_id("eval-tmpl"),
        name: format!("{} (Copy)", source.name),
        version: 1,
        created_at: now,
        updated_at: now,
        created_by: actor_id.to_string(),
        is_active: true,
        ..source.clone()
    };
    state.push_audit(audit_event(
        "duplicate",
        "evaluationTemplate",
        &copy.id,
        actor_id,
        Some(id),
    ));
    state.evaluation_templates.push(copy);
    Ok(state)
}

/// Active templates, most recently changed first, optionally for one program.
pub fn active_evaluation_templates<'a>(
    state: &'a AppState,
    program_id: Option<&str>,
) -> Vec<&'a EvaluationTemplate> {
    let mut templates: Vec<&EvaluationTemplate> = state
        .evaluation_templates
        .iter()
        .filter(|t| t.is_active)
        .filter(|t| program_id.map_or(true, |id| t.program_id == id))
        .collect();
    templates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    templates
}

// Quizzes

/// Form input for a quiz.
#[derive(Debug, Clone)]
pub struct QuizDraft {
    pub title: String,
    pub description: Option<String>,
    pub program_id: Option<String>,
    pub passing_score: u32,
    pub time_limit: Option<u32>,
    pub allow_retakes: bool,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub questions: Vec<QuizQuestion>,
}

impl QuizDraft {
    /// A draft with the usual defaults: 70% to pass, retakes allowed, shuffling on.
    pub fn new(title: impl Into<String>, questions: Vec<QuizQuestion>) -> Self {
        QuizDraft {
            title: title.into(),
            description: None,
            program_id: None,
            passing_score: DEFAULT_PASSING_SCORE,
            time_limit: None,
            allow_retakes: true,
            shuffle_questions: true,
            shuffle_options: true,
            questions,
        }
    }

    fn validated(self) -> Result<Self, DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::incomplete("quiz", "a title"));
        }
        if self.questions.is_empty() {
            return Err(DomainError::incomplete("quiz", "at least one question"));
        }
        if self.questions.iter().any(|q| q.text.trim().is_empty()) {
            return Err(DomainError::incomplete("quiz", "text on every question"));
        }
        if self.passing_score > 100 {
            return Err(DomainError::InvalidPassingScore(self.passing_score));
        }

        Ok(QuizDraft {
            title: self.title.trim().to_string(),
            description: trimmed(self.description),
            program_id: self.program_id.filter(|id| !id.is_empty()),
            time_limit: self.time_limit.filter(|minutes| *minutes > 0),
            questions: self.questions.into_iter().map(normalize_question).collect(),
            ..self
        })
    }
}

fn normalize_question(mut question: QuizQuestion) -> QuizQuestion {
    if question.id.is_empty() {
        question.id = new_id("q");
    }
    question.text = question.text.trim().to_string();
    match question.question_type {
        QuestionType::TrueFalse => {
            question.options = Some(vec!["True".to_string(), "False".to_string()]);
        }
        QuestionType::FillBlank => question.options = None,
        _ => {}
    }
    question
}

fn active_quiz_mut<'a>(state: &'a mut AppState, id: &str) -> Result<&'a mut Quiz, DomainError> {
    let quiz = state
        .quizzes
        .iter_mut()
        .find(|q| q.id == id)
        .ok_or_else(|| DomainError::not_found("quiz", id))?;
    if !quiz.is_active {
        return Err(DomainError::inactive("quiz", id));
    }
    Ok(quiz)
}

pub fn create_quiz(
    mut state: AppState,
    draft: QuizDraft,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let draft = draft.validated()?;
    let now = Utc::now();
    let quiz = Quiz {
        id: new_id("quiz"),
        title: draft.title,
        description: draft.description,
        program_id: draft.program_id,
        passing_score: draft.passing_score,
        time_limit: draft.time_limit,
        allow_retakes: draft.allow_retakes,
        shuffle_questions: draft.shuffle_questions,
        shuffle_options: draft.shuffle_options,
        questions: draft.questions,
        created_by: actor_id.to_string(),
        created_at: now,
        updated_at: now,
        is_active: true,
    };
    state.push_audit(audit_event("create", "quiz", &quiz.id, actor_id, Some(&quiz.title)));
    state.quizzes.push(quiz);
    Ok(state)
}

/// Rewrites an active quiz. Earlier attempts keep the score they were given.
pub fn update_quiz(
    mut state: AppState,
    id: &str,
    draft: QuizDraft,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let draft = draft.validated()?;
    let quiz = active_quiz_mut(&mut state, id)?;
    quiz.title = draft.title;
    quiz.description = draft.description;
    quiz.program_id = draft.program_id;
    quiz.passing_score = draft.passing_score;
    quiz.time_limit = draft.time_limit;
    quiz.allow_retakes = draft.allow_retakes;
    quiz.shuffle_questions = draft.shuffle_questions;
    quiz.shuffle_options = draft.shuffle_options;
    quiz.questions = draft.questions;
    quiz.updated_at = Utc::now();
    state.push_audit(audit_event("update", "quiz", id, actor_id, None));
    Ok(state)
}

pub fn deactivate_quiz(
    mut state: AppState,
    id: &str,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let quiz = active_quiz_mut(&mut state, id)?;
    quiz.is_active = false;
    quiz.updated_at = Utc::now();
    state.push_audit(audit_event("deactivate", "quiz", id, actor_id, None));
    Ok(state)
}

pub fn duplicate_quiz(
    mut state: AppState,
    id: &str,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let source = state.quiz(id).ok_or_else(|| DomainError::not_found("quiz", id))?;
    let now = Utc::now();
    let copy = Quiz {
        id: new_id("quiz"),
        title: format!("{} (Copy)", source.title),
        created_by: actor_id.to_string(),
        created_at: now,
        updated_at: now,
        is_active: true,
        ..source.clone()
    };
    state.push_audit(audit_event("duplicate", "quiz", &copy.id, actor_id, Some(id)));
    state.quizzes.push(copy);
    Ok(state)
}

/// Active quizzes, most recently changed first.
pub fn active_quizzes(state: &AppState) -> Vec<&Quiz> {
    let mut quizzes: Vec<&Quiz> = state.quizzes.iter().filter(|q| q.is_active).collect();
    quizzes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    quizzes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizScore {
    /// Weighted percentage, rounded to the nearest whole number.
    pub score: u32,
    pub passed: bool,
}

/// Multi-select answers must match the expected set exactly, in any order. Every other
/// type compares a single choice verbatim. An unanswered question is wrong.
pub fn is_correct(question: &QuizQuestion, answer: Option<&Answer>) -> bool {
    match question.question_type {
        QuestionType::MultiSelect => {
            let expected = question.correct_answer.choices();
            let given: &[String] = match answer {
                Some(Answer::Many(choices)) => choices,
                _ => &[],
            };
            expected.len() == given.len() && expected.iter().all(|c| given.contains(c))
        }
        _ => matches!(
            (&question.correct_answer, answer),
            (Answer::One(expected), Some(Answer::One(given))) if expected == given
        ),
    }
}

/// Share of question weight answered correctly. A quiz with no weight scores 0.
pub fn score_answers(quiz: &Quiz, answers: &BTreeMap<String, Answer>) -> QuizScore {
    let total: u32 = quiz.questions.iter().map(|q| q.weight).sum();
    let earned: u32 = quiz
        .questions
        .iter()
        .filter(|q| is_correct(q, answers.get(&q.id)))
        .map(|q| q.weight)
        .sum();

    let score = if total == 0 {
        0
    } else {
        (f64::from(earned) / f64::from(total) * 100.0).round() as u32
    };
    QuizScore {
        score,
        passed: score >= quiz.passing_score,
    }
}

/// Scores a completed attempt and stores it.
pub fn submit_attempt(
    mut state: AppState,
    quiz_id: &str,
    student_id: &str,
    answers: BTreeMap<String, Answer>,
    started_at: DateTime<Utc>,
) -> Result<AppState, DomainError> {
    let quiz = state
        .quiz(quiz_id)
        .ok_or_else(|| DomainError::not_found("quiz", quiz_id))?;
    if !quiz.is_active {
        return Err(DomainError::inactive("quiz", quiz_id));
    }
    let completed_before = state
        .quiz_attempts
        .iter()
        .any(|a| a.quiz_id == quiz_id && a.student_id == student_id && a.completed_at.is_some());
    if completed_before && !quiz.allow_retakes {
        return Err(DomainError::RetakeNotAllowed(quiz_id.to_string()));
    }

    let QuizScore { score, passed } = score_answers(quiz, &answers);
    let attempt = QuizAttempt {
        id: new_id("attempt"),
        quiz_id: quiz_id.to_string(),
        student_id: student_id.to_string(),
        answers,
        score,
        passed,
        started_at,
        completed_at: Some(Utc::now()),
    };

    let outcome = if passed { "passed" } else { "failed" };
    tracing::debug!(quiz_id, student_id, score, outcome, "quiz attempt scored");
    state.push_audit(audit_event(
        "complete",
        "quizAttempt",
        &attempt.id,
        student_id,
        Some(&format!("{score}% {outcome}")),
    ));
    state.quiz_attempts.push(attempt);
    Ok(state)
}

/// The student's highest-scoring attempt at a quiz.
pub fn best_attempt<'a>(
    state: &'a AppState,
    student_id: &str,
    quiz_id: &str,
) -> Option<&'a QuizAttempt> {
    state
        .quiz_attempts
        .iter()
        .filter(|a| a.student_id == student_id && a.quiz_id == quiz_id)
        .max_by_key(|a| a.score)
}

pub fn has_passed(state: &AppState, student_id: &str, quiz_id: &str) -> bool {
    state
        .quiz_attempts
        .iter()
        .any(|a| a.student_id == student_id && a.quiz_id == quiz_id && a.passed)
}

// Continuing education

/// Form input for a CE class.
#[derive(Debug, Clone)]
pub struct CeClassDraft {
    pub title: String,
    pub description: Option<String>,
    pub program_id: Option<String>,
    pub ce_hours: f64,
    pub instructor: String,
    pub date: NaiveDate,
    /// Minutes.
    pub duration: u32,
    pub quiz_id: Option<String>,
}

impl CeClassDraft {
    fn validated(self, state: &AppState) -> Result<Self, DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::incomplete("CE class", "a title"));
        }
        if self.instructor.trim().is_empty() {
            return Err(DomainError::incomplete("CE class", "an instructor"));
        }
        if self.ce_hours <= 0.0 {
            return Err(DomainError::incomplete("CE class", "a positive number of CE hours"));
        }
        let quiz_id = self.quiz_id.filter(|id| !id.is_empty());
        if let Some(id) = &quiz_id {
            if state.quiz(id).is_none() {
                return Err(DomainError::not_found("quiz", id.as_str()));
            }
        }

        Ok(CeClassDraft {
            title: self.title.trim().to_string(),
            description: trimmed(self.description),
            program_id: self.program_id.filter(|id| !id.is_empty()),
            instructor: self.instructor.trim().to_string(),
            quiz_id,
            ..self
        })
    }
}

pub fn create_ce_class(
    mut state: AppState,
    draft: CeClassDraft,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let draft = draft.validated(&state)?;
    let class = CeClass {
        id: new_id("ce"),
        title: draft.title,
        description: draft.description,
        program_id: draft.program_id,
        ce_hours: draft.ce_hours,
        instructor: draft.instructor,
        date: draft.date,
        duration: draft.duration,
        quiz_id: draft.quiz_id,
        created_by: actor_id.to_string(),
        created_at: Utc::now(),
        is_active: true,
    };
    state.push_audit(audit_event("create", "ceClass", &class.id, actor_id, Some(&class.title)));
    state.ce_classes.push(class);
    Ok(state)
}

pub fn update_ce_class(
    mut state: AppState,
    id: &str,
    draft: CeClassDraft,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let draft = draft.validated(&state)?;
    let class = state
        .ce_classes
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| DomainError::not_found("CE class", id))?;
    if !class.is_active {
        return Err(DomainError::inactive("CE class", id));
    }
    class.title = draft.title;
    class.description = draft.description;
    class.program_id = draft.program_id;
    class.ce_hours = draft.ce_hours;
    class.instructor = draft.instructor;
    class.date = draft.date;
    class.duration = draft.duration;
    class.quiz_id = draft.quiz_id;
    state.push_audit(audit_event("update", "ceClass", id, actor_id, None));
    Ok(state)
}

pub fn deactivate_ce_class(
    mut state: AppState,
    id: &str,
    actor_id: &str,
) -> Result<AppState, DomainError> {
    let class = state
        .ce_classes
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| DomainError::not_found("CE class", id))?;
    if !class.is_active {
        return Err(DomainError::inactive("CE class", id));
    }
    class.is_active = false;
    state.push_audit(audit_event("deactivate", "ceClass", id, actor_id, None));
    Ok(state)
}

/// Active classes, latest date first.
pub fn active_ce_classes(state: &AppState) -> Vec<&CeClass> {
    let mut classes: Vec<&CeClass> = state.ce_classes.iter().filter(|c| c.is_active).collect();
    classes.sort_by(|a, b| b.date.cmp(&a.date));
    classes
}

/// Grants CE credit once per student and class. A class with a linked quiz requires a
/// passing attempt first.
pub fn record_ce_attendance(
    mut state: AppState,
    class_id: &str,
    student_id: &str,
) -> Result<AppState, DomainError> {
    let class = state
        .ce_class(class_id)
        .ok_or_else(|| DomainError::not_found("CE class", class_id))?;
    if !class.is_active {
        return Err(DomainError::inactive("CE class", class_id));
    }
    if state
        .ce_attendances
        .iter()
        .any(|a| a.class_id == class_id && a.student_id == student_id)
    {
        return Err(DomainError::AlreadyAttended {
            class: class_id.to_string(),
            student: student_id.to_string(),
        });
    }
    if let Some(quiz_id) = &class.quiz_id {
        if !has_passed(&state, student_id, quiz_id) {
            return Err(DomainError::QuizNotPassed(quiz_id.clone()));
        }
    }

    let message = format!("{} ({:.1} CE hours)", class.title, class.ce_hours);
    let attendance = CeAttendance {
        id: new_id("cea"),
        class_id: class_id.to_string(),
        student_id: student_id.to_string(),
        attended_at: Utc::now(),
        quiz_passed: class.quiz_id.as_ref().map(|_| true),
        certificate_number: certificate_number(),
        verification_code: verification_code(),
    };

    state.push_audit(audit_event(
        "attend",
        "ceAttendance",
        &attendance.id,
        student_id,
        Some(&attendance.certificate_number),
    ));
    state.push_notification(notification(
        student_id,
        "CE credit recorded",
        &format!("{message}. Certificate {}", attendance.certificate_number),
        NotificationType::Info,
        Some(TRAINING_LINK),
    ));
    state.ce_attendances.push(attendance);
    Ok(state)
}

/// CE hours earned across every recorded attendance.
pub fn ce_hours_for(state: &AppState, student_id: &str) -> f64 {
    state
        .ce_attendances
        .iter()
        .filter(|a| a.student_id == student_id)
        .filter_map(|a| state.ce_class(&a.class_id))
        .map(|c| c.ce_hours)
        .sum()
}
