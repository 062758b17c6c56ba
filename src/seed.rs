use chrono::{NaiveDate, Utc};

use crate::models::{
    Answer, AppState, CeClass, Cohort, EvaluationField, EvaluationFieldType, EvaluationTemplate,
    Program, QuestionType, Quiz, QuizQuestion, RequirementCategory, RequirementTemplate, Role,
    Site, SiteCapacity, UserProfile, CURRENT_SCHEMA_VERSION,
};

pub const EMS_PROGRAM_ID: &str = "prog-ems";
pub const NURSING_PROGRAM_ID: &str = "prog-nursing";
pub const AIRWAY_QUIZ_ID: &str = "quiz-ems-airway";
pub const AIRWAY_CLASS_ID: &str = "ce-ems-airway";
pub const ETHICS_CLASS_ID: &str = "ce-ethics";
pub const PRECEPTOR_EVALUATION_ID: &str = "eval-tmpl-ems-preceptor";

const INSTRUCTOR_ID: &str = "user-instructor-1";

/// Demo document used on first run, after a reset, and whenever stored data is unusable.
pub fn default_state() -> AppState {
    AppState {
        version: CURRENT_SCHEMA_VERSION,
        last_saved_at: Utc::now(),
        profiles: profiles(),
        programs: programs(),
        cohorts: cohorts(),
        sites: sites(),
        capacities: capacities(),
        requirement_templates: templates(),
        student_progress: Vec::new(),
        shift_logs: Vec::new(),
        skill_logs: Vec::new(),
        approvals: Vec::new(),
        schedule_requests: Vec::new(),
        notifications: Vec::new(),
        audit: Vec::new(),
        evaluation_templates: evaluation_templates(),
        quizzes: quizzes(),
        quiz_attempts: Vec::new(),
        ce_classes: ce_classes(),
        ce_attendances: Vec::new(),
        active_profile_id: None,
        is_logged_in: false,
        has_seen_onboarding: false,
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn profiles() -> Vec<UserProfile> {
    let people = [
        (
            "user-student-1",
            "Alex Student",
            "student@example.com",
            Role::Student,
            Some((EMS_PROGRAM_ID, "cohort-ems-2026")),
        ),
        (
            "user-student-2",
            "Riley Nurse",
            "riley@example.com",
            Role::Student,
            Some((NURSING_PROGRAM_ID, "cohort-adn-2026")),
        ),
        (
            "user-preceptor-1",
            "Dr. Sarah Preceptor",
            "preceptor@example.com",
            Role::Preceptor,
            None,
        ),
        (
            "user-instructor-1",
            "Morgan Instructor",
            "instructor@example.com",
            Role::Instructor,
            Some((EMS_PROGRAM_ID, "cohort-ems-2026")),
        ),
        (
            "user-coordinator-1",
            "Jamie Coordinator",
            "coordinator@example.com",
            Role::Coordinator,
            None,
        ),
        (
            "user-admin-1",
            "Chris Admin",
            "admin@example.com",
            Role::ProgramAdmin,
            None,
        ),
    ];

    people
        .into_iter()
        .map(|(id, name, email, role, enrollment)| UserProfile {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            program_id: enrollment.map(|(program, _)| program.to_string()),
            cohort_id: enrollment.map(|(_, cohort)| cohort.to_string()),
        })
        .collect()
}

fn programs() -> Vec<Program> {
    vec![
        Program {
            id: EMS_PROGRAM_ID.to_string(),
            name: "EMS Paramedic".to_string(),
            description: "Paramedic certificate program".to_string(),
        },
        Program {
            id: NURSING_PROGRAM_ID.to_string(),
            name: "Nursing ADN".to_string(),
            description: "Associate degree in nursing".to_string(),
        },
    ]
}

fn cohorts() -> Vec<Cohort> {
    vec![
        Cohort {
            id: "cohort-ems-2026".to_string(),
            program_id: EMS_PROGRAM_ID.to_string(),
            name: "Paramedic Spring 2026".to_string(),
            start_date: date(2026, 1, 12),
            end_date: date(2026, 12, 18),
        },
        Cohort {
            id: "cohort-adn-2026".to_string(),
            program_id: NURSING_PROGRAM_ID.to_string(),
            name: "ADN Fall 2026".to_string(),
            start_date: date(2026, 8, 24),
            end_date: date(2027, 5, 14),
        },
    ]
}

fn sites() -> Vec<Site> {
    vec![
        Site {
            id: "site-city-er".to_string(),
            name: "City General Hospital ER".to_string(),
            address: Some("100 Main St".to_string()),
            notes: None,
        },
        Site {
            id: "site-county-ems".to_string(),
            name: "County Ambulance Service".to_string(),
            address: Some("12 Station Rd".to_string()),
            notes: Some("Ride-alongs start at 07:00".to_string()),
        },
        Site {
            id: "site-regional-icu".to_string(),
            name: "Regional Medical Center ICU".to_string(),
            address: None,
            notes: None,
        },
    ]
}

fn capacities() -> Vec<SiteCapacity> {
    let slots = [
        ("cap-city-er-0310", "site-city-er", date(2026, 3, 10), 5),
        ("cap-county-0310", "site-county-ems", date(2026, 3, 10), 4),
        ("cap-icu-0311", "site-regional-icu", date(2026, 3, 11), 3),
    ];

    slots
        .into_iter()
        .map(|(id, site_id, date, capacity_count)| SiteCapacity {
            id: id.to_string(),
            site_id: site_id.to_string(),
            date,
            capacity_count,
        })
        .collect()
}

fn templates() -> Vec<RequirementTemplate> {
    let rows = [
        (
            "rt-ems-hours",
            EMS_PROGRAM_ID,
            "Clinical Hours",
            RequirementCategory::Hours,
            240,
            "hours",
        ),
        (
            "rt-ems-shifts",
            EMS_PROGRAM_ID,
            "Ambulance Shifts",
            RequirementCategory::Hours,
            20,
            "shifts",
        ),
        ("rt-ems-iv", EMS_PROGRAM_ID, "IV Insertion", RequirementCategory::Skills, 25, "attempts"),
        (
            "rt-ems-cpr",
            EMS_PROGRAM_ID,
            "BLS Certification",
            RequirementCategory::Documents,
            1,
            "certificate",
        ),
        (
            "rt-ems-eval",
            EMS_PROGRAM_ID,
            "Preceptor Evaluations",
            RequirementCategory::Evaluations,
            3,
            "evaluations",
        ),
        (
            "rt-adn-hours",
            NURSING_PROGRAM_ID,
            "Clinical Hours",
            RequirementCategory::Hours,
            180,
            "hours",
        ),
        (
            "rt-adn-meds",
            NURSING_PROGRAM_ID,
            "Med Administration",
            RequirementCategory::Skills,
            15,
            "passes",
        ),
        (
            "rt-adn-immunizations",
            NURSING_PROGRAM_ID,
            "Immunization Records",
            RequirementCategory::Documents,
            2,
            "documents",
        ),
    ];

    rows.into_iter()
        .map(|(id, program_id, name, category, target_count, unit)| RequirementTemplate {
            id: id.to_string(),
            program_id: program_id.to_string(),
            name: name.to_string(),
            category,
            target_count,
            unit: unit.to_string(),
            description: None,
        })
        .collect()
}

fn evaluation_templates() -> Vec<EvaluationTemplate> {
    let field = |id: &str, field_type, label: &str, options: Option<&[&str]>| EvaluationField {
        id: id.to_string(),
        field_type,
        label: label.to_string(),
        required: true,
        options: options.map(|o| o.iter().map(|s| s.to_string()).collect()),
        min_value: None,
        max_value: None,
    };
    let mut rating = field(
        "field-professionalism",
        EvaluationFieldType::Rating,
        "Professionalism",
        None,
    );
    rating.min_value = Some(1);
    rating.max_value = Some(5);

    let now = Utc::now();
    vec![EvaluationTemplate {
        id: PRECEPTOR_EVALUATION_ID.to_string(),
        program_id: EMS_PROGRAM_ID.to_string(),
        name: "Preceptor Shift Evaluation".to_string(),
        description: Some("Completed by the preceptor after each ride-along".to_string()),
        version: 1,
        fields: vec![
            rating,
            field(
                "field-readiness",
                EvaluationFieldType::Select,
                "Ready for independent practice",
                Some(&["Yes", "Not yet"][..]),
            ),
            field(
                "field-comments",
                EvaluationFieldType::Textarea,
                "Comments",
                None,
            ),
        ],
        preceptor_identification: true,
        created_at: now,
        updated_at: now,
        created_by: INSTRUCTOR_ID.to_string(),
        is_active: true,
    }]
}

fn quizzes() -> Vec<Quiz> {
    let choices = |items: &[&str]| -> Option<Vec<String>> {
        Some(items.iter().map(|s| s.to_string()).collect())
    };
    let now = Utc::now();
    vec![Quiz {
        id: AIRWAY_QUIZ_ID.to_string(),
        title: "Airway Management Review".to_string(),
        description: None,
        program_id: Some(EMS_PROGRAM_ID.to_string()),
        passing_score: 70,
        time_limit: Some(20),
        allow_retakes: true,
        shuffle_questions: false,
        shuffle_options: false,
        questions: vec![
            QuizQuestion {
                id: "q-airway-first".to_string(),
                question_type: QuestionType::MultipleChoice,
                text: "First maneuver for an unresponsive trauma patient?".to_string(),
                options: choices(&["Head-tilt chin-lift", "Jaw thrust", "Recovery position"]),
                correct_answer: Answer::One("Jaw thrust".to_string()),
                explanation: Some("Protects the cervical spine".to_string()),
                weight: 1,
                category: Some("Airway".to_string()),
            },
            QuizQuestion {
                id: "q-airway-signs".to_string(),
                question_type: QuestionType::MultiSelect,
                text: "Which signs suggest airway obstruction?".to_string(),
                options: choices(&["Stridor", "Bradycardia", "Gurgling", "Fever"]),
                correct_answer: Answer::Many(vec!["Stridor".to_string(), "Gurgling".to_string()]),
                explanation: None,
                weight: 2,
                category: Some("Assessment".to_string()),
            },
            QuizQuestion {
                id: "q-airway-opa".to_string(),
                question_type: QuestionType::TrueFalse,
                text: "An OPA is sized from the corner of the mouth to the earlobe.".to_string(),
                options: choices(&["True", "False"]),
                correct_answer: Answer::One("True".to_string()),
                explanation: None,
                weight: 1,
                category: Some("Airway".to_string()),
            },
        ],
        created_by: INSTRUCTOR_ID.to_string(),
        created_at: now,
        updated_at: now,
        is_active: true,
    }]
}

fn ce_classes() -> Vec<CeClass> {
    let now = Utc::now();
    vec![
        CeClass {
            id: AIRWAY_CLASS_ID.to_string(),
            title: "Advanced Airway Workshop".to_string(),
            description: None,
            program_id: Some(EMS_PROGRAM_ID.to_string()),
            ce_hours: 2.0,
            instructor: "Morgan Instructor".to_string(),
            date: date(2026, 4, 18),
            duration: 120,
            quiz_id: Some(AIRWAY_QUIZ_ID.to_string()),
            created_by: INSTRUCTOR_ID.to_string(),
            created_at: now,
            is_active: true,
        },
        CeClass {
            id: ETHICS_CLASS_ID.to_string(),
            title: "Ethics in Clinical Practice".to_string(),
            description: Some("Open to every program".to_string()),
            program_id: None,
            ce_hours: 1.0,
            instructor: "Jamie Coordinator".to_string(),
            date: date(2026, 5, 2),
            duration: 60,
            quiz_id: None,
            created_by: "user-coordinator-1".to_string(),
            created_at: now,
            is_active: true,
        },
    ]
}
