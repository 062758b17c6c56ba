use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use clintrack::approval::{self, ShiftDraft, SkillDraft};
use clintrack::models::{
    clock_time, Answer, Decision, LogKind, QuestionType, Quiz, SkillMode, SkillOutcome,
};
use clintrack::report::{self, ReportFilter};
use clintrack::storage::SqliteStorage;
use clintrack::{inbox, progress, scheduling, training, ImportMode, Store, StoreConfig};

const DEFAULT_DATABASE_URL: &str = "sqlite://clintrack.db?mode=rwc";

#[derive(Parser)]
#[command(name = "clintrack")]
#[command(about = "Clinical training tracker for EMS and nursing programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset everything to the demo data
    Seed,
    /// Act as the given profile
    Login { profile: String },
    Logout,
    /// Show who is logged in and what needs attention
    Status,
    /// Show requirement progress for a student (defaults to the active profile)
    Progress {
        #[arg(long)]
        student: Option<String>,
    },
    /// Log a clinical shift for the active student
    LogShift {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, value_parser = parse_clock)]
        start: NaiveTime,
        #[arg(long, value_parser = parse_clock)]
        end: NaiveTime,
        #[arg(long, default_value_t = 0)]
        break_minutes: u32,
        #[arg(long)]
        site: String,
        #[arg(long)]
        preceptor: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Confirm the entry contains no patient identifiers
        #[arg(long)]
        no_phi: bool,
    },
    /// Log a skill attempt for the active student
    LogSkill {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "Skills")]
        skill_type: String,
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        assisted: bool,
        #[arg(long)]
        shift: Option<String>,
        #[arg(long)]
        no_phi: bool,
    },
    /// Record a document or evaluation toward a requirement
    Evidence {
        template: String,
        #[arg(long)]
        expires: Option<NaiveDate>,
    },
    /// Send a pending or rejected log for review
    Submit { kind: KindArg, id: String },
    /// List the review queue, or decide one log
    Review {
        kind: Option<KindArg>,
        id: Option<String>,
        #[arg(long, value_enum, default_value_t = Verdict::Approve)]
        verdict: Verdict,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Show or set site capacity for a date
    Capacity {
        site: String,
        date: NaiveDate,
        #[arg(long)]
        set: Option<u32>,
    },
    /// Request a placement at a site
    Request {
        site: String,
        date: NaiveDate,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Approve or reject a placement request
    DecideRequest {
        id: String,
        #[arg(long, value_enum, default_value_t = Verdict::Approve)]
        verdict: Verdict,
    },
    /// Place a student directly
    Assign {
        student: String,
        site: String,
        date: NaiveDate,
    },
    /// Show notifications for the active profile
    Inbox {
        #[arg(long)]
        mark_all_read: bool,
        #[arg(long)]
        clear: bool,
    },
    /// List active quizzes, CE classes and the active profile's CE credit
    Training,
    /// List active evaluation forms, or retire one
    Evaluations {
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        deactivate: Option<String>,
    },
    /// Answer a quiz as the active student
    TakeQuiz {
        quiz: String,
        /// QUESTION=CHOICE, with comma-separated choices for multi-select questions
        #[arg(long = "answer", value_parser = parse_answer)]
        answers: Vec<(String, String)>,
    },
    /// Record attendance at a CE class for the active student
    Attend { class: String },
    /// Generate a progress report
    Report {
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        cohort: Option<String>,
        #[arg(long)]
        csv: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a dated JSON backup into a directory
    Export {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Load a JSON backup, merging unless --replace is given
    Import {
        path: PathBuf,
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Shift,
    Skill,
}

impl From<KindArg> for LogKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Shift => LogKind::Shift,
            KindArg::Skill => LogKind::Skill,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Verdict {
    Approve,
    Reject,
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approve => Decision::Approved,
            Verdict::Reject => Decision::Rejected,
        }
    }
}

fn parse_clock(raw: &str) -> Result<NaiveTime, String> {
    clock_time::parse(raw).map_err(|err| format!("expected HH:MM ({err})"))
}

fn parse_answer(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(question, choice)| (question.trim().to_string(), choice.trim().to_string()))
        .ok_or_else(|| "expected QUESTION=CHOICE".to_string())
}

/// Multi-select questions take a comma-separated list; everything else a single choice.
fn quiz_answers(quiz: &Quiz, raw: Vec<(String, String)>) -> BTreeMap<String, Answer> {
    raw.into_iter()
        .map(|(question_id, choice)| {
            let multi = quiz
                .questions
                .iter()
                .any(|q| q.id == question_id && q.question_type == QuestionType::MultiSelect);
            let answer = if multi {
                Answer::Many(choice.split(',').map(|c| c.trim().to_string()).collect())
            } else {
                Answer::One(choice)
            };
            (question_id, answer)
        })
        .collect()
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clintrack=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn active_profile(store: &Store) -> anyhow::Result<String> {
    store
        .state()
        .active_profile_id
        .clone()
        .ok_or_else(|| anyhow!("no active profile, run `clintrack login <profile>` first"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let database_url = std::env::var("CLINTRACK_DATABASE_URL")
        .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

    let storage = SqliteStorage::connect(&database_url)
        .await
        .with_context(|| format!("failed to open {database_url}"))?;
    let store = Store::open(Arc::new(storage), StoreConfig::default()).await;

    run(&store, cli.command).await?;
    store.flush().await;
    Ok(())
}

async fn run(store: &Store, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Seed => {
            store.reset();
            println!("Demo data restored.");
        }
        Commands::Login { profile } => {
            store.login(&profile)?;
            let state = store.state();
            println!("Logged in as {}.", state.profile_name(&profile));
        }
        Commands::Logout => {
            store.logout();
            println!("Logged out.");
        }
        Commands::Status => {
            let state = store.state();
            match state.active_profile() {
                Some(profile) => {
                    println!("{} ({:?})", profile.name, profile.role);
                    println!(
                        "Unread notifications: {}",
                        inbox::unread_count(&state, &profile.id)
                    );
                    if profile.role.is_reviewer() {
                        let (shifts, skills) = approval::pending_reviews(&state);
                        println!(
                            "Awaiting review: {} shifts, {} skills",
                            shifts.len(),
                            skills.len()
                        );
                    }
                    let today = Utc::now().date_naive();
                    for request in scheduling::upcoming_for(&state, &profile.id, today) {
                        println!(
                            "Upcoming: {} on {}",
                            state.site_name(&request.site_id),
                            request.date
                        );
                    }
                }
                None => println!("Not logged in."),
            }
            println!("Last saved {}", state.last_saved_at.to_rfc3339());
        }
        Commands::Progress { student } => {
            let student = match student {
                Some(student) => student,
                None => active_profile(store)?,
            };
            let state = store.state();
            let rows = progress::program_progress(&state, &student);
            if rows.is_empty() {
                println!("{} has no program requirements.", state.profile_name(&student));
            }
            for (template, progress) in rows {
                println!(
                    "- {} [{}]: {:.1}/{} {} ({:?})",
                    template.name,
                    template.category,
                    progress.current,
                    template.target_count,
                    template.unit,
                    progress.status
                );
            }
            for record in progress::expired_evidence(&state, &student, Utc::now().date_naive()) {
                println!("Expired: {} on {:?}", record.template_id, record.expiration_date);
            }
        }
        Commands::LogShift {
            date,
            start,
            end,
            break_minutes,
            site,
            preceptor,
            notes,
            no_phi,
        } => {
            let student_id = active_profile(store)?;
            let draft = ShiftDraft {
                student_id,
                date,
                start_time: start,
                end_time: end,
                break_minutes,
                site_id: site,
                preceptor_id: preceptor,
                notes,
                no_phi,
            };
            store.try_update(|state| approval::add_shift_log(state, draft))?;
            if let Some(log) = store.state().shift_logs.last() {
                println!("Logged {} ({:.2} hours, pending).", log.id, log.computed_hours);
            }
        }
        Commands::LogSkill {
            name,
            skill_type,
            failed,
            assisted,
            shift,
            no_phi,
        } => {
            let student_id = active_profile(store)?;
            let draft = SkillDraft {
                student_id,
                skill_name: name,
                skill_type,
                outcome: if failed { SkillOutcome::Fail } else { SkillOutcome::Success },
                mode: if assisted { SkillMode::Assisted } else { SkillMode::Independent },
                shift_log_id: shift,
                notes: None,
                no_phi,
            };
            store.try_update(|state| approval::add_skill_log(state, draft))?;
            if let Some(log) = store.state().skill_logs.last() {
                println!("Logged {} (pending).", log.id);
            }
        }
        Commands::Evidence { template, expires } => {
            let student_id = active_profile(store)?;
            let found = store
                .state()
                .template(&template)
                .cloned()
                .ok_or_else(|| anyhow!("unknown requirement template {template}"))?;
            store.try_update(|state| progress::add_evidence(state, &student_id, &found, expires))?;
            println!("Evidence recorded for {}.", found.name);
        }
        Commands::Submit { kind, id } => {
            let actor = active_profile(store)?;
            store.try_update(|state| approval::submit(state, kind.into(), &id, &actor))?;
            println!("Submitted {id}.");
        }
        Commands::Review {
            kind,
            id,
            verdict,
            comment,
        } => match (kind, id) {
            (Some(kind), Some(id)) => {
                let reviewer = active_profile(store)?;
                let decision = Decision::from(verdict);
                store.try_update(|state| {
                    approval::decide(
                        state,
                        kind.into(),
                        &id,
                        decision,
                        &reviewer,
                        comment.as_deref(),
                    )
                })?;
                println!("{id} {decision}.");
            }
            _ => {
                let state = store.state();
                let (shifts, skills) = approval::pending_reviews(&state);
                if shifts.is_empty() && skills.is_empty() {
                    println!("Nothing awaiting review.");
                }
                for log in shifts {
                    println!(
                        "shift {} {} {} {:.2}h at {}",
                        log.id,
                        state.profile_name(&log.student_id),
                        log.date,
                        log.computed_hours,
                        state.site_name(&log.site_id)
                    );
                }
                for log in skills {
                    println!(
                        "skill {} {} {}",
                        log.id,
                        state.profile_name(&log.student_id),
                        log.skill_name
                    );
                }
            }
        },
        Commands::Capacity { site, date, set } => {
            if let Some(count) = set {
                let actor = active_profile(store)?;
                store.try_update(|state| {
                    scheduling::set_capacity(state, &site, date, count, &actor)
                })?;
            }
            let state = store.state();
            let status = scheduling::capacity_status(&state, &site, date);
            let site_name = state.site_name(&site);
            match status.total {
                Some(total) => println!("{site_name}: {}/{total} on {date}", status.filled),
                None => println!(
                    "{site_name}: {} approved on {date}, no capacity set",
                    status.filled
                ),
            }
            if let Some(warning) = scheduling::capacity_warning(&state, &site, date) {
                println!("Warning: {warning}");
            }
        }
        Commands::Request { site, date, notes } => {
            let student_id = active_profile(store)?;
            if let Some(warning) = scheduling::capacity_warning(&store.state(), &site, date) {
                println!("Warning: {warning}");
            }
            store.update(|state| {
                scheduling::request_slot(state, &student_id, &site, date, notes.as_deref())
            });
            println!("Request recorded.");
        }
        Commands::DecideRequest { id, verdict } => {
            let approver = active_profile(store)?;
            let decision = Decision::from(verdict);
            store.try_update(|state| {
                scheduling::decide_request(state, &id, decision, &approver)
            })?;
            println!("{id} {decision}.");
        }
        Commands::Assign { student, site, date } => {
            let assigner = active_profile(store)?;
            if let Some(warning) = scheduling::capacity_warning(&store.state(), &site, date) {
                println!("Warning: {warning}");
            }
            store.update(|state| {
                scheduling::assign_student(state, &student, &site, date, &assigner, None)
            });
            println!("Assigned {student}.");
        }
        Commands::Inbox { mark_all_read, clear } => {
            let user_id = active_profile(store)?;
            let state = store.state();
            for note in inbox::notifications_for(&state, &user_id) {
                let marker = if note.read { " " } else { "*" };
                println!(
                    "{marker} {} {}: {}",
                    note.created_at.format("%Y-%m-%d %H:%M"),
                    note.title,
                    note.message
                );
            }
            if clear {
                store.update(|state| inbox::clear_all(state, &user_id));
            } else if mark_all_read {
                store.update(|state| inbox::mark_all_read(state, &user_id));
            }
        }
        Commands::Training => {
            let state = store.state();
            let user_id = state.active_profile_id.clone();
            for quiz in training::active_quizzes(&state) {
                let best = user_id
                    .as_deref()
                    .and_then(|id| training::best_attempt(&state, id, &quiz.id))
                    .map(|a| format!(", best {}%", a.score))
                    .unwrap_or_default();
                println!(
                    "quiz {} {} ({} questions, pass {}%{best})",
                    quiz.id,
                    quiz.title,
                    quiz.questions.len(),
                    quiz.passing_score
                );
            }
            for class in training::active_ce_classes(&state) {
                println!(
                    "class {} {} on {} with {}, {:.1} CE hours",
                    class.id, class.title, class.date, class.instructor, class.ce_hours
                );
            }
            if let Some(id) = user_id.as_deref() {
                println!("CE hours earned: {:.1}", training::ce_hours_for(&state, id));
            }
        }
        Commands::Evaluations {
            program,
            deactivate,
        } => {
            if let Some(id) = deactivate {
                let actor = active_profile(store)?;
                store.try_update(|state| {
                    training::deactivate_evaluation_template(state, &id, &actor)
                })?;
                println!("{id} deactivated.");
            }
            let state = store.state();
            for template in training::active_evaluation_templates(&state, program.as_deref()) {
                println!(
                    "{} {} v{} ({} fields)",
                    template.id,
                    template.name,
                    template.version,
                    template.fields.len()
                );
            }
        }
        Commands::TakeQuiz { quiz, answers } => {
            let student_id = active_profile(store)?;
            let started_at = Utc::now();
            let answers = match store.state().quiz(&quiz) {
                Some(found) => quiz_answers(found, answers),
                None => return Err(anyhow!("quiz {quiz} not found")),
            };
            store.try_update(|state| {
                training::submit_attempt(state, &quiz, &student_id, answers, started_at)
            })?;
            if let Some(attempt) = store.state().quiz_attempts.last() {
                let outcome = if attempt.passed { "Passed" } else { "Not passed" };
                println!("{outcome}: {}%.", attempt.score);
            }
        }
        Commands::Attend { class } => {
            let student_id = active_profile(store)?;
            store.try_update(|state| training::record_ce_attendance(state, &class, &student_id))?;
            if let Some(attendance) = store.state().ce_attendances.last() {
                println!(
                    "CE credit recorded. Certificate {}, verification {}.",
                    attendance.certificate_number, attendance.verification_code
                );
            }
        }
        Commands::Report {
            program,
            cohort,
            csv,
            out,
        } => {
            let state = store.state();
            let filter = ReportFilter {
                program_id: program,
                cohort_id: cohort,
            };
            let rendered = if csv {
                let mut buffer = Vec::new();
                report::write_csv(&report::summarize_students(&state, &filter), &mut buffer)
                    .context("failed to render CSV")?;
                String::from_utf8(buffer).context("CSV output was not UTF-8")?
            } else {
                report::build_report(&state, &filter)
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Commands::Export { dir } => {
            let path = store.export_backup(&dir)?;
            println!("Backup written to {}.", path.display());
        }
        Commands::Import { path, replace } => {
            let mode = if replace { ImportMode::Replace } else { ImportMode::Merge };
            store
                .import_backup(&path, mode)
                .await
                .with_context(|| format!("failed to import {}", path.display()))?;
            println!("Imported {}.", path.display());
        }
    }

    Ok(())
}
