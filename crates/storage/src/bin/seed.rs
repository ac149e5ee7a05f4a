use std::fmt;

use chrono::{DateTime, Utc};
use course_core::model::{
    Chapter, ChapterId, Course, CourseId, Difficulty, MaxAttempts, Question, QuestionId,
    QuestionOption, Quiz, QuizId, Resource, ResourceKind, Subchapter, SubchapterId, Topic, TopicId,
};
use storage::repository::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    course_id: CourseId,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidCourseId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidCourseId { raw } => write!(f, "invalid --course-id value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("LEARN_DB_URL")
            .unwrap_or_else(|_| "sqlite:learn.sqlite3?mode=rwc".into());
        let mut course_id = std::env::var("LEARN_COURSE_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| CourseId::new(1), CourseId::new);
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--course-id" => {
                    let value = require_value(&mut args, "--course-id")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidCourseId { raw: value.clone() })?;
                    course_id = CourseId::new(parsed);
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            course_id,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:learn.sqlite3?mode=rwc)");
    eprintln!("  --course-id <id>          Course id to upsert (default: 1)");
    eprintln!("  --now <rfc3339>           Publish time for the standalone quiz");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  LEARN_DB_URL, LEARN_COURSE_ID");
}

// Topic, quiz and question ids are namespaced under the course id so that
// seeding several courses into one database never collides.
fn scoped(course_id: CourseId, n: u64) -> u64 {
    course_id.value() * 1_000 + n
}

fn demo_course(course_id: CourseId) -> Result<Course, course_core::Error> {
    let topic = |n: u64, title: &str, order: u32, minutes: u32| {
        Topic::new(TopicId::new(scoped(course_id, n)), title, order, minutes)
    };

    let ownership_quiz = Quiz::new(
        QuizId::new(scoped(course_id, 1)),
        course_id,
        "Ownership check",
        vec![
            Question::multiple_choice(
                QuestionId::new(1),
                "What happens to a `String` after it is moved into a function?",
                vec![
                    QuestionOption::new("It is copied", false),
                    QuestionOption::new("The caller can no longer use it", true),
                    QuestionOption::new("It becomes a reference", false),
                ],
                5,
            )?
            .with_explanation("Moves transfer ownership; the original binding is invalidated."),
            Question::true_false(
                QuestionId::new(2),
                "Any number of shared references may coexist with one mutable reference.",
                false,
                5,
            )?
            .with_explanation("Mutable borrows are exclusive."),
        ],
    )?;

    let basics = Subchapter::new(
        SubchapterId::new(scoped(course_id, 1)),
        "Ownership",
        1,
        vec![
            topic(1, "Moves and copies", 1, 12)?
                .with_video("https://videos.example.com/rust/moves")?,
            topic(2, "Borrowing", 2, 18)?.with_resource(Resource::new(
                "The Book: references",
                "https://doc.rust-lang.org/book/ch04-02-references-and-borrowing.html",
                ResourceKind::Link,
            )?),
        ],
    )?
    .with_quiz(ownership_quiz);

    let lifetimes = Subchapter::new(
        SubchapterId::new(scoped(course_id, 2)),
        "Lifetimes",
        2,
        vec![topic(3, "Lifetime elision", 1, 25)?],
    )?;

    let traits = Subchapter::new(
        SubchapterId::new(scoped(course_id, 3)),
        "Traits",
        1,
        vec![
            topic(4, "Defining traits", 1, 20)?,
            topic(5, "Trait objects", 2, 30)?.with_resource(Resource::new(
                "Object safety notes",
                "https://doc.rust-lang.org/reference/items/traits.html",
                ResourceKind::Document,
            )?),
        ],
    )?;

    Ok(Course::new(
        course_id,
        "Rust Fundamentals",
        vec![
            Chapter::new(
                ChapterId::new(scoped(course_id, 1)),
                "Memory model",
                1,
                vec![basics, lifetimes],
            )?,
            Chapter::new(
                ChapterId::new(scoped(course_id, 2)),
                "Abstraction",
                2,
                vec![traits],
            )?,
        ],
    )?)
}

fn final_exam(course_id: CourseId, now: DateTime<Utc>) -> Result<Quiz, course_core::Error> {
    let mut quiz = Quiz::new(
        QuizId::new(scoped(course_id, 2)),
        course_id,
        "Final exam",
        vec![
            Question::true_false(QuestionId::new(1), "`dyn Trait` requires object safety.", true, 4)?,
            Question::short_answer(
                QuestionId::new(2),
                "Name the trait that runs code when a value goes out of scope.",
                6,
            )?
            .with_model_answer("Drop"),
        ],
    )?
    .with_description("Covers the whole course.")
    .with_difficulty(Difficulty::Hard)
    .with_passing_score(60)?
    .with_max_attempts(MaxAttempts::limited(2).unwrap_or_default());
    quiz.publish(now);
    Ok(quiz)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let course = demo_course(args.course_id)?;
    storage.catalog.upsert_course(&course).await?;

    let exam = final_exam(args.course_id, now)?;
    storage.catalog.upsert_quiz(&exam).await?;

    info!(
        course_id = %course.id(),
        topics = course.topic_count(),
        minutes = course.duration_minutes(),
        db = %args.db_url,
        "seeded demo course"
    );
    println!(
        "Seeded course {} ({} topics, 2 quizzes) into {}",
        course.id(),
        course.topic_count(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
