use std::fmt;
use std::str::FromStr;

use course_core::model::{
    Answer, CourseId, PaymentMethod, QuestionId, QuizId, StudentId, SubscriptionType, TopicId,
};
use serde::Serialize;
use services::{Clock, LearningServices, ServicesConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArg { name: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    MissingStudent,
    Invalid { what: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArg { name } => write!(f, "missing <{name}>"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::MissingStudent => {
                write!(f, "a student id is required (--student or LEARN_STUDENT_ID)")
            }
            ArgsError::Invalid { what, raw } => write!(f, "invalid {what}: {raw}"),
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

fn parse<T: FromStr>(what: &'static str, raw: &str) -> Result<T, ArgsError> {
    raw.parse().map_err(|_| ArgsError::Invalid {
        what,
        raw: raw.to_owned(),
    })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- <command> [args] [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  enroll <course>                          Enroll the student");
    eprintln!("  subscribe <course> <type> <payment>      type: free|monthly|lifetime, payment: free|card|upi");
    eprintln!("  complete <course> <topic>                Mark a topic complete");
    eprintln!("  bookmark <topic>                         Toggle a bookmark");
    eprintln!("  bookmarks                                List bookmarked topics");
    eprintln!("  progress <course>                        Progress for one course");
    eprintln!("  courses                                  Enrolled courses with progress");
    eprintln!("  outline <course>                         Course tree with per-topic state");
    eprintln!("  quizzes <course>                         Published quizzes with attempt standing");
    eprintln!("  start <quiz>                             Start a quiz attempt");
    eprintln!("  submit <quiz> <q=opt|q=t:text>...        Submit answers for the open attempt");
    eprintln!("  attempts <quiz>                          Attempt history");
    eprintln!("  result <quiz> <attempt>                  One graded attempt");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --student <uuid>          Acting student");
    eprintln!("  --db <sqlite_url>         SQLite URL");
    eprintln!("  --secs <n>                Time spent, for complete and submit (default: 0)");
    eprintln!("  --txn <id>                Payment transaction id, for subscribe");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_STUDENT_ID, LEARN_DB_URL, LEARN_SHOW_CORRECT_ANSWERS, LEARN_FREE_PREVIEW_TOPICS");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Enroll(CourseId),
    Subscribe {
        course: CourseId,
        kind: SubscriptionType,
        payment: PaymentMethod,
    },
    Complete {
        course: CourseId,
        topic: TopicId,
    },
    Bookmark(TopicId),
    Bookmarks,
    Progress(CourseId),
    Courses,
    Outline(CourseId),
    Quizzes(CourseId),
    Start(QuizId),
    Submit {
        quiz: QuizId,
        answers: Vec<Answer>,
    },
    Attempts(QuizId),
    Result {
        quiz: QuizId,
        attempt: u32,
    },
}

/// `3=1` picks option 1 of question 3; `4=t:Drop` answers question 4 with text.
fn parse_answer(raw: &str) -> Result<Answer, ArgsError> {
    let invalid = || ArgsError::Invalid {
        what: "answer",
        raw: raw.to_owned(),
    };
    let (question, value) = raw.split_once('=').ok_or_else(invalid)?;
    let question: QuestionId = question.parse().map_err(|_| invalid())?;
    match value.strip_prefix("t:") {
        Some(text) => Ok(Answer::text(question, text)),
        None => Ok(Answer::choice(question, value.parse().map_err(|_| invalid())?)),
    }
}

impl Command {
    fn parse(name: &str, positional: &[String]) -> Result<Self, ArgsError> {
        let arg = |i: usize, name: &'static str| {
            positional
                .get(i)
                .map(String::as_str)
                .ok_or(ArgsError::MissingArg { name })
        };
        let course = |i| arg(i, "course").and_then(|raw| parse::<CourseId>("course id", raw));
        let quiz = |i| arg(i, "quiz").and_then(|raw| parse::<QuizId>("quiz id", raw));
        let topic = |i| arg(i, "topic").and_then(|raw| parse::<TopicId>("topic id", raw));

        let cmd = match name {
            "enroll" => Command::Enroll(course(0)?),
            "subscribe" => {
                let kind = arg(1, "type")?;
                let payment = arg(2, "payment")?;
                Command::Subscribe {
                    course: course(0)?,
                    kind: SubscriptionType::parse(kind).ok_or(ArgsError::Invalid {
                        what: "subscription type",
                        raw: kind.to_owned(),
                    })?,
                    payment: PaymentMethod::parse(payment).ok_or(ArgsError::Invalid {
                        what: "payment method",
                        raw: payment.to_owned(),
                    })?,
                }
            }
            "complete" => Command::Complete {
                course: course(0)?,
                topic: topic(1)?,
            },
            "bookmark" => Command::Bookmark(topic(0)?),
            "bookmarks" => Command::Bookmarks,
            "progress" => Command::Progress(course(0)?),
            "courses" => Command::Courses,
            "outline" => Command::Outline(course(0)?),
            "quizzes" => Command::Quizzes(course(0)?),
            "start" => Command::Start(quiz(0)?),
            "submit" => Command::Submit {
                quiz: quiz(0)?,
                answers: positional
                    .iter()
                    .skip(1)
                    .map(|raw| parse_answer(raw))
                    .collect::<Result<_, _>>()?,
            },
            "attempts" => Command::Attempts(quiz(0)?),
            "result" => Command::Result {
                quiz: quiz(0)?,
                attempt: parse("attempt number", arg(1, "attempt")?)?,
            },
            other => return Err(ArgsError::UnknownCommand(other.to_owned())),
        };
        Ok(cmd)
    }
}

struct Args {
    command: Command,
    student: StudentId,
    db_url: Option<String>,
    time_spent_secs: u32,
    transaction_id: Option<String>,
}

impl Args {
    fn parse(argv: impl IntoIterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut student = std::env::var("LEARN_STUDENT_ID").ok();
        let mut db_url = None;
        let mut time_spent_secs = 0;
        let mut transaction_id = None;
        let mut positional = Vec::new();

        let mut args = argv.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--student" => student = Some(require_value(&mut args, "--student")?),
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::Invalid {
                            what: "--db value",
                            raw: value,
                        });
                    }
                    db_url = Some(value);
                }
                "--secs" => {
                    time_spent_secs = parse("--secs value", &require_value(&mut args, "--secs")?)?;
                }
                "--txn" => transaction_id = Some(require_value(&mut args, "--txn")?),
                "--help" | "-h" => return Ok(None),
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let Some((name, rest)) = positional.split_first() else {
            return Ok(None);
        };
        let command = Command::parse(name, rest)?;
        let student = student
            .filter(|s| !s.trim().is_empty())
            .ok_or(ArgsError::MissingStudent)?;
        let student = parse("student id", student.trim())?;

        Ok(Some(Self {
            command,
            student,
            db_url,
            time_spent_secs,
            transaction_id,
        }))
    }
}

fn print_json(value: &impl Serialize) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let Some(args) = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?
    else {
        print_usage();
        return Ok(());
    };

    let mut config = ServicesConfig::from_env()?;
    if let Some(db_url) = args.db_url {
        config.db_url = db_url;
    }
    debug!(db = %config.db_url, "opening learning services");
    let services = LearningServices::new_sqlite(&config, Clock::default()).await?;
    let student = args.student;

    match args.command {
        Command::Enroll(course) => print_json(&services.gate().ensure_enrolled(student, course).await?)?,
        Command::Subscribe {
            course,
            kind,
            payment,
        } => print_json(
            &services
                .gate()
                .subscribe(student, course, kind, payment, args.transaction_id)
                .await?,
        )?,
        Command::Complete { course, topic } => print_json(
            &services
                .progress()
                .mark_topic_complete(student, course, topic, args.time_spent_secs)
                .await?,
        )?,
        Command::Bookmark(topic) => {
            let active = services.progress().toggle_bookmark(student, topic).await?;
            print_json(&serde_json::json!({ "topic_id": topic, "bookmarked": active }))?;
        }
        Command::Bookmarks => print_json(&services.progress().bookmarked_topics(student).await?)?,
        Command::Progress(course) => {
            print_json(&services.progress().compute_progress(student, course).await?)?;
        }
        Command::Courses => {
            print_json(&services.progress().list_enrolled_with_progress(student).await?)?;
        }
        Command::Outline(course) => {
            print_json(&services.progress().course_outline(student, course).await?)?;
        }
        Command::Quizzes(course) => {
            print_json(&services.quizzes().quizzes_for_course(student, course).await?)?;
        }
        Command::Start(quiz) => print_json(&services.quizzes().start_attempt(student, quiz).await?)?,
        Command::Submit { quiz, answers } => print_json(
            &services
                .quizzes()
                .submit_attempt(student, quiz, &answers, args.time_spent_secs)
                .await?,
        )?,
        Command::Attempts(quiz) => print_json(&services.quizzes().list_attempts(student, quiz).await?)?,
        Command::Result { quiz, attempt } => print_json(
            &services
                .quizzes()
                .attempt_result(student, quiz, attempt)
                .await?,
        )?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    const STUDENT: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

    #[test]
    fn parses_submit_with_mixed_answers() {
        let args = Args::parse(argv(&[
            "submit", "7", "1=0", "2=t:Drop", "--student", STUDENT, "--secs", "30",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(args.time_spent_secs, 30);
        assert_eq!(
            args.command,
            Command::Submit {
                quiz: QuizId::new(7),
                answers: vec![
                    Answer::choice(QuestionId::new(1), 0),
                    Answer::text(QuestionId::new(2), "Drop"),
                ],
            }
        );
    }

    #[test]
    fn parses_subscribe() {
        let args = Args::parse(argv(&[
            "--student", STUDENT, "subscribe", "3", "monthly", "upi", "--txn", "tx-1",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(
            args.command,
            Command::Subscribe {
                course: CourseId::new(3),
                kind: SubscriptionType::Monthly,
                payment: PaymentMethod::Upi,
            }
        );
        assert_eq!(args.transaction_id.as_deref(), Some("tx-1"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            Args::parse(argv(&["--student", STUDENT, "complete", "1"])),
            Err(ArgsError::MissingArg { name: "topic" })
        ));
        assert!(matches!(
            Args::parse(argv(&["--student", STUDENT, "submit", "1", "oops"])),
            Err(ArgsError::Invalid { what: "answer", .. })
        ));
        assert!(matches!(
            Args::parse(argv(&["--student", STUDENT, "teleport"])),
            Err(ArgsError::UnknownCommand(_))
        ));
        assert!(matches!(
            Args::parse(argv(&["--student", "nope", "courses"])),
            Err(ArgsError::Invalid { what: "student id", .. })
        ));
    }

    #[test]
    fn help_and_empty_input_print_usage() {
        assert!(Args::parse(argv(&["--help"])).unwrap().is_none());
        assert!(Args::parse(argv(&["--student", STUDENT])).unwrap().is_none());
    }
}
