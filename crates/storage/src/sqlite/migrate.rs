use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the catalog read model (course and quiz documents plus a topic index),
/// enrollments, subscriptions, per-student facts, and quiz attempts.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        let statements = [
            r"
                CREATE TABLE IF NOT EXISTS courses (
                    id INTEGER PRIMARY KEY,
                    title TEXT NOT NULL,
                    document TEXT NOT NULL
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS course_topics (
                    topic_id INTEGER PRIMARY KEY,
                    course_id INTEGER NOT NULL,
                    FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS quizzes (
                    id INTEGER PRIMARY KEY,
                    course_id INTEGER NOT NULL,
                    document TEXT NOT NULL
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS enrollments (
                    student_id TEXT NOT NULL,
                    course_id INTEGER NOT NULL,
                    enrolled_at TEXT NOT NULL,
                    last_accessed_at TEXT NOT NULL,
                    PRIMARY KEY (student_id, course_id)
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS subscriptions (
                    student_id TEXT NOT NULL,
                    course_id INTEGER NOT NULL,
                    kind TEXT NOT NULL CHECK (kind IN ('free', 'monthly', 'lifetime')),
                    payment_method TEXT NOT NULL CHECK (payment_method IN ('free', 'card', 'upi')),
                    transaction_id TEXT,
                    activated_at TEXT NOT NULL,
                    PRIMARY KEY (student_id, course_id)
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS completions (
                    student_id TEXT NOT NULL,
                    topic_id INTEGER NOT NULL,
                    course_id INTEGER NOT NULL,
                    completed_at TEXT NOT NULL,
                    time_spent_secs INTEGER NOT NULL CHECK (time_spent_secs >= 0),
                    PRIMARY KEY (student_id, topic_id)
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS bookmarks (
                    student_id TEXT NOT NULL,
                    topic_id INTEGER NOT NULL,
                    active INTEGER NOT NULL CHECK (active IN (0, 1)),
                    PRIMARY KEY (student_id, topic_id)
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS quiz_passes (
                    student_id TEXT NOT NULL,
                    quiz_id INTEGER NOT NULL,
                    course_id INTEGER NOT NULL,
                    passed_at TEXT NOT NULL,
                    PRIMARY KEY (student_id, quiz_id)
                );
            ",
            r"
                CREATE TABLE IF NOT EXISTS quiz_attempts (
                    student_id TEXT NOT NULL,
                    quiz_id INTEGER NOT NULL,
                    attempt_number INTEGER NOT NULL CHECK (attempt_number >= 1),
                    status TEXT NOT NULL CHECK (status IN ('in_progress', 'graded', 'abandoned')),
                    answers TEXT NOT NULL,
                    time_spent_secs INTEGER NOT NULL CHECK (time_spent_secs >= 0),
                    started_at TEXT NOT NULL,
                    submitted_at TEXT,
                    score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 100),
                    points_earned INTEGER NOT NULL CHECK (points_earned >= 0),
                    total_points INTEGER NOT NULL CHECK (total_points >= 0),
                    passed INTEGER NOT NULL CHECK (passed IN (0, 1)),
                    PRIMARY KEY (student_id, quiz_id, attempt_number)
                );
            ",
            r"
                CREATE INDEX IF NOT EXISTS idx_course_topics_course
                    ON course_topics (course_id);
            ",
            r"
                CREATE INDEX IF NOT EXISTS idx_quizzes_course
                    ON quizzes (course_id, id);
            ",
            r"
                CREATE INDEX IF NOT EXISTS idx_completions_student_course
                    ON completions (student_id, course_id);
            ",
            r"
                CREATE INDEX IF NOT EXISTS idx_quiz_passes_student_course
                    ON quiz_passes (student_id, course_id);
            ",
            // At most one open attempt per (student, quiz).
            r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_quiz_attempts_single_open
                    ON quiz_attempts (student_id, quiz_id)
                    WHERE status = 'in_progress';
            ",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
