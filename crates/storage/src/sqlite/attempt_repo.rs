use chrono::{DateTime, Utc};
use course_core::model::{MaxAttempts, QuizAttempt, QuizId, StudentId};
use sqlx::Row;

use super::{
    SqliteRepository, db_err,
    mapping::{id_i64, map_attempt_row, ser, student_text, to_document},
};
use crate::repository::{AttemptAllocation, AttemptRepository, StorageError};

const ATTEMPT_COLUMNS: &str = r"
    student_id, quiz_id, attempt_number, status, answers, time_spent_secs,
    started_at, submitted_at, score, points_earned, total_points, passed
";

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn start_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
        max_attempts: MaxAttempts,
        at: DateTime<Utc>,
    ) -> Result<AttemptAllocation, StorageError> {
        let student_key = student_text(student);
        let quiz_key = id_i64("quiz_id", quiz.value())?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Write first so the transaction holds the write lock before it counts.
        sqlx::query(
            r"
            UPDATE quiz_attempts
            SET status = 'abandoned'
            WHERE student_id = ?1 AND quiz_id = ?2 AND status = 'in_progress'
            ",
        )
        .bind(student_key.as_str())
        .bind(quiz_key)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS existing, COALESCE(MAX(attempt_number), 0) AS last_number
            FROM quiz_attempts
            WHERE student_id = ?1 AND quiz_id = ?2
            ",
        )
        .bind(student_key.as_str())
        .bind(quiz_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let existing: i64 = row.try_get("existing").map_err(ser)?;
        let last_number: i64 = row.try_get("last_number").map_err(ser)?;
        let existing = u32::try_from(existing)
            .map_err(|_| StorageError::Serialization("attempt count overflow".into()))?;
        let next = u32::try_from(last_number + 1)
            .map_err(|_| StorageError::Serialization("attempt_number overflow".into()))?;

        if !max_attempts.allows(existing) {
            tx.rollback().await.map_err(db_err)?;
            return Ok(AttemptAllocation::LimitReached { existing });
        }

        let attempt = QuizAttempt::started(student, quiz, next, at);
        sqlx::query(&format!(
            "INSERT INTO quiz_attempts ({ATTEMPT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ))
        .bind(student_key.as_str())
        .bind(quiz_key)
        .bind(i64::from(attempt.attempt_number))
        .bind(attempt.status.as_str())
        .bind(to_document(&attempt.answers)?)
        .bind(i64::from(attempt.time_spent_secs))
        .bind(attempt.started_at)
        .bind(attempt.submitted_at)
        .bind(i64::from(attempt.score))
        .bind(i64::from(attempt.points_earned))
        .bind(i64::from(attempt.total_points))
        .bind(attempt.passed)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(AttemptAllocation::Started(attempt))
    }

    async fn in_progress_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
    ) -> Result<Option<QuizAttempt>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts \
             WHERE student_id = ?1 AND quiz_id = ?2 AND status = 'in_progress' \
             ORDER BY attempt_number DESC LIMIT 1"
        ))
        .bind(student_text(student))
        .bind(id_i64("quiz_id", quiz.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_attempt_row).transpose()
    }

    async fn record_graded(&self, attempt: &QuizAttempt) -> Result<(), StorageError> {
        let student_key = student_text(attempt.student_id);
        let quiz_key = id_i64("quiz_id", attempt.quiz_id.value())?;
        let number = i64::from(attempt.attempt_number);

        let res = sqlx::query(
            r"
            UPDATE quiz_attempts
            SET status = ?4,
                answers = ?5,
                time_spent_secs = ?6,
                submitted_at = ?7,
                score = ?8,
                points_earned = ?9,
                total_points = ?10,
                passed = ?11
            WHERE student_id = ?1 AND quiz_id = ?2 AND attempt_number = ?3
              AND status = 'in_progress'
            ",
        )
        .bind(student_key.as_str())
        .bind(quiz_key)
        .bind(number)
        .bind(attempt.status.as_str())
        .bind(to_document(&attempt.answers)?)
        .bind(i64::from(attempt.time_spent_secs))
        .bind(attempt.submitted_at)
        .bind(i64::from(attempt.score))
        .bind(i64::from(attempt.points_earned))
        .bind(i64::from(attempt.total_points))
        .bind(attempt.passed)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query(
            "SELECT 1 FROM quiz_attempts WHERE student_id = ?1 AND quiz_id = ?2 AND attempt_number = ?3",
        )
        .bind(student_key.as_str())
        .bind(quiz_key)
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Err(if exists.is_some() {
            StorageError::Conflict
        } else {
            StorageError::NotFound
        })
    }

    async fn list_attempts(
        &self,
        student: StudentId,
        quiz: QuizId,
    ) -> Result<Vec<QuizAttempt>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts \
             WHERE student_id = ?1 AND quiz_id = ?2 \
             ORDER BY attempt_number ASC"
        ))
        .bind(student_text(student))
        .bind(id_i64("quiz_id", quiz.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_attempt_row(&row)?);
        }
        Ok(out)
    }

    async fn get_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
        attempt_number: u32,
    ) -> Result<QuizAttempt, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts \
             WHERE student_id = ?1 AND quiz_id = ?2 AND attempt_number = ?3"
        ))
        .bind(student_text(student))
        .bind(id_i64("quiz_id", quiz.value())?)
        .bind(i64::from(attempt_number))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::NotFound)?;

        map_attempt_row(&row)
    }
}
