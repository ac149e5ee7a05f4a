use std::collections::HashSet;

use course_core::model::{CompletionFact, CourseId, QuizId, QuizPassFact, StudentId, TopicId};
use sqlx::Row;

use super::{
    SqliteRepository, db_err,
    mapping::{id_i64, quiz_id_from_i64, ser, student_text},
};
use crate::repository::{ProgressRepository, StorageError};

fn topic_id_from_i64(v: i64) -> Result<TopicId, StorageError> {
    u64::try_from(v)
        .map(TopicId::new)
        .map_err(|_| StorageError::Serialization("topic_id sign overflow".into()))
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn record_completion(&self, fact: &CompletionFact) -> Result<bool, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO completions (
                student_id, topic_id, course_id, completed_at, time_spent_secs
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(student_id, topic_id) DO NOTHING
            ",
        )
        .bind(student_text(fact.student_id))
        .bind(id_i64("topic_id", fact.topic_id.value())?)
        .bind(id_i64("course_id", fact.course_id.value())?)
        .bind(fact.completed_at)
        .bind(i64::from(fact.time_spent_secs))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(res.rows_affected() == 1)
    }

    async fn completed_topics(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<HashSet<TopicId>, StorageError> {
        let rows = sqlx::query(
            "SELECT topic_id FROM completions WHERE student_id = ?1 AND course_id = ?2",
        )
        .bind(student_text(student))
        .bind(id_i64("course_id", course.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| topic_id_from_i64(row.try_get("topic_id").map_err(ser)?))
            .collect()
    }

    async fn toggle_bookmark(
        &self,
        student: StudentId,
        topic: TopicId,
    ) -> Result<bool, StorageError> {
        let row = sqlx::query(
            r"
            INSERT INTO bookmarks (student_id, topic_id, active)
            VALUES (?1, ?2, 1)
            ON CONFLICT(student_id, topic_id) DO UPDATE SET active = 1 - active
            RETURNING active
            ",
        )
        .bind(student_text(student))
        .bind(id_i64("topic_id", topic.value())?)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_get::<bool, _>("active").map_err(ser)
    }

    async fn bookmarked_topics(&self, student: StudentId) -> Result<HashSet<TopicId>, StorageError> {
        let rows = sqlx::query("SELECT topic_id FROM bookmarks WHERE student_id = ?1 AND active = 1")
            .bind(student_text(student))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter()
            .map(|row| topic_id_from_i64(row.try_get("topic_id").map_err(ser)?))
            .collect()
    }

    async fn record_quiz_pass(&self, fact: &QuizPassFact) -> Result<bool, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO quiz_passes (student_id, quiz_id, course_id, passed_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(student_id, quiz_id) DO NOTHING
            ",
        )
        .bind(student_text(fact.student_id))
        .bind(id_i64("quiz_id", fact.quiz_id.value())?)
        .bind(id_i64("course_id", fact.course_id.value())?)
        .bind(fact.passed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(res.rows_affected() == 1)
    }

    async fn passed_quizzes(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<HashSet<QuizId>, StorageError> {
        let rows = sqlx::query(
            "SELECT quiz_id FROM quiz_passes WHERE student_id = ?1 AND course_id = ?2",
        )
        .bind(student_text(student))
        .bind(id_i64("course_id", course.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| quiz_id_from_i64(row.try_get("quiz_id").map_err(ser)?))
            .collect()
    }
}
