use course_core::model::{Course, CourseId, Quiz, QuizId, TopicId};
use sqlx::Row;

use super::{
    SqliteRepository, db_err,
    mapping::{course_id_from_i64, from_document, id_i64, ser, to_document},
};
use crate::repository::{CatalogRepository, StorageError};

const UPSERT_QUIZ: &str = r"
    INSERT INTO quizzes (id, course_id, document)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(id) DO UPDATE SET
        course_id = excluded.course_id,
        document = excluded.document
";

#[async_trait::async_trait]
impl CatalogRepository for SqliteRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        let course_id = id_i64("course_id", course.id().value())?;
        let document = to_document(course)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r"
            INSERT INTO courses (id, title, document)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                document = excluded.document
            ",
        )
        .bind(course_id)
        .bind(course.title())
        .bind(document)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM course_topics WHERE course_id = ?1")
            .bind(course_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        // A topic claimed by another course trips the primary key and rolls back.
        for topic in course.topics() {
            sqlx::query("INSERT INTO course_topics (topic_id, course_id) VALUES (?1, ?2)")
                .bind(id_i64("topic_id", topic.id().value())?)
                .bind(course_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        for quiz in course.embedded_quizzes() {
            sqlx::query(UPSERT_QUIZ)
                .bind(id_i64("quiz_id", quiz.id().value())?)
                .bind(course_id)
                .bind(to_document(quiz)?)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError> {
        let row = sqlx::query("SELECT document FROM courses WHERE id = ?1")
            .bind(id_i64("course_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        let course: Course = from_document(&row.try_get::<String, _>("document").map_err(ser)?)?;
        course.validate().map_err(ser)?;
        Ok(course)
    }

    async fn course_for_topic(&self, topic: TopicId) -> Result<CourseId, StorageError> {
        let row = sqlx::query("SELECT course_id FROM course_topics WHERE topic_id = ?1")
            .bind(id_i64("topic_id", topic.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        course_id_from_i64(row.try_get("course_id").map_err(ser)?)
    }

    async fn upsert_quiz(&self, quiz: &Quiz) -> Result<(), StorageError> {
        sqlx::query(UPSERT_QUIZ)
            .bind(id_i64("quiz_id", quiz.id().value())?)
            .bind(id_i64("course_id", quiz.course_id().value())?)
            .bind(to_document(quiz)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError> {
        let row = sqlx::query("SELECT document FROM quizzes WHERE id = ?1")
            .bind(id_i64("quiz_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        let quiz: Quiz = from_document(&row.try_get::<String, _>("document").map_err(ser)?)?;
        quiz.validate().map_err(ser)?;
        Ok(quiz)
    }

    async fn quizzes_for_course(&self, course: CourseId) -> Result<Vec<Quiz>, StorageError> {
        let rows = sqlx::query("SELECT document FROM quizzes WHERE course_id = ?1 ORDER BY id ASC")
            .bind(id_i64("course_id", course.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(from_document::<Quiz>(
                &row.try_get::<String, _>("document").map_err(ser)?,
            )?);
        }
        Ok(out)
    }
}
