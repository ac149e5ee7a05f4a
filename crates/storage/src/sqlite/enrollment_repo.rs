use chrono::{DateTime, Utc};
use course_core::model::{CourseId, Enrollment, StudentId, Subscription};

use super::{
    SqliteRepository, db_err,
    mapping::{id_i64, map_enrollment_row, map_subscription_row, student_text},
};
use crate::repository::{EnrollmentRepository, StorageError};

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn ensure_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(Enrollment, bool), StorageError> {
        let student = student_text(student);
        let course = id_i64("course_id", course.value())?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO enrollments (student_id, course_id, enrolled_at, last_accessed_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(student_id, course_id) DO NOTHING
            ",
        )
        .bind(student.as_str())
        .bind(course)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        let row = sqlx::query(
            r"
            SELECT student_id, course_id, enrolled_at, last_accessed_at
            FROM enrollments
            WHERE student_id = ?1 AND course_id = ?2
            ",
        )
        .bind(student.as_str())
        .bind(course)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok((map_enrollment_row(&row)?, inserted > 0))
    }

    async fn get_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT student_id, course_id, enrolled_at, last_accessed_at
            FROM enrollments
            WHERE student_id = ?1 AND course_id = ?2
            ",
        )
        .bind(student_text(student))
        .bind(id_i64("course_id", course.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_enrollment_row).transpose()
    }

    async fn list_enrollments(&self, student: StudentId) -> Result<Vec<Enrollment>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT student_id, course_id, enrolled_at, last_accessed_at
            FROM enrollments
            WHERE student_id = ?1
            ORDER BY enrolled_at ASC, course_id ASC
            ",
        )
        .bind(student_text(student))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_enrollment_row(&row)?);
        }
        Ok(out)
    }

    async fn touch_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE enrollments
            SET last_accessed_at = MAX(last_accessed_at, ?3)
            WHERE student_id = ?1 AND course_id = ?2
            ",
        )
        .bind(student_text(student))
        .bind(id_i64("course_id", course.value())?)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_subscription(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Option<Subscription>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT student_id, course_id, kind, payment_method, transaction_id, activated_at
            FROM subscriptions
            WHERE student_id = ?1 AND course_id = ?2
            ",
        )
        .bind(student_text(student))
        .bind(id_i64("course_id", course.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_subscription_row).transpose()
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO subscriptions (
                student_id, course_id, kind, payment_method, transaction_id, activated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(student_id, course_id) DO UPDATE SET
                kind = excluded.kind,
                payment_method = excluded.payment_method,
                transaction_id = excluded.transaction_id,
                activated_at = excluded.activated_at
            ",
        )
        .bind(student_text(subscription.student_id))
        .bind(id_i64("course_id", subscription.course_id.value())?)
        .bind(subscription.kind.as_str())
        .bind(subscription.payment_method.as_str())
        .bind(subscription.transaction_id.as_deref())
        .bind(subscription.activated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
