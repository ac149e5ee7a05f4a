use course_core::model::{
    AttemptStatus, CourseId, Enrollment, GradedAnswer, PaymentMethod, QuizAttempt, QuizId,
    StudentId, Subscription, SubscriptionType,
};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn student_text(student: StudentId) -> String {
    student.value().to_string()
}

pub(crate) fn student_from_text(raw: &str) -> Result<StudentId, StorageError> {
    raw.parse::<StudentId>().map_err(ser)
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(i64_to_u64("quiz_id", v)?))
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn from_document<T: DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

pub(crate) fn map_enrollment_row(row: &sqlx::sqlite::SqliteRow) -> Result<Enrollment, StorageError> {
    Ok(Enrollment {
        student_id: student_from_text(&row.try_get::<String, _>("student_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        enrolled_at: row.try_get("enrolled_at").map_err(ser)?,
        last_accessed_at: row.try_get("last_accessed_at").map_err(ser)?,
    })
}

pub(crate) fn map_subscription_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<Subscription, StorageError> {
    let kind: String = row.try_get("kind").map_err(ser)?;
    let method: String = row.try_get("payment_method").map_err(ser)?;
    Ok(Subscription {
        student_id: student_from_text(&row.try_get::<String, _>("student_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        kind: SubscriptionType::parse(&kind)
            .ok_or_else(|| StorageError::Serialization(format!("invalid kind: {kind}")))?,
        payment_method: PaymentMethod::parse(&method).ok_or_else(|| {
            StorageError::Serialization(format!("invalid payment_method: {method}"))
        })?,
        transaction_id: row.try_get("transaction_id").map_err(ser)?,
        activated_at: row.try_get("activated_at").map_err(ser)?,
    })
}

pub(crate) fn map_attempt_row(row: &sqlx::sqlite::SqliteRow) -> Result<QuizAttempt, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    let answers: Vec<GradedAnswer> =
        from_document(&row.try_get::<String, _>("answers").map_err(ser)?)?;
    let score = i64_to_u32("score", row.try_get("score").map_err(ser)?)?;

    Ok(QuizAttempt {
        student_id: student_from_text(&row.try_get::<String, _>("student_id").map_err(ser)?)?,
        quiz_id: quiz_id_from_i64(row.try_get("quiz_id").map_err(ser)?)?,
        attempt_number: i64_to_u32("attempt_number", row.try_get("attempt_number").map_err(ser)?)?,
        status: AttemptStatus::parse(&status)
            .ok_or_else(|| StorageError::Serialization(format!("invalid status: {status}")))?,
        answers,
        time_spent_secs: i64_to_u32(
            "time_spent_secs",
            row.try_get("time_spent_secs").map_err(ser)?,
        )?,
        started_at: row.try_get("started_at").map_err(ser)?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
        score: u8::try_from(score)
            .map_err(|_| StorageError::Serialization(format!("invalid score: {score}")))?,
        points_earned: i64_to_u32("points_earned", row.try_get("points_earned").map_err(ser)?)?,
        total_points: i64_to_u32("total_points", row.try_get("total_points").map_err(ser)?)?,
        passed: row.try_get("passed").map_err(ser)?,
    })
}
