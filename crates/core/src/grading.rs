//! Scoring of submitted answers against a quiz definition.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Answer, GradedAnswer, Question, QuestionId, QuestionType, Quiz, rounded_percent};

//
// ─── SHORT-ANSWER POLICY ───────────────────────────────────────────────────────
//

/// What a short-answer grader decided for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortAnswerVerdict {
    /// No decision; the answer earns nothing and is not marked correct.
    Ungraded,
    /// Award the given points. Values above the question's worth are capped.
    Award(u32),
}

/// Pluggable policy for free-text questions, which cannot be auto-graded from options.
pub trait ShortAnswerGrader: Send + Sync {
    fn grade(&self, question: &Question, answer: &str) -> ShortAnswerVerdict;
}

/// Default policy: short answers are accepted but earn no points.
#[derive(Debug, Clone, Copy, Default)]
pub struct UngradedShortAnswers;

impl ShortAnswerGrader for UngradedShortAnswers {
    fn grade(&self, _question: &Question, _answer: &str) -> ShortAnswerVerdict {
        ShortAnswerVerdict::Ungraded
    }
}

/// Awards full points when the trimmed answer equals the question's model answer,
/// ignoring ASCII case. Questions without a model answer stay ungraded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatchGrader;

impl ShortAnswerGrader for ExactMatchGrader {
    fn grade(&self, question: &Question, answer: &str) -> ShortAnswerVerdict {
        match question.model_answer() {
            Some(expected) if expected.trim().eq_ignore_ascii_case(answer.trim()) => {
                ShortAnswerVerdict::Award(question.points())
            }
            Some(_) => ShortAnswerVerdict::Award(0),
            None => ShortAnswerVerdict::Ungraded,
        }
    }
}

//
// ─── OUTCOME ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeOutcome {
    pub answers: Vec<GradedAnswer>,
    pub points_earned: u32,
    pub total_points: u32,
    pub score: u8,
    pub passed: bool,
}

/// Grade a submission.
///
/// Answers naming a question outside the quiz are dropped. Questions left
/// unanswered score zero and are absent from the breakdown. The breakdown follows
/// the quiz's question order.
#[must_use]
pub fn grade_submission(
    quiz: &Quiz,
    answers: &[Answer],
    grader: &dyn ShortAnswerGrader,
) -> GradeOutcome {
    let by_question: HashMap<QuestionId, &Answer> =
        answers.iter().map(|a| (a.question_id, a)).collect();

    let mut graded = Vec::with_capacity(answers.len());
    let mut points_earned = 0_u32;

    for question in quiz.questions() {
        let Some(answer) = by_question.get(&question.id()) else {
            continue;
        };
        let (is_correct, points) = grade_one(question, answer, grader);
        points_earned = points_earned.saturating_add(points);
        graded.push(GradedAnswer {
            question_id: question.id(),
            selected_option: answer.selected_option,
            text_answer: answer.text_answer.clone(),
            is_correct,
            points_earned: points,
        });
    }

    let total_points = quiz.total_points();
    let score = rounded_percent(points_earned, total_points);
    GradeOutcome {
        answers: graded,
        points_earned,
        total_points,
        score,
        passed: score >= quiz.passing_score(),
    }
}

fn grade_one(question: &Question, answer: &Answer, grader: &dyn ShortAnswerGrader) -> (bool, u32) {
    match question.kind() {
        QuestionType::MultipleChoice | QuestionType::TrueFalse => {
            let correct = answer.selected_option.is_some()
                && answer.selected_option == question.correct_option();
            (correct, if correct { question.points() } else { 0 })
        }
        QuestionType::ShortAnswer => match answer.text_answer.as_deref() {
            Some(text) if !text.trim().is_empty() => match grader.grade(question, text) {
                ShortAnswerVerdict::Ungraded => (false, 0),
                ShortAnswerVerdict::Award(points) => {
                    let points = points.min(question.points());
                    (points > 0 && points == question.points(), points)
                }
            },
            _ => (false, 0),
        },
    }
}

//
// ─── REVEAL POLICY ─────────────────────────────────────────────────────────────
//

/// Decides when a graded result may include correct answers and explanations.
///
/// A passing attempt always reveals; a failing one reveals only when
/// `show_correct_answers` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealPolicy {
    pub show_correct_answers: bool,
}

impl RevealPolicy {
    #[must_use]
    pub fn reveals(self, passed: bool) -> bool {
        passed || self.show_correct_answers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectAnswer {
    pub question_id: QuestionId,
    pub correct_option: Option<usize>,
    pub correct_text: Option<String>,
    pub explanation: Option<String>,
}

#[must_use]
pub fn correct_answers(quiz: &Quiz) -> Vec<CorrectAnswer> {
    quiz.questions()
        .iter()
        .map(|q| CorrectAnswer {
            question_id: q.id(),
            correct_option: q.correct_option(),
            correct_text: match q.kind() {
                QuestionType::ShortAnswer => q.model_answer().map(str::to_owned),
                _ => q.correct_option().map(|i| q.options()[i].text.clone()),
            },
            explanation: q.explanation().map(str::to_owned),
        })
        .collect()
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
