use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::{Difficulty, Question, QuizSession};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuizRequest {
    /// Parsed explicitly so an unknown level produces a validation error rather than a body rejection.
    pub difficulty: Option<String>,
    pub user_id: Option<String>,
}

/// A question as handed to the client, with its 1-based position in the quiz.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    #[serde(flatten)]
    pub question: Question,
    pub question_number: u32,
}

impl QuestionView {
    pub fn new(question: Question, question_number: u32) -> Self {
        Self {
            question,
            question_number,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuizResponse {
    pub session_id: String,
    pub total_questions: u32,
    /// Seconds.
    pub time_limit: u64,
    pub first_question: QuestionView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub current_question_index: u32,
    pub total_questions: u32,
    pub score: u32,
    pub correct_answers: u32,
    pub difficulty: Difficulty,
    pub is_completed: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&QuizSession> for SessionStatusResponse {
    fn from(session: &QuizSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            current_question_index: session.current_question_index,
            total_questions: session.total_questions,
            score: session.score,
            correct_answers: session.correct_answers,
            difficulty: session.difficulty,
            is_completed: session.is_completed,
            start_time: session.start_time,
            end_time: session.end_time,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionProgress {
    /// 1-based number of the question being served.
    pub current_question: u32,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub score: u32,
    pub time_remaining: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextQuestionResponse {
    pub question: QuestionView,
    pub progress: QuestionProgress,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, message = "sessionId is required"))]
    pub session_id: String,

    #[validate(length(min = 1, message = "questionId is required"))]
    pub question_id: String,

    #[validate(range(
        min = 0,
        max = 3,
        message = "Invalid answer selection. Must be between 0 and 3"
    ))]
    pub selected_answer: i64,

    #[validate(range(min = 0.0, message = "timeSpent must not be negative"))]
    pub time_spent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub current_question_index: u32,
    pub total_questions: u32,
    pub score: u32,
    pub correct_answers: u32,
}

impl From<&QuizSession> for SessionProgress {
    fn from(session: &QuizSession) -> Self {
        Self {
            current_question_index: session.current_question_index,
            total_questions: session.total_questions,
            score: session.score,
            correct_answers: session.correct_answers,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerResponse {
    pub is_correct: bool,
    pub correct_answer: usize,
    pub explanation: String,
    pub session_progress: SessionProgress,
    pub is_quiz_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_question: Option<QuestionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_results: Option<QuizResults>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStat {
    pub correct: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResults {
    pub session_id: String,
    pub total_questions: u32,
    pub answered_questions: u32,
    pub correct_answers: u32,
    pub score: u32,
    /// correct_answers / total_questions * 100.
    pub accuracy: f64,
    /// Whole seconds between start and end (or now, while still open).
    pub time_spent: i64,
    pub average_time_per_question: f64,
    pub difficulty: Difficulty,
    pub breakdown: BTreeMap<String, CategoryStat>,
    pub difficulty_breakdown: BTreeMap<Difficulty, CategoryStat>,
    pub feedback: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_difficulty: Option<Difficulty>,
    pub is_completed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSummary {
    pub question_id: String,
    pub is_correct: bool,
    pub time_spent: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub session_id: String,
    pub current_question: u32,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub score: u32,
    pub time_remaining: u64,
    pub is_completed: bool,
    pub answers: Vec<AnswerSummary>,
}
