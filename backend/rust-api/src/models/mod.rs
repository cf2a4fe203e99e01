use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod envelope;
pub mod quiz;

/// Question difficulty, ordered from easiest to hardest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [
        Difficulty::Beginner,
        Difficulty::Intermediate,
        Difficulty::Advanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// One level up, saturating at `Advanced`.
    pub fn promoted(self) -> Self {
        match self {
            Difficulty::Beginner => Difficulty::Intermediate,
            Difficulty::Intermediate | Difficulty::Advanced => Difficulty::Advanced,
        }
    }

    /// One level down, saturating at `Beginner`.
    pub fn demoted(self) -> Self {
        match self {
            Difficulty::Advanced => Difficulty::Intermediate,
            Difficulty::Intermediate | Difficulty::Beginner => Difficulty::Beginner,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            other => Err(format!(
                "Invalid difficulty level '{}'. Must be 'beginner', 'intermediate', or 'advanced'",
                other
            )),
        }
    }
}

/// A generated multiple-choice question. Immutable once returned by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question: String,
    pub options: [String; 4],
    /// Zero-based index into `options`, always in `0..=3`.
    pub correct_answer: usize,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub topic: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_id: String,
    pub selected_answer: usize,
    pub is_correct: bool,
    /// Seconds the user spent on the question.
    pub time_spent: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub domain: String,
}

/// Lifecycle position of a session, derived from its counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    pub session_id: String,
    pub current_question_index: u32,
    pub total_questions: u32,
    /// Running percentage: round(correct_answers / current_question_index * 100).
    pub score: u32,
    pub correct_answers: u32,
    pub answers: Vec<UserAnswer>,
    /// Nominal level the session was started with.
    pub difficulty: Difficulty,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub user_id: Option<String>,
    pub current_question: Option<Question>,
    /// Bumped on every persisted mutation; used for optimistic concurrency in the store.
    #[serde(default)]
    pub version: u64,
}

impl QuizSession {
    pub fn new(
        session_id: String,
        total_questions: u32,
        difficulty: Difficulty,
        user_id: Option<String>,
        first_question: Question,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            current_question_index: 0,
            total_questions,
            score: 0,
            correct_answers: 0,
            answers: Vec::new(),
            difficulty,
            start_time: now,
            end_time: None,
            is_completed: false,
            user_id,
            current_question: Some(first_question),
            version: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.is_completed {
            SessionState::Completed
        } else if self.current_question_index == 0 {
            SessionState::NotStarted
        } else {
            SessionState::InProgress
        }
    }

    /// Ids of every question already answered in this session.
    pub fn answered_question_ids(&self) -> Vec<String> {
        self.answers.iter().map(|a| a.question_id.clone()).collect()
    }

    pub fn seen_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for answer in &self.answers {
            if !answer.topic.is_empty() && !topics.contains(&answer.topic) {
                topics.push(answer.topic.clone());
            }
        }
        topics
    }

    /// Appends an answer and advances the session. Completes the session when the
    /// last question has been answered; the current question is always cleared.
    pub fn record_answer(&mut self, answer: UserAnswer, now: DateTime<Utc>) {
        if answer.is_correct {
            self.correct_answers += 1;
        }
        self.answers.push(answer);
        self.current_question_index += 1;
        self.score = percentage(self.correct_answers, self.current_question_index);
        self.current_question = None;

        if self.current_question_index >= self.total_questions {
            self.is_completed = true;
            self.end_time = Some(now);
        }
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_seconds().max(0)
    }

    /// Seconds left of the time limit, frozen once the session has ended.
    pub fn time_remaining(&self, time_limit_seconds: u64, now: DateTime<Utc>) -> u64 {
        time_limit_seconds.saturating_sub(self.elapsed_seconds(now) as u64)
    }
}

/// Rounded integer percentage of `part / whole`; zero when `whole` is zero.
pub fn percentage(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            question: "What is Amazon SageMaker?".to_string(),
            options: [
                "A managed ML platform".to_string(),
                "A DNS service".to_string(),
                "A CDN".to_string(),
                "A queue".to_string(),
            ],
            correct_answer: 0,
            explanation: "SageMaker builds, trains and deploys models.".to_string(),
            difficulty: Difficulty::Beginner,
            topic: "Amazon SageMaker".to_string(),
            domain: "AI Services".to_string(),
        }
    }

    fn answer(id: &str, correct: bool) -> UserAnswer {
        UserAnswer {
            question_id: id.to_string(),
            selected_answer: if correct { 0 } else { 1 },
            is_correct: correct,
            time_spent: 4.0,
            timestamp: Utc::now(),
            difficulty: Difficulty::Beginner,
            topic: "Amazon SageMaker".to_string(),
            domain: "AI Services".to_string(),
        }
    }

    #[test]
    fn difficulty_parses_case_insensitively() {
        assert_eq!("Advanced".parse::<Difficulty>(), Ok(Difficulty::Advanced));
        assert!("expert".parse::<Difficulty>().is_err());
    }

    #[test]
    fn promotion_and_demotion_saturate() {
        assert_eq!(Difficulty::Advanced.promoted(), Difficulty::Advanced);
        assert_eq!(Difficulty::Beginner.demoted(), Difficulty::Beginner);
        assert_eq!(Difficulty::Beginner.promoted(), Difficulty::Intermediate);
        assert_eq!(Difficulty::Advanced.demoted(), Difficulty::Intermediate);
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn record_answer_completes_on_last_question() {
        let now = Utc::now();
        let mut session = QuizSession::new(
            "s-1".to_string(),
            2,
            Difficulty::Beginner,
            None,
            question("q_1"),
            now,
        );
        assert_eq!(session.state(), SessionState::NotStarted);

        session.record_answer(answer("q_1", true), now);
        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.score, 100);
        assert!(session.end_time.is_none());
        assert!(session.current_question.is_none());

        session.record_answer(answer("q_2", false), now);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.score, 50);
        assert!(session.end_time.is_some());
        assert_eq!(session.answered_question_ids(), vec!["q_1", "q_2"]);
    }

    #[test]
    fn time_remaining_never_underflows() {
        let start = Utc::now() - chrono::Duration::hours(2);
        let session = QuizSession::new(
            "s-2".to_string(),
            10,
            Difficulty::Beginner,
            None,
            question("q_1"),
            start,
        );
        assert_eq!(session.time_remaining(1800, Utc::now()), 0);
    }
}
