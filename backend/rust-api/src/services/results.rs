use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::models::quiz::{CategoryStat, QuizResults};
use crate::models::{Difficulty, QuizSession};
use crate::services::question_generator::KNOWLEDGE_DOMAINS;

const RECOMMEND_INTERMEDIATE_AT: f64 = 75.0;
const RECOMMEND_ADVANCED_AT: f64 = 80.0;

/// Final (or early) results for a session. Breakdowns use the domain and difficulty
/// recorded on each answer.
pub fn compute_results(session: &QuizSession, passing_score: u32, now: DateTime<Utc>) -> QuizResults {
    let total = session.total_questions;
    // Thresholds compare the unrounded ratio; only the reported figure is rounded
    let accuracy = if total == 0 {
        0.0
    } else {
        f64::from(session.correct_answers) / f64::from(total) * 100.0
    };
    let time_spent = session.elapsed_seconds(now);
    let average_time_per_question = if total == 0 {
        0.0
    } else {
        round2(time_spent as f64 / f64::from(total))
    };

    QuizResults {
        session_id: session.session_id.clone(),
        total_questions: total,
        answered_questions: session.current_question_index,
        correct_answers: session.correct_answers,
        score: session.score,
        accuracy: round2(accuracy),
        time_spent,
        average_time_per_question,
        difficulty: session.difficulty,
        breakdown: domain_breakdown(session),
        difficulty_breakdown: difficulty_breakdown(session),
        feedback: feedback_for(accuracy).to_string(),
        passed: accuracy >= f64::from(passing_score),
        recommended_difficulty: recommended_difficulty(session.difficulty, accuracy),
        is_completed: session.is_completed,
    }
}

fn domain_breakdown(session: &QuizSession) -> BTreeMap<String, CategoryStat> {
    let mut breakdown: BTreeMap<String, CategoryStat> = KNOWLEDGE_DOMAINS
        .iter()
        .map(|domain| (domain.to_string(), CategoryStat::default()))
        .collect();

    for answer in &session.answers {
        let stat = breakdown.entry(answer.domain.clone()).or_default();
        stat.total += 1;
        if answer.is_correct {
            stat.correct += 1;
        }
    }
    breakdown
}

fn difficulty_breakdown(session: &QuizSession) -> BTreeMap<Difficulty, CategoryStat> {
    let mut breakdown: BTreeMap<Difficulty, CategoryStat> = Difficulty::ALL
        .iter()
        .map(|level| (*level, CategoryStat::default()))
        .collect();

    for answer in &session.answers {
        let stat = breakdown.entry(answer.difficulty).or_default();
        stat.total += 1;
        if answer.is_correct {
            stat.correct += 1;
        }
    }
    breakdown
}

pub fn feedback_for(accuracy: f64) -> &'static str {
    if accuracy >= 80.0 {
        "Excellent work! You have a strong grasp of these topics."
    } else if accuracy >= 60.0 {
        "Good job! Review the explanations for the questions you missed."
    } else if accuracy >= 40.0 {
        "You're on track. Focus on the domains where you lost points."
    } else {
        "Keep learning! Study the fundamentals and try again."
    }
}

pub fn recommended_difficulty(current: Difficulty, accuracy: f64) -> Option<Difficulty> {
    match current {
        Difficulty::Beginner if accuracy >= RECOMMEND_INTERMEDIATE_AT => {
            Some(Difficulty::Intermediate)
        }
        Difficulty::Intermediate if accuracy >= RECOMMEND_ADVANCED_AT => Some(Difficulty::Advanced),
        _ => None,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Question, UserAnswer};

    fn question() -> Question {
        Question {
            id: "q_0".to_string(),
            question: "q".to_string(),
            options: ["a", "b", "c", "d"].map(String::from),
            correct_answer: 0,
            explanation: String::new(),
            difficulty: Difficulty::Beginner,
            topic: "Amazon Bedrock".to_string(),
            domain: "Generative AI".to_string(),
        }
    }

    fn answered_session(outcomes: &[(bool, &str, Difficulty)]) -> QuizSession {
        let start = Utc::now() - chrono::Duration::seconds(100);
        let mut session = QuizSession::new(
            "s".to_string(),
            outcomes.len() as u32,
            Difficulty::Beginner,
            None,
            question(),
            start,
        );
        for (i, (correct, domain, difficulty)) in outcomes.iter().enumerate() {
            session.record_answer(
                UserAnswer {
                    question_id: format!("q_{}", i),
                    selected_answer: 0,
                    is_correct: *correct,
                    time_spent: 10.0,
                    timestamp: start,
                    difficulty: *difficulty,
                    topic: "Amazon Bedrock".to_string(),
                    domain: domain.to_string(),
                },
                start + chrono::Duration::seconds(100),
            );
        }
        session
    }

    #[test]
    fn breakdown_tracks_real_domains() {
        let session = answered_session(&[
            (true, "Generative AI", Difficulty::Beginner),
            (false, "Generative AI", Difficulty::Intermediate),
            (true, "Responsible AI", Difficulty::Intermediate),
            (true, "Quantum Computing", Difficulty::Advanced),
        ]);
        let results = compute_results(&session, 70, Utc::now());

        assert_eq!(
            results.breakdown["Generative AI"],
            CategoryStat {
                correct: 1,
                total: 2
            }
        );
        assert_eq!(results.breakdown["AI Services"], CategoryStat::default());
        assert_eq!(results.breakdown["Quantum Computing"].correct, 1);
        assert_eq!(results.breakdown.len(), 5);
        assert_eq!(
            results.difficulty_breakdown[&Difficulty::Intermediate],
            CategoryStat {
                correct: 1,
                total: 2
            }
        );
        assert_eq!(results.accuracy, 75.0);
        assert!(results.passed);
        assert_eq!(results.recommended_difficulty, Some(Difficulty::Intermediate));
        assert_eq!(results.time_spent, 100);
        assert_eq!(results.average_time_per_question, 25.0);
    }

    #[test]
    fn feedback_band_boundaries() {
        assert!(feedback_for(80.0).starts_with("Excellent"));
        assert!(feedback_for(79.99).starts_with("Good"));
        assert!(feedback_for(60.0).starts_with("Good"));
        assert!(feedback_for(40.0).starts_with("You're on track"));
        assert!(feedback_for(39.9).starts_with("Keep learning"));
    }

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(recommended_difficulty(Difficulty::Beginner, 74.9), None);
        assert_eq!(
            recommended_difficulty(Difficulty::Intermediate, 80.0),
            Some(Difficulty::Advanced)
        );
        assert_eq!(recommended_difficulty(Difficulty::Intermediate, 79.0), None);
        assert_eq!(recommended_difficulty(Difficulty::Advanced, 100.0), None);
    }

    #[test]
    fn thresholds_use_unrounded_accuracy() {
        let mut session = answered_session(&[(true, "AI Services", Difficulty::Intermediate)]);
        session.difficulty = Difficulty::Intermediate;
        session.correct_answers = 39_999;
        session.total_questions = 50_000;

        let results = compute_results(&session, 80, Utc::now());

        // 79.998 is reported as 80.00 but stays below every 80% threshold
        assert_eq!(results.accuracy, 80.0);
        assert!(results.feedback.starts_with("Good"));
        assert!(!results.passed);
        assert_eq!(results.recommended_difficulty, None);
    }

    #[test]
    fn accuracy_uses_total_questions_not_answered() {
        let mut session = answered_session(&[(true, "AI Services", Difficulty::Beginner)]);
        session.total_questions = 10;
        session.is_completed = false;
        session.end_time = None;
        let results = compute_results(&session, 70, Utc::now());
        assert_eq!(results.accuracy, 10.0);
        assert_eq!(results.score, 100);
        assert!(!results.passed);
        assert!(!results.is_completed);
    }
}
