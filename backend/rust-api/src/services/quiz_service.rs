use chrono::Utc;
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::config::QuizConfig;
use crate::error::{QuizError, StoreError};
use crate::metrics;
use crate::models::quiz::{
    AnswerSummary, NextQuestionResponse, ProgressResponse, QuestionProgress, QuestionView,
    QuizResults, SessionProgress, SessionStatusResponse, StartQuizResponse, SubmitAnswerRequest,
    SubmitAnswerResponse,
};
use crate::models::{Difficulty, Question, QuizSession, UserAnswer};
use crate::services::difficulty::DifficultyLadder;
use crate::services::question_generator::{GenerationRequest, QuestionGenerator, TOPIC_CATALOG};
use crate::services::results::compute_results;
use crate::services::session_store::SessionStore;

/// Session lifecycle: start, fetch the current question, submit answers, read results.
///
/// Mutating operations on one session are serialized through a per-session async lock,
/// and every write is a version compare-and-set in the store.
pub struct QuizService {
    store: Arc<dyn SessionStore>,
    generator: QuestionGenerator,
    ladder: DifficultyLadder,
    quiz: QuizConfig,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl QuizService {
    pub fn new(store: Arc<dyn SessionStore>, generator: QuestionGenerator, quiz: QuizConfig) -> Self {
        Self {
            store,
            generator,
            ladder: quiz.ladder(),
            quiz,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(
        &self,
        difficulty: Option<Difficulty>,
        user_id: Option<String>,
    ) -> Result<StartQuizResponse, QuizError> {
        let difficulty = difficulty.unwrap_or_default();
        let request = GenerationRequest {
            difficulty,
            topic: Some(pick_topic(&[])),
            ..Default::default()
        };
        let first = self
            .generator
            .generate(&request)
            .await
            .map_err(QuizError::SessionCreation)?;

        let session = QuizSession::new(
            Uuid::new_v4().to_string(),
            self.quiz.total_questions,
            difficulty,
            user_id,
            first.clone(),
            Utc::now(),
        );
        self.store.create(&session).await?;
        metrics::record_session_event("started");

        tracing::info!(
            "Session {} started at {} difficulty ({} questions)",
            session.session_id,
            difficulty,
            session.total_questions
        );

        Ok(StartQuizResponse {
            session_id: session.session_id,
            total_questions: session.total_questions,
            time_limit: self.quiz.time_limit_seconds(),
            first_question: QuestionView::new(first, 1),
        })
    }

    pub async fn get_session_status(&self, session_id: &str) -> Result<SessionStatusResponse, QuizError> {
        let session = self.load(session_id).await?;
        Ok(SessionStatusResponse::from(&session))
    }

    pub async fn get_next_question(&self, session_id: &str) -> Result<NextQuestionResponse, QuizError> {
        let (_guard, mut session) = self.lock_and_load(session_id).await?;
        if session.is_completed || session.current_question_index >= session.total_questions {
            return Err(QuizError::QuizAlreadyCompleted(session_id.to_string()));
        }

        if self.fill_current_question(&mut session).await? {
            self.save(&mut session).await?;
        }
        let question = session
            .current_question
            .clone()
            .ok_or_else(|| QuizError::QuizAlreadyCompleted(session_id.to_string()))?;

        let now = Utc::now();
        Ok(NextQuestionResponse {
            question: QuestionView::new(question, session.current_question_index + 1),
            progress: QuestionProgress {
                current_question: session.current_question_index + 1,
                total_questions: session.total_questions,
                correct_answers: session.correct_answers,
                score: session.score,
                time_remaining: session.time_remaining(self.quiz.time_limit_seconds(), now),
            },
        })
    }

    /// Records an answer for the current question. When the quiz continues, the next
    /// question is generated before anything is persisted; a generation failure leaves
    /// the session untouched so the same submission can be retried.
    pub async fn submit_answer(
        &self,
        request: SubmitAnswerRequest,
    ) -> Result<SubmitAnswerResponse, QuizError> {
        request
            .validate()
            .map_err(|e| QuizError::Validation(validation_message(&e)))?;
        let selected_answer = usize::try_from(request.selected_answer)
            .map_err(|_| QuizError::Validation("Invalid answer selection".to_string()))?;

        let session_id = request.session_id.as_str();
        let (_guard, session) = self.lock_and_load(session_id).await?;
        if session.is_completed {
            return Err(QuizError::QuizAlreadyCompleted(session_id.to_string()));
        }
        let question: Question = session
            .current_question
            .clone()
            .filter(|q| q.id == request.question_id)
            .ok_or_else(|| {
                tracing::warn!(
                    "Session {}: answer for {} does not match the current question",
                    session_id,
                    request.question_id
                );
                QuizError::QuestionMismatch {
                    session_id: session_id.to_string(),
                    received: request.question_id.clone(),
                }
            })?;

        let now = Utc::now();
        let is_correct = selected_answer == question.correct_answer;
        let mut updated = session;
        updated.record_answer(
            UserAnswer {
                question_id: question.id.clone(),
                selected_answer,
                is_correct,
                time_spent: request.time_spent.unwrap_or(0.0),
                timestamp: now,
                difficulty: question.difficulty,
                topic: question.topic.clone(),
                domain: question.domain.clone(),
            },
            now,
        );

        if !updated.is_completed {
            self.fill_current_question(&mut updated).await?;
        }
        self.save(&mut updated).await?;

        metrics::record_answer(is_correct);
        tracing::info!(
            "Session {}: question {} answered {} ({}/{}, score {})",
            session_id,
            updated.current_question_index,
            if is_correct { "correctly" } else { "incorrectly" },
            updated.correct_answers,
            updated.total_questions,
            updated.score
        );

        let final_results = if updated.is_completed {
            metrics::record_session_event("completed");
            tracing::info!("Session {} completed with score {}", session_id, updated.score);
            Some(compute_results(&updated, self.quiz.passing_score, now))
        } else {
            None
        };

        Ok(SubmitAnswerResponse {
            is_correct,
            correct_answer: question.correct_answer,
            explanation: question.explanation,
            session_progress: SessionProgress::from(&updated),
            is_quiz_completed: updated.is_completed,
            next_question: updated
                .current_question
                .clone()
                .map(|q| QuestionView::new(q, updated.current_question_index + 1)),
            final_results,
        })
    }

    /// Available once at least one answer has been recorded, even before completion.
    pub async fn get_results(&self, session_id: &str) -> Result<QuizResults, QuizError> {
        let session = self.load(session_id).await?;
        if session.current_question_index == 0 && !session.is_completed {
            return Err(QuizError::QuizNotStarted(session_id.to_string()));
        }
        Ok(compute_results(&session, self.quiz.passing_score, Utc::now()))
    }

    pub async fn get_progress(&self, session_id: &str) -> Result<ProgressResponse, QuizError> {
        let session = self.load(session_id).await?;
        let current_question = if session.is_completed {
            session.total_questions
        } else {
            session.current_question_index + 1
        };

        Ok(ProgressResponse {
            session_id: session.session_id.clone(),
            current_question,
            total_questions: session.total_questions,
            correct_answers: session.correct_answers,
            score: session.score,
            time_remaining: session.time_remaining(self.quiz.time_limit_seconds(), Utc::now()),
            is_completed: session.is_completed,
            answers: session
                .answers
                .iter()
                .map(|a| AnswerSummary {
                    question_id: a.question_id.clone(),
                    is_correct: a.is_correct,
                    time_spent: a.time_spent,
                })
                .collect(),
        })
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), QuizError> {
        let removed = {
            let _guard = self.lock_session(session_id).await;
            self.store.delete(session_id).await
        };
        self.release_idle_lock(session_id);
        if !removed? {
            return Err(QuizError::SessionNotFound(session_id.to_string()));
        }

        metrics::record_session_event("deleted");
        tracing::info!("Session {} deleted", session_id);
        Ok(())
    }

    /// Drops expired sessions and lock entries nobody is waiting on.
    pub async fn sweep_expired(&self) -> Result<usize, QuizError> {
        let purged = self.store.purge_expired().await?;
        if purged > 0 {
            metrics::QUIZ_SESSIONS_TOTAL
                .with_label_values(&["expired"])
                .inc_by(purged as u64);
            tracing::info!("Purged {} expired sessions", purged);
        }
        self.prune_idle_locks();
        Ok(purged)
    }

    /// Generates the current question if the session has none. Returns whether the
    /// session changed. This is the only place a follow-up question is produced.
    async fn fill_current_question(&self, session: &mut QuizSession) -> Result<bool, QuizError> {
        if session.current_question.is_some() {
            return Ok(false);
        }

        let seen_topics = session.seen_topics();
        let request = GenerationRequest {
            difficulty: self.ladder.next_difficulty(session),
            exclude_ids: session.answered_question_ids(),
            topic: Some(pick_topic(&seen_topics)),
            avoid_topics: seen_topics,
        };
        tracing::debug!(
            "Session {}: generating question {} at {} difficulty",
            session.session_id,
            session.current_question_index + 1,
            request.difficulty
        );

        let question = self.generator.generate(&request).await?;
        session.current_question = Some(question);
        Ok(true)
    }

    async fn load(&self, session_id: &str) -> Result<QuizSession, QuizError> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| QuizError::SessionNotFound(session_id.to_string()))
    }

    async fn save(&self, session: &mut QuizSession) -> Result<(), QuizError> {
        session.version += 1;
        self.store.update(session).await.map_err(|e| match e {
            StoreError::Missing { session_id } => QuizError::SessionNotFound(session_id),
            other => QuizError::Store(other),
        })
    }

    async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Locks the session, then loads it. An unknown id leaves no lock entry behind.
    async fn lock_and_load(
        &self,
        session_id: &str,
    ) -> Result<(OwnedMutexGuard<()>, QuizSession), QuizError> {
        let guard = self.lock_session(session_id).await;
        match self.load(session_id).await {
            Ok(session) => Ok((guard, session)),
            Err(e) => {
                drop(guard);
                self.release_idle_lock(session_id);
                Err(e)
            }
        }
    }

    fn release_idle_lock(&self, session_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    fn prune_idle_locks(&self) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Random catalog topic, preferring ones the session has not covered yet.
fn pick_topic(seen: &[String]) -> String {
    let unseen: Vec<&str> = TOPIC_CATALOG
        .iter()
        .copied()
        .filter(|topic| !seen.iter().any(|s| s == topic))
        .collect();
    let pool: &[&str] = if unseen.is_empty() {
        &TOPIC_CATALOG
    } else {
        &unseen
    };
    pool.choose(&mut rand::rng())
        .copied()
        .unwrap_or(TOPIC_CATALOG[0])
        .to_string()
}

fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field))
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::services::model_client::TextModel;
    use crate::services::session_store::InMemorySessionStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct UnusedModel;

    #[async_trait]
    impl TextModel for UnusedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
            Err(GenerationError::EmptyResponse)
        }

        fn name(&self) -> &str {
            "unused"
        }
    }

    fn service() -> QuizService {
        let quiz = QuizConfig::default();
        QuizService::new(
            Arc::new(InMemorySessionStore::new(Duration::from_secs(60))),
            QuestionGenerator::new(Arc::new(UnusedModel), quiz.subject.clone()),
            quiz,
        )
    }

    fn tracked_locks(service: &QuizService) -> usize {
        service.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn unknown_sessions_leave_no_lock_entries() {
        let service = service();

        for n in 0..50 {
            let id = format!("missing-{}", n);
            assert!(matches!(
                service.get_next_question(&id).await,
                Err(QuizError::SessionNotFound(_))
            ));
            let answer = SubmitAnswerRequest {
                session_id: id.clone(),
                question_id: "q".to_string(),
                selected_answer: 0,
                time_spent: None,
            };
            assert!(matches!(
                service.submit_answer(answer).await,
                Err(QuizError::SessionNotFound(_))
            ));
            assert!(matches!(
                service.delete_session(&id).await,
                Err(QuizError::SessionNotFound(_))
            ));
        }

        assert_eq!(tracked_locks(&service), 0);
    }

    #[test]
    fn topics_rotate_through_unseen_entries() {
        let seen: Vec<String> = TOPIC_CATALOG[..11].iter().map(|t| t.to_string()).collect();
        for _ in 0..20 {
            assert_eq!(pick_topic(&seen), TOPIC_CATALOG[11]);
        }

        let all: Vec<String> = TOPIC_CATALOG.iter().map(|t| t.to_string()).collect();
        assert!(TOPIC_CATALOG.contains(&pick_topic(&all).as_str()));
    }

    #[test]
    fn validation_messages_are_readable() {
        let request = SubmitAnswerRequest {
            session_id: "s".to_string(),
            question_id: "q".to_string(),
            selected_answer: 7,
            time_spent: Some(-1.0),
        };
        let errors = request.validate().unwrap_err();
        let message = validation_message(&errors);
        assert!(message.contains("Must be between 0 and 3"));
        assert!(message.contains("timeSpent must not be negative"));
    }
}
