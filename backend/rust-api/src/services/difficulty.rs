use crate::models::{Difficulty, QuizSession};

const PROMOTE_AT: u32 = 80;
const KEEP_AT: u32 = 60;

/// Maps a 1-based question position onto a base difficulty using three contiguous ranges:
/// `1..=beginner_until`, `beginner_until+1..=intermediate_until`, and the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyLadder {
    beginner_until: u32,
    intermediate_until: u32,
}

impl Default for DifficultyLadder {
    fn default() -> Self {
        Self::new(3, 7)
    }
}

impl DifficultyLadder {
    pub fn new(beginner_until: u32, intermediate_until: u32) -> Self {
        Self {
            beginner_until,
            intermediate_until,
        }
    }

    pub fn base_for_position(&self, position: u32) -> Difficulty {
        if position <= self.beginner_until {
            Difficulty::Beginner
        } else if position <= self.intermediate_until {
            Difficulty::Intermediate
        } else {
            Difficulty::Advanced
        }
    }

    /// Difficulty for the question the session will be asked next.
    pub fn next_difficulty(&self, session: &QuizSession) -> Difficulty {
        let answered = session.current_question_index;
        if answered == 0 {
            return session.difficulty;
        }
        let base = self.base_for_position(answered + 1);
        adjust(base, session.correct_answers, answered)
    }
}

/// Promotes at >= 80% correct, keeps the base at >= 60%, demotes below that.
pub fn adjust(base: Difficulty, correct: u32, answered: u32) -> Difficulty {
    // Integer comparison avoids rounding at the band edges
    let correct = u64::from(correct) * 100;
    let answered = u64::from(answered);
    if correct >= u64::from(PROMOTE_AT) * answered {
        base.promoted()
    } else if correct >= u64::from(KEEP_AT) * answered {
        base
    } else {
        base.demoted()
    }
}
