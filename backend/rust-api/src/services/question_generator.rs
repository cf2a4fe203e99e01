//! Question generation: prompt construction, the model call, and parsing of the
//! model's free-text reply into a validated [`Question`].
//!
//! Parsing takes the reply text and an RNG, independent of the model call.

use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::GenerationError;
use crate::metrics::{QUESTION_GENERATIONS_TOTAL, QUESTION_GENERATION_DURATION_SECONDS};
use crate::models::{Difficulty, Question};
use crate::services::model_client::TextModel;

pub const KNOWLEDGE_DOMAINS: [&str; 4] = [
    "Machine Learning Fundamentals",
    "AI Services",
    "Responsible AI",
    "Generative AI",
];

pub const TOPIC_CATALOG: [&str; 12] = [
    "Amazon SageMaker",
    "Amazon Bedrock",
    "Amazon Rekognition",
    "Amazon Textract",
    "Amazon Comprehend",
    "Amazon Polly",
    "Amazon Lex",
    "AWS DeepLens",
    "Machine Learning Fundamentals",
    "Responsible AI",
    "Model Training and Deployment",
    "Data Preparation",
];

pub const DEFAULT_EXPLANATION: &str = "No explanation provided";
pub const DEFAULT_TOPIC: &str = "General";
pub const DEFAULT_DOMAIN: &str = "AI Services";

lazy_static! {
    // First '{' through last '}'
    static ref GREEDY_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub difficulty: Difficulty,
    /// Question ids already used in the session; the new id never collides with these.
    pub exclude_ids: Vec<String>,
    /// Topics already covered; the prompt asks the model to steer away from them.
    pub avoid_topics: Vec<String>,
    pub topic: Option<String>,
}

pub struct QuestionGenerator {
    model: Arc<dyn TextModel>,
    subject: String,
}

impl QuestionGenerator {
    pub fn new(model: Arc<dyn TextModel>, subject: impl Into<String>) -> Self {
        Self {
            model,
            subject: subject.into(),
        }
    }

    /// Single attempt: no retries are made on any failure.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Question, GenerationError> {
        let started = Instant::now();
        tracing::info!(
            "Generating {} question (topic: {})",
            request.difficulty,
            request.topic.as_deref().unwrap_or("any")
        );

        let prompt = build_prompt(&self.subject, request);
        let result = self
            .model
            .complete(&prompt)
            .await
            .and_then(|text| parse_question(&text, request, &mut rand::rng()));

        QUESTION_GENERATION_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        match &result {
            Ok(question) => {
                QUESTION_GENERATIONS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                tracing::info!(
                    "Question {} generated in {:?} (topic: {}, correct index: {})",
                    question.id,
                    started.elapsed(),
                    question.topic,
                    question.correct_answer
                );
            }
            Err(e) => {
                QUESTION_GENERATIONS_TOTAL
                    .with_label_values(&[e.kind()])
                    .inc();
                tracing::warn!(
                    "Question generation failed after {:?} ({}): {}",
                    started.elapsed(),
                    e.kind(),
                    e
                );
            }
        }
        result
    }
}

fn difficulty_guidance(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Beginner => {
            "For BEGINNER level:\n\
             - Focus on basic service concepts and terminology\n\
             - Cover fundamental features of services like Amazon SageMaker, Amazon Bedrock, Amazon Rekognition\n\
             - Include basic best practices and service selection criteria\n"
        }
        Difficulty::Intermediate => {
            "For INTERMEDIATE level:\n\
             - Focus on implementation details and configuration options\n\
             - Cover integration patterns and architectural considerations\n\
             - Include cost optimization and performance tuning concepts\n"
        }
        Difficulty::Advanced => {
            "For ADVANCED level:\n\
             - Focus on complex scenarios and edge cases\n\
             - Cover advanced architectural patterns and troubleshooting\n\
             - Include deep technical details and optimization strategies\n"
        }
    }
}

const FORMAT_INSTRUCTIONS: &str = r#"
Respond with a single JSON object in exactly this format:
{
  "question": "Your question here",
  "options": ["Option A", "Option B", "Option C", "Option D"],
  "correctAnswer": 0,
  "explanation": "Why the correct answer is right and why the other options are wrong",
  "topic": "Main service or concept covered",
  "domain": "One of: Machine Learning Fundamentals, AI Services, Responsible AI, Generative AI"
}

JSON rules:
- correctAnswer is the index (0-3) of the correct option in the options array
- Vary the position of the correct answer; it can be at any index
- Use \\n for line breaks inside strings, never literal newlines
- Escape quotes as \\" and backslashes as \\\\
- Do not include control characters in string values"#;

pub fn build_prompt(subject: &str, request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "You are an expert {subject} instructor. Generate a multiple-choice quiz question for the {subject} exam.\n\n\
         Requirements:\n\
         - Difficulty level: {difficulty}\n\
         - Provide exactly 4 answer options\n\
         - Only ONE option is correct\n\
         - Include a detailed explanation of the correct answer\n\
         - Prefer practical, real-world scenarios\n\n",
        subject = subject,
        difficulty = request.difficulty,
    );
    prompt.push_str(difficulty_guidance(request.difficulty));
    prompt.push_str(FORMAT_INSTRUCTIONS);

    if !request.avoid_topics.is_empty() {
        prompt.push_str("\nAvoid creating questions similar to these previously asked topics: ");
        prompt.push_str(&request.avoid_topics.join(", "));
    }
    if let Some(topic) = request.topic.as_deref().filter(|t| !t.trim().is_empty()) {
        prompt.push_str("\nFocus specifically on: ");
        prompt.push_str(topic);
    }
    prompt
}

/// Returns the first brace-delimited object in `text`. A balanced scan (aware of string
/// literals) is tried first; unbalanced replies fall back to first-'{'-to-last-'}'.
pub fn extract_json_object(text: &str) -> Result<&str, GenerationError> {
    let start = text.find('{').ok_or(GenerationError::NoJsonFound)?;
    if let Some(end) = balanced_end(&text[start..]) {
        return Ok(&text[start..start + end]);
    }
    GREEDY_OBJECT
        .find(text)
        .map(|m| m.as_str())
        .ok_or(GenerationError::NoJsonFound)
}

/// Byte length of the balanced object at the start of `text`, if it closes.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Repairs the usual model defects inside string literals: raw newlines, tabs and
/// carriage returns become escapes, other control characters become spaces, and
/// backslashes that do not start a valid escape are doubled.
pub fn sanitize_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 16);
    let mut in_string = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if !in_string {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                '\n' | '\r' | '\t' => out.push(c),
                c if c.is_control() => out.push(' '),
                c => out.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\\' => match chars.peek().copied() {
                Some(next @ ('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't')) => {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                Some('u') => {
                    let hex: String = chars.clone().skip(1).take(4).collect();
                    if hex.len() == 4 && hex.chars().all(|h| h.is_ascii_hexdigit()) {
                        out.push('\\');
                    } else {
                        out.push_str("\\\\");
                    }
                }
                _ => out.push_str("\\\\"),
            },
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Unbiased shuffle of the four options; returns the new options and the new index of
/// the originally-correct option.
pub fn shuffle_options<R: Rng + ?Sized>(
    options: [String; 4],
    correct_answer: usize,
    rng: &mut R,
) -> ([String; 4], usize) {
    let mut order = [0usize, 1, 2, 3];
    order.shuffle(rng);

    let new_correct = order
        .iter()
        .position(|&original| original == correct_answer)
        .unwrap_or(correct_answer);
    let shuffled = order.map(|original| options[original].clone());
    (shuffled, new_correct)
}

/// Extract, sanitize, parse, validate and shuffle a model reply.
pub fn parse_question<R: Rng + ?Sized>(
    text: &str,
    request: &GenerationRequest,
    rng: &mut R,
) -> Result<Question, GenerationError> {
    let raw = extract_json_object(text)?;
    let sanitized = sanitize_json(raw);
    let value: Value = serde_json::from_str(&sanitized).map_err(|e| {
        tracing::debug!("Unparseable model JSON: {}", truncate(&sanitized, 500));
        GenerationError::MalformedJson(e.to_string())
    })?;

    let object = value
        .as_object()
        .ok_or_else(|| GenerationError::SchemaViolation("reply is not a JSON object".to_string()))?;

    let question_text = non_empty_str(object.get("question")).ok_or_else(|| {
        GenerationError::SchemaViolation("question text is missing or empty".to_string())
    })?;

    let options = parse_options(object.get("options"))?;

    let correct_answer = object
        .get("correctAnswer")
        .and_then(Value::as_u64)
        .filter(|index| *index <= 3)
        .ok_or_else(|| {
            GenerationError::SchemaViolation("correctAnswer must be an integer in 0..=3".to_string())
        })? as usize;

    let (options, correct_answer) = shuffle_options(options, correct_answer, rng);

    let explanation = non_empty_str(object.get("explanation"))
        .unwrap_or(DEFAULT_EXPLANATION)
        .to_string();
    let topic = non_empty_str(object.get("topic"))
        .or(request.topic.as_deref())
        .unwrap_or(DEFAULT_TOPIC)
        .to_string();
    let domain = non_empty_str(object.get("domain"))
        .or_else(|| non_empty_str(object.get("aiPractitionerDomain")))
        .unwrap_or(DEFAULT_DOMAIN)
        .to_string();

    Ok(Question {
        id: fresh_question_id(&request.exclude_ids),
        question: question_text.to_string(),
        options,
        correct_answer,
        explanation,
        difficulty: request.difficulty,
        topic,
        domain,
    })
}

fn parse_options(value: Option<&Value>) -> Result<[String; 4], GenerationError> {
    let items = value.and_then(Value::as_array).ok_or_else(|| {
        GenerationError::SchemaViolation("options must be an array".to_string())
    })?;
    if items.len() != 4 {
        return Err(GenerationError::SchemaViolation(format!(
            "expected exactly 4 options, got {}",
            items.len()
        )));
    }

    let mut options: [String; 4] = Default::default();
    for (slot, item) in options.iter_mut().zip(items) {
        *slot = non_empty_str(Some(item))
            .ok_or_else(|| {
                GenerationError::SchemaViolation("every option must be a non-empty string".to_string())
            })?
            .to_string();
    }
    Ok(options)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn fresh_question_id(exclude: &[String]) -> String {
    loop {
        let id = format!("q_{}", Uuid::new_v4().simple());
        if !exclude.contains(&id) {
            return id;
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
