use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

pub const MAX_TOPIC_LEN: u64 = 200;
pub const MAX_QUESTIONS_PER_REQUEST: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound request for a new quiz. Immutable once it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[validate(length(min = 1, max = 200, message = "topic must be 1-200 characters"))]
    pub topic: String,
    pub difficulty: Difficulty,
    #[validate(range(min = 1, max = 50, message = "questionCount must be between 1 and 50"))]
    pub question_count: u32,
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>, difficulty: Difficulty, question_count: u32) -> Self {
        Self {
            topic: topic.into().trim().to_string(),
            difficulty,
            question_count,
        }
    }

    /// Copy with surrounding whitespace removed from the topic.
    pub fn normalized(&self) -> Self {
        Self::new(self.topic.clone(), self.difficulty, self.question_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionKey {
    A,
    B,
    C,
    D,
}

impl OptionKey {
    pub const ALL: [OptionKey; 4] = [OptionKey::A, OptionKey::B, OptionKey::C, OptionKey::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKey::A => "A",
            OptionKey::B => "B",
            OptionKey::C => "C",
            OptionKey::D => "D",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "A" | "a" => Some(OptionKey::A),
            "B" | "b" => Some(OptionKey::B),
            "C" | "c" => Some(OptionKey::C),
            "D" | "d" => Some(OptionKey::D),
            _ => None,
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four fixed answer slots of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOptions {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(rename = "D")]
    pub d: String,
}

impl QuestionOptions {
    pub fn get(&self, key: OptionKey) -> &str {
        match key {
            OptionKey::A => &self.a,
            OptionKey::B => &self.b,
            OptionKey::C => &self.c,
            OptionKey::D => &self.d,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (OptionKey, &str)> {
        OptionKey::ALL.into_iter().map(move |key| (key, self.get(key)))
    }

    /// All four present and pairwise distinct (case-insensitive, trimmed).
    pub fn is_well_formed(&self) -> bool {
        let normalized: Vec<String> = self
            .iter()
            .map(|(_, text)| text.trim().to_lowercase())
            .collect();
        if normalized.iter().any(|text| text.is_empty()) {
            return false;
        }
        for (i, left) in normalized.iter().enumerate() {
            if normalized[i + 1..].contains(left) {
                return false;
            }
        }
        true
    }
}

/// A validated question that has not been written to storage yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub question_text: String,
    pub options: QuestionOptions,
    pub correct_answer: OptionKey,
    pub explanation: String,
}

/// Structured result of one generation, remote or offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizPayload {
    pub title: Option<String>,
    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub quiz_id: String,
    pub position: u32,
    pub question_text: String,
    pub options: QuestionOptions,
    pub correct_answer: OptionKey,
    pub explanation: String,
}

impl Question {
    pub fn from_draft(quiz_id: &str, position: u32, draft: QuestionDraft) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            quiz_id: quiz_id.to_string(),
            position,
            question_text: draft.question_text,
            options: draft.options,
            correct_answer: draft.correct_answer,
            explanation: draft.explanation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewQuiz {
    pub owner_id: String,
    pub title: String,
    pub topic: String,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizWithQuestions {
    pub quiz: Quiz,
    pub questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
pub struct QuizListQuery {
    pub limit: Option<i64>,
}
