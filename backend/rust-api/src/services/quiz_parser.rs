//! Free-form model output to validated quiz content.
//!
//! Decoding is strict: any structural problem is reported as a
//! [`ParseError`] so the caller can move on to the next candidate.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{OptionKey, QuestionDraft, QuestionOptions, QuizPayload};

lazy_static! {
    static ref FENCE_MARKER: Regex = Regex::new(r"```[A-Za-z0-9_+-]*").unwrap();
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("response was empty")]
    EmptyResponse,
    #[error("response is not a valid quiz document: {0}")]
    Decode(String),
    #[error("quiz contains no questions")]
    NoQuestions,
    #[error("question {index}: missing or empty field '{field}'")]
    MissingField { index: usize, field: &'static str },
    #[error("question {index}: unexpected option key '{key}'")]
    UnexpectedOption { index: usize, key: String },
    #[error("question {index}: option {key} is missing or empty")]
    MissingOption { index: usize, key: OptionKey },
    #[error("question {index}: options are not pairwise distinct")]
    DuplicateOptions { index: usize },
    #[error("question {index}: correctAnswer '{value}' is not one of A-D")]
    InvalidCorrectAnswer { index: usize, value: String },
    #[error("question {index}: correctAnswer {key} is not among the question's options")]
    AnswerNotInOptions { index: usize, key: OptionKey },
}

#[derive(Debug, Deserialize)]
struct RawQuizDocument {
    #[serde(default)]
    quiz: Option<RawQuizHeader>,
    questions: Option<Vec<RawQuestion>>,
}

#[derive(Debug, Deserialize)]
struct RawQuizHeader {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default, alias = "questionText", alias = "question_text")]
    question: Option<String>,
    #[serde(default)]
    options: Option<BTreeMap<String, String>>,
    #[serde(default, rename = "correctAnswer", alias = "correct_answer")]
    correct_answer: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Parses raw model text into a quiz payload.
pub fn parse(raw_text: &str) -> Result<QuizPayload, ParseError> {
    let unfenced = strip_code_fences(raw_text);
    let trimmed = unfenced.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let spans = balanced_objects(trimmed);
    if spans.is_empty() {
        return decode(trimmed).and_then(validate);
    }

    // Commentary may contain its own braces; prefer the first span that
    // decodes and carries a question list.
    let mut fallback = None;
    for span in spans {
        match decode(span) {
            Ok(document) if document.questions.is_some() => return validate(document),
            result => {
                fallback.get_or_insert(result);
            }
        }
    }
    match fallback {
        Some(result) => result.and_then(validate),
        None => Err(ParseError::EmptyResponse),
    }
}

fn decode(text: &str) -> Result<RawQuizDocument, ParseError> {
    serde_json::from_str(text).map_err(|e| ParseError::Decode(e.to_string()))
}

/// Removes markdown fence markers (with or without a language tag).
pub fn strip_code_fences(text: &str) -> String {
    FENCE_MARKER.replace_all(text, "").into_owned()
}

/// Top-level balanced `{...}` spans in order, ignoring braces inside JSON strings.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        match balanced_end(text, start) {
            Some(end) => {
                spans.push(&text[start..=end]);
                search_from = end + 1;
            }
            None => search_from = start + 1,
        }
    }
    spans
}

fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate(document: RawQuizDocument) -> Result<QuizPayload, ParseError> {
    let raw_questions = document.questions.unwrap_or_default();
    if raw_questions.is_empty() {
        return Err(ParseError::NoQuestions);
    }

    let questions = raw_questions
        .into_iter()
        .enumerate()
        .map(|(index, raw)| validate_question(index, raw))
        .collect::<Result<Vec<_>, _>>()?;

    let title = document
        .quiz
        .and_then(|header| header.title)
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty());

    Ok(QuizPayload { title, questions })
}

fn validate_question(index: usize, raw: RawQuestion) -> Result<QuestionDraft, ParseError> {
    let question_text = non_empty(raw.question).ok_or(ParseError::MissingField {
        index,
        field: "question",
    })?;
    let explanation = non_empty(raw.explanation).ok_or(ParseError::MissingField {
        index,
        field: "explanation",
    })?;
    let raw_options = raw.options.ok_or(ParseError::MissingField {
        index,
        field: "options",
    })?;
    let raw_answer = non_empty(raw.correct_answer).ok_or(ParseError::MissingField {
        index,
        field: "correctAnswer",
    })?;

    let mut by_key: BTreeMap<OptionKey, String> = BTreeMap::new();
    for (key, text) in raw_options {
        let parsed = OptionKey::parse(&key).ok_or_else(|| ParseError::UnexpectedOption {
            index,
            key: key.clone(),
        })?;
        by_key.insert(parsed, text.trim().to_string());
    }

    let correct_answer =
        OptionKey::parse(&raw_answer).ok_or_else(|| ParseError::InvalidCorrectAnswer {
            index,
            value: raw_answer.clone(),
        })?;
    if !by_key.contains_key(&correct_answer) {
        return Err(ParseError::AnswerNotInOptions {
            index,
            key: correct_answer,
        });
    }

    let mut take = |key: OptionKey| -> Result<String, ParseError> {
        by_key
            .remove(&key)
            .filter(|text| !text.is_empty())
            .ok_or(ParseError::MissingOption { index, key })
    };
    let options = QuestionOptions {
        a: take(OptionKey::A)?,
        b: take(OptionKey::B)?,
        c: take(OptionKey::C)?,
        d: take(OptionKey::D)?,
    };
    if !options.is_well_formed() {
        return Err(ParseError::DuplicateOptions { index });
    }

    Ok(QuestionDraft {
        question_text,
        options,
        correct_answer,
        explanation,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
