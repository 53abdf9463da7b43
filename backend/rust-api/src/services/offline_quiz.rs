use crate::models::{GenerationRequest, OptionKey, QuestionDraft, QuestionOptions, QuizPayload};

pub const OFFLINE_TITLE_SUFFIX: &str = "(Offline Mode)";

const OFFLINE_EXPLANATION: &str = "This is a generated placeholder because the AI service is \
currently unavailable. Please try again later for real AI questions.";

/// Placeholder quiz used when no remote candidate produced content.
///
/// Pure and infallible; the result satisfies the same structural rules as a
/// parsed model response (four distinct options, answer among them).
pub fn generate(request: &GenerationRequest) -> QuizPayload {
    let topic = request.topic.trim();

    let questions = (1..=request.question_count)
        .map(|i| QuestionDraft {
            question_text: format!("(Offline) What is a key concept in {topic}?"),
            options: QuestionOptions {
                a: format!("Concept {i}A"),
                b: format!("Concept {i}B"),
                c: format!("Concept {i}C"),
                d: format!("Concept {i}D"),
            },
            correct_answer: OptionKey::A,
            explanation: OFFLINE_EXPLANATION.to_string(),
        })
        .collect();

    QuizPayload {
        title: Some(offline_title(topic)),
        questions,
    }
}

fn offline_title(topic: &str) -> String {
    format!("{} {}", topic.trim(), OFFLINE_TITLE_SUFFIX)
}
