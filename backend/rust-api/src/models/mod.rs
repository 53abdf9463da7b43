pub mod generation;
pub mod quiz;

pub use generation::{AttemptOutcome, GenerationAttempt, ModelCandidate};
pub use quiz::{
    Difficulty, GenerationRequest, NewQuiz, OptionKey, Question, QuestionDraft, QuestionOptions,
    Quiz, QuizListQuery, QuizPayload, QuizWithQuestions,
};
