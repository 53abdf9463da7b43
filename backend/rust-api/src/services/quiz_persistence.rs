use std::sync::Arc;
use thiserror::Error;

use crate::metrics::PERSISTENCE_ROLLBACKS_TOTAL;
use crate::models::{NewQuiz, QuestionDraft, QuizWithQuestions};
use crate::services::quiz_store::{QuizStore, StoreError};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("refusing to store a quiz without questions")]
    NoQuestions,
    #[error("failed to create quiz: {0}")]
    QuizInsert(#[source] StoreError),
    #[error("failed to store questions for quiz {quiz_id}: {source}")]
    QuestionInsert {
        quiz_id: String,
        #[source]
        source: StoreError,
        /// False when the compensating delete also failed and the quiz row
        /// is left behind for the orphan sweeper.
        rolled_back: bool,
    },
}

/// Writes a quiz and its questions as one logical unit.
///
/// The store offers no multi-collection transaction, so the quiz row is
/// written first and deleted again if the question batch fails.
pub struct QuizPersistence {
    store: Arc<dyn QuizStore>,
    compensation: RetryConfig,
}

impl QuizPersistence {
    pub fn new(store: Arc<dyn QuizStore>) -> Self {
        Self::with_compensation(store, RetryConfig::compensation())
    }

    pub fn with_compensation(store: Arc<dyn QuizStore>, compensation: RetryConfig) -> Self {
        Self {
            store,
            compensation,
        }
    }

    pub async fn persist(
        &self,
        new_quiz: NewQuiz,
        drafts: Vec<QuestionDraft>,
    ) -> Result<QuizWithQuestions, PersistError> {
        if drafts.is_empty() {
            return Err(PersistError::NoQuestions);
        }

        let quiz = self
            .store
            .insert_quiz(new_quiz)
            .await
            .map_err(PersistError::QuizInsert)?;

        match self.store.insert_questions(&quiz.id, drafts).await {
            Ok(questions) => {
                tracing::debug!(quiz_id = %quiz.id, questions = questions.len(), "Quiz persisted");
                Ok(QuizWithQuestions { quiz, questions })
            }
            Err(source) => {
                tracing::warn!(quiz_id = %quiz.id, error = %source, "Question insert failed; rolling back quiz");
                let rolled_back = self.compensate(&quiz.id).await;
                Err(PersistError::QuestionInsert {
                    quiz_id: quiz.id,
                    source,
                    rolled_back,
                })
            }
        }
    }

    async fn compensate(&self, quiz_id: &str) -> bool {
        let store = self.store.as_ref();
        let result =
            retry_async_with_config(self.compensation.clone(), || store.delete_quiz(quiz_id))
                .await;

        match result {
            Ok(()) => {
                PERSISTENCE_ROLLBACKS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                tracing::info!(quiz_id, "Compensating delete succeeded");
                true
            }
            Err(err) => {
                PERSISTENCE_ROLLBACKS_TOTAL
                    .with_label_values(&["failed"])
                    .inc();
                tracing::error!(
                    quiz_id,
                    error = %err,
                    "Compensating delete failed; quiz left for orphan sweep"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, OptionKey, Question, QuestionOptions, Quiz};
    use crate::services::quiz_store::InMemoryQuizStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory store with switchable failures.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryQuizStore,
        fail_quiz_insert: AtomicBool,
        fail_question_insert: AtomicBool,
        delete_failures_left: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    #[async_trait]
    impl QuizStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn insert_quiz(&self, quiz: NewQuiz) -> Result<Quiz, StoreError> {
            if self.fail_quiz_insert.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("quiz insert".into()));
            }
            self.inner.insert_quiz(quiz).await
        }

        async fn insert_questions(
            &self,
            quiz_id: &str,
            drafts: Vec<QuestionDraft>,
        ) -> Result<Vec<Question>, StoreError> {
            if self.fail_question_insert.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("question insert".into()));
            }
            self.inner.insert_questions(quiz_id, drafts).await
        }

        async fn delete_quiz(&self, quiz_id: &str) -> Result<(), StoreError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            let left = self.delete_failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.delete_failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("delete".into()));
            }
            self.inner.delete_quiz(quiz_id).await
        }

        async fn find_quiz(&self, quiz_id: &str) -> Result<Option<Quiz>, StoreError> {
            self.inner.find_quiz(quiz_id).await
        }

        async fn list_quizzes(&self, owner_id: &str, limit: i64) -> Result<Vec<Quiz>, StoreError> {
            self.inner.list_quizzes(owner_id, limit).await
        }

        async fn find_questions(&self, quiz_id: &str) -> Result<Vec<Question>, StoreError> {
            self.inner.find_questions(quiz_id).await
        }

        async fn count_questions(&self, quiz_id: &str) -> Result<u64, StoreError> {
            self.inner.count_questions(quiz_id).await
        }

        async fn list_orphaned_quizzes(
            &self,
            cutoff: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<Quiz>, StoreError> {
            self.inner.list_orphaned_quizzes(cutoff, limit).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn new_quiz() -> NewQuiz {
        NewQuiz {
            owner_id: "owner-1".into(),
            title: "Rivers Quiz".into(),
            topic: "Rivers".into(),
            difficulty: Difficulty::Medium,
        }
    }

    fn drafts(n: usize) -> Vec<QuestionDraft> {
        (0..n)
            .map(|i| QuestionDraft {
                question_text: format!("Q{i}"),
                options: QuestionOptions {
                    a: "a".into(),
                    b: "b".into(),
                    c: "c".into(),
                    d: "d".into(),
                },
                correct_answer: OptionKey::B,
                explanation: "x".into(),
            })
            .collect()
    }

    fn setup() -> (Arc<FlakyStore>, QuizPersistence) {
        let store = Arc::new(FlakyStore::default());
        let persistence = QuizPersistence::new(store.clone());
        (store, persistence)
    }

    #[tokio::test]
    async fn persists_quiz_with_ordered_questions() {
        let (store, persistence) = setup();
        let saved = persistence.persist(new_quiz(), drafts(3)).await.unwrap();

        assert_eq!(saved.questions.len(), 3);
        assert!(saved.questions.iter().all(|q| q.quiz_id == saved.quiz.id));
        assert_eq!(store.inner.quiz_count().await, 1);
        assert_eq!(store.inner.question_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_question_insert_removes_quiz() {
        let (store, persistence) = setup();
        store.fail_question_insert.store(true, Ordering::SeqCst);

        let err = persistence.persist(new_quiz(), drafts(2)).await.unwrap_err();

        assert!(matches!(
            err,
            PersistError::QuestionInsert {
                rolled_back: true,
                ..
            }
        ));
        assert_eq!(store.inner.quiz_count().await, 0);
        assert_eq!(store.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn compensating_delete_is_retried() {
        let (store, persistence) = setup();
        store.fail_question_insert.store(true, Ordering::SeqCst);
        store.delete_failures_left.store(2, Ordering::SeqCst);

        let err = persistence.persist(new_quiz(), drafts(2)).await.unwrap_err();

        assert!(matches!(
            err,
            PersistError::QuestionInsert {
                rolled_back: true,
                ..
            }
        ));
        assert_eq!(store.delete_calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.quiz_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_compensation_leaves_orphan_and_reports_it() {
        let (store, persistence) = setup();
        store.fail_question_insert.store(true, Ordering::SeqCst);
        store.delete_failures_left.store(usize::MAX, Ordering::SeqCst);

        let err = persistence.persist(new_quiz(), drafts(1)).await.unwrap_err();

        assert!(matches!(
            err,
            PersistError::QuestionInsert {
                rolled_back: false,
                ..
            }
        ));
        assert_eq!(store.delete_calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.quiz_count().await, 1);
    }

    #[tokio::test]
    async fn quiz_insert_failure_writes_nothing() {
        let (store, persistence) = setup();
        store.fail_quiz_insert.store(true, Ordering::SeqCst);

        let err = persistence.persist(new_quiz(), drafts(1)).await.unwrap_err();

        assert!(matches!(err, PersistError::QuizInsert(_)));
        assert_eq!(store.inner.question_count().await, 0);
        assert_eq!(store.delete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_question_list_is_rejected_before_any_write() {
        let (store, persistence) = setup();
        let err = persistence.persist(new_quiz(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, PersistError::NoQuestions));
        assert_eq!(store.inner.quiz_count().await, 0);
    }
}
