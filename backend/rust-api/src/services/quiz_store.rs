//! Storage for quizzes and their questions.
//!
//! Quizzes and questions live in separate collections, so a quiz with its
//! questions is never written atomically. See `quiz_persistence` for the
//! compensation that keeps partially-written quizzes out of view.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::metrics::track_db_operation;
use crate::models::{Difficulty, NewQuiz, OptionKey, Question, QuestionDraft, QuestionOptions, Quiz};
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

pub const QUIZZES_COLLECTION: &str = "quizzes";
pub const QUESTIONS_COLLECTION: &str = "questions";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait QuizStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn insert_quiz(&self, quiz: NewQuiz) -> Result<Quiz, StoreError>;

    /// Bulk insert; positions are assigned 1..=n in draft order.
    async fn insert_questions(
        &self,
        quiz_id: &str,
        drafts: Vec<QuestionDraft>,
    ) -> Result<Vec<Question>, StoreError>;

    /// Removes the quiz together with any question rows that reference it.
    async fn delete_quiz(&self, quiz_id: &str) -> Result<(), StoreError>;

    async fn find_quiz(&self, quiz_id: &str) -> Result<Option<Quiz>, StoreError>;

    /// Newest first. Quizzes without any question rows are left out.
    async fn list_quizzes(&self, owner_id: &str, limit: i64) -> Result<Vec<Quiz>, StoreError>;

    /// Ordered by position.
    async fn find_questions(&self, quiz_id: &str) -> Result<Vec<Question>, StoreError>;

    async fn count_questions(&self, quiz_id: &str) -> Result<u64, StoreError>;

    /// Quizzes created before `cutoff` that have no question rows, oldest first.
    async fn list_orphaned_quizzes(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Quiz>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

fn build_questions(quiz_id: &str, drafts: Vec<QuestionDraft>) -> Vec<Question> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(i, draft)| Question::from_draft(quiz_id, i as u32 + 1, draft))
        .collect()
}

fn build_quiz(new_quiz: NewQuiz) -> Quiz {
    Quiz {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: new_quiz.owner_id,
        title: new_quiz.title,
        topic: new_quiz.topic,
        difficulty: new_quiz.difficulty,
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// MongoDB
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct QuizRecord {
    #[serde(rename = "_id")]
    id: String,
    owner_id: String,
    title: String,
    topic: String,
    difficulty: Difficulty,
    created_at: BsonDateTime,
}

impl From<&Quiz> for QuizRecord {
    fn from(quiz: &Quiz) -> Self {
        Self {
            id: quiz.id.clone(),
            owner_id: quiz.owner_id.clone(),
            title: quiz.title.clone(),
            topic: quiz.topic.clone(),
            difficulty: quiz.difficulty,
            created_at: chrono_to_bson(quiz.created_at),
        }
    }
}

impl From<QuizRecord> for Quiz {
    fn from(record: QuizRecord) -> Self {
        Self {
            id: record.id,
            owner_id: record.owner_id,
            title: record.title,
            topic: record.topic,
            difficulty: record.difficulty,
            created_at: bson_to_chrono(record.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct QuestionRecord {
    #[serde(rename = "_id")]
    id: String,
    quiz_id: String,
    position: i32,
    question_text: String,
    options: QuestionOptions,
    correct_answer: OptionKey,
    explanation: String,
}

impl From<&Question> for QuestionRecord {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            quiz_id: q.quiz_id.clone(),
            position: q.position as i32,
            question_text: q.question_text.clone(),
            options: q.options.clone(),
            correct_answer: q.correct_answer,
            explanation: q.explanation.clone(),
        }
    }
}

impl From<QuestionRecord> for Question {
    fn from(record: QuestionRecord) -> Self {
        Self {
            id: record.id,
            quiz_id: record.quiz_id,
            position: record.position.max(0) as u32,
            question_text: record.question_text,
            options: record.options,
            correct_answer: record.correct_answer,
            explanation: record.explanation,
        }
    }
}

/// `$lookup` stage attaching at most one question id as `question_refs`.
fn question_refs_lookup() -> Document {
    doc! {
        "$lookup": {
            "from": QUESTIONS_COLLECTION,
            "let": { "quiz_id": "$_id" },
            "pipeline": [
                { "$match": { "$expr": { "$eq": ["$quiz_id", "$$quiz_id"] } } },
                { "$limit": 1 },
                { "$project": { "_id": 1 } },
            ],
            "as": "question_refs",
        }
    }
}

pub struct MongoQuizStore {
    db: Database,
}

impl MongoQuizStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn quizzes(&self) -> Collection<QuizRecord> {
        self.db.collection(QUIZZES_COLLECTION)
    }

    fn questions(&self) -> Collection<QuestionRecord> {
        self.db.collection(QUESTIONS_COLLECTION)
    }

    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.quizzes()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "owner_id": 1, "created_at": -1 })
                    .build(),
            )
            .await?;
        self.questions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "quiz_id": 1, "position": 1 })
                    .build(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QuizStore for MongoQuizStore {
    fn name(&self) -> &'static str {
        "mongo"
    }

    async fn insert_quiz(&self, new_quiz: NewQuiz) -> Result<Quiz, StoreError> {
        let quiz = build_quiz(new_quiz);
        let record = QuizRecord::from(&quiz);
        track_db_operation("insert_one", QUIZZES_COLLECTION, async {
            self.quizzes().insert_one(&record).await
        })
        .await?;
        Ok(quiz)
    }

    async fn insert_questions(
        &self,
        quiz_id: &str,
        drafts: Vec<QuestionDraft>,
    ) -> Result<Vec<Question>, StoreError> {
        let questions = build_questions(quiz_id, drafts);
        if questions.is_empty() {
            return Ok(questions);
        }
        let records: Vec<QuestionRecord> = questions.iter().map(QuestionRecord::from).collect();
        track_db_operation("insert_many", QUESTIONS_COLLECTION, async {
            self.questions().insert_many(&records).await
        })
        .await?;
        Ok(questions)
    }

    async fn delete_quiz(&self, quiz_id: &str) -> Result<(), StoreError> {
        track_db_operation("delete_many", QUESTIONS_COLLECTION, async {
            self.questions()
                .delete_many(doc! { "quiz_id": quiz_id })
                .await
        })
        .await?;
        track_db_operation("delete_one", QUIZZES_COLLECTION, async {
            self.quizzes().delete_one(doc! { "_id": quiz_id }).await
        })
        .await?;
        Ok(())
    }

    async fn find_quiz(&self, quiz_id: &str) -> Result<Option<Quiz>, StoreError> {
        let record = track_db_operation("find_one", QUIZZES_COLLECTION, async {
            self.quizzes().find_one(doc! { "_id": quiz_id }).await
        })
        .await?;
        Ok(record.map(Quiz::from))
    }

    async fn list_quizzes(&self, owner_id: &str, limit: i64) -> Result<Vec<Quiz>, StoreError> {
        let pipeline = vec![
            doc! { "$match": { "owner_id": owner_id } },
            doc! { "$sort": { "created_at": -1 } },
            question_refs_lookup(),
            doc! { "$match": { "question_refs": { "$ne": [] } } },
            doc! { "$limit": limit },
            doc! { "$project": { "question_refs": 0 } },
        ];
        let records: Vec<QuizRecord> = track_db_operation("aggregate", QUIZZES_COLLECTION, async {
            self.quizzes()
                .aggregate(pipeline)
                .with_type::<QuizRecord>()
                .await?
                .try_collect::<Vec<QuizRecord>>()
                .await
        })
        .await?;
        Ok(records.into_iter().map(Quiz::from).collect())
    }

    async fn find_questions(&self, quiz_id: &str) -> Result<Vec<Question>, StoreError> {
        let records: Vec<QuestionRecord> =
            track_db_operation("find", QUESTIONS_COLLECTION, async {
                self.questions()
                    .find(doc! { "quiz_id": quiz_id })
                    .sort(doc! { "position": 1 })
                    .await?
                    .try_collect::<Vec<QuestionRecord>>()
                    .await
            })
            .await?;
        Ok(records.into_iter().map(Question::from).collect())
    }

    async fn count_questions(&self, quiz_id: &str) -> Result<u64, StoreError> {
        let count = track_db_operation("count_documents", QUESTIONS_COLLECTION, async {
            self.questions()
                .count_documents(doc! { "quiz_id": quiz_id })
                .await
        })
        .await?;
        Ok(count)
    }

    async fn list_orphaned_quizzes(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Quiz>, StoreError> {
        let pipeline = vec![
            doc! { "$match": { "created_at": { "$lt": chrono_to_bson(cutoff) } } },
            doc! { "$sort": { "created_at": 1 } },
            question_refs_lookup(),
            doc! { "$match": { "question_refs": { "$size": 0 } } },
            doc! { "$limit": limit },
            doc! { "$project": { "question_refs": 0 } },
        ];
        let records: Vec<QuizRecord> = track_db_operation("aggregate", QUIZZES_COLLECTION, async {
            self.quizzes()
                .aggregate(pipeline)
                .with_type::<QuizRecord>()
                .await?
                .try_collect::<Vec<QuizRecord>>()
                .await
        })
        .await?;
        Ok(records.into_iter().map(Quiz::from).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    quizzes: Vec<Quiz>,
    questions: Vec<Question>,
}

impl MemoryState {
    fn has_questions(&self, quiz_id: &str) -> bool {
        self.questions.iter().any(|q| q.quiz_id == quiz_id)
    }
}

/// Process-local store for development and tests.
#[derive(Default)]
pub struct InMemoryQuizStore {
    state: RwLock<MemoryState>,
}

impl InMemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn quiz_count(&self) -> usize {
        self.state.read().await.quizzes.len()
    }

    pub async fn question_count(&self) -> usize {
        self.state.read().await.questions.len()
    }

    /// Inserts a quiz with an explicit creation time.
    pub async fn insert_quiz_at(&self, new_quiz: NewQuiz, created_at: DateTime<Utc>) -> Quiz {
        let mut quiz = build_quiz(new_quiz);
        quiz.created_at = created_at;
        self.state.write().await.quizzes.push(quiz.clone());
        quiz
    }
}

#[async_trait]
impl QuizStore for InMemoryQuizStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_quiz(&self, new_quiz: NewQuiz) -> Result<Quiz, StoreError> {
        let quiz = build_quiz(new_quiz);
        self.state.write().await.quizzes.push(quiz.clone());
        Ok(quiz)
    }

    async fn insert_questions(
        &self,
        quiz_id: &str,
        drafts: Vec<QuestionDraft>,
    ) -> Result<Vec<Question>, StoreError> {
        let questions = build_questions(quiz_id, drafts);
        self.state
            .write()
            .await
            .questions
            .extend(questions.iter().cloned());
        Ok(questions)
    }

    async fn delete_quiz(&self, quiz_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.questions.retain(|q| q.quiz_id != quiz_id);
        state.quizzes.retain(|q| q.id != quiz_id);
        Ok(())
    }

    async fn find_quiz(&self, quiz_id: &str) -> Result<Option<Quiz>, StoreError> {
        let state = self.state.read().await;
        Ok(state.quizzes.iter().find(|q| q.id == quiz_id).cloned())
    }

    async fn list_quizzes(&self, owner_id: &str, limit: i64) -> Result<Vec<Quiz>, StoreError> {
        let state = self.state.read().await;
        let mut quizzes: Vec<Quiz> = state
            .quizzes
            .iter()
            .filter(|q| q.owner_id == owner_id && state.has_questions(&q.id))
            .cloned()
            .collect();
        quizzes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        quizzes.truncate(limit.max(0) as usize);
        Ok(quizzes)
    }

    async fn find_questions(&self, quiz_id: &str) -> Result<Vec<Question>, StoreError> {
        let state = self.state.read().await;
        let mut questions: Vec<Question> = state
            .questions
            .iter()
            .filter(|q| q.quiz_id == quiz_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.position);
        Ok(questions)
    }

    async fn count_questions(&self, quiz_id: &str) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state.questions.iter().filter(|q| q.quiz_id == quiz_id).count() as u64)
    }

    async fn list_orphaned_quizzes(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Quiz>, StoreError> {
        let state = self.state.read().await;
        let mut quizzes: Vec<Quiz> = state
            .quizzes
            .iter()
            .filter(|q| q.created_at < cutoff && !state.has_questions(&q.id))
            .cloned()
            .collect();
        quizzes.sort_by_key(|q| q.created_at);
        quizzes.truncate(limit.max(0) as usize);
        Ok(quizzes)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn new_quiz(owner: &str, title: &str) -> NewQuiz {
        NewQuiz {
            owner_id: owner.to_string(),
            title: title.to_string(),
            topic: "Topic".to_string(),
            difficulty: Difficulty::Easy,
        }
    }

    fn draft(text: &str) -> QuestionDraft {
        QuestionDraft {
            question_text: text.to_string(),
            options: QuestionOptions {
                a: "a".into(),
                b: "b".into(),
                c: "c".into(),
                d: "d".into(),
            },
            correct_answer: OptionKey::A,
            explanation: "e".into(),
        }
    }

    #[tokio::test]
    async fn questions_get_sequential_positions_and_shared_quiz_id() {
        let store = InMemoryQuizStore::new();
        let quiz = store.insert_quiz(new_quiz("u1", "T")).await.unwrap();
        let inserted = store
            .insert_questions(&quiz.id, vec![draft("q1"), draft("q2"), draft("q3")])
            .await
            .unwrap();

        let positions: Vec<u32> = inserted.iter().map(|q| q.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(inserted.iter().all(|q| q.quiz_id == quiz.id));

        let loaded = store.find_questions(&quiz.id).await.unwrap();
        assert_eq!(loaded, inserted);
        assert_eq!(store.count_questions(&quiz.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_removes_quiz_and_its_questions() {
        let store = InMemoryQuizStore::new();
        let keep = store.insert_quiz(new_quiz("u1", "keep")).await.unwrap();
        let gone = store.insert_quiz(new_quiz("u1", "gone")).await.unwrap();
        store.insert_questions(&keep.id, vec![draft("k")]).await.unwrap();
        store.insert_questions(&gone.id, vec![draft("g")]).await.unwrap();

        store.delete_quiz(&gone.id).await.unwrap();

        assert!(store.find_quiz(&gone.id).await.unwrap().is_none());
        assert_eq!(store.count_questions(&gone.id).await.unwrap(), 0);
        assert_eq!(store.count_questions(&keep.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_owner_and_newest_first() {
        let store = InMemoryQuizStore::new();
        let now = Utc::now();
        for (owner, title, created_at) in [
            ("u1", "old", now - ChronoDuration::minutes(5)),
            ("u1", "new", now),
            ("u2", "other", now),
        ] {
            let quiz = store.insert_quiz_at(new_quiz(owner, title), created_at).await;
            store.insert_questions(&quiz.id, vec![draft("q")]).await.unwrap();
        }

        let titles: Vec<String> = store
            .list_quizzes("u1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.title)
            .collect();
        assert_eq!(titles, vec!["new", "old"]);
        assert_eq!(store.list_quizzes("u1", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_skips_quizzes_without_questions() {
        let store = InMemoryQuizStore::new();
        let complete = store.insert_quiz(new_quiz("u1", "complete")).await.unwrap();
        store.insert_questions(&complete.id, vec![draft("q")]).await.unwrap();
        store.insert_quiz(new_quiz("u1", "half-written")).await.unwrap();

        let listed = store.list_quizzes("u1", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, complete.id);
    }

    #[tokio::test]
    async fn orphan_listing_filters_by_cutoff_and_question_rows() {
        let store = InMemoryQuizStore::new();
        let now = Utc::now();
        let stale = now - ChronoDuration::minutes(30);
        store.insert_quiz_at(new_quiz("u1", "stale"), stale).await;
        let complete = store.insert_quiz_at(new_quiz("u1", "complete"), stale).await;
        store.insert_questions(&complete.id, vec![draft("q")]).await.unwrap();
        store.insert_quiz_at(new_quiz("u1", "fresh"), now).await;

        let orphans = store
            .list_orphaned_quizzes(now - ChronoDuration::minutes(5), 100)
            .await
            .unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].title, "stale");
    }

    #[test]
    fn question_record_round_trips_through_bson() {
        let question = Question::from_draft("quiz-1", 2, draft("q"));
        let bson = mongodb::bson::to_document(&QuestionRecord::from(&question)).unwrap();
        assert_eq!(bson.get_str("correct_answer").unwrap(), "A");
        assert_eq!(bson.get_document("options").unwrap().get_str("B").unwrap(), "b");
        let back: QuestionRecord = mongodb::bson::from_document(bson).unwrap();
        assert_eq!(Question::from(back), question);
    }
}
