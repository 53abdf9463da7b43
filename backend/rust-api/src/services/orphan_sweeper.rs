use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    metrics::{ORPHANS_DELETED_TOTAL, ORPHAN_SWEEPER_TICKS_TOTAL},
    services::quiz_store::QuizStore,
};

const SWEEP_BATCH: i64 = 500;

/// Removes quizzes left without questions by an interrupted or failed
/// persistence (the compensating delete never ran or never succeeded).
///
/// Only quizzes older than `grace` are considered, so a quiz whose
/// questions are still being written is never touched.
pub struct OrphanSweeper {
    store: Arc<dyn QuizStore>,
    interval: Duration,
    grace: Duration,
}

impl OrphanSweeper {
    pub fn new(store: Arc<dyn QuizStore>, interval: Duration, grace: Duration) -> Self {
        Self {
            store,
            interval,
            grace,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting orphan sweeper loop (interval {}s, grace {}s)",
            self.interval.as_secs(),
            self.grace.as_secs()
        );

        loop {
            match self.run_once().await {
                Ok(deleted) => {
                    ORPHAN_SWEEPER_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    info!(deleted, "Orphan sweeper tick completed");
                }
                Err(err) => {
                    ORPHAN_SWEEPER_TICKS_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                    warn!(error = %err, "Orphan sweeper tick failed");
                }
            }

            sleep(self.interval).await;
        }
    }

    /// One pass; returns the number of quizzes deleted.
    pub async fn run_once(&self) -> Result<usize> {
        let grace = chrono::Duration::from_std(self.grace).context("Invalid orphan grace period")?;
        let cutoff = Utc::now() - grace;

        let orphans = self
            .store
            .list_orphaned_quizzes(cutoff, SWEEP_BATCH)
            .await
            .context("Failed to list orphaned quizzes")?;

        let mut deleted = 0;
        for quiz in orphans {
            self.store
                .delete_quiz(&quiz.id)
                .await
                .with_context(|| format!("Failed to delete orphaned quiz {}", quiz.id))?;
            ORPHANS_DELETED_TOTAL.inc();
            warn!(quiz_id = %quiz.id, owner_id = %quiz.owner_id, "Deleted orphaned quiz");
            deleted += 1;
        }

        Ok(deleted)
    }
}
