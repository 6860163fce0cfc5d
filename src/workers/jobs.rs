//! Bulk metadata jobs, run inside a worker thread

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{ProgressReporter, WorkerMessage};
use crate::db::{Database, TvShowRecord, UpsertEpisode};
use crate::services::metadata::best_match;
use crate::services::{MetadataProvider, TmdbClient};
use crate::tasks::{TaskDetails, TaskType};

/// Exit code of a worker stopped through its terminate channel
pub const EXIT_TERMINATED: i32 = 143;
/// Exit code reported for a worker thread that panicked
pub const EXIT_PANICKED: i32 = 101;

/// Work a metadata worker can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WorkerJob {
    /// Search each show by name and year and store the match
    BulkMatch { show_ids: Vec<Uuid> },
    /// Refetch details for already matched shows
    BulkRefresh { show_ids: Vec<Uuid> },
    /// Match every show that has no provider id yet
    SyncMissing,
    /// Fetch the season and episode hierarchy of one show
    Import { show_id: Uuid },
}

impl WorkerJob {
    pub fn task_type(&self) -> TaskType {
        match self {
            WorkerJob::BulkMatch { .. } => TaskType::BulkMetadataMatch,
            WorkerJob::BulkRefresh { .. } => TaskType::BulkMetadataRefresh,
            WorkerJob::SyncMissing => TaskType::MetadataSync,
            WorkerJob::Import { .. } => TaskType::MetadataImport,
        }
    }

    pub fn title(&self) -> String {
        match self {
            WorkerJob::BulkMatch { show_ids } => format!("Match metadata for {} shows", show_ids.len()),
            WorkerJob::BulkRefresh { show_ids } => {
                format!("Refresh metadata for {} shows", show_ids.len())
            }
            WorkerJob::SyncMissing => "Match unmatched shows".to_string(),
            WorkerJob::Import { .. } => "Import seasons and episodes".to_string(),
        }
    }

    /// Item count known before the worker starts
    pub fn known_total(&self) -> u64 {
        match self {
            WorkerJob::BulkMatch { show_ids } | WorkerJob::BulkRefresh { show_ids } => {
                show_ids.len() as u64
            }
            WorkerJob::SyncMissing | WorkerJob::Import { .. } => 0,
        }
    }

    pub fn details(&self) -> TaskDetails {
        match self {
            WorkerJob::BulkMatch { show_ids } | WorkerJob::BulkRefresh { show_ids } => {
                TaskDetails::Metadata {
                    show_ids: show_ids.clone(),
                }
            }
            WorkerJob::Import { show_id } => TaskDetails::Metadata {
                show_ids: vec![*show_id],
            },
            WorkerJob::SyncMissing => TaskDetails::None,
        }
    }
}

/// Builds the metadata provider inside the worker thread
pub trait ProviderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn MetadataProvider>>;
}

/// Provider factory backed by TMDB
pub struct TmdbProviderFactory {
    api_key: Option<String>,
}

impl TmdbProviderFactory {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

impl ProviderFactory for TmdbProviderFactory {
    fn create(&self) -> Result<Box<dyn MetadataProvider>> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .context("TMDB_API_KEY is not configured")?;
        Ok(Box::new(TmdbClient::new(api_key)?))
    }
}

/// What a worker thread is handed when it starts
pub(crate) struct WorkerContext {
    pub database_url: String,
    pub item_delay: Duration,
    pub factory: Arc<dyn ProviderFactory>,
}

/// Worker thread body. Returns the thread's exit code.
pub(crate) fn worker_main(
    job: WorkerJob,
    ctx: WorkerContext,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    terminate: oneshot::Receiver<()>,
) -> i32 {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = tx.send(WorkerMessage::Fail {
                error: format!("Failed to start worker runtime: {e}"),
            });
            return 1;
        }
    };

    runtime.block_on(async move {
        let mut progress = ProgressReporter::new(tx);

        tokio::select! {
            result = run_job(job, &ctx, &mut progress) => match result {
                Ok(()) => {
                    progress.complete();
                    0
                }
                Err(e) => {
                    progress.fail(format!("{e:#}"));
                    1
                }
            },
            // A dropped sender disables this branch instead of stopping the job
            Ok(()) = terminate => {
                debug!("Worker received terminate signal");
                EXIT_TERMINATED
            }
        }
    })
}

async fn run_job(job: WorkerJob, ctx: &WorkerContext, progress: &mut ProgressReporter) -> Result<()> {
    let db = Database::connect(&ctx.database_url)
        .await
        .context("Worker failed to open the database")?;
    let provider = ctx.factory.create()?;

    info!(job = ?job, provider = provider.name(), "Worker started");

    let result = match job {
        WorkerJob::BulkMatch { show_ids } => {
            process_shows(&db, provider.as_ref(), show_ids, ShowOperation::Match, ctx.item_delay, progress).await
        }
        WorkerJob::SyncMissing => {
            let show_ids = db
                .tv_shows()
                .list_unmatched()
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect();
            process_shows(&db, provider.as_ref(), show_ids, ShowOperation::Match, ctx.item_delay, progress).await
        }
        WorkerJob::BulkRefresh { show_ids } => {
            process_shows(&db, provider.as_ref(), show_ids, ShowOperation::Refresh, ctx.item_delay, progress).await
        }
        WorkerJob::Import { show_id } => {
            import_show(&db, provider.as_ref(), show_id, ctx.item_delay, progress).await
        }
    };

    db.close().await;

    info!(
        succeeded = progress.succeeded(),
        failed = progress.failed(),
        "Worker finished"
    );
    result
}

#[derive(Debug, Clone, Copy)]
enum ShowOperation {
    Match,
    Refresh,
}

/// Apply `operation` to every show id, one at a time with `delay` between items
async fn process_shows(
    db: &Database,
    provider: &dyn MetadataProvider,
    show_ids: Vec<Uuid>,
    operation: ShowOperation,
    delay: Duration,
    progress: &mut ProgressReporter,
) -> Result<()> {
    progress.set_total(show_ids.len() as u64);

    for (index, show_id) in show_ids.into_iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let show = match db.tv_shows().get_by_id(show_id).await {
            Ok(Some(show)) => show,
            Ok(None) => {
                progress.failure(&show_id.to_string(), "Show not found");
                continue;
            }
            Err(e) => {
                progress.failure(&show_id.to_string(), format!("{e:#}"));
                continue;
            }
        };

        let result = match operation {
            ShowOperation::Match => match_show(db, provider, &show).await.map(|_| ()),
            ShowOperation::Refresh => refresh_show(db, provider, &show).await,
        };

        match result {
            Ok(()) => {
                debug!(show = %show.name, operation = ?operation, "Show processed");
                progress.success(&show.name);
            }
            Err(e) => {
                warn!(show = %show.name, operation = ?operation, error = %e, "Show failed");
                progress.failure(&show.name, format!("{e:#}"));
            }
        }
    }

    Ok(())
}

async fn refresh_show(
    db: &Database,
    provider: &dyn MetadataProvider,
    show: &TvShowRecord,
) -> Result<()> {
    let provider_id = show
        .tmdb_id
        .ok_or_else(|| anyhow!("Show is not matched yet"))?;
    let metadata = provider.show_details(provider_id).await?;
    db.tv_shows()
        .apply_metadata(show.id, &metadata.to_update())
        .await?;
    Ok(())
}

/// Search the provider for a show and store the best match
async fn match_show(
    db: &Database,
    provider: &dyn MetadataProvider,
    show: &TvShowRecord,
) -> Result<i64> {
    let candidates = provider.search_show(&show.name, show.year).await?;
    let chosen = best_match(&show.name, show.year, &candidates)
        .ok_or_else(|| anyhow!("No confident match for '{}'", show.name))?;

    let metadata = provider.show_details(chosen.provider_id).await?;
    db.tv_shows()
        .apply_metadata(show.id, &metadata.to_update())
        .await?;
    Ok(metadata.provider_id)
}

async fn import_show(
    db: &Database,
    provider: &dyn MetadataProvider,
    show_id: Uuid,
    delay: Duration,
    progress: &mut ProgressReporter,
) -> Result<()> {
    let show = db
        .tv_shows()
        .get_by_id(show_id)
        .await?
        .with_context(|| format!("Show {show_id} not found"))?;

    let provider_id = match show.tmdb_id {
        Some(id) => id,
        None => match_show(db, provider, &show).await?,
    };
    let metadata = provider.show_details(provider_id).await?;
    progress.set_total(metadata.seasons.len() as u64);

    for (index, season) in metadata.seasons.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let item = format!("{} season {}", show.name, season.season_number);
        let result: Result<usize> = async {
            db.tv_shows()
                .upsert_season(
                    show.id,
                    season.season_number,
                    season.name.as_deref(),
                    season.episode_count,
                )
                .await?;

            let episodes = provider
                .season_episodes(provider_id, season.season_number)
                .await?;
            for episode in &episodes {
                db.episodes()
                    .upsert(UpsertEpisode {
                        show_id: show.id,
                        season_number: episode.season_number,
                        episode_number: episode.episode_number,
                        title: episode.title.clone(),
                        air_date: episode.air_date.clone(),
                        overview: episode.overview.clone(),
                    })
                    .await?;
            }
            Ok(episodes.len())
        }
        .await;

        match result {
            Ok(count) => {
                debug!(item = %item, episodes = count, "Season imported");
                progress.success(&item);
            }
            Err(e) => {
                warn!(item = %item, error = %e, "Season import failed");
                progress.failure(&item, format!("{e:#}"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_task_types() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let job = WorkerJob::BulkMatch {
            show_ids: ids.clone(),
        };
        assert_eq!(job.task_type(), TaskType::BulkMetadataMatch);
        assert_eq!(job.known_total(), 2);
        assert_eq!(job.details(), TaskDetails::Metadata { show_ids: ids });

        assert_eq!(WorkerJob::SyncMissing.task_type(), TaskType::MetadataSync);
        assert_eq!(WorkerJob::SyncMissing.known_total(), 0);
    }

    #[test]
    fn test_tmdb_factory_requires_key() {
        let err = TmdbProviderFactory::new(None).create().err().unwrap();
        assert!(err.to_string().contains("TMDB_API_KEY"));

        let err = TmdbProviderFactory::new(Some(String::new()))
            .create()
            .err()
            .unwrap();
        assert!(err.to_string().contains("TMDB_API_KEY"));
    }
}
