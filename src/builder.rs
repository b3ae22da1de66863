//! Pipeline assembly — the build run.
//!
//! Wires storage, reconciliation, the worker pool, and per-object
//! processing into one pass:
//!
//! ```text
//! list images ──► diff against previous manifest ──► dispatch new/changed
//!                                                        │ (bounded pool)
//!     fetch bytes ─► decode ─► EXIF/tone ─► derivatives ─┘ per object
//!                                                        │
//!            carried unchanged items ──► merge ──► commit manifest
//! ```
//!
//! Everything a stage needs arrives as an argument ([`BuildContext`]);
//! there is no ambient run state, which keeps concurrent builds in tests
//! isolated. The new manifest is committed atomically at the end of a full
//! pass — a cancelled or fatally failed run leaves the previous manifest
//! untouched.
//!
//! Per-object failures never abort the run: they surface as `failed`
//! entries in the [`RunSummary`], the exit status turns partial-success,
//! and everything that did process still publishes.

use crate::config::{effective_parallelism, BuilderConfig, ProviderKind};
use crate::imaging::{PhotoProcessor, ProcessedPhoto, RasterProcessor};
use crate::livephoto;
use crate::manifest::{
    self, assemble, BuildCounts, ForceModes, Manifest, PhotoManifestItem, RefreshScope, WorkItem,
    MANIFEST_KEY,
};
use crate::storage::{
    GitProvider, MemoryProvider, S3Provider, StorageError, StorageObject, StorageProvider,
};
use crate::worker::{run_bounded, CancelFlag, PoolConfig, ResultType, TaskOutcome};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("decode error: {0}")]
    Decode(#[from] crate::imaging::DecodeError),
    #[error("manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("processing task panicked: {0}")]
    Join(String),
}

/// Typed lifecycle hooks for pipeline extensions (thumbnail mirrors,
/// notification relays). All methods default to no-ops.
pub trait PipelineHook: Send + Sync {
    fn before_process(&self, _key: &str) {}
    fn after_process(&self, _item: &PhotoManifestItem, _result: ResultType) {}
    fn on_manifest_commit(&self, _manifest: &Manifest) {}
}

/// Everything one build run needs, resolved once and passed explicitly.
pub struct BuildContext {
    pub config: BuilderConfig,
    pub provider: Arc<dyn StorageProvider>,
    pub processor: Arc<dyn PhotoProcessor>,
    pub hooks: Vec<Arc<dyn PipelineHook>>,
    pub cancel: CancelFlag,
}

impl BuildContext {
    /// Production context: provider and processor from config.
    pub async fn from_config(config: BuilderConfig) -> Result<Self, StorageError> {
        let provider = provider_from_config(&config).await?;
        let processor: Arc<dyn PhotoProcessor> =
            Arc::new(RasterProcessor::from_options(&config.options));
        Ok(Self {
            config,
            provider,
            processor,
            hooks: Vec::new(),
            cancel: CancelFlag::new(),
        })
    }
}

/// Instantiate the configured storage backend.
pub async fn provider_from_config(
    config: &BuilderConfig,
) -> Result<Arc<dyn StorageProvider>, StorageError> {
    let formats = config.options.formats.clone();
    Ok(match config.storage.provider {
        ProviderKind::S3 => Arc::new(S3Provider::connect(&config.storage, formats).await?),
        ProviderKind::Git => Arc::new(GitProvider::new(
            config.storage.root.clone(),
            formats,
            config.storage.public_base_url.clone(),
        )),
        ProviderKind::Memory => Arc::new(MemoryProvider::new(formats)),
    })
}

/// End-of-run report.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub counts: BuildCounts,
    /// Keys that classified `failed`, for targeted force re-runs.
    pub failed_keys: Vec<String>,
    pub cancelled: bool,
    /// False when the run was cancelled or dry: the previous manifest
    /// still stands.
    pub committed: bool,
}

impl RunSummary {
    /// Total objects accounted for.
    pub fn total(&self) -> usize {
        self.counts.new + self.counts.processed + self.counts.skipped + self.counts.failed
    }

    pub fn is_partial(&self) -> bool {
        self.counts.failed > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} processed, {} skipped, {} failed ({} total)",
            self.counts.new,
            self.counts.processed,
            self.counts.skipped,
            self.counts.failed,
            self.total()
        )?;
        if self.counts.deleted > 0 {
            write!(f, ", {} deleted", self.counts.deleted)?;
        }
        if self.cancelled {
            write!(f, " [cancelled — previous manifest kept]")?;
        }
        Ok(())
    }
}

/// A full build pass. Returns the merged manifest and the summary.
pub struct BuildOutcome {
    pub manifest: Manifest,
    pub summary: RunSummary,
}

/// Run the pipeline once.
///
/// `dry_run` executes the diff and processing but never uploads the
/// manifest or deletes derivatives.
pub async fn build(
    ctx: &BuildContext,
    force: ForceModes,
    dry_run: bool,
) -> Result<BuildOutcome, BuildError> {
    let provider = &ctx.provider;

    // Fatal storage problems (bad credentials, unreachable endpoint)
    // surface here, before any mutation.
    let mut listing = provider.list_images().await?;
    // The pipeline's own outputs live in the same store; they are never
    // source material.
    listing.retain(|o| !is_internal_key(&o.key));
    info!(target: "storage", objects = listing.len(), "listed image objects");

    let previous_bytes = provider.get_file(MANIFEST_KEY).await?;
    let previous = Manifest::from_json(previous_bytes.as_deref());

    let live_pairs = if ctx.config.options.live_photo_detection {
        provider.detect_live_photos().await?
    } else {
        HashMap::new()
    };

    let plan = manifest::plan(&previous, &listing, force);
    info!(
        target: "worker",
        to_process = plan.to_process.len(),
        unchanged = plan.carried.len(),
        deleted = plan.deleted.len(),
        "reconciliation plan ready"
    );

    let pool = PoolConfig {
        parallelism: effective_parallelism(&ctx.config.worker),
        timeout: Duration::from_secs(ctx.config.worker.timeout_secs),
    };

    // Immutable snapshot shared by every worker task.
    let shared = Arc::new(ObjectTaskContext {
        provider: provider.clone(),
        processor: ctx.processor.clone(),
        hooks: ctx.hooks.clone(),
        live_pairs,
        digest_suffix_length: ctx.config.options.digest_suffix_length,
    });

    let work_shared = shared.clone();
    let outcomes = run_bounded(
        plan.to_process.clone(),
        pool,
        ctx.cancel.clone(),
        move |_, work| {
            let shared = work_shared.clone();
            async move { process_object(&shared, work).await }
        },
    )
    .await;

    // Fold worker outcomes into counts + placed items. Failed reprocesses
    // of an existing key carry the previous item forward: a photo should
    // not vanish from the gallery because one rebuild of it failed.
    let mut counts = BuildCounts {
        skipped: plan.carried.len(),
        ..Default::default()
    };
    let mut processed: Vec<(usize, PhotoManifestItem)> = Vec::new();
    let mut failed_keys = Vec::new();
    for (work, outcome) in plan.to_process.into_iter().zip(outcomes) {
        let object_result = match outcome {
            TaskOutcome::Finished(r) => r,
            TaskOutcome::TimedOut => ObjectResult::failed(&work),
            TaskOutcome::NotDispatched => ObjectResult {
                result: ResultType::Skipped,
                item: work.previous.clone(),
            },
        };

        match object_result.result {
            ResultType::New => counts.new += 1,
            ResultType::Processed => counts.processed += 1,
            ResultType::Skipped => counts.skipped += 1,
            ResultType::Failed => {
                counts.failed += 1;
                failed_keys.push(work.object.key.clone());
            }
        }

        if let Some(item) = object_result.item {
            for hook in &ctx.hooks {
                hook.after_process(&item, object_result.result);
            }
            processed.push((work.index, item));
        }
    }

    let cancelled = ctx.cancel.is_cancelled();

    // Derivative cleanup for vanished objects. Best-effort: a failed
    // delete is an orphaned thumbnail, not a failed build.
    counts.deleted = plan.deleted.len();
    if !dry_run && !cancelled {
        for item in &plan.deleted {
            let thumb_key = thumbnail_key(&item.id);
            if let Err(e) = provider.delete_file(&thumb_key).await {
                warn!(target: "storage", key = %thumb_key, error = %e, "orphan cleanup failed");
            }
        }
    }

    let new_manifest = assemble(plan.carried, processed, counts, Utc::now());

    let mut summary = RunSummary {
        counts,
        failed_keys,
        cancelled,
        committed: false,
    };

    if cancelled {
        info!(target: "worker", "run cancelled; previous manifest left intact");
        return Ok(BuildOutcome {
            manifest: new_manifest,
            summary,
        });
    }

    if !dry_run {
        let json = new_manifest.to_json_pretty()?;
        provider
            .upload_file(MANIFEST_KEY, json.into_bytes(), "application/json")
            .await?;
        summary.committed = true;
        for hook in &ctx.hooks {
            hook.on_manifest_commit(&new_manifest);
        }
    }

    info!(target: "worker", summary = %summary, "build finished");
    Ok(BuildOutcome {
        manifest: new_manifest,
        summary,
    })
}

/// Storage key for an item's thumbnail derivative.
pub fn thumbnail_key(item_id: &str) -> String {
    format!("{THUMBNAIL_PREFIX}{item_id}.avif")
}

const THUMBNAIL_PREFIX: &str = "thumbnails/";

/// Keys written by the pipeline itself, excluded from source listings.
fn is_internal_key(key: &str) -> bool {
    key == MANIFEST_KEY || key.starts_with(THUMBNAIL_PREFIX)
}

// =============================================================================
// Per-object processing
// =============================================================================

/// Read-only state shared across worker tasks for one run.
struct ObjectTaskContext {
    provider: Arc<dyn StorageProvider>,
    processor: Arc<dyn PhotoProcessor>,
    hooks: Vec<Arc<dyn PipelineHook>>,
    live_pairs: HashMap<String, StorageObject>,
    digest_suffix_length: usize,
}

struct ObjectResult {
    result: ResultType,
    item: Option<PhotoManifestItem>,
}

impl ObjectResult {
    /// Failure outcome; keeps the previous item alive when there is one.
    fn failed(work: &WorkItem) -> Self {
        Self {
            result: ResultType::Failed,
            item: work.previous.clone(),
        }
    }
}

/// Process one storage object into its manifest item.
///
/// All errors are converted to a `failed` result here, at the worker
/// boundary — nothing propagates out to cancel sibling work.
async fn process_object(ctx: &ObjectTaskContext, work: WorkItem) -> ObjectResult {
    let key = work.object.key.clone();
    for hook in &ctx.hooks {
        hook.before_process(&key);
    }

    let bytes = match ctx.provider.get_file(&key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            // Listed but gone by fetch time: deleted mid-run. Skip, never fail.
            warn!(target: "storage", key = %key, "object vanished between listing and fetch");
            return ObjectResult {
                result: ResultType::Skipped,
                item: None,
            };
        }
        Err(e) => {
            error!(target: "storage", key = %key, error = %e, "fetch failed");
            return ObjectResult::failed(&work);
        }
    };

    let success_result = if work.is_new() {
        ResultType::New
    } else {
        ResultType::Processed
    };

    let item = match work.scope {
        RefreshScope::Full => full_process(ctx, &work, bytes).await,
        RefreshScope::ManifestOnly => manifest_only(ctx, &work, bytes).await,
        RefreshScope::ThumbnailsOnly => thumbnails_only(ctx, &work, bytes).await,
    };

    match item {
        Ok(item) => {
            info!(target: "worker", key = %key, result = %success_result, "object processed");
            ObjectResult {
                result: success_result,
                item: Some(item),
            }
        }
        Err(e) => {
            error!(target: "worker", key = %key, error = %e, "object failed");
            ObjectResult::failed(&work)
        }
    }
}

/// Decode, extract, derive, upload — the whole per-object pipeline.
async fn full_process(
    ctx: &ObjectTaskContext,
    work: &WorkItem,
    bytes: Vec<u8>,
) -> Result<PhotoManifestItem, BuildError> {
    let processor = ctx.processor.clone();
    let digest_len = ctx.digest_suffix_length;
    let id_key = work.object.key.clone();
    let (photo, id) = tokio::task::spawn_blocking(move || {
        let photo = processor.process(&id_key, &bytes)?;
        let content = if digest_len > 0 { Some(&bytes[..]) } else { None };
        let id = manifest::item_id(&id_key, content, digest_len);
        Ok::<_, crate::imaging::DecodeError>((photo, id))
    })
    .await
    .map_err(|e| BuildError::Join(e.to_string()))??;

    let thumb_key = thumbnail_key(&id);
    ctx.provider
        .upload_file(&thumb_key, photo.derivatives.thumbnail_avif.clone(), "image/avif")
        .await?;

    Ok(assemble_item(ctx, work, id, &photo))
}

/// Metadata-only refresh: geometry, derivatives, and URLs carry over.
async fn manifest_only(
    ctx: &ObjectTaskContext,
    work: &WorkItem,
    bytes: Vec<u8>,
) -> Result<PhotoManifestItem, BuildError> {
    let previous = match &work.previous {
        Some(prev) => prev.clone(),
        // No previous item to touch up — fall back to the full pipeline.
        None => return full_process(ctx, work, bytes).await,
    };

    let exif = tokio::task::spawn_blocking(move || crate::exif::extract(&bytes))
        .await
        .map_err(|e| BuildError::Join(e.to_string()))?;

    let mut item = previous;
    item.date_taken = exif.as_ref().and_then(|e| e.date_taken.clone());
    item.description = exif.as_ref().and_then(|e| e.image_description.clone());
    item.exif = exif;
    item.last_modified = work.object.last_modified;
    item.size = work.object.size;
    item.etag = work.object.etag.clone();
    Ok(item)
}

/// Thumbnail-only refresh: metadata carries over, derivatives regenerate.
async fn thumbnails_only(
    ctx: &ObjectTaskContext,
    work: &WorkItem,
    bytes: Vec<u8>,
) -> Result<PhotoManifestItem, BuildError> {
    let previous = match &work.previous {
        Some(prev) => prev.clone(),
        None => return full_process(ctx, work, bytes).await,
    };

    let key = work.object.key.clone();
    let processor = ctx.processor.clone();
    let photo = tokio::task::spawn_blocking(move || processor.process(&key, &bytes))
        .await
        .map_err(|e| BuildError::Join(e.to_string()))??;

    let thumb_key = thumbnail_key(&previous.id);
    ctx.provider
        .upload_file(&thumb_key, photo.derivatives.thumbnail_avif.clone(), "image/avif")
        .await?;

    let mut item = previous;
    item.thumb_hash = photo.derivatives.thumb_hash.clone();
    item.width = photo.width;
    item.height = photo.height;
    item.aspect_ratio = crate::imaging::aspect_ratio(photo.width, photo.height);
    item.last_modified = work.object.last_modified;
    item.size = work.object.size;
    item.etag = work.object.etag.clone();
    Ok(item)
}

/// Build the manifest item for a fully processed photo.
fn assemble_item(
    ctx: &ObjectTaskContext,
    work: &WorkItem,
    id: String,
    photo: &ProcessedPhoto,
) -> PhotoManifestItem {
    let key = &work.object.key;
    let companion = livephoto::companion_for(key, &ctx.live_pairs);

    PhotoManifestItem {
        title: Some(display_title(key)),
        description: photo
            .exif
            .as_ref()
            .and_then(|e| e.image_description.clone()),
        tags: key_tags(key),
        date_taken: photo.exif.as_ref().and_then(|e| e.date_taken.clone()),
        width: photo.width,
        height: photo.height,
        aspect_ratio: crate::imaging::aspect_ratio(photo.width, photo.height),
        original_url: ctx.provider.generate_public_url(key),
        thumbnail_url: ctx.provider.generate_public_url(&thumbnail_key(&id)),
        live_photo_video_url: companion.map(|c| ctx.provider.generate_public_url(&c.key)),
        thumb_hash: photo.derivatives.thumb_hash.clone(),
        s3_key: key.clone(),
        last_modified: work.object.last_modified,
        size: work.object.size,
        etag: work.object.etag.clone(),
        exif: photo.exif.clone(),
        tone_analysis: photo.tone.clone(),
        is_live_photo: companion.is_some(),
        is_hdr: photo.hdr,
        id,
    }
}

/// Human title from the key's file name: stem with separators spaced out.
fn display_title(key: &str) -> String {
    let name = key.rsplit('/').next().unwrap_or(key);
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    stem.replace(['-', '_'], " ").trim().to_string()
}

/// Tags from the key's directory components.
fn key_tags(key: &str) -> Vec<String> {
    let mut parts: Vec<&str> = key.split('/').collect();
    parts.pop(); // file name
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}
