//! # Gallery Builder
//!
//! A concurrent photo ingestion pipeline: scan an object store, decode
//! whatever lands in it, extract metadata, generate derivatives, and
//! reconcile everything into one durable JSON manifest that galleries,
//! feeds, and dashboards consume verbatim.
//!
//! # Architecture: Diff-Driven Pipeline
//!
//! A build is one pass over the store:
//!
//! ```text
//! 1. List       storage listing            (provider-polymorphic)
//! 2. Reconcile  listing × previous manifest → new / changed / unchanged / deleted
//! 3. Process    bounded worker pool: decode → EXIF/tone → thumbnail/thumbhash
//! 4. Commit     merged manifest, written atomically at the end
//! ```
//!
//! The diff is the point: rebuilds over a large library touch only what
//! changed, and running twice against an unchanged store is byte-identical
//! output with zero objects reprocessed.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`storage`] | Provider trait + S3 / git-worktree / in-memory backends, key normalization |
//! | [`manifest`] | Manifest model, fingerprint diffing, force modes, stable assembly |
//! | [`imaging`] | Decode (AVIF via rav1d, HEIC via converter, rasters via `image`), tone analysis, thumbnail + ThumbHash |
//! | [`exif`] | Hand-rolled TIFF/EXIF parser, `PickedExif` projection, Fuji/Sony recipes |
//! | [`livephoto`] | Image/video companion pairing by filename stem |
//! | [`worker`] | Bounded concurrency, per-object timeout, cancellation |
//! | [`builder`] | Run assembly: wiring, per-object pipeline, hooks, summary |
//! | [`config`] | `builder.toml` loading, env overrides, validation |
//!
//! # Design Decisions
//!
//! ## Fingerprints Over Mtimes
//!
//! Change detection is the (etag, size, lastModified) tuple from the
//! listing — no content download needed to classify an object, which keeps
//! the no-op rebuild at one LIST request. The git backend hashes content
//! for its etag because `git checkout` rewrites mtimes.
//!
//! ## Explicit Context, No Ambient State
//!
//! Every stage takes what it needs as arguments ([`builder::BuildContext`],
//! processor handles, the previous-manifest map). There is no module-global
//! logger object and no implicit task-local context: the library emits
//! `tracing` events and lets the binary own subscriber installation, so
//! parallel builds in tests never share hidden state.
//!
//! ## Pure-Rust Decode Path
//!
//! AVIF decodes through `avif-parse` + `rav1d` (pure Rust port of dav1d)
//! because the `image` crate's `"avif"` feature is encoder-only. The one
//! exception to self-containedness is HEIC, delegated to an external
//! converter command — there is no production-ready pure-Rust HEIF decoder,
//! and the converter is an explicit, configurable collaborator rather than
//! a linked C library.
//!
//! ## Failure Isolation At The Worker Boundary
//!
//! One photo's corrupt bytes must not take down a five-thousand-photo
//! build. Per-object errors become `failed` results inside the worker;
//! only configuration and storage-level failures (bad credentials, dead
//! endpoint) abort a run, and those abort it before anything mutates.

pub mod builder;
pub mod config;
pub mod exif;
pub mod imaging;
pub mod livephoto;
pub mod manifest;
pub mod storage;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;
