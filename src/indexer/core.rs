//! The full-corpus indexing pass.
//!
//! Four ordered phases, each independently resumable because every phase
//! boundary persists the registry snapshot:
//!
//! 1. Matched-function discovery — source definitions correlated to their
//!    built assembly, call graph extracted, records upserted with both
//!    sides populated.
//! 2. Unmatched-function discovery — assembly modules under the
//!    non-matching root scanned for functions with no source yet.
//! 3. Embedding — delegated to [`super::embedding`].
//! 4. Persistence and report.
//!
//! Per-item failures are isolated and collected; only one pass may run at
//! a time.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::embedding::{self, EmbeddingError};
use crate::config::Config;
use crate::correlate::BuildCorrelator;
use crate::db::{FunctionRecord, Registry, RegistryError, RegistryStats, function_id};
use crate::embedder::Embedder;
use crate::matcher::SourceMatcher;
use crate::scanner::{Arch, ScanError};

#[derive(Error, Debug)]
pub enum IndexError {
    /// A second pass was requested while one is in flight. Rejected, not
    /// queued.
    #[error("an indexing pass is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ScanError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What one pass did, including the per-item failures it isolated.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub source_files: usize,
    pub matched_functions: usize,
    pub unmatched_functions: usize,
    pub embedded_batches: usize,
    pub embedding_skipped: bool,
    /// One entry per isolated failure, with enough context to retry
    /// narrowly (file, function, or batch).
    pub failures: Vec<String>,
    pub stats: RegistryStats,
}

type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

pub struct Indexer {
    config: Config,
    arch: Arch,
    matcher: Arc<dyn SourceMatcher>,
    correlator: Arc<dyn BuildCorrelator>,
    embedder: Option<Arc<dyn Embedder>>,
    progress: Option<ProgressFn>,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("config", &self.config)
            .field("arch", &self.arch)
            .field("has_embedder", &self.embedder.is_some())
            .field("has_progress", &self.progress.is_some())
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

/// Releases the single-flight flag when a pass ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Indexer {
    pub fn new(
        config: Config,
        matcher: Arc<dyn SourceMatcher>,
        correlator: Arc<dyn BuildCorrelator>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, ScanError> {
        let arch = config.arch.parse()?;
        Ok(Self {
            config,
            arch,
            matcher,
            correlator,
            embedder,
            progress: None,
            in_flight: AtomicBool::new(false),
        })
    }

    /// Install a callback receiving `(completed_batch, total_batches)`
    /// during the embedding phase.
    #[must_use]
    pub fn on_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run one full indexing pass. Rejects concurrent starts.
    pub async fn run(&self, registry: &mut Registry) -> Result<IndexReport, IndexError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IndexError::AlreadyRunning);
        }
        let _guard = FlightGuard(&self.in_flight);

        let mut report = IndexReport::default();

        let matched_ids = self.discover_matched(registry, &mut report).await?;
        registry.save()?;

        self.discover_unmatched(registry, &matched_ids, &mut report).await?;
        registry.save()?;

        match &self.embedder {
            Some(embedder) => {
                let default_progress =
                    |done: usize, total: usize| info!("Embedded batch {done}/{total}");
                let progress: &(dyn Fn(usize, usize) + Send + Sync) = match &self.progress {
                    Some(p) => p.as_ref(),
                    None => &default_progress,
                };
                report.embedded_batches =
                    embedding::embed_pending(registry, Arc::clone(embedder), progress).await?;
            }
            None => {
                warn!("No embedding provider configured, skipping embedding phase");
                report.embedding_skipped = true;
            }
        }

        registry.save()?;
        report.stats = registry.stats();
        info!(
            "Indexing pass complete: {} functions ({} translated), {} vectors, {} failures",
            report.stats.total_functions,
            report.stats.translated,
            report.stats.total_vectors,
            report.failures.len()
        );
        Ok(report)
    }

    /// Phase 1: walk source files, correlate each defined function to its
    /// built assembly, upsert matched records with the call graph. Returns
    /// the ids registered by this phase.
    async fn discover_matched(
        &self,
        registry: &mut Registry,
        report: &mut IndexReport,
    ) -> Result<HashSet<String>, IndexError> {
        let files = self.config.source_files().map_err(IndexError::Other)?;
        report.source_files = files.len();
        info!("Phase 1: scanning {} source files", files.len());

        let mut tasks: JoinSet<(Vec<FunctionRecord>, Vec<String>)> = JoinSet::new();
        for path in files {
            let matcher = Arc::clone(&self.matcher);
            let correlator = Arc::clone(&self.correlator);
            let arch = self.arch;
            tasks.spawn_blocking(move || scan_source_file(&path, &*matcher, &*correlator, arch));
        }

        let mut matched_ids = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let (records, failures) = match joined {
                Ok(result) => result,
                Err(e) => {
                    report.failures.push(format!("source scan task failed: {e}"));
                    continue;
                }
            };
            for failure in failures {
                warn!("{failure}");
                report.failures.push(failure);
            }
            for record in records {
                matched_ids.insert(record.id.clone());
                registry.upsert_function(record)?;
                report.matched_functions += 1;
            }
        }
        Ok(matched_ids)
    }

    /// Phase 2: scan assembly modules under the non-matching root and
    /// upsert assembly-only functions. Ids phase 1 just matched are left
    /// alone — a matched record is strictly richer than an assembly-only
    /// one. Anything else is overwritten, so a changed module refreshes
    /// its records on re-index.
    async fn discover_unmatched(
        &self,
        registry: &mut Registry,
        matched_ids: &HashSet<String>,
        report: &mut IndexReport,
    ) -> Result<(), IndexError> {
        let root = Path::new(&self.config.nonmatching_dir);
        if !root.exists() {
            info!(
                "Phase 2: non-matching root {} absent, nothing to scan",
                root.display()
            );
            return Ok(());
        }

        let mut modules = Vec::new();
        let walker = ignore::WalkBuilder::new(root).hidden(false).build();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let ext = path.extension().and_then(|s| s.to_str()).unwrap_or_default();
            if matches!(ext, "s" | "asm" | "inc") {
                modules.push(path.to_path_buf());
            }
        }
        info!("Phase 2: scanning {} assembly modules", modules.len());

        let mut tasks: JoinSet<Result<(String, Vec<crate::scanner::ScannedFunction>), String>> =
            JoinSet::new();
        for path in modules {
            let arch = self.arch;
            tasks.spawn_blocking(move || {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| format!("{}: {e}", path.display()))?;
                let module_path = path.to_string_lossy().replace('\\', "/");
                Ok((module_path, arch.split_functions(&text)))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let scanned = match joined {
                Ok(result) => result,
                Err(e) => {
                    report.failures.push(format!("assembly scan task failed: {e}"));
                    continue;
                }
            };
            match scanned {
                Ok((module_path, functions)) => {
                    for function in functions {
                        // Metadata-only stubs carry no instruction lines.
                        if function.body.is_empty() {
                            continue;
                        }
                        let id = function_id(&function.name);
                        if matched_ids.contains(&id) {
                            continue;
                        }
                        let calls = self
                            .arch
                            .extract_calls(&function.body)
                            .into_iter()
                            .map(|name| function_id(&name))
                            .collect();
                        registry.upsert_function(FunctionRecord {
                            id,
                            name: function.name,
                            source_code: None,
                            source_module_path: None,
                            assembly_module_path: module_path.clone(),
                            assembly_code: function.body,
                            calls_function_ids: calls,
                        })?;
                        report.unmatched_functions += 1;
                    }
                }
                Err(failure) => {
                    warn!("{failure}");
                    report.failures.push(failure);
                }
            }
        }
        Ok(())
    }
}

/// Scan one source file: all defined functions, each correlated to its
/// assembly. Failures are collected per function, not propagated.
fn scan_source_file(
    path: &Path,
    matcher: &dyn SourceMatcher,
    correlator: &dyn BuildCorrelator,
    arch: Arch,
) -> (Vec<FunctionRecord>, Vec<String>) {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => return (Vec::new(), vec![format!("{}: {e}", path.display())]),
    };
    let module_base = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let source_path = path.to_string_lossy().replace('\\', "/");

    let mut records = Vec::new();
    let mut failures = Vec::new();
    for def in matcher.function_definitions(&source) {
        match correlator.lookup(&def.name, &module_base) {
            Ok(Some(asm)) => {
                if asm.body.is_empty() {
                    continue;
                }
                let calls = arch
                    .extract_calls(&asm.body)
                    .into_iter()
                    .map(|name| function_id(&name))
                    .collect();
                records.push(FunctionRecord {
                    id: function_id(&def.name),
                    name: def.name,
                    source_code: Some(def.text),
                    source_module_path: Some(source_path.clone()),
                    assembly_module_path: asm.module_path,
                    assembly_code: asm.body,
                    calls_function_ids: calls,
                });
            }
            Ok(None) => {}
            Err(e) => failures.push(format!(
                "{}: correlating {} failed: {e}",
                path.display(),
                def.name
            )),
        }
    }
    (records, failures)
}
