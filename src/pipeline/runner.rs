//! Run driver: the only owner of the aggregate model.

use anyhow::{anyhow, Context};
use indexmap::{IndexMap, IndexSet};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::artifact::Artifact;
use super::{Fragment, FragmentCache};
use crate::ast::AstProvider;
use crate::depfile;
use crate::emit::{self, PostFormatter};
use crate::error::RunFailure;
use crate::extract::extract;
use crate::model::BindingModel;

/// Worker stack; AST conversion and extraction recurse over deep trees.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Everything a run needs besides the AST provider.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Translation units, in the order their fragments are merged.
    pub inputs: Vec<PathBuf>,
    /// `None` writes every module to the output stream instead.
    pub output_dir: Option<PathBuf>,
    pub package_prefix: Option<String>,
    /// Artifacts of earlier runs to resolve against.
    pub imports: Vec<PathBuf>,
    pub export: Option<PathBuf>,
    /// Worker count; 0 picks the hardware concurrency.
    pub jobs: usize,
    pub parse_only: bool,
    pub prefix: Option<PathBuf>,
    /// Build `prefix` from the first input before anything else runs.
    pub first_is_prefix: bool,
    /// `None` disables the fragment cache.
    pub cache_dir: Option<PathBuf>,
    pub post_format: Option<String>,
    pub progress: bool,
}

/// Counts reported after a successful run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files: usize,
    pub cached: usize,
    pub modules: usize,
    pub classes: usize,
    pub enums: usize,
    pub rules: usize,
    pub written: Vec<PathBuf>,
    pub format_failures: usize,
}

pub struct Runner<'p> {
    provider: &'p dyn AstProvider,
    options: RunOptions,
    cache: Option<FragmentCache>,
}

impl<'p> Runner<'p> {
    pub fn new(provider: &'p dyn AstProvider, options: RunOptions) -> Self {
        let cache = options.cache_dir.clone().map(FragmentCache::new);
        Self {
            provider,
            options,
            cache,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Extract, aggregate, export and emit. Stub text goes to `out` when no
    /// output directory is configured.
    pub fn run(&self, out: &mut dyn Write) -> Result<RunSummary, RunFailure> {
        let (model, dependencies, cached) = self.build_model()?;

        let mut summary = RunSummary {
            files: self.options.inputs.len(),
            cached,
            modules: model.modules().iter().filter(|m| !m.imported).count(),
            classes: model.classes().iter().filter(|c| !c.imported).count(),
            enums: model.enums().iter().filter(|e| !e.imported).count(),
            rules: model.rule_count(),
            ..Default::default()
        };

        if let Some(export) = &self.options.export {
            self.export(export, &model, dependencies)?;
        }

        if self.options.parse_only {
            tracing::info!("parse-only run; no stubs emitted");
            return Ok(summary);
        }

        summary.written = emit::emit(&model, self.options.output_dir.as_deref(), out)?;
        if let Some(formatter) = self
            .options
            .post_format
            .as_deref()
            .and_then(PostFormatter::parse)
        {
            summary.format_failures = formatter.run_all(&summary.written);
        }
        Ok(summary)
    }

    /// The merged and fixed-up model, each input's dependencies, and how
    /// many fragments came from the cache.
    pub fn build_model(
        &self,
    ) -> Result<(BindingModel, IndexMap<String, Vec<PathBuf>>, usize), RunFailure> {
        let mut model = self.load_imports()?;
        let prefix = self.prepare_prefix()?;
        let fragments = self.extract_all(prefix.as_deref())?;

        let mut dependencies = IndexMap::new();
        let mut cached = 0;
        for (path, fragment, from_cache) in fragments {
            cached += usize::from(from_cache);
            model
                .merge(fragment.model)
                .with_context(|| format!("while merging the registrations of {}", path.display()))?;
            dependencies.insert(path.display().to_string(), fragment.dependencies);
        }

        model
            .fixup(self.options.package_prefix.as_deref())
            .context("while assigning fully-qualified names")?;
        tracing::info!(
            modules = model.modules().len(),
            classes = model.classes().len(),
            enums = model.enums().len(),
            rules = model.rule_count(),
            "model aggregated"
        );
        Ok((model, dependencies, cached))
    }

    fn load_imports(&self) -> Result<BindingModel, RunFailure> {
        let mut model = BindingModel::new();
        for path in &self.options.imports {
            let imported = Artifact::load(path)?.into_imported_model();
            model
                .merge(imported)
                .with_context(|| format!("while importing {}", path.display()))?;
            tracing::debug!(artifact = %path.display(), "imported");
        }
        Ok(model)
    }

    /// Build the precompiled prefix when the first input is its source.
    fn prepare_prefix(&self) -> Result<Option<PathBuf>, RunFailure> {
        let prefix = match &self.options.prefix {
            Some(prefix) => prefix.clone(),
            None if self.options.first_is_prefix => {
                return Err(anyhow!("the first input is marked as prefix but no prefix path is set").into())
            }
            None => return Ok(None),
        };
        if self.options.first_is_prefix {
            let source = self
                .options
                .inputs
                .first()
                .ok_or_else(|| anyhow!("no input to build the precompiled prefix from"))?;
            let deps = self
                .provider
                .build_prefix(source, &prefix)
                .with_context(|| format!("while building the precompiled prefix {}", prefix.display()))?;
            depfile::write(&with_suffix(&prefix, ".d"), &prefix, &deps)
                .with_context(|| format!("writing the dependency file of {}", prefix.display()))?;
            tracing::info!(prefix = %prefix.display(), "precompiled prefix built");
        }
        Ok(Some(prefix))
    }

    /// Extract every input on the worker pool. All failures are collected;
    /// successful fragments come back in input order.
    fn extract_all(&self, prefix: Option<&Path>) -> Result<Vec<(PathBuf, Fragment, bool)>, RunFailure> {
        let inputs = &self.options.inputs;
        let workers = self.worker_count();
        tracing::debug!(files = inputs.len(), workers, "extracting");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .stack_size(WORKER_STACK_SIZE)
            .thread_name(|i| format!("stubsmith-worker-{}", i))
            .build()
            .context("starting the worker pool")?;
        let progress = self.progress_bar(inputs.len() as u64);
        let fingerprint = self.provider.fingerprint();

        let results: Vec<(usize, anyhow::Result<(Fragment, bool)>)> = pool.install(|| {
            inputs
                .par_iter()
                .enumerate()
                .map(|(index, path)| {
                    // The prefix's own source is not parsed on top of itself.
                    let prefix = if index == 0 && self.options.first_is_prefix {
                        None
                    } else {
                        prefix
                    };
                    let result = self
                        .extract_one(path, prefix, &fingerprint)
                        .with_context(|| format!("while extracting {}", path.display()));
                    progress.inc(1);
                    (index, result)
                })
                .collect()
        });
        progress.finish_and_clear();

        let mut fragments = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (index, result) in results {
            match result {
                Ok((fragment, cached)) => fragments.push((inputs[index].clone(), fragment, cached)),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Err(RunFailure { errors });
        }
        Ok(fragments)
    }

    fn extract_one(
        &self,
        path: &Path,
        prefix: Option<&Path>,
        fingerprint: &str,
    ) -> anyhow::Result<(Fragment, bool)> {
        if let Some(cache) = &self.cache {
            if let Some(fragment) = cache.get(path, fingerprint, prefix) {
                tracing::debug!(source = %path.display(), "fragment from cache");
                return Ok((fragment, true));
            }
        }

        let started = SystemTime::now();
        let parsed = self.provider.parse(path, prefix)?;
        let model = extract(&parsed.unit)?;
        let fragment = Fragment {
            model,
            dependencies: parsed.dependencies,
        };
        if let Some(cache) = &self.cache {
            cache.put(path, fingerprint, prefix, &fragment, started);
        }
        Ok((fragment, false))
    }

    fn export(
        &self,
        path: &Path,
        model: &BindingModel,
        dependencies: IndexMap<String, Vec<PathBuf>>,
    ) -> Result<(), RunFailure> {
        let artifact = Artifact::new(model, dependencies);
        artifact.save(path)?;

        let mut deps: IndexSet<PathBuf> = artifact.all_dependencies().into_iter().collect();
        deps.extend(self.options.prefix.iter().cloned());
        if let Ok(exe) = std::env::current_exe() {
            deps.insert(exe);
        }
        let deps: Vec<PathBuf> = deps.into_iter().collect();
        depfile::write(&with_suffix(path, ".d"), path, &deps)
            .with_context(|| format!("writing the dependency file of {}", path.display()))?;
        tracing::info!(artifact = %path.display(), "artifact exported");
        Ok(())
    }

    fn worker_count(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let requested = if self.options.jobs == 0 {
            available
        } else {
            self.options.jobs
        };
        requested.min(self.options.inputs.len()).max(1)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.options.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {wide_msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message("extracting");
        bar
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
