//! Pipeline module.
//!
//! Drives every manifest source through fetch, detection, extraction,
//! emission and strict compilation, then removes artifacts whose source
//! is no longer in the manifest.
//!
//! Sources are processed one at a time in manifest order. The pipeline
//! takes no locks on its output directories: callers must not run two
//! pipelines against the same directories at once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::bucket::RuleBucket;
use crate::compiler::{compile_atomic, remove_if_exists, tmp_path, CompileOptions, RuleCompiler};
use crate::emit::{mihomo, Target, DEFAULT_RULESET_VERSION};
use crate::error::Result;
use crate::fetch::SourceFetcher;
use crate::format::detect_document;
use crate::parser::{extract_document, Document};
use crate::types::{RuleKind, SourceDescriptor, SourceFormat};

/// Pipeline options.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Output directory for `.srs` artifacts
    pub singbox_dir: PathBuf,
    /// Output directory for `.mrs` artifacts
    pub mihomo_dir: PathBuf,
    /// Directory for emitted engine sources
    pub work_dir: PathBuf,
    /// Options passed to every compiler invocation
    pub compile: CompileOptions,
    /// Keep emitted sources in `work_dir` after compiling
    pub keep_sources: bool,
    /// sing-box rule-set source version
    pub ruleset_version: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            singbox_dir: PathBuf::from("dist/singbox"),
            mihomo_dir: PathBuf::from("dist/mihomo"),
            work_dir: PathBuf::from(".work"),
            compile: CompileOptions::default(),
            keep_sources: false,
            ruleset_version: DEFAULT_RULESET_VERSION,
        }
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_singbox_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.singbox_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_mihomo_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.mihomo_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.compile.strict = strict;
        self
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile.timeout = timeout;
        self
    }

    pub fn with_keep_sources(mut self, keep: bool) -> Self {
        self.keep_sources = keep;
        self
    }

    pub fn with_ruleset_version(mut self, version: u32) -> Self {
        self.ruleset_version = version;
        self
    }

    /// Output directory for a target's artifacts
    pub fn artifact_dir(&self, target: Target) -> &Path {
        match target {
            Target::SingBox => &self.singbox_dir,
            Target::MihomoDomain | Target::MihomoIpCidr => &self.mihomo_dir,
        }
    }

    /// Full artifact path for a source name
    pub fn artifact_path(&self, target: Target, name: &str) -> PathBuf {
        self.artifact_dir(target).join(target.artifact_file_name(name))
    }
}

/// Outcome of one compile target for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    /// Artifact written
    Built { bytes: u64 },
    /// Nothing to compile for this target; any previous artifact was removed
    NoRules,
    /// Emission or compilation failed
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub target: Target,
    pub status: TargetStatus,
}

/// Per-source stage outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Rules were extracted and handed to the targets
    Extracted,
    /// Extraction yielded nothing
    Empty,
    /// The raw text could not be fetched
    FetchFailed { reason: String },
}

/// Per-source build statistics
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub name: String,
    pub format: Option<SourceFormat>,
    pub counts: BTreeMap<RuleKind, usize>,
    pub outcome: SourceOutcome,
    pub targets: Vec<TargetOutcome>,
}

impl BuildResult {
    fn new(name: &str, outcome: SourceOutcome) -> Self {
        Self {
            name: name.to_string(),
            format: None,
            counts: BTreeMap::new(),
            outcome,
            targets: Vec::new(),
        }
    }

    /// Rules extracted and no target failed
    pub fn is_success(&self) -> bool {
        self.outcome == SourceOutcome::Extracted
            && !self
                .targets
                .iter()
                .any(|t| matches!(t.status, TargetStatus::Failed { .. }))
    }

    pub fn target(&self, target: Target) -> Option<&TargetStatus> {
        self.targets
            .iter()
            .find(|t| t.target == target)
            .map(|t| &t.status)
    }

    /// Total bytes written across targets
    pub fn bytes_written(&self) -> u64 {
        self.targets
            .iter()
            .map(|t| match t.status {
                TargetStatus::Built { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }
}

/// Tally of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub results: Vec<BuildResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub emptied: usize,
    pub orphans_removed: usize,
}

/// The normalization and compilation pipeline.
pub struct Pipeline {
    fetcher: Box<dyn SourceFetcher>,
    compilers: Vec<(Target, Box<dyn RuleCompiler>)>,
    options: PipelineOptions,
}

impl Pipeline {
    /// Create a pipeline with no compile targets enabled.
    pub fn new(fetcher: Box<dyn SourceFetcher>, options: PipelineOptions) -> Self {
        Self {
            fetcher,
            compilers: Vec::new(),
            options,
        }
    }

    /// Enable a target with the given compiler, replacing any previous one.
    pub fn with_compiler(mut self, target: Target, compiler: Box<dyn RuleCompiler>) -> Self {
        self.compilers.retain(|(t, _)| *t != target);
        self.compilers.push((target, compiler));
        self.compilers
            .sort_by_key(|(t, _)| Target::ALL.iter().position(|a| a == t));
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Enabled targets, in build order
    pub fn targets(&self) -> impl Iterator<Item = Target> + '_ {
        self.compilers.iter().map(|(t, _)| *t)
    }

    fn prepare_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.options.work_dir)?;
        for target in self.targets() {
            fs::create_dir_all(self.options.artifact_dir(target))?;
        }
        Ok(())
    }

    /// Process every source, then remove orphaned artifacts.
    ///
    /// Per-source failures are recorded in the summary; only directory
    /// setup errors abort the run.
    pub fn run(&self, sources: &[SourceDescriptor]) -> Result<RunSummary> {
        self.prepare_dirs()?;

        let mut summary = RunSummary::default();

        for source in sources {
            let result = self.build_source(source);
            match &result.outcome {
                SourceOutcome::Empty => summary.emptied += 1,
                _ if result.is_success() => summary.succeeded += 1,
                _ => summary.failed += 1,
            }
            summary.results.push(result);
        }

        let names: HashSet<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        summary.orphans_removed = self.remove_orphans(&names);

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            emptied = summary.emptied,
            orphans_removed = summary.orphans_removed,
            "run complete"
        );
        Ok(summary)
    }

    /// Fetch, classify, extract and compile a single source.
    pub fn build_source(&self, source: &SourceDescriptor) -> BuildResult {
        let name = source.name.as_str();
        info!(source = name, url = %source.url, hint = %source.format, "processing");

        let text = match self.fetcher.fetch(&source.url) {
            Ok(text) => text,
            Err(e) => {
                error!(source = name, stage = "fetch", error = %e, "fetch failed");
                self.clear_artifacts(name);
                return BuildResult::new(
                    name,
                    SourceOutcome::FetchFailed {
                        reason: e.to_string(),
                    },
                );
            }
        };

        let doc = Document::parse(&text);
        let format = detect_document(source.format, &doc, &text);
        debug!(source = name, stage = "detect", format = %format, "classified");
        let bucket = extract_document(format, &doc, &text);

        let counts = bucket.counts();
        info!(
            source = name,
            stage = "extract",
            format = %format,
            rules = bucket.len(),
            "extracted"
        );
        for (kind, count) in &counts {
            debug!(source = name, kind = %kind, count, "rule count");
        }

        if bucket.is_empty() {
            warn!(source = name, stage = "extract", "no rules extracted");
            self.clear_artifacts(name);
            let mut result = BuildResult::new(name, SourceOutcome::Empty);
            result.format = Some(format);
            return result;
        }

        let mut result = BuildResult::new(name, SourceOutcome::Extracted);
        result.format = Some(format);
        result.counts = counts;

        if self.targets().any(|t| t != Target::SingBox) {
            for kind in mihomo::unsupported_kinds(&bucket) {
                debug!(source = name, kind = %kind, "not representable in mihomo rule-sets");
            }
        }

        for (target, compiler) in &self.compilers {
            let status = self.build_target(*target, compiler.as_ref(), name, &bucket);
            result.targets.push(TargetOutcome {
                target: *target,
                status,
            });
        }

        result
    }

    fn build_target(
        &self,
        target: Target,
        compiler: &dyn RuleCompiler,
        name: &str,
        bucket: &RuleBucket,
    ) -> TargetStatus {
        let artifact = self.options.artifact_path(target, name);

        if !target.has_content(bucket) {
            debug!(source = name, target = %target, "no rules for target");
            self.discard(&artifact);
            return TargetStatus::NoRules;
        }

        let source_path = self.options.work_dir.join(target.source_file_name(name));
        let emitted = target
            .render(bucket, self.options.ruleset_version)
            .and_then(|text| fs::write(&source_path, text).map_err(Into::into));

        if let Err(e) = emitted {
            error!(source = name, stage = "emit", target = %target, error = %e, "emit failed");
            self.discard(&artifact);
            return TargetStatus::Failed {
                reason: e.to_string(),
            };
        }

        let compiled =
            compile_atomic(compiler, &source_path, &artifact, &self.options.compile);

        if !self.options.keep_sources {
            if let Err(e) = remove_if_exists(&source_path) {
                warn!("failed to remove {}: {}", source_path.display(), e);
            }
        }

        match compiled {
            Ok(bytes) => TargetStatus::Built { bytes },
            Err(e) => {
                error!(
                    source = name,
                    stage = "compile",
                    target = %target,
                    error = %e,
                    "compile failed"
                );
                TargetStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Strict mode: remove an artifact that the current build cannot back.
    fn discard(&self, artifact: &Path) -> bool {
        if !self.options.compile.strict {
            return false;
        }
        let _ = remove_if_exists(&tmp_path(artifact));
        match remove_if_exists(artifact) {
            Ok(removed) => {
                if removed {
                    info!(stage = "cleanup", "removed {}", artifact.display());
                }
                removed
            }
            Err(e) => {
                warn!(stage = "cleanup", "failed to remove {}: {}", artifact.display(), e);
                false
            }
        }
    }

    /// Strict mode: remove every artifact for a source name.
    fn clear_artifacts(&self, name: &str) -> usize {
        self.targets()
            .filter(|t| self.discard(&self.options.artifact_path(*t, name)))
            .count()
    }

    /// Delete artifacts in the output directories that no current source owns.
    ///
    /// Only files with an artifact extension of an enabled target (or its
    /// `.tmp` form) are considered; anything else is left alone.
    fn remove_orphans(&self, names: &HashSet<&str>) -> usize {
        let mut managed: HashMap<&Path, (HashSet<&'static str>, HashSet<String>)> = HashMap::new();

        for target in self.targets() {
            let (extensions, expected) = managed
                .entry(self.options.artifact_dir(target))
                .or_default();
            extensions.insert(match target {
                Target::SingBox => ".srs",
                Target::MihomoDomain | Target::MihomoIpCidr => ".mrs",
            });
            expected.extend(names.iter().map(|n| target.artifact_file_name(n)));
        }

        let mut removed = 0;

        for (dir, (extensions, expected)) in &managed {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(stage = "cleanup", "cannot read {}: {}", dir.display(), e);
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
                    continue;
                };

                let base = file_name.strip_suffix(".tmp").unwrap_or(file_name);
                let is_managed = extensions.iter().any(|ext| base.ends_with(ext));
                if !is_managed || (base == file_name && expected.contains(file_name)) {
                    continue;
                }

                match fs::remove_file(&path) {
                    Ok(()) => {
                        info!(stage = "cleanup", "removed orphan {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!(stage = "cleanup", "failed to remove {}: {}", path.display(), e),
                }
            }
        }

        removed
    }
}
