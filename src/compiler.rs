//! Strict, atomic invocation of external rule-set compilers.
//!
//! Every invocation writes to `<output>.tmp` and renames it over `<output>`
//! only when the compiler exits cleanly with a non-empty file. In strict mode
//! any failure also removes the previous `<output>`, so an artifact never
//! outlives the rules it was built from.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::emit::Behavior;
use crate::error::{CompileErrorKind, ForgeError, Result};

/// Default wall-clock budget for a single compiler run
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(120);

/// How often a running compiler is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Options threaded into every compiler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Kill the compiler after this long
    pub timeout: Duration,
    /// Remove the previous artifact when a rebuild fails
    pub strict: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMPILE_TIMEOUT,
            strict: true,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// An external compiler turning a source file into a binary artifact
pub trait RuleCompiler {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Build the command that compiles `source` into `output`
    fn command(&self, source: &Path, output: &Path) -> Command;
}

/// `sing-box rule-set compile --output <output> <source>`
#[derive(Debug, Clone)]
pub struct SingBoxCompiler {
    bin: PathBuf,
}

impl SingBoxCompiler {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl RuleCompiler for SingBoxCompiler {
    fn name(&self) -> &str {
        "sing-box"
    }

    fn command(&self, source: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(["rule-set", "compile", "--output"])
            .arg(output)
            .arg(source);
        cmd
    }
}

/// `mihomo convert-ruleset <behavior> yaml <source> <output>`
#[derive(Debug, Clone)]
pub struct MihomoConverter {
    bin: PathBuf,
    behavior: Behavior,
}

impl MihomoConverter {
    pub fn new(bin: impl Into<PathBuf>, behavior: Behavior) -> Self {
        Self {
            bin: bin.into(),
            behavior,
        }
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }
}

impl RuleCompiler for MihomoConverter {
    fn name(&self) -> &str {
        "mihomo"
    }

    fn command(&self, source: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("convert-ruleset")
            .arg(self.behavior.as_str())
            .arg("yaml")
            .arg(source)
            .arg(output);
        cmd
    }
}

/// Outcome of a bounded subprocess run
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit status, `None` if the process was killed on timeout
    pub status: Option<ExitStatus>,
    /// Combined stdout and stderr (empty after a timeout)
    pub output: String,
}

impl CommandOutput {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run a command, capturing its output, and kill it after `timeout`.
///
/// Fails only if the process cannot be started or waited on.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<CommandOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ForgeError::compile(CompileErrorKind::Spawn, e.to_string()))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = wait_with_deadline(&mut child, timeout)?;
    if status.is_none() {
        // Orphaned grandchildren may hold the pipes open; don't wait on readers
        return Ok(CommandOutput {
            status,
            output: String::new(),
        });
    }

    let mut combined = stdout.join().unwrap_or_default();
    combined.extend(stderr.join().unwrap_or_default());

    Ok(CommandOutput {
        status,
        output: String::from_utf8_lossy(&combined).trim().to_string(),
    })
}

/// `<path>.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Remove a file, treating absence as success. Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Discard the tmp file and, in strict mode, the stale artifact.
fn discard(tmp: &Path, output: &Path, strict: bool) {
    if let Err(e) = remove_if_exists(tmp) {
        warn!("failed to remove {}: {}", tmp.display(), e);
    }
    if strict {
        match remove_if_exists(output) {
            Ok(true) => info!("removed stale artifact {}", output.display()),
            Ok(false) => {}
            Err(e) => warn!("failed to remove stale artifact {}: {}", output.display(), e),
        }
    }
}

/// Compile `source` into `output` atomically. Returns the artifact size in bytes.
///
/// On any failure the tmp file is removed, and with `options.strict` the
/// previous `output` is removed as well.
pub fn compile_atomic(
    compiler: &dyn RuleCompiler,
    source: &Path,
    output: &Path,
    options: &CompileOptions,
) -> Result<u64> {
    let tmp = tmp_path(output);
    remove_if_exists(&tmp)?;

    let result = invoke(compiler, source, &tmp, options.timeout);

    let size = match result {
        Ok(size) => size,
        Err(e) => {
            discard(&tmp, output, options.strict);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&tmp, output) {
        discard(&tmp, output, options.strict);
        return Err(e.into());
    }

    info!("{} wrote {} ({} bytes)", compiler.name(), output.display(), size);
    Ok(size)
}

/// Run the compiler into `tmp` and check the result.
fn invoke(
    compiler: &dyn RuleCompiler,
    source: &Path,
    tmp: &Path,
    timeout: Duration,
) -> Result<u64> {
    let cmd = compiler.command(source, tmp);
    debug!("running {:?}", cmd);

    let out = run_with_timeout(cmd, timeout)?;

    if out.timed_out() {
        warn!("{} killed after {:?}", compiler.name(), timeout);
        return Err(ForgeError::compile(
            CompileErrorKind::Timeout,
            format!("{} timed out after {:?}", compiler.name(), timeout),
        ));
    }

    if !out.success() {
        warn!("{} failed ({:?}): {}", compiler.name(), out.status, out.output);
        return Err(ForgeError::compile(
            CompileErrorKind::NonZeroExit,
            format!("{} exited with {:?}", compiler.name(), out.status),
        ));
    }

    if !out.output.is_empty() {
        debug!("{} output: {}", compiler.name(), out.output);
    }

    let size = match fs::metadata(tmp) {
        Ok(meta) => meta.len(),
        Err(_) => {
            return Err(ForgeError::compile(
                CompileErrorKind::MissingOutput,
                format!("{} did not create {}", compiler.name(), tmp.display()),
            ))
        }
    };

    if size == 0 {
        return Err(ForgeError::compile(
            CompileErrorKind::EmptyOutput,
            format!("{} produced an empty file", compiler.name()),
        ));
    }

    Ok(size)
}

/// Resolve a compiler binary: an explicit path must exist, a bare name is searched on `PATH`.
pub fn locate_binary(bin: &Path) -> Result<PathBuf> {
    if bin.components().count() > 1 {
        if bin.is_file() {
            return Ok(bin.to_path_buf());
        }
        return Err(ForgeError::Config(format!(
            "compiler binary not found: {}",
            bin.display()
        )));
    }

    let search_path = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&search_path)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            ForgeError::Config(format!("compiler binary not found on PATH: {}", bin.display()))
        })
}
