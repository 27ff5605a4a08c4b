use crate::config::{CompletionKey, DispatchConfig};
use crate::discovery::Instance;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use uavmon_core::{atomic_write_json_pretty, sha256_file};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    /// Terminating signal when the solver did not exit normally (unix only).
    pub signal: Option<i32>,
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn status_label(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exit {}", code),
            (None, Some(sig)) => format!("signal {}", sig),
            (None, None) => "terminated".to_string(),
        }
    }
}

pub trait SolverExecutor {
    /// Runs the solver on one instance. A non-zero exit is a normal result;
    /// `Err` means the solver could not be run at all.
    fn execute(&self, instance: &Instance) -> Result<ExecutionResult>;
}

/// Per-instance artifact locations, named after the instance's completion
/// key. Relative-path keys are flattened with `__` in place of `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub record: PathBuf,
}

impl ArtifactPaths {
    pub fn new(log_dir: &Path, instance: &Instance, policy: CompletionKey) -> Self {
        let stem = instance.key(policy).replace('/', "__");
        Self {
            stdout: log_dir.join(format!("{}.out", stem)),
            stderr: log_dir.join(format!("{}.err", stem)),
            record: log_dir.join(format!("{}.json", stem)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    config: DispatchConfig,
}

impl ProcessExecutor {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    fn command(&self, instance: &Instance) -> Command {
        let mut cmd = Command::new(&self.config.executable);
        cmd.arg(&self.config.solver_config)
            .arg(&self.config.summary_results)
            .arg(&self.config.detail_results)
            .arg(&instance.path)
            .current_dir(&self.config.root)
            .stdin(Stdio::null());
        cmd
    }
}

impl SolverExecutor for ProcessExecutor {
    fn execute(&self, instance: &Instance) -> Result<ExecutionResult> {
        let paths = ArtifactPaths::new(&self.config.log_dir, instance, self.config.completion_key);
        let stdout = fs::File::create(&paths.stdout)
            .with_context(|| format!("cannot create {}", paths.stdout.display()))?;
        let stderr = fs::File::create(&paths.stderr)
            .with_context(|| format!("cannot create {}", paths.stderr.display()))?;

        let mut cmd = self.command(instance);
        cmd.stdout(stdout).stderr(stderr);

        tracing::debug!(
            instance = %instance.id,
            executable = %self.config.executable.display(),
            "spawning solver"
        );
        let started_at = Utc::now();
        let start = Instant::now();
        let status = match cmd.status() {
            Ok(status) => status,
            Err(e) => {
                let _ = fs::write(
                    &paths.stderr,
                    format!(
                        "failed to start solver {}: {}\n",
                        self.config.executable.display(),
                        e
                    ),
                );
                return Err(e).with_context(|| {
                    format!(
                        "failed to start solver {}",
                        self.config.executable.display()
                    )
                });
            }
        };

        Ok(ExecutionResult {
            exit_code: status.code(),
            signal: exit_signal(&status),
            elapsed: start.elapsed(),
            started_at,
            stdout_path: paths.stdout,
            stderr_path: paths.stderr,
        })
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

pub fn stream_tail(path: &Path) -> Option<String> {
    let raw = fs::read(path).ok()?;
    String::from_utf8_lossy(&raw)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
}

pub fn write_execution_record(
    path: &Path,
    instance: &Instance,
    key: &str,
    result: &ExecutionResult,
) -> Result<()> {
    let digest = sha256_file(&instance.path).ok();
    let record = json!({
        "schema_version": "execution_record_v1",
        "instance": instance.id,
        "completion_key": key,
        "instance_sha256": digest,
        "success": result.success(),
        "exit_code": result.exit_code,
        "signal": result.signal,
        "elapsed_ms": result.elapsed.as_millis() as u64,
        "started_at": result.started_at.to_rfc3339(),
        "stdout_path": result.stdout_path.to_string_lossy(),
        "stderr_path": result.stderr_path.to_string_lossy(),
    });
    atomic_write_json_pretty(path, &record)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use uavmon_core::ensure_dir;

    fn project(script: &str) -> (tempfile::TempDir, DispatchConfig) {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = DispatchConfig::with_root(dir.path());
        ensure_dir(config.executable.parent().unwrap()).expect("bin");
        fs::write(&config.executable, script).expect("solver");
        fs::set_permissions(&config.executable, fs::Permissions::from_mode(0o755)).expect("chmod");
        ensure_dir(&config.input_dir).expect("input");
        config.prepare_outputs().expect("outputs");
        (dir, config)
    }

    fn instance(config: &DispatchConfig, name: &str) -> Instance {
        fs::write(config.input_dir.join(name), "numNode\n").expect("instance");
        Instance::from_relative(&config.input_dir, Path::new(name))
    }

    #[test]
    fn passes_arguments_in_fixed_order_and_captures_streams() {
        let (_dir, config) = project("#!/bin/sh\nfor a in \"$@\"; do echo \"$a\"; done\necho oops >&2\n");
        let inst = instance(&config, "C1N10D20T12V1.txt");
        let result = ProcessExecutor::new(config.clone())
            .execute(&inst)
            .expect("execute");

        assert!(result.success());
        let out = fs::read_to_string(&result.stdout_path).expect("stdout");
        let args: Vec<&str> = out.lines().collect();
        assert_eq!(
            args,
            vec![
                config.solver_config.to_str().unwrap(),
                config.summary_results.to_str().unwrap(),
                config.detail_results.to_str().unwrap(),
                inst.path.to_str().unwrap(),
            ]
        );
        assert_eq!(result.stdout_path, config.log_dir.join("C1N10D20T12V1.txt.out"));
        assert_eq!(stream_tail(&result.stderr_path).as_deref(), Some("oops"));
    }

    #[test]
    fn nonzero_exit_is_a_result_not_an_error() {
        let (_dir, config) = project("#!/bin/sh\necho 'infeasible model' >&2\nexit 3\n");
        let inst = instance(&config, "R1N5D10T6V2.txt");
        let result = ProcessExecutor::new(config).execute(&inst).expect("execute");
        assert!(!result.success());
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.status_label(), "exit 3");
        assert_eq!(
            stream_tail(&result.stderr_path).as_deref(),
            Some("infeasible model")
        );
    }

    #[test]
    fn logs_are_overwritten_per_attempt() {
        let (_dir, config) = project("#!/bin/sh\necho attempt\n");
        let inst = instance(&config, "C1N10D20T12V1.txt");
        let executor = ProcessExecutor::new(config);
        executor.execute(&inst).expect("first");
        let second = executor.execute(&inst).expect("second");
        assert_eq!(
            fs::read_to_string(second.stdout_path).expect("stdout"),
            "attempt\n"
        );
    }

    #[test]
    fn spawn_failure_leaves_a_diagnostic_in_the_error_log() {
        let (_dir, config) = project("not a script");
        let inst = instance(&config, "C1N10D20T12V1.txt");
        let err = ProcessExecutor::new(config.clone())
            .execute(&inst)
            .expect_err("exec format error expected");
        assert!(err.to_string().contains("failed to start solver"));
        let paths = ArtifactPaths::new(&config.log_dir, &inst, config.completion_key);
        assert!(stream_tail(&paths.stderr)
            .expect("diagnostic")
            .starts_with("failed to start solver"));
    }

    #[test]
    fn execution_record_carries_status_and_digest() {
        let (_dir, config) = project("#!/bin/sh\nexit 0\n");
        let inst = instance(&config, "C1N10D20T12V1.txt");
        let result = ProcessExecutor::new(config.clone())
            .execute(&inst)
            .expect("execute");
        let paths = ArtifactPaths::new(&config.log_dir, &inst, config.completion_key);
        write_execution_record(&paths.record, &inst, &inst.base_name, &result).expect("record");
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&paths.record).expect("read")).expect("json");
        assert_eq!(value["schema_version"], "execution_record_v1");
        assert_eq!(value["success"], true);
        assert_eq!(value["exit_code"], 0);
        assert_eq!(
            value["instance_sha256"],
            uavmon_core::sha256_bytes(b"numNode\n")
        );
    }

    #[test]
    fn artifact_names_follow_the_completion_key() {
        let logs = Path::new("/logs");
        let a = Instance::from_relative(Path::new("/in"), Path::new("a/C1N5D10T6V1.txt"));
        let b = Instance::from_relative(Path::new("/in"), Path::new("b/C1N5D10T6V1.txt"));

        let by_path_a = ArtifactPaths::new(logs, &a, CompletionKey::RelativePath);
        let by_path_b = ArtifactPaths::new(logs, &b, CompletionKey::RelativePath);
        assert_eq!(by_path_a.stderr, logs.join("a__C1N5D10T6V1.txt.err"));
        assert_ne!(by_path_a.stderr, by_path_b.stderr);
        assert_ne!(by_path_a.record, by_path_b.record);

        assert_eq!(
            ArtifactPaths::new(logs, &a, CompletionKey::BaseName).stderr,
            logs.join("C1N5D10T6V1.txt.err")
        );
    }
}
