use super::worker::{AnalysisRequest, Classifier, EventSink, Synthesizer, Worker};
use crate::review::{WorkerKind, WorkerOutput};
use crate::util::{extract_json_object, strip_code_fence, truncate_str};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// An external command to run for a collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Run `spec` with `input` on stdin and return its stdout.
///
/// Each non-empty stdout line is forwarded to `sink` as it arrives. The child
/// is killed if the returned future is dropped, so a caller-side timeout
/// does not leave it running.
async fn run_command(spec: &CommandSpec, input: &str, sink: Option<&EventSink>) -> Result<String> {
    let start = Instant::now();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", spec.display()))?;
    tracing::debug!(command = %spec.display(), pid = child.id().unwrap_or(0), "process spawned");

    let stdin = child.stdin.take();
    let stdout = child.stdout.take().context("Failed to get stdout")?;
    let mut stderr = child.stderr.take().context("Failed to get stderr")?;

    let read_stdout = async {
        let mut lines = BufReader::new(stdout).lines();
        let mut output = String::new();
        let mut relaying = sink.is_some();
        while let Some(line) = lines.next_line().await? {
            output.push_str(&line);
            output.push('\n');
            if line.trim().is_empty() || !relaying {
                continue;
            }
            if let Some(sink) = sink
                && sink.text(line).await.is_err()
            {
                relaying = false;
            }
        }
        Ok::<_, std::io::Error>(output)
    };
    let read_stderr = async {
        let mut buf = String::new();
        stderr.read_to_string(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    };
    // Feed stdin while both output pipes are drained.
    let write_stdin = async {
        if let Some(mut stdin) = stdin {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let (written, output, errors) = tokio::join!(write_stdin, read_stdout, read_stderr);
    match written {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!(command = %spec.display(), "process closed stdin early");
        }
        other => other.context("Failed to write to process stdin")?,
    }
    let output = output.context("Failed to read process stdout")?;
    let errors = errors.unwrap_or_default();

    let status = child.wait().await.context("Failed to wait for process")?;
    tracing::debug!(
        command = %spec.display(),
        exit_code = status.code().unwrap_or(-1),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "process finished"
    );
    if !status.success() {
        bail!(
            "'{}' exited with code {}: {}",
            spec.display(),
            status.code().unwrap_or(-1),
            truncate_str(errors.trim(), 500)
        );
    }
    Ok(output)
}

/// Interpret a worker's stdout as its structured result.
///
/// Tried in order: the whole (unfenced) output as JSON, the last line as
/// JSON, the outermost embedded object. Otherwise the text itself.
fn parse_worker_output(output: &str) -> Value {
    let body = strip_code_fence(output);
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return value;
    }
    if let Some(last) = body.lines().rev().find(|l| !l.trim().is_empty())
        && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(last.trim())
    {
        return value;
    }
    if let Some(object) = extract_json_object(body)
        && let Ok(value) = serde_json::from_str::<Value>(&object)
    {
        return value;
    }
    Value::String(body.to_string())
}

/// A worker implemented by an external command.
///
/// Receives `{"worker": <id>, "request": {...}}` on stdin.
pub struct ProcessWorker {
    kind: WorkerKind,
    command: CommandSpec,
}

impl ProcessWorker {
    pub fn new(kind: WorkerKind, command: CommandSpec) -> Self {
        Self { kind, command }
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    fn kind(&self) -> WorkerKind {
        self.kind
    }

    async fn analyze(&self, request: &AnalysisRequest, sink: EventSink) -> Result<Value> {
        let input = serde_json::to_string(&json!({
            "worker": self.kind.worker_id(),
            "request": request,
        }))?;
        let output = run_command(&self.command, &input, Some(&sink)).await?;
        Ok(parse_worker_output(&output))
    }
}

/// A classifier implemented by an external command: the raw message on
/// stdin, the decision on stdout.
pub struct ProcessClassifier {
    command: CommandSpec,
}

impl ProcessClassifier {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Classifier for ProcessClassifier {
    async fn classify(&self, message: &str) -> Result<String> {
        run_command(&self.command, message, None).await
    }
}

/// A synthesizer implemented by an external command.
///
/// Receives `{"request": {...}, "outputs": [...]}` on stdin; its whole stdout
/// is the report.
pub struct ProcessSynthesizer {
    command: CommandSpec,
}

impl ProcessSynthesizer {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Synthesizer for ProcessSynthesizer {
    async fn synthesize(
        &self,
        request: &AnalysisRequest,
        outputs: &[WorkerOutput],
        sink: EventSink,
    ) -> Result<String> {
        let input = serde_json::to_string(&json!({
            "request": request,
            "outputs": outputs,
        }))?;
        let output = run_command(&self.command, &input, Some(&sink)).await?;
        Ok(output.trim_end().to_string())
    }
}
