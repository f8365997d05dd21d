//! Execution of outsourced programs
//!
//! A request names a program and its input by storage address. The
//! [`ScriptExecutor`] downloads both into the work directory, runs
//! `<interpreter> <program> <input>` and returns everything the program
//! printed. Downloaded files are removed whether or not the run succeeds.

use crate::error::{Error, Result};
use crate::storage::ContentStore;
use crate::types::ContentRef;
use async_process::{Command, Stdio};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Remote execution collaborator
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `program` against `input` and return its textual output
    async fn execute(&self, program: &ContentRef, input: &ContentRef) -> Result<String>;
}

/// Runs fetched scripts with a local interpreter
pub struct ScriptExecutor {
    store: Arc<dyn ContentStore>,
    interpreter: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl ScriptExecutor {
    pub fn new(
        store: Arc<dyn ContentStore>,
        interpreter: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            interpreter: interpreter.into(),
            work_dir: work_dir.into(),
            timeout,
        }
    }

    async fn download(&self, content: &ContentRef, request_id: &Uuid) -> Result<PathBuf> {
        let data = self.store.fetch(&content.address).await?;
        let path = self
            .work_dir
            .join(format!("{}-{}", request_id, content.file_name()));
        tokio::fs::write(&path, &data).await?;
        debug!(path = %path.display(), size = data.len(), "Downloaded artifact");
        Ok(path)
    }

    async fn run(&self, program: &Path, input: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(program)
            .arg(input)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                Error::execution(format!("Failed to start {}: {}", self.interpreter, e))
            })?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Program exceeded execution timeout");
                return Err(Error::timeout(format!(
                    "execution of {} after {:?}",
                    program.display(),
                    self.timeout
                )));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::execution(format!(
                "File execution failed: {}, output: {}",
                output.status, combined
            )));
        }

        Ok(combined)
    }

    async fn execute_in(
        &self,
        program: &ContentRef,
        input: &ContentRef,
        request_id: &Uuid,
        downloaded: &mut Vec<PathBuf>,
    ) -> Result<String> {
        let program_path = self.download(program, request_id).await?;
        downloaded.push(program_path.clone());
        let input_path = self.download(input, request_id).await?;
        downloaded.push(input_path.clone());

        info!(
            program = %program_path.display(),
            input = %input_path.display(),
            interpreter = %self.interpreter,
            "Executing program"
        );
        self.run(&program_path, &input_path).await
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove downloaded file");
        }
    }
}

#[async_trait]
impl Executor for ScriptExecutor {
    #[instrument(skip_all, fields(program = %program, input = %input))]
    async fn execute(&self, program: &ContentRef, input: &ContentRef) -> Result<String> {
        let request_id = Uuid::new_v4();
        let mut downloaded = Vec::with_capacity(2);

        let result = self
            .execute_in(program, input, &request_id, &mut downloaded)
            .await;

        for path in &downloaded {
            remove_quietly(path).await;
        }

        match &result {
            Ok(output) => debug!(output_len = output.len(), "Program finished"),
            Err(e) => warn!(error = %e, category = e.category(), "Program execution failed"),
        }
        result
    }
}
