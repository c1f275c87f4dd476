//! Optional external formatter run over written stub files.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// A command line such as `ruff format`; the file path is appended.
#[derive(Debug, Clone)]
pub struct PostFormatter {
    program: String,
    args: Vec<String>,
}

impl PostFormatter {
    /// Parse a whitespace-separated command line. `None` when blank.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    /// Spawn one process per file and wait for all of them.
    ///
    /// Returns how many runs failed; each failure is logged.
    pub fn run_all(&self, files: &[PathBuf]) -> usize {
        let running: Vec<(&Path, std::io::Result<Child>)> = files
            .iter()
            .map(|file| (file.as_path(), self.spawn(file)))
            .collect();

        let mut failures = 0;
        for (file, child) in running {
            let outcome = child.and_then(|c| c.wait_with_output());
            match outcome {
                Ok(output) if output.status.success() => {
                    tracing::debug!(file = %file.display(), "post-formatted");
                }
                Ok(output) => {
                    failures += 1;
                    tracing::warn!(
                        file = %file.display(),
                        status = %output.status,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "post-formatter failed"
                    );
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        file = %file.display(),
                        program = %self.program,
                        "failed to run post-formatter: {}",
                        e
                    );
                }
            }
        }
        failures
    }

    fn spawn(&self, file: &Path) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
    }
}
