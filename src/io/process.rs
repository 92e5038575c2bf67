//! Subprocess execution for environment bootstrap
//!
//! Package installation, `netconvert` and the GUI simulator are all run
//! through [`CommandRunner`] so the bootstrap sequence can be tested without
//! touching the system.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::info;

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion; a non-zero exit is an error
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> anyhow::Result<()>;

    /// Whether `program` can be found on PATH
    fn is_available(&self, program: &str) -> bool;
}

/// Runs real processes with inherited stdio
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> anyhow::Result<()> {
        let start = Instant::now();
        info!(program = %program, args = ?args, "command_started");

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to start {}", program))?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if !status.success() {
            bail!("{} {} exited with {}", program, args.join(" "), status);
        }
        info!(program = %program, elapsed_ms = elapsed_ms, "command_finished");
        Ok(())
    }

    fn is_available(&self, program: &str) -> bool {
        find_on_path(program).is_some()
    }
}

/// Locate `program` in PATH. Names containing a separator are checked as is.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path).map(|dir| dir.join(program)).find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_on_path_missing() {
        assert!(find_on_path("definitely-not-a-real-binary-3f9a").is_none());
    }

    #[test]
    fn test_find_on_path_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool");
        std::fs::write(&file, "").unwrap();
        assert_eq!(find_on_path(file.to_str().unwrap()), Some(file));
    }

    #[tokio::test]
    async fn test_missing_program_errors() {
        let result = SystemRunner.run("definitely-not-a-real-binary-3f9a", &[], None).await;
        assert!(result.is_err());
    }
}
