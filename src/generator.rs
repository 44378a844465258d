//! External index generator.
//!
//! The generator turns a set of stored compiler logs into a browsable
//! directory tree. The engine treats it as a black box behind
//! [`IndexGenerator`]; [`CommandGenerator`] runs the configured executable.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::config::GeneratorConfig;

#[async_trait]
pub trait IndexGenerator: Send + Sync {
    /// Produce a complete index for `artifacts` in `out_dir`.
    ///
    /// `out_dir` does not exist yet. On error, whatever was written to it is
    /// left for the caller to clean up.
    async fn generate(&self, artifacts: &[PathBuf], out_dir: &Path) -> Result<()>;
}

/// Runs `command args... <artifact paths...> /out:<out_dir>` in `working_dir`.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandGenerator {
    pub fn new(config: &GeneratorConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl IndexGenerator for CommandGenerator {
    async fn generate(&self, artifacts: &[PathBuf], out_dir: &Path) -> Result<()> {
        if tokio::fs::try_exists(out_dir).await.unwrap_or(false) {
            bail!("Output directory already exists: {}", out_dir.display());
        }

        let mut out_arg = std::ffi::OsString::from("/out:");
        out_arg.push(out_dir.as_os_str());

        tracing::info!(
            command = %self.command,
            artifacts = artifacts.len(),
            out_dir = %out_dir.display(),
            "running index generator"
        );

        let output = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .args(artifacts)
            .arg(out_arg)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start generator '{}'", self.command))?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Generator exited with {}\nstdout:\n{}\nstderr:\n{}",
                output.status,
                stdout.trim(),
                stderr.trim()
            );
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Copies every artifact argument into the /out: directory.
    const COPY_SCRIPT: &str = r#"
out=""
for a in "$@"; do
  case "$a" in
    /out:*) out="${a#/out:}" ;;
  esac
done
mkdir -p "$out"
for a in "$@"; do
  case "$a" in
    /out:*) ;;
    *) cat "$a" >> "$out/index.html" ;;
  esac
done
"#;

    fn generator(script: &str, dir: &Path) -> CommandGenerator {
        CommandGenerator::new(
            &GeneratorConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string(), "gen".to_string()],
            },
            dir,
        )
    }

    #[tokio::test]
    async fn passes_artifacts_and_output_dir() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.complog");
        let b = tmp.path().join("b.complog");
        std::fs::write(&a, "A").unwrap();
        std::fs::write(&b, "B").unwrap();
        let out = tmp.path().join("out");

        generator(COPY_SCRIPT, tmp.path())
            .generate(&[a, b], &out)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(out.join("index.html")).unwrap(), "AB");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_output() {
        let tmp = TempDir::new().unwrap();
        let err = generator("echo partial; echo broken >&2; exit 3", tmp.path())
            .generate(&[], &tmp.path().join("out"))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("partial"), "{}", err);
        assert!(err.contains("broken"), "{}", err);
    }

    #[tokio::test]
    async fn refuses_existing_output_dir() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        std::fs::create_dir(&out).unwrap();
        assert!(generator(COPY_SCRIPT, tmp.path())
            .generate(&[], &out)
            .await
            .is_err());
    }
}
