//! Rebuild and respawn controller.
//!
//! Waits for pulses from the watcher, rebuilds the project, and replaces
//! the running child with the fresh artifact. At most one child is alive at
//! any time: the previous one is killed and reaped before the next spawn.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::display::{self, Spinner};

/// Build output directory, relative to the project root.
pub const ARTIFACT_DIR: &str = ".gone";

/// Executable name inside [`ARTIFACT_DIR`].
pub const ARTIFACT_NAME: &str = "main";

/// Environment variable set on every spawned child.
pub const CHILD_MARKER: &str = "GONE_ROUTINE";

/// How long to wait for a killed child to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum RebuildError {
    #[error("Failed to prepare build output {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to launch compiler '{compiler}': {source}")]
    BuildLaunch {
        compiler: String,
        #[source]
        source: io::Error,
    },

    #[error("Build failed with {status}")]
    BuildFailed { status: ExitStatus },

    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of one rebuild cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A new child is running.
    Respawned { pid: Option<u32> },
    /// The build did not succeed; the previous child, if any, is untouched.
    BuildFailed,
    /// The build succeeded but the artifact could not be started.
    SpawnFailed,
}

/// Owns the child process and drives build, kill and spawn.
#[derive(Debug)]
pub struct Rebuilder {
    root: PathBuf,
    main_file: String,
    compiler: String,
    decorate: bool,
    child: Option<Child>,
}

impl Rebuilder {
    /// `main_file` is passed to the compiler as-is, relative to `root`.
    pub fn new(root: impl Into<PathBuf>, main_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            main_file: main_file.into(),
            compiler: "go".to_string(),
            decorate: false,
            child: None,
        }
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self::new(root, config.main_file.clone()).with_compiler(config.build.compiler.clone())
    }

    /// Program invoked as `<compiler> build -o <artifact> <main_file>`.
    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    /// Show the spinner and clear the terminal between children.
    pub fn with_decorations(mut self, decorate: bool) -> Self {
        self.decorate = decorate;
        self
    }

    /// `<root>/.gone/main`
    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(ARTIFACT_DIR).join(ARTIFACT_NAME)
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// PID of the current child.
    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Run the compiler to completion. Its output goes to our own streams.
    pub async fn build(&self) -> Result<(), RebuildError> {
        let out_dir = self.root.join(ARTIFACT_DIR);
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|source| RebuildError::Prepare {
                path: out_dir.clone(),
                source,
            })?;

        crate::debug_event!(
            "rebuild",
            "build",
            "{} build -o {} {}",
            self.compiler,
            self.artifact_path().display(),
            self.main_file
        );

        let status = Command::new(&self.compiler)
            .arg("build")
            .arg("-o")
            .arg(self.artifact_path())
            .arg(&self.main_file)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| RebuildError::BuildLaunch {
                compiler: self.compiler.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(RebuildError::BuildFailed { status })
        }
    }

    /// Start the artifact with the child marker set and its output piped
    /// through to ours. Any previous child must already be gone.
    pub fn spawn(&mut self) -> Result<Option<u32>, RebuildError> {
        let artifact = self.artifact_path();
        let mut child = Command::new(&artifact)
            .current_dir(&self.root)
            .env(CHILD_MARKER, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RebuildError::Spawn {
                path: artifact.clone(),
                source,
            })?;

        // Copy tasks end on their own once the pipes close.
        if let Some(mut stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stdout, &mut tokio::io::stdout()).await;
            });
        }
        if let Some(mut stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stderr, &mut tokio::io::stderr()).await;
            });
        }

        let pid = child.id();
        self.child = Some(child);
        Ok(pid)
    }

    /// Kill the current child and reap it, giving up after a short wait.
    pub async fn kill_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();

        if let Err(e) = child.start_kill() {
            crate::debug_event!("rebuild", "kill", "pid {pid:?}: {e}");
        }

        match tokio::time::timeout(KILL_WAIT, child.wait()).await {
            Ok(Ok(status)) => {
                crate::debug_event!("rebuild", "child exited", "pid {pid:?} {status}");
            }
            Ok(Err(e)) => tracing::warn!("[rebuild] waiting for pid {pid:?} failed: {e}"),
            // Dropping the handle closes our end of the pipes.
            Err(_) => tracing::warn!("[rebuild] pid {pid:?} did not exit, abandoning it"),
        }
    }

    /// One cycle: build, then on success replace the child.
    pub async fn rebuild(&mut self) -> Outcome {
        let spinner = self.decorate.then(|| Spinner::start("Rebuilding..."));
        let built = self.build().await;
        if let Some(spinner) = spinner {
            spinner.stop();
        }

        if let Err(e) = built {
            tracing::warn!("[rebuild] build failed, ignore: {e}");
            return Outcome::BuildFailed;
        }

        if self.decorate {
            display::clear_terminal();
        }
        self.kill_child().await;

        match self.spawn() {
            Ok(pid) => {
                crate::log_event!("rebuild", "respawned", "pid {}", pid.unwrap_or_default());
                Outcome::Respawned { pid }
            }
            Err(e) => {
                tracing::error!("[rebuild] {e}");
                Outcome::SpawnFailed
            }
        }
    }

    /// Rebuild once, then once per pulse, until `shutdown` fires or the
    /// pulse channel closes. The child is killed on the way out.
    pub async fn run(&mut self, mut pulses: mpsc::Receiver<()>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.rebuild() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                pulse = pulses.recv() => {
                    if pulse.is_none() {
                        break;
                    }
                }
            }
        }

        self.kill_child().await;
        crate::debug_event!("rebuild", "controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path_is_fixed() {
        let rebuilder = Rebuilder::new("/srv/app", "main.go");
        assert_eq!(
            rebuilder.artifact_path(),
            PathBuf::from("/srv/app/.gone/main")
        );
    }

    #[test]
    fn test_from_config_takes_compiler_and_main_file() {
        let mut config = AppConfig::default();
        config.main_file = "cmd/api/main.go".to_string();
        config.build.compiler = "/usr/local/go/bin/go".to_string();

        let rebuilder = Rebuilder::from_config("/srv/app", &config);
        assert_eq!(rebuilder.main_file, "cmd/api/main.go");
        assert_eq!(rebuilder.compiler, "/usr/local/go/bin/go");
        assert!(!rebuilder.has_child());
    }

    #[tokio::test]
    async fn test_missing_compiler_is_launch_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let rebuilder = Rebuilder::new(temp.path(), "main.go").with_compiler("gone-no-such-compiler");

        let err = rebuilder.build().await.unwrap_err();
        assert!(matches!(err, RebuildError::BuildLaunch { .. }));
        // The output directory is prepared before the compiler runs
        assert!(temp.path().join(ARTIFACT_DIR).is_dir());
    }

    #[tokio::test]
    async fn test_kill_without_child_is_noop() {
        let mut rebuilder = Rebuilder::new("/srv/app", "main.go");
        rebuilder.kill_child().await;
        assert!(!rebuilder.has_child());
    }
}
