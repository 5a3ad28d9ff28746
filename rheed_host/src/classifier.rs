//! Image classification collaborator.
//!
//! The classifier is an external program invoked with the image path as
//! its last argument. Its trimmed standard output must be one of the two
//! [`Label`]s. Anything else, a non-zero exit, or running past the timeout
//! is a [`ClassifyError`] reported to the operator; it never reaches the
//! controller.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;

/// Boxed future returned by [`Classifier::classify`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Surface structure seen in the diffraction pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Monocrystalline,
    Polycrystalline,
}

impl Label {
    pub const fn as_str(self) -> &'static str {
        match self {
            Label::Monocrystalline => "monocrystalline",
            Label::Polycrystalline => "polycrystalline",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        [Label::Monocrystalline, Label::Polycrystalline]
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ClassifyError::UnknownLabel(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("no classifier command configured")]
    NotConfigured,

    #[error("failed to run classifier: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("classifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unrecognised classifier output {0:?}")]
    UnknownLabel(String),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
}

/// Labels one image. Runs on the display task, never on the link tasks.
pub trait Classifier: Send + Sync {
    fn classify<'a>(&'a self, image: &'a Path) -> BoxFuture<'a, Result<Label, ClassifyError>>;
}

/// Used when no command is configured.
#[derive(Debug, Default)]
pub struct DisabledClassifier;

impl Classifier for DisabledClassifier {
    fn classify<'a>(&'a self, _image: &'a Path) -> BoxFuture<'a, Result<Label, ClassifyError>> {
        Box::pin(async { Err(ClassifyError::NotConfigured) })
    }
}

/// Runs an external program per image.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClassifier {
    /// Build from configuration; `None` if no command is set.
    pub fn from_config(config: &ClassifierConfig) -> Option<Self> {
        let (program, args) = config.command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: config.timeout,
        })
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl CommandClassifier {
    async fn run(&self, image: &Path) -> Result<Label, ClassifyError> {
        debug!(program = %self.program, image = %image.display(), "Running classifier");
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClassifyError::Spawn)?;

        // Dropping the wait future on timeout kills the child.
        let output = match time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(ClassifyError::Spawn)?,
            Err(_) => {
                warn!(program = %self.program, "Classifier timed out, killed");
                return Err(ClassifyError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            return Err(ClassifyError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8_lossy(&output.stdout).parse()
    }
}

impl Classifier for CommandClassifier {
    fn classify<'a>(&'a self, image: &'a Path) -> BoxFuture<'a, Result<Label, ClassifyError>> {
        Box::pin(self.run(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout_ms: u64) -> CommandClassifier {
        CommandClassifier::from_config(&ClassifierConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
            timeout: Duration::from_millis(timeout_ms),
        })
        .unwrap()
    }

    #[test]
    fn labels_parse_trimmed_and_case_insensitive() {
        assert_eq!(
            "monocrystalline\n".parse::<Label>().unwrap(),
            Label::Monocrystalline
        );
        assert_eq!(
            " Polycrystalline ".parse::<Label>().unwrap(),
            Label::Polycrystalline
        );
        assert!(matches!(
            "amorphous".parse::<Label>(),
            Err(ClassifyError::UnknownLabel(_))
        ));
    }

    #[tokio::test]
    async fn empty_command_is_not_configured() {
        assert!(CommandClassifier::from_config(&ClassifierConfig::default()).is_none());
        assert!(matches!(
            DisabledClassifier.classify(Path::new("x.png")).await,
            Err(ClassifyError::NotConfigured)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_label_is_returned() {
        let c = sh("echo polycrystalline", 5_000);
        assert_eq!(
            c.classify(Path::new("/tmp/a.png")).await.unwrap(),
            Label::Polycrystalline
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn image_path_is_last_argument() {
        // With `sh -c`, the first extra argument becomes $0.
        let c = sh("case \"$0\" in *.png) echo monocrystalline;; *) echo nope;; esac", 5_000);
        assert_eq!(
            c.classify(Path::new("/tmp/sample.png")).await.unwrap(),
            Label::Monocrystalline
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let c = sh("echo boom >&2; exit 3", 5_000);
        match c.classify(Path::new("/tmp/a.png")).await {
            Err(ClassifyError::Failed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_classifier_times_out() {
        let c = sh("sleep 5", 100);
        let started = std::time::Instant::now();
        assert!(matches!(
            c.classify(Path::new("/tmp/a.png")).await,
            Err(ClassifyError::Timeout(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chatty_stderr_does_not_stall() {
        // Well past a pipe buffer; only drained output lets the child exit.
        let c = sh("head -c 262144 /dev/zero >&2; echo monocrystalline", 5_000);
        assert_eq!(
            c.classify(Path::new("/tmp/a.png")).await.unwrap(),
            Label::Monocrystalline
        );
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let c = CommandClassifier::from_config(&ClassifierConfig {
            command: vec!["/nonexistent/classifier".into()],
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert!(matches!(
            c.classify(Path::new("a.png")).await,
            Err(ClassifyError::Spawn(_))
        ));
    }
}
