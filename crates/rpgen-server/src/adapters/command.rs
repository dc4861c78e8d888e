//! Shell-command adapters: a [`Verifier`] that writes the candidate into a
//! workspace and runs a command there, and an [`IntegrationCheck`] that
//! runs one command over the finished workspace.
//!
//! Exit status 0 is a pass. 126/127 (not executable / not found), death by
//! signal, a spawn failure or an I/O error writing the file is an
//! environment error. Any other exit status is a behavioral failure whose
//! diagnostic is the tail of the command's output.

use std::path::{Component, Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::collab::{Candidate, IntegrationCheck, NodeBrief, Verdict, Verifier};

pub struct CommandVerifier {
    workspace: PathBuf,
    command: String,
    tail_lines: usize,
}

impl CommandVerifier {
    pub const DEFAULT_TAIL_LINES: usize = 40;

    pub fn new(workspace: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        CommandVerifier {
            workspace: workspace.into(),
            command: command.into(),
            tail_lines: Self::DEFAULT_TAIL_LINES,
        }
    }

    pub fn with_tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Where a node's candidate is written, relative to the workspace.
    pub fn target_path(node: &NodeBrief) -> Result<PathBuf, String> {
        let relative = match &node.metadata.path_hint {
            Some(hint) => PathBuf::from(hint),
            None => Path::new("generated").join(format!("{}.txt", file_stem(node))),
        };
        inside_workspace(relative)
    }

    /// Writes the candidate and runs the command; `test_path`, when given,
    /// is exported as `RPGEN_TEST_PATH`.
    pub(crate) async fn run(
        &self,
        candidate: &Candidate,
        node: &NodeBrief,
        test_path: Option<&Path>,
    ) -> Verdict {
        let relative = match Self::target_path(node) {
            Ok(path) => path,
            Err(detail) => return Verdict::EnvironmentError { detail },
        };
        if let Err(detail) = write_file(&self.workspace.join(&relative), &candidate.content).await {
            return Verdict::EnvironmentError { detail };
        }

        let mut command = shell(&self.command, &self.workspace);
        command
            .env("RPGEN_NODE_ID", node.id.as_str())
            .env("RPGEN_NODE_PATH", &relative);
        if let Some(test_path) = test_path {
            command.env("RPGEN_TEST_PATH", test_path);
        }
        let output = command.output().await;
        if let Ok(output) = &output {
            debug!(node = %node.id, status = ?output.status.code(), "verifier command finished");
        }
        classify(&self.command, output, self.tail_lines)
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, candidate: &Candidate, node: &NodeBrief) -> Verdict {
        self.run(candidate, node, None).await
    }
}

/// Runs one command in the workspace after the build, e.g. the project's
/// full test suite.
pub struct IntegrationCommand {
    workspace: PathBuf,
    command: String,
    tail_lines: usize,
}

impl IntegrationCommand {
    pub fn new(workspace: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        IntegrationCommand {
            workspace: workspace.into(),
            command: command.into(),
            tail_lines: CommandVerifier::DEFAULT_TAIL_LINES,
        }
    }
}

#[async_trait]
impl IntegrationCheck for IntegrationCommand {
    async fn check(&self) -> Verdict {
        let output = shell(&self.command, &self.workspace).output().await;
        if let Ok(output) = &output {
            debug!(status = ?output.status.code(), "integration command finished");
        }
        classify(&self.command, output, self.tail_lines)
    }
}

/// The node id reduced to characters that are safe in a file name.
pub(crate) fn file_stem(node: &NodeBrief) -> String {
    node.id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub(crate) fn inside_workspace(relative: PathBuf) -> Result<PathBuf, String> {
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(format!(
            "path hint '{}' must stay inside the workspace",
            relative.display()
        ));
    }
    Ok(relative)
}

pub(crate) async fn write_file(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| format!("failed to create {}: {err}", parent.display()))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|err| format!("failed to write {}: {err}", path.display()))
}

fn shell(command: &str, workspace: &Path) -> Command {
    let mut shell = Command::new("sh");
    shell
        .arg("-c")
        .arg(command)
        .current_dir(workspace)
        .kill_on_drop(true);
    shell
}

fn classify(command: &str, output: std::io::Result<Output>, tail_lines: usize) -> Verdict {
    let environment = |detail: String| Verdict::EnvironmentError { detail };
    let output = match output {
        Ok(output) => output,
        Err(err) => return environment(format!("failed to execute command '{command}': {err}")),
    };
    match output.status.code() {
        Some(0) => Verdict::Pass,
        Some(code @ (126 | 127)) => environment(format!(
            "command '{command}' could not run (exit {code}): {}",
            tail(&output, tail_lines)
        )),
        Some(code) => Verdict::Fail {
            diagnostic: format!("exit {code}\n{}", tail(&output, tail_lines)),
        },
        None => environment(format!("command '{command}' was terminated by a signal")),
    }
}

fn tail(output: &Output, lines: usize) -> String {
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let all: Vec<&str> = combined.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use rpgen_core::{Node, NodeKind};

    use super::*;

    fn brief(path_hint: Option<&str>) -> NodeBrief {
        let mut node = Node::new("auth::login", NodeKind::BehavioralUnit, "login");
        if let Some(hint) = path_hint {
            node = node.with_path_hint(hint);
        }
        NodeBrief::from(&node)
    }

    #[tokio::test]
    async fn writes_candidate_and_passes_on_exit_zero() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = CommandVerifier::new(dir.path(), r#"grep -q login "$RPGEN_NODE_PATH""#);
        let verdict = verifier
            .verify(&Candidate::new("fn login() {}\n"), &brief(Some("src/auth/login.rs")))
            .await;
        assert_eq!(verdict, Verdict::Pass);
        let written = std::fs::read_to_string(dir.path().join("src/auth/login.rs")).unwrap();
        assert_eq!(written, "fn login() {}\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_behavioral_with_output_tail() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = CommandVerifier::new(dir.path(), "echo noise; echo 'assertion failed' >&2; exit 1")
            .with_tail_lines(1);
        let verdict = verifier.verify(&Candidate::new("x"), &brief(None)).await;
        match verdict {
            Verdict::Fail { diagnostic } => {
                assert!(diagnostic.starts_with("exit 1"));
                assert!(diagnostic.contains("assertion failed"));
                assert!(!diagnostic.contains("noise"));
            }
            other => panic!("unexpected verdict {other:?}"),
        }
        assert!(dir.path().join("generated/auth__login.txt").exists());
    }

    #[tokio::test]
    async fn missing_command_is_an_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = CommandVerifier::new(dir.path(), "rpgen-no-such-test-runner");
        let verdict = verifier.verify(&Candidate::new("x"), &brief(None)).await;
        assert!(matches!(verdict, Verdict::EnvironmentError { .. }));
    }

    #[tokio::test]
    async fn path_hint_cannot_escape_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = CommandVerifier::new(dir.path(), "true");
        let verdict = verifier
            .verify(&Candidate::new("x"), &brief(Some("../outside.rs")))
            .await;
        assert!(matches!(verdict, Verdict::EnvironmentError { detail } if detail.contains("inside the workspace")));
        let absolute = CommandVerifier::target_path(&brief(Some("/etc/passwd")));
        assert!(absolute.is_err());
    }

    #[tokio::test]
    async fn integration_command_judges_the_whole_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn login() {}\n").unwrap();

        let passing = IntegrationCommand::new(dir.path(), "grep -q login lib.rs");
        assert_eq!(passing.check().await, Verdict::Pass);

        let failing = IntegrationCommand::new(dir.path(), "echo '2 tests failed'; exit 3");
        match failing.check().await {
            Verdict::Fail { diagnostic } => {
                assert!(diagnostic.starts_with("exit 3"));
                assert!(diagnostic.contains("2 tests failed"));
            }
            other => panic!("unexpected verdict {other:?}"),
        }

        let missing = IntegrationCommand::new(dir.path(), "rpgen-no-such-suite");
        assert!(matches!(missing.check().await, Verdict::EnvironmentError { .. }));
    }
}
