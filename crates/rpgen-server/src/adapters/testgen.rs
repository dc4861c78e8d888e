//! A [`Verifier`] that gives every node its own generated unit test.
//!
//! The test is authored once per node from its interface, written under
//! `tests/` in the workspace, and kept for every repair attempt so the
//! candidate is judged against a fixed target. The wrapped
//! [`CommandVerifier`] then runs with `RPGEN_TEST_PATH` pointing at it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rpgen_core::NodeId;
use tracing::{debug, warn};

use super::command::{file_stem, inside_workspace, write_file, CommandVerifier};
use crate::collab::{Candidate, NodeBrief, TestAuthor, Verdict, Verifier};

pub struct GeneratedTestVerifier {
    author: Arc<dyn TestAuthor>,
    runner: CommandVerifier,
    tests: DashMap<NodeId, String>,
}

impl GeneratedTestVerifier {
    pub fn new(author: Arc<dyn TestAuthor>, runner: CommandVerifier) -> Self {
        GeneratedTestVerifier {
            author,
            runner,
            tests: DashMap::new(),
        }
    }

    /// Where a node's test is written, relative to the workspace.
    ///
    /// `src/auth/login.py` maps to `tests/auth/test_login.py`; a node
    /// without a path hint gets `tests/test_<id>.txt`.
    pub fn test_path(node: &NodeBrief) -> Result<PathBuf, String> {
        let Some(hint) = &node.metadata.path_hint else {
            return inside_workspace(
                Path::new("tests").join(format!("test_{}.txt", file_stem(node))),
            );
        };
        let source = inside_workspace(PathBuf::from(hint))?;
        let source = source.strip_prefix("src").unwrap_or(source.as_path());
        let file = source
            .file_name()
            .ok_or_else(|| format!("path hint '{hint}' names no file"))?
            .to_string_lossy();
        let mut path = PathBuf::from("tests");
        if let Some(dir) = source.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            path.push(dir);
        }
        path.push(format!("test_{file}"));
        Ok(path)
    }

    async fn test_for(&self, node: &NodeBrief) -> Result<String, String> {
        if let Some(test) = self.tests.get(&node.id) {
            return Ok(test.clone());
        }
        let test = self
            .author
            .write_test(node)
            .await
            .map_err(|err| format!("test generation failed: {err}"))?;
        debug!(node = %node.id, chars = test.len(), "generated unit test");
        self.tests.insert(node.id.clone(), test.clone());
        Ok(test)
    }
}

#[async_trait]
impl Verifier for GeneratedTestVerifier {
    async fn verify(&self, candidate: &Candidate, node: &NodeBrief) -> Verdict {
        let relative = match Self::test_path(node) {
            Ok(path) => path,
            Err(detail) => return Verdict::EnvironmentError { detail },
        };
        let test = match self.test_for(node).await {
            Ok(test) => test,
            Err(detail) => {
                warn!(node = %node.id, %detail, "no unit test for node");
                return Verdict::EnvironmentError { detail };
            }
        };
        if let Err(detail) = write_file(&self.runner.workspace().join(&relative), &test).await {
            return Verdict::EnvironmentError { detail };
        }
        self.runner.run(candidate, node, Some(&relative)).await
    }
}
