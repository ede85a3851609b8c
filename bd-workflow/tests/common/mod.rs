#![allow(dead_code)]

use assert_cmd::prelude::*;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// A scratch working directory with its own coordination store.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("coordination.db")
    }

    /// `bd-workflow --db <store>` run inside the workspace, isolated from the
    /// user's config and environment.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("bd-workflow").unwrap();
        cmd.current_dir(self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join("xdg"))
            .env_remove("BD_WORKFLOW_DB")
            .env_remove("BD_WORKFLOW_LOG")
            .env("RUST_LOG", "warn")
            .arg("--db")
            .arg(self.db_path());
        cmd
    }

    /// Run `start` and return the new workflow id.
    pub fn start(&self, args: &[&str]) -> String {
        let output = self.cmd().arg("start").args(args).output().unwrap();
        assert!(output.status.success(), "start failed: {}", String::from_utf8_lossy(&output.stderr));
        workflow_id(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Pull the first `wf-...` token out of command output.
pub fn workflow_id(stdout: &str) -> String {
    stdout
        .split_whitespace()
        .find(|token| token.starts_with("wf-"))
        .map(|token| token.trim_end_matches(',').to_string())
        .expect("no workflow id in output")
}
