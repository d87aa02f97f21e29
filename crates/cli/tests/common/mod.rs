//! Helpers for running the `dw` binary

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Command builder for `dw` with an isolated config file
pub struct DwCommand {
    args: Vec<String>,
    config: Option<PathBuf>,
}

impl DwCommand {
    pub fn new(args: &[&str]) -> Self {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
            config: None,
        }
    }

    pub fn config(mut self, path: &Path) -> Self {
        self.config = Some(path.to_path_buf());
        self
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_dw"));
        command.args(&self.args).env_remove("DIRWATCH_METHOD");
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        command
    }

    pub fn output(&self) -> Output {
        self.command()
            .stdin(Stdio::null())
            .output()
            .expect("failed to run dw")
    }

    /// Run and assert a zero exit status; returns stdout
    pub fn assert_success(&self) -> String {
        let output = self.output();
        assert!(
            output.status.success(),
            "dw {:?} failed:\n{}",
            self.args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Run and assert failure; returns stderr
    pub fn assert_failure(&self) -> String {
        let output = self.output();
        assert!(
            !output.status.success(),
            "dw {:?} should have failed",
            self.args
        );
        String::from_utf8_lossy(&output.stderr).into_owned()
    }
}
