//! Files under the workspace root and generated-code execution.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::io::ledger::LEDGER_FILE_NAME;
use crate::io::process::run_command_with_timeout;

const CSV_PREVIEW_LINES: usize = 5;

/// Directory the engine reads inputs from and writes artifacts to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    python: Vec<String>,
    exec_timeout: Duration,
    output_limit_bytes: usize,
}

impl Workspace {
    /// Open (and create if needed) a workspace rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("create workspace {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve workspace {}", root.display()))?;
        Ok(Self {
            root,
            python: vec!["python3".to_string()],
            exec_timeout: Duration::from_secs(60),
            output_limit_bytes: 100_000,
        })
    }

    pub fn with_execution(
        mut self,
        python: Vec<String>,
        exec_timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        self.python = python;
        self.exec_timeout = exec_timeout;
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a workspace-relative path to an absolute one. Leading `/` is
    /// ignored; paths that climb out of the root are rejected.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let rel = rel.trim().trim_start_matches('/');
        if rel.is_empty() {
            bail!("empty workspace path");
        }
        let mut path = self.root.clone();
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    bail!("path escapes workspace: {rel}");
                }
            }
        }
        Ok(path)
    }

    /// Relative paths of every regular file, sorted. The ledger file is
    /// engine bookkeeping and is left out.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .with_context(|| format!("relativize {}", entry.path().display()))?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            if rel != LEDGER_FILE_NAME {
                files.push(rel);
            }
        }
        Ok(files)
    }

    pub fn read_file(&self, rel: &str) -> Result<String> {
        let path = self.resolve(rel)?;
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn save_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// True only for an existing regular file inside the root.
    pub fn file_exists(&self, rel: &str) -> bool {
        self.resolve(rel).is_ok_and(|p| p.is_file())
    }

    /// Canonical workspace-relative form of a path a model claims to have
    /// written. Absolute paths must lie under the root; `.` segments are
    /// dropped and separators become `/`. `None` when the path leaves the
    /// root or names no regular file.
    pub fn verified_file(&self, claimed: &str) -> Option<String> {
        let claimed = Path::new(claimed.trim());
        let rel = if claimed.is_absolute() {
            match claimed.strip_prefix(&self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => {
                    let canonical = claimed.canonicalize().ok()?;
                    canonical.strip_prefix(&self.root).ok()?.to_path_buf()
                }
            }
        } else {
            claimed.to_path_buf()
        };

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?.to_string()),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        let rel = parts.join("/");
        self.file_exists(&rel).then_some(rel)
    }

    /// First lines of every CSV file, for grounding prompts in the data.
    pub fn csv_previews(&self) -> Result<String> {
        let mut out = String::new();
        for rel in self.list_files()? {
            if !rel.to_ascii_lowercase().ends_with(".csv") {
                continue;
            }
            let contents = self.read_file(&rel)?;
            out.push_str(&format!("--- {rel} ---\n"));
            for line in contents.lines().take(CSV_PREVIEW_LINES) {
                out.push_str(line);
                out.push('\n');
            }
        }
        Ok(out)
    }

    /// Save `code` to `script` and run it with the configured interpreter
    /// from the workspace root.
    ///
    /// Never fails on the script's own errors: those come back as text so
    /// the caller's error-marker scan can see them.
    #[instrument(skip_all, fields(script = script))]
    pub fn execute_python(&self, code: &str, script: &str) -> Result<String> {
        self.save_file(script, code)?;
        let script_path = self.resolve(script)?;
        let Some((program, args)) = self.python.split_first() else {
            bail!("python command is empty");
        };
        let mut cmd = Command::new(program);
        cmd.args(args).arg(&script_path).current_dir(&self.root);

        debug!("executing generated code");
        let output =
            run_command_with_timeout(cmd, None, self.exec_timeout, self.output_limit_bytes)?;
        if output.timed_out {
            info!(timeout_secs = self.exec_timeout.as_secs(), "generated code timed out");
            return Ok(format!(
                "Error: Code execution timed out ({}s).",
                self.exec_timeout.as_secs()
            ));
        }

        let stdout = output.stdout_text();
        let stderr = output.stderr_text();
        if stdout.trim().is_empty() && stderr.trim().is_empty() {
            return Ok("Code executed successfully with no output.".to_string());
        }
        let mut text = String::new();
        if !stdout.trim().is_empty() {
            text.push_str(&format!("STDOUT:\n{}\n", stdout.trim_end()));
        }
        if !stderr.trim().is_empty() {
            text.push_str(&format!("STDERR:\n{}\n", stderr.trim_end()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_escapes_and_strips_leading_slash() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::open(temp.path()).expect("open");
        assert!(ws.resolve("../secret").is_err());
        assert!(ws.resolve("data/../../x").is_err());
        assert_eq!(
            ws.resolve("/data/a.csv").expect("resolve"),
            ws.root().join("data").join("a.csv")
        );
    }

    #[test]
    fn list_files_is_sorted_and_skips_ledger() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::open(temp.path()).expect("open");
        ws.save_file("b.txt", "b").expect("save");
        ws.save_file("a/nested.csv", "x,y\n1,2\n").expect("save");
        ws.save_file(LEDGER_FILE_NAME, "[]").expect("save");
        assert_eq!(ws.list_files().expect("list"), vec!["a/nested.csv", "b.txt"]);
    }

    #[test]
    fn file_exists_only_for_files_inside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::open(&temp.path().join("ws")).expect("open");
        fs::write(temp.path().join("outside.txt"), "x").expect("write");
        ws.save_file("inside.txt", "x").expect("save");
        fs::create_dir_all(ws.root().join("dir")).expect("mkdir");

        assert!(ws.file_exists("inside.txt"));
        assert!(!ws.file_exists("../outside.txt"));
        assert!(!ws.file_exists("dir"));
        assert!(!ws.file_exists("missing.txt"));
    }

    #[test]
    fn verified_file_normalizes_claimed_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::open(&temp.path().join("ws")).expect("open");
        fs::write(temp.path().join("outside.csv"), "x").expect("write");
        ws.save_file("out/clean.csv", "a\n1\n").expect("save");
        let absolute = ws.root().join("out").join("clean.csv");

        for claim in [
            "out/clean.csv",
            "./out/clean.csv",
            "out/./clean.csv",
            " out/clean.csv ",
            absolute.to_str().expect("utf8 path"),
        ] {
            assert_eq!(ws.verified_file(claim).as_deref(), Some("out/clean.csv"), "{claim}");
        }

        let outside = temp.path().join("outside.csv");
        assert_eq!(ws.verified_file(outside.to_str().expect("utf8 path")), None);
        assert_eq!(ws.verified_file("../outside.csv"), None);
        assert_eq!(ws.verified_file("out"), None);
        assert_eq!(ws.verified_file("."), None);
        assert_eq!(ws.verified_file("out/missing.csv"), None);
    }

    #[test]
    fn csv_previews_take_first_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::open(temp.path()).expect("open");
        let rows: String = (0..20).map(|i| format!("{i},{i}\n")).collect();
        ws.save_file("sales.csv", &format!("day,amount\n{rows}"))
            .expect("save");
        let preview = ws.csv_previews().expect("preview");
        assert!(preview.starts_with("--- sales.csv ---\nday,amount\n0,0\n"));
        assert_eq!(preview.lines().count(), 1 + CSV_PREVIEW_LINES);
    }

    #[cfg(unix)]
    #[test]
    fn execute_reports_stdout_and_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::open(temp.path()).expect("open").with_execution(
            vec!["sh".to_string()],
            Duration::from_millis(300),
            10_000,
        );
        let out = ws
            .execute_python("echo METRIC:rows=3", "tmp/step_1_attempt_0.sh")
            .expect("run");
        assert_eq!(out, "STDOUT:\nMETRIC:rows=3\n");
        assert!(ws.file_exists("tmp/step_1_attempt_0.sh"));

        let out = ws.execute_python("exec sleep 3", "tmp/slow.sh").expect("run");
        assert!(out.starts_with("Error: Code execution timed out"));

        let out = ws.execute_python("true", "tmp/quiet.sh").expect("run");
        assert_eq!(out, "Code executed successfully with no output.");
    }
}
