use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::{ExecutionOutcome, ExecutorContext, ExecutorPlugin, truncate_captured};
use crate::domain::ActionApproval;
use crate::error::{Error, Result};

const MAX_ARGS: usize = 32;
const MAX_ARG_LEN: usize = 512;

/// Runs a whitelisted bare executable inside a workspace's directory tree.
pub struct SandboxedCommandPlugin;

impl Default for SandboxedCommandPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxedCommandPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutorPlugin for SandboxedCommandPlugin {
    fn plugin_key(&self) -> &'static str {
        "sandboxed_command"
    }

    fn action_types(&self) -> &'static [&'static str] {
        &["run_command", "shell_command", "cli_command"]
    }

    async fn execute(
        &self,
        ctx: &ExecutorContext,
        approval: &ActionApproval,
    ) -> Result<ExecutionOutcome> {
        let workspace_id = if approval.workspace_id.is_empty() {
            return Err(Error::internal("sandboxed command requires a workspace id"));
        } else {
            &approval.workspace_id
        };

        let workspace_dir = ctx.workspace_root.join(workspace_id);
        let requested_cwd = approval
            .payload
            .get("cwd")
            .and_then(Value::as_str)
            .unwrap_or("");
        let working_dir = resolve_contained_dir(&workspace_dir, requested_cwd)?;

        let argv = parse_argv(approval)?;
        validate_argv(&argv, &ctx.allowed_commands)?;

        let timeout_secs = approval
            .payload
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(ctx.default_timeout_secs);

        let (output, fallback_hint) =
            run_with_fallback(&argv, &working_dir, timeout_secs, ctx.max_output_bytes).await?;

        let mut message = format!(
            "command completed (exit {:?}): {}",
            output.status,
            truncate_captured(&output.combined, ctx.max_output_bytes)
        );
        if let Some(hint) = &fallback_hint {
            message.push_str(&format!(" (fallback: {hint})"));
        }
        if argv.first().is_some_and(|c| c.eq_ignore_ascii_case("curl"))
            && !argv.iter().any(|a| a == "-L" || a == "--location")
            && looks_like_redirect(&output.combined)
        {
            message.push_str(" (note: response looks like an HTTP redirect; curl was not given -L/--location)");
        }

        Ok(ExecutionOutcome {
            plugin: self.plugin_key().to_owned(),
            message,
        })
    }
}

fn resolve_contained_dir(workspace_dir: &Path, requested: &str) -> Result<PathBuf> {
    let joined = if requested.is_empty() {
        workspace_dir.to_path_buf()
    } else {
        workspace_dir.join(requested)
    };
    let cleaned = clean_path(&joined);
    let root_cleaned = clean_path(workspace_dir);
    if !cleaned.starts_with(&root_cleaned) {
        return Err(Error::internal(
            "working directory escapes the workspace sandbox",
        ));
    }
    Ok(cleaned)
}

/// Lexically normalize a path (resolve `.`/`..` components without
/// touching the filesystem), mirroring `path.Clean` semantics.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.into_iter().collect()
}

fn parse_argv(approval: &ActionApproval) -> Result<Vec<String>> {
    if let Some(args) = approval.payload.get("args").and_then(Value::as_array) {
        let mut argv = Vec::with_capacity(args.len() + 1);
        let command = approval
            .payload
            .get("command")
            .and_then(Value::as_str)
            .or(approval.action_target.as_deref())
            .ok_or_else(|| Error::internal("sandboxed command has no command name"))?;
        argv.push(command.to_owned());
        for arg in args {
            let arg = arg
                .as_str()
                .ok_or_else(|| Error::internal("sandboxed command args must be strings"))?;
            argv.push(arg.to_owned());
        }
        return Ok(argv);
    }

    let line = approval
        .payload
        .get("command")
        .and_then(Value::as_str)
        .or(approval.action_target.as_deref())
        .ok_or_else(|| Error::internal("sandboxed command has no command"))?;
    Ok(line.split_whitespace().map(str::to_owned).collect())
}

fn validate_argv(argv: &[String], allowed_commands: &[String]) -> Result<()> {
    let Some(command) = argv.first() else {
        return Err(Error::internal("sandboxed command is empty"));
    };
    if command.contains('/') || command.contains('\\') || command.chars().any(char::is_whitespace)
    {
        return Err(Error::internal(
            "sandboxed command must be a bare executable name",
        ));
    }
    if argv.len() - 1 > MAX_ARGS {
        return Err(Error::internal(format!(
            "sandboxed command takes at most {MAX_ARGS} arguments"
        )));
    }
    for arg in &argv[1..] {
        if arg.len() > MAX_ARG_LEN {
            return Err(Error::internal(format!(
                "sandboxed command argument exceeds {MAX_ARG_LEN} characters"
            )));
        }
    }
    if !allowed_commands
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(command))
    {
        return Err(Error::internal(format!(
            "command '{command}' is not in the sandbox allow-list"
        )));
    }
    Ok(())
}

struct CapturedOutput {
    status: Option<i32>,
    combined: String,
}

async fn spawn_and_capture(
    argv: &[String],
    cwd: &Path,
    timeout_secs: u64,
) -> Result<CapturedOutput> {
    let Some((program, args)) = argv.split_first() else {
        return Err(Error::internal("sandboxed command is empty"));
    };
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.current_dir(cwd);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::internal(format!("failed to spawn '{program}': {e}")))?;
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let run = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
        let status = child.wait().await?;
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        if let Some(mut out) = stdout_handle {
            tokio::io::AsyncReadExt::read_to_end(&mut out, &mut stdout_buf).await.ok();
        }
        if let Some(mut err) = stderr_handle {
            tokio::io::AsyncReadExt::read_to_end(&mut err, &mut stderr_buf).await.ok();
        }
        Ok::<_, std::io::Error>((status, stdout_buf, stderr_buf))
    })
    .await
    .map_err(|_| Error::internal(format!("command timed out after {timeout_secs}s")))?
    .map_err(|e| Error::internal(format!("command execution failed: {e}")))?;

    let (status, stdout_buf, stderr_buf) = run;
    let mut combined = String::from_utf8_lossy(&stdout_buf).into_owned();
    combined.push_str(&String::from_utf8_lossy(&stderr_buf));
    Ok(CapturedOutput {
        status: status.code(),
        combined,
    })
}

/// Table of flag translations applied when falling back from one
/// executable to another.
fn translate_flags(argv: &[String], from: &str, to: &str) -> Vec<String> {
    let mut out = vec![to.to_owned()];
    let rest = &argv[1..];
    match (from, to) {
        ("rg", "grep") => {
            out.push("-R".to_owned());
            out.push("-n".to_owned());
            out.extend(rest.iter().cloned());
        }
        ("curl", "wget") => {
            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "-H" if i + 1 < rest.len() => {
                        out.push("--header".to_owned());
                        out.push(rest[i + 1].clone());
                        i += 2;
                    }
                    "-o" if i + 1 < rest.len() => {
                        out.push("-O".to_owned());
                        out.push(rest[i + 1].clone());
                        i += 2;
                    }
                    "-k" | "--insecure" => {
                        out.push("--no-check-certificate".to_owned());
                        i += 1;
                    }
                    other => {
                        out.push(other.to_owned());
                        i += 1;
                    }
                }
            }
        }
        _ => out.extend(rest.iter().cloned()),
    }
    out
}

async fn which(command: &str) -> bool {
    Command::new("sh")
        .args(["-c", &format!("command -v {command}")])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run `argv`, applying the `git diff` retry/exit-code special case and the
/// `rg -> grep` / `curl -> wget` graceful fallback when the primary
/// executable is missing.
async fn run_with_fallback(
    argv: &[String],
    cwd: &Path,
    timeout_secs: u64,
    _max_output: usize,
) -> Result<(CapturedOutput, Option<String>)> {
    let command = argv[0].as_str();

    if !which(command).await {
        let fallback_target = match command {
            "rg" => Some("grep"),
            "curl" => Some("wget"),
            _ => None,
        };
        if let Some(target) = fallback_target {
            if which(target).await {
                let translated = translate_flags(argv, command, target);
                let output = spawn_and_capture(&translated, cwd, timeout_secs).await?;
                return Ok((output, Some(format!("{command} -> {target}"))));
            }
        }
        return Err(Error::internal(format!(
            "command '{command}' is not available and no fallback applies"
        )));
    }

    let mut output = spawn_and_capture(argv, cwd, timeout_secs).await?;

    if command == "git" && argv.get(1).map(String::as_str) == Some("diff") {
        let not_a_repo = output.status != Some(0)
            && (output.combined.contains("not a git repository")
                || output.combined.contains("outside repository"));
        if not_a_repo {
            let mut retried = argv.to_vec();
            retried.insert(2, "--no-index".to_owned());
            output = spawn_and_capture(&retried, cwd, timeout_secs).await?;
        }
        if output.status == Some(1) {
            output.status = Some(0);
        }
    }

    Ok((output, None))
}

fn looks_like_redirect(output: &str) -> bool {
    let lower = output.to_lowercase();
    ["301 moved", "302 found", "303 see other", "307 temporary redirect", "308 permanent redirect"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_resolves_parent_refs() {
        let p = clean_path(Path::new("/ws/a/../b"));
        assert_eq!(p, PathBuf::from("/ws/b"));
    }

    #[test]
    fn resolve_contained_dir_rejects_escape() {
        let workspace = Path::new("/ws/demo");
        let err = resolve_contained_dir(workspace, "../../etc").unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }

    #[test]
    fn resolve_contained_dir_allows_subdir() {
        let workspace = Path::new("/ws/demo");
        let resolved = resolve_contained_dir(workspace, "src").unwrap();
        assert_eq!(resolved, PathBuf::from("/ws/demo/src"));
    }

    #[test]
    fn validate_argv_rejects_paths_in_command() {
        let err = validate_argv(&["/bin/ls".to_owned()], &["ls".to_owned()]).unwrap_err();
        assert!(err.to_string().contains("bare executable"));
    }

    #[test]
    fn validate_argv_rejects_unlisted_command() {
        let err = validate_argv(&["rm".to_owned()], &["ls".to_owned()]).unwrap_err();
        assert!(err.to_string().contains("allow-list"));
    }

    #[test]
    fn validate_argv_allows_case_insensitive_match() {
        validate_argv(&["LS".to_owned()], &["ls".to_owned()]).unwrap();
    }

    #[test]
    fn translate_flags_maps_rg_to_grep() {
        let argv = vec!["rg".to_owned(), "foo".to_owned()];
        let translated = translate_flags(&argv, "rg", "grep");
        assert_eq!(translated, vec!["grep", "-R", "-n", "foo"]);
    }

    #[test]
    fn translate_flags_maps_curl_header_to_wget() {
        let argv = vec![
            "curl".to_owned(),
            "-H".to_owned(),
            "X-Test: 1".to_owned(),
        ];
        let translated = translate_flags(&argv, "curl", "wget");
        assert_eq!(translated, vec!["wget", "--header", "X-Test: 1"]);
    }

    #[test]
    fn looks_like_redirect_detects_301() {
        assert!(looks_like_redirect("HTTP/1.1 301 Moved Permanently"));
        assert!(!looks_like_redirect("HTTP/1.1 200 OK"));
    }
}
