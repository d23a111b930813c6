//! Hook and lifecycle script execution.
//!
//! Hooks are looked up at the path a descriptor declares, then at the
//! conventional `hooks/<phase>` and `hooks/<phase>.sh` locations. A
//! `pre-*` failure aborts the enclosing operation; a `post-*` failure is
//! logged and reported but never rolls anything back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn, Instrument};

use crate::descriptor::PluginDescriptor;
use crate::{PluginError, Result};

/// Directory holding conventional hook scripts.
pub const HOOKS_DIR: &str = "hooks";

/// Lifecycle points at which a plugin may run a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    PreInstall,
    PostInstall,
    PreUninstall,
    PostUninstall,
}

impl HookPhase {
    pub const ALL: [HookPhase; 4] = [
        Self::PreInstall,
        Self::PostInstall,
        Self::PreUninstall,
        Self::PostUninstall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreInstall => "pre-install",
            Self::PostInstall => "post-install",
            Self::PreUninstall => "pre-uninstall",
            Self::PostUninstall => "post-uninstall",
        }
    }

    /// Whether a failure aborts the enclosing operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PreInstall | Self::PreUninstall)
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional lifecycle scripts at the root of a plugin directory.
pub const LIFECYCLE_SCRIPTS: [&str; 3] = ["install", "uninstall", "update"];

/// Find a lifecycle script (`install`, `install.sh`, ...) in `dir`.
pub fn lifecycle_script(dir: &Path, name: &str) -> Option<PathBuf> {
    [name.to_string(), format!("{}.sh", name)]
        .into_iter()
        .map(|candidate| dir.join(candidate))
        .find(|path| path.is_file())
}

/// Locate the script for `phase`, declared path first.
pub fn find_hook(dir: &Path, descriptor: &PluginDescriptor, phase: HookPhase) -> Option<PathBuf> {
    if let Some(declared) = descriptor.hooks.get(&phase) {
        return hangar_common_fs::path::safe_join(dir, declared).filter(|p| p.is_file());
    }
    let hooks = dir.join(HOOKS_DIR);
    lifecycle_script(&hooks, phase.as_str())
}

/// Where a script runs and what it is told about its plugin.
#[derive(Debug, Clone)]
pub struct ScriptContext<'a> {
    pub plugin: &'a str,
    /// Working directory and `HANGAR_PLUGIN_DIR`.
    pub plugin_dir: &'a Path,
    pub data_dir: &'a Path,
}

/// Captured result of a finished script.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// One-line failure description.
    pub fn failure_reason(&self) -> String {
        let status = match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        match self.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(last) => format!("{}: {}", status, last.trim()),
            None => status,
        }
    }
}

/// What happened when a hook phase was run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// No script for this phase.
    Skipped,
    Succeeded,
    /// A non-fatal phase failed; the reason was logged.
    Warned(String),
}

/// Runs hook, lifecycle and entrypoint scripts with a timeout.
#[derive(Debug, Clone)]
pub struct HookRunner {
    timeout: Duration,
}

impl HookRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the hook for `phase` if the plugin ships one.
    ///
    /// Fatal phases turn a failure into [`PluginError::HookFailed`]; other
    /// phases return [`HookOutcome::Warned`].
    pub async fn run(
        &self,
        ctx: &ScriptContext<'_>,
        descriptor: &PluginDescriptor,
        phase: HookPhase,
    ) -> Result<HookOutcome> {
        let Some(script) = find_hook(ctx.plugin_dir, descriptor, phase) else {
            debug!(plugin = %ctx.plugin, phase = %phase, "no hook script");
            return Ok(HookOutcome::Skipped);
        };

        let span = hangar_common_log::spans::hook_span(ctx.plugin, phase.as_str());
        let result = self
            .run_script(ctx, phase.as_str(), &script, &[])
            .instrument(span)
            .await;

        let reason = match result {
            Ok(output) if output.success() => return Ok(HookOutcome::Succeeded),
            Ok(output) => output.failure_reason(),
            Err(e) => e.to_string(),
        };

        if phase.is_fatal() {
            Err(PluginError::HookFailed {
                phase: phase.to_string(),
                reason,
            })
        } else {
            warn!(plugin = %ctx.plugin, phase = %phase, %reason, "hook failed, continuing");
            Ok(HookOutcome::Warned(reason))
        }
    }

    /// Run a lifecycle script (`install`, `uninstall`, `update`) if present.
    ///
    /// These always abort on failure.
    pub async fn run_lifecycle(&self, ctx: &ScriptContext<'_>, name: &str) -> Result<bool> {
        let Some(script) = lifecycle_script(ctx.plugin_dir, name) else {
            return Ok(false);
        };

        let span = hangar_common_log::spans::hook_span(ctx.plugin, name);
        let output = self
            .run_script(ctx, name, &script, &[])
            .instrument(span)
            .await
            .map_err(|e| PluginError::HookFailed {
                phase: name.to_string(),
                reason: e.to_string(),
            })?;

        if output.success() {
            Ok(true)
        } else {
            Err(PluginError::HookFailed {
                phase: name.to_string(),
                reason: output.failure_reason(),
            })
        }
    }

    /// Execute `script` in the plugin directory with the plugin's
    /// environment, killing it once the timeout elapses.
    pub async fn run_script(
        &self,
        ctx: &ScriptContext<'_>,
        label: &str,
        script: &Path,
        args: &[String],
    ) -> Result<ScriptOutput> {
        debug!(script = %script.display(), "running {}", label);

        let child = self
            .command(ctx, label, script, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Ok(ScriptOutput {
                    status: None,
                    stdout: String::new(),
                    stderr: format!("timed out after {}s", self.timeout.as_secs()),
                })
            }
        };

        Ok(ScriptOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Execute `script` attached to the caller's terminal, without a timeout.
    pub async fn run_interactive(
        &self,
        ctx: &ScriptContext<'_>,
        label: &str,
        script: &Path,
        args: &[String],
    ) -> Result<i32> {
        let status = self
            .command(ctx, label, script, args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        Ok(status.code().unwrap_or(-1))
    }

    fn command(&self, ctx: &ScriptContext<'_>, label: &str, script: &Path, args: &[String]) -> Command {
        let mut command = Command::new(script);
        command
            .args(args)
            .current_dir(ctx.plugin_dir)
            .env("HANGAR_PLUGIN_NAME", ctx.plugin)
            .env("HANGAR_PLUGIN_DIR", ctx.plugin_dir)
            .env("HANGAR_PLUGIN_DATA_DIR", ctx.data_dir)
            .env("HANGAR_HOOK", label)
            .kill_on_drop(true);
        command
    }
}

impl Default for HookRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
