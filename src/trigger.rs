use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

/// Runs an operator-configured command when a target changes state.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Returns `false` when the command is empty, fails to start, or exits non-zero.
    async fn run(&self, command_line: &str) -> bool;
}

/// Executes trigger commands through the system shell so pipes and `;` work.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellTrigger;

#[async_trait]
impl Trigger for ShellTrigger {
    async fn run(&self, command_line: &str) -> bool {
        if command_line.trim().is_empty() {
            warn!("Trigger command is empty: {command_line:?}");
            return false;
        }

        debug!("Running trigger: {command_line}");
        match shell_command(command_line).status().await {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!("Trigger {command_line:?} failed with {status}");
                false
            }
            Err(e) => {
                warn!("Trigger {command_line:?} could not be started: {e}");
                false
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}
