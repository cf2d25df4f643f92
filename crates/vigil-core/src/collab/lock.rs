use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::LockAction;

/// Locks the workstation with an external command (`loginctl lock-session` by default)
pub struct CommandLock {
    command: Vec<String>,
}

impl CommandLock {
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl LockAction for CommandLock {
    async fn now(&self) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("No lock command configured");
        };

        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("Failed to run lock command {program}"))?;

        if !status.success() {
            bail!("Lock command {program} exited with {status}");
        }
        Ok(())
    }
}
