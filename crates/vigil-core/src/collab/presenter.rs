use anyhow::{bail, Context, Result};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};

use super::AlertPresenter;

struct Shown {
    text: String,
    child: Child,
}

/// Shows the alert by running a warning program with the text as its last argument
pub struct CommandPresenter {
    command: Vec<String>,
    shown: Mutex<Option<Shown>>,
}

impl CommandPresenter {
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            shown: Mutex::new(None),
        }
    }

    fn shown(&self) -> Result<MutexGuard<'_, Option<Shown>>> {
        self.shown
            .lock()
            .map_err(|_| anyhow::anyhow!("Alert presenter state poisoned"))
    }

    fn spawn(&self, text: &str) -> Result<Child> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("No alert command configured");
        };
        Command::new(program)
            .args(args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start alert program {program}"))
    }

    fn close(shown: &mut Shown) {
        if let Err(e) = shown.child.kill() {
            log::debug!("Alert program already gone: {e}");
        }
        let _ = shown.child.wait();
    }
}

impl AlertPresenter for CommandPresenter {
    fn show(&self, text: &str) -> Result<()> {
        let mut shown = self.shown()?;
        if let Some(previous) = shown.as_mut() {
            Self::close(previous);
        }
        let child = self.spawn(text)?;
        *shown = Some(Shown {
            text: text.to_string(),
            child,
        });
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        let mut shown = self.shown()?;
        let Some(current) = shown.as_mut() else {
            return Ok(());
        };
        if current.child.try_wait()?.is_some() {
            log::debug!("Alert was closed, showing it again");
            current.child = self.spawn(&current.text)?;
        }
        Ok(())
    }

    fn hide(&self) -> Result<()> {
        if let Some(mut previous) = self.shown()?.take() {
            Self::close(&mut previous);
        }
        Ok(())
    }
}

impl Drop for CommandPresenter {
    fn drop(&mut self) {
        if let Ok(shown) = self.shown.get_mut() {
            if let Some(previous) = shown.as_mut() {
                Self::close(previous);
            }
        }
    }
}
