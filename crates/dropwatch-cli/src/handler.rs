//! Ready handlers: what happens to a file once its size has settled.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use dropwatch::config::HandlerConfig;
use dropwatch::ReadyHandler;

/// Runs an external command with the ready file as its last argument.
///
/// This is where a tidy/import pipeline plugs in, e.g.
/// `beet import -q <file>`.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build a handler from config, if a command is configured.
    pub fn from_config(config: &HandlerConfig) -> Option<Self> {
        config
            .command
            .as_deref()
            .filter(|cmd| !cmd.trim().is_empty())
            .map(|cmd| Self::new(cmd, config.args.clone()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ReadyHandler for CommandHandler {
    fn on_ready(&self, path: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {} for {}: {}",
                self.program,
                output.status,
                path.display(),
                stderr.trim()
            );
        }

        tracing::debug!(
            "{} finished for {}: {}",
            self.program,
            path.display(),
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }
}

/// Logs ready files without acting on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl ReadyHandler for LogHandler {
    fn on_ready(&self, path: &Path) -> Result<()> {
        tracing::info!("Ready: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_requires_command() {
        assert!(CommandHandler::from_config(&HandlerConfig::default()).is_none());

        let blank = HandlerConfig {
            command: Some("   ".to_string()),
            args: Vec::new(),
        };
        assert!(CommandHandler::from_config(&blank).is_none());

        let config = HandlerConfig {
            command: Some("beet".to_string()),
            args: vec!["import".to_string()],
        };
        let handler = CommandHandler::from_config(&config).unwrap();
        assert_eq!(handler.program(), "beet");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_receives_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("song.flac");
        let copy = dir.path().join("copied.flac");
        std::fs::write(&file, b"abc").unwrap();

        // `sh -c` binds the trailing path argument to $0.
        let handler = CommandHandler::new(
            "sh",
            vec![
                "-c".to_string(),
                format!("cp \"$0\" {}", copy.display()),
            ],
        );
        handler.on_ready(&file).unwrap();

        assert_eq!(std::fs::read(&copy).unwrap(), b"abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_an_error() {
        let handler = CommandHandler::new("false", Vec::new());
        let err = handler.on_ready(Path::new("/tmp/song.flac")).unwrap_err();
        assert!(err.to_string().contains("false exited with"));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let handler = CommandHandler::new("dropwatch-definitely-not-a-program", Vec::new());
        assert!(handler.on_ready(Path::new("song.flac")).is_err());
    }

    #[test]
    fn test_log_handler_accepts_everything() {
        assert!(LogHandler.on_ready(Path::new("song.flac")).is_ok());
    }
}
