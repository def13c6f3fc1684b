//! Built-in OS command protocol extension.
//!
//! Executes `command_line` sources and criteria through the local shell and
//! runs `awk` script sources over referenced table text. Remote execution is
//! out of scope for the built-in; a transport extension can claim the same
//! capabilities to provide it.

use std::any::Any;
use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::connector::{Criterion, CriterionKind, CriterionType, Source, SourceKind, SourceType};
use crate::extension::{ProtocolConfig, ProtocolError, ProtocolExtension};
use crate::strategy::{CriterionTestResult, SourceTable, matches_expected_result};
use crate::telemetry::TelemetryStore;

/// Protocol identifier of this extension.
pub const OSCOMMAND_PROTOCOL: &str = "oscommand";

/// Default command timeout (2 minutes).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_sudo_command() -> String {
    "sudo".to_string()
}

/// `oscommand` section of the host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLineConfig {
    /// Command timeout (default: 2m).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Prefix commands with the sudo command (default: false).
    #[serde(default)]
    pub use_sudo: bool,
    /// Sudo command prefix (default: `sudo`).
    #[serde(default = "default_sudo_command")]
    pub sudo_command: String,
}

impl Default for CommandLineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandLineConfig {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            use_sudo: false,
            sudo_command: default_sudo_command(),
        }
    }

    /// Set the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable sudo prefixing.
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }
}

impl ProtocolConfig for CommandLineConfig {
    fn protocol(&self) -> &str {
        OSCOMMAND_PROTOCOL
    }

    fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("timeout must be positive".to_string());
        }
        if self.use_sudo && self.sudo_command.trim().is_empty() {
            return Err("sudo_command must not be empty when use_sudo is set".to_string());
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<String> {
        match name {
            "timeout" => Some(humantime::format_duration(self.timeout).to_string()),
            "use_sudo" => Some(self.use_sudo.to_string()),
            "sudo_command" => Some(self.sudo_command.clone()),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// OS command protocol extension.
#[derive(Debug, Default)]
pub struct CommandLineExtension;

impl CommandLineExtension {
    pub fn new() -> Self {
        Self
    }

    fn downcast(config: &dyn ProtocolConfig) -> Result<&CommandLineConfig, ProtocolError> {
        config
            .as_any()
            .downcast_ref::<CommandLineConfig>()
            .ok_or_else(|| {
                ProtocolError::InvalidConfiguration(format!(
                    "expected an oscommand configuration, got '{}'",
                    config.protocol()
                ))
            })
    }

    /// Run a command through the local shell, capturing stdout.
    async fn run_shell(
        &self,
        config: &CommandLineConfig,
        command_line: &str,
    ) -> Result<String, ProtocolError> {
        let command_line = if config.use_sudo {
            format!("{} {}", config.sudo_command, command_line)
        } else {
            command_line.to_string()
        };

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(config.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProtocolError::Io(e)),
            Err(_) => return Err(ProtocolError::Timeout),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProtocolError::Execution(format!(
                "command exited with {}: {}",
                output.status,
                stderr.lines().next().unwrap_or_default()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run an awk script over the given input text via the system awk.
    async fn run_awk(
        &self,
        config: &CommandLineConfig,
        script: &str,
        input: &str,
    ) -> Result<String, ProtocolError> {
        let mut child = Command::new("awk")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = match timeout(config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProtocolError::Io(e)),
            Err(_) => return Err(ProtocolError::Timeout),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProtocolError::Execution(format!(
                "awk exited with {}: {}",
                output.status,
                stderr.lines().next().unwrap_or_default()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl ProtocolExtension for CommandLineExtension {
    fn protocol(&self) -> &str {
        OSCOMMAND_PROTOCOL
    }

    fn supported_sources(&self) -> BTreeSet<SourceType> {
        BTreeSet::from([SourceType::CommandLine, SourceType::Awk])
    }

    fn supported_criteria(&self) -> BTreeSet<CriterionType> {
        BTreeSet::from([CriterionType::CommandLine, CriterionType::Process])
    }

    fn build_configuration(
        &self,
        protocol_key: &str,
        raw: &serde_yaml::Value,
    ) -> Result<Arc<dyn ProtocolConfig>, ProtocolError> {
        let config: CommandLineConfig = serde_yaml::from_value(raw.clone()).map_err(|e| {
            ProtocolError::InvalidConfiguration(format!("section '{protocol_key}': {e}"))
        })?;
        config
            .validate()
            .map_err(|e| ProtocolError::InvalidConfiguration(format!("section '{protocol_key}': {e}")))?;
        Ok(Arc::new(config))
    }

    async fn process_source(
        &self,
        source: &Source,
        connector_id: &str,
        config: &dyn ProtocolConfig,
        _store: &TelemetryStore,
    ) -> Result<SourceTable, ProtocolError> {
        let config = Self::downcast(config)?;
        match &source.kind {
            SourceKind::CommandLine {
                command_line,
                execute_locally,
                exclude_regex,
                keep_only_regex,
                separators,
                select_columns,
            } => {
                if !execute_locally {
                    return Err(ProtocolError::UnsupportedOperation(
                        "remote command execution (no transport extension configured)".to_string(),
                    ));
                }
                let stdout = self.run_shell(config, command_line).await?;
                let lines =
                    filter_lines(&stdout, keep_only_regex.as_deref(), exclude_regex.as_deref());
                debug!(
                    connector_id,
                    source = %source.name,
                    line_count = lines.len(),
                    "Command source executed"
                );
                Ok(lines_to_table(lines, separators.as_deref(), select_columns))
            }
            SourceKind::Awk {
                script,
                input,
                keep_only_regex,
                separators,
                select_columns,
            } => {
                let stdout = self
                    .run_awk(config, script, input.as_deref().unwrap_or_default())
                    .await?;
                let lines = filter_lines(&stdout, keep_only_regex.as_deref(), None);
                debug!(
                    connector_id,
                    source = %source.name,
                    line_count = lines.len(),
                    "Awk source executed"
                );
                Ok(lines_to_table(lines, separators.as_deref(), select_columns))
            }
            other => Err(ProtocolError::UnsupportedOperation(
                other.source_type().to_string(),
            )),
        }
    }

    async fn process_criterion(
        &self,
        criterion: &Criterion,
        connector_id: &str,
        config: &dyn ProtocolConfig,
        _store: &TelemetryStore,
    ) -> Result<CriterionTestResult, ProtocolError> {
        let config = Self::downcast(config)?;
        match &criterion.kind {
            CriterionKind::CommandLine {
                command_line,
                expected_result,
                execute_locally,
                error_message,
            } => {
                if !execute_locally {
                    return Ok(CriterionTestResult::failure(
                        error_message.clone().unwrap_or_else(|| {
                            "remote command execution not supported".to_string()
                        }),
                    ));
                }
                let output = match self.run_shell(config, command_line).await {
                    Ok(output) => output,
                    Err(e) => {
                        return Ok(CriterionTestResult::failure(
                            error_message
                                .clone()
                                .unwrap_or_else(|| format!("command test failed: {e}")),
                        ));
                    }
                };
                debug!(connector_id, command = %command_line, "Command criterion tested");
                if matches_expected_result(&output, expected_result.as_deref()) {
                    Ok(CriterionTestResult::success(output))
                } else {
                    let message = error_message.clone().unwrap_or_else(|| {
                        "command output did not match the expected result".to_string()
                    });
                    Ok(CriterionTestResult::failure(message).with_result(output))
                }
            }
            CriterionKind::Process { command_line } => {
                self.test_process(config, connector_id, command_line).await
            }
            other => Err(ProtocolError::UnsupportedOperation(
                other.criterion_type().to_string(),
            )),
        }
    }

    async fn check_protocol(
        &self,
        config: &dyn ProtocolConfig,
        _store: &TelemetryStore,
    ) -> Option<bool> {
        let config = Self::downcast(config).ok()?;
        Some(self.run_shell(config, "echo up").await.is_ok())
    }
}

impl CommandLineExtension {
    /// Check a process matching the pattern is running locally.
    ///
    /// When the process list cannot be obtained at all the test is skipped
    /// rather than failed, so detection on unusual platforms is not blocked.
    async fn test_process(
        &self,
        config: &CommandLineConfig,
        connector_id: &str,
        pattern: &str,
    ) -> Result<CriterionTestResult, ProtocolError> {
        let listing = match self.run_shell(config, "ps -e -o args=").await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(connector_id, error = %e, "Process listing unavailable, test skipped");
                return Ok(CriterionTestResult::success(String::new())
                    .with_message(format!("process check skipped: {e}")));
            }
        };

        let matcher = match regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
        {
            Ok(matcher) => matcher,
            Err(_) => {
                // Fall back to a substring match on an unparseable pattern.
                let found = listing
                    .lines()
                    .any(|line| line.to_lowercase().contains(&pattern.to_lowercase()));
                return Ok(process_result(found, pattern));
            }
        };

        let found = listing.lines().any(|line| matcher.is_match(line));
        Ok(process_result(found, pattern))
    }
}

fn process_result(found: bool, pattern: &str) -> CriterionTestResult {
    if found {
        CriterionTestResult::success(format!("process matching '{pattern}' is running"))
    } else {
        CriterionTestResult::failure(format!("no running process matches '{pattern}'"))
    }
}

/// Apply keep-only and exclude line filters to raw output.
///
/// An unparseable filter pattern is logged and ignored, keeping the lines.
fn filter_lines(text: &str, keep_only: Option<&str>, exclude: Option<&str>) -> Vec<String> {
    let keep_matcher = compile_filter(keep_only, "keep_only_regex");
    let exclude_matcher = compile_filter(exclude, "exclude_regex");

    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| keep_matcher.as_ref().is_none_or(|m| m.is_match(line)))
        .filter(|line| !exclude_matcher.as_ref().is_some_and(|m| m.is_match(line)))
        .map(str::to_string)
        .collect()
}

fn compile_filter(pattern: Option<&str>, field: &str) -> Option<regex::Regex> {
    let pattern = pattern?;
    if pattern.is_empty() {
        return None;
    }
    match regex::Regex::new(pattern) {
        Ok(matcher) => Some(matcher),
        Err(e) => {
            warn!(field, pattern, error = %e, "Invalid line filter, ignored");
            None
        }
    }
}

/// Turn filtered lines into a table.
///
/// Without separators each line becomes a single-cell row. With separators a
/// line splits wherever any separator character appears; `select_columns`
/// then keeps the listed 1-based columns, empty-padding out-of-range picks.
fn lines_to_table(
    lines: Vec<String>,
    separators: Option<&str>,
    select_columns: &[usize],
) -> SourceTable {
    let raw_text = lines.join("\n");
    let rows = match separators {
        None | Some("") => lines.into_iter().map(|line| vec![line]).collect(),
        Some(separators) => lines
            .iter()
            .map(|line| {
                let cells: Vec<String> = line
                    .split(|c| separators.contains(c))
                    .map(str::to_string)
                    .collect();
                if select_columns.is_empty() {
                    cells
                } else {
                    select_columns
                        .iter()
                        .map(|&index| {
                            index
                                .checked_sub(1)
                                .and_then(|i| cells.get(i))
                                .cloned()
                                .unwrap_or_default()
                        })
                        .collect()
                }
            })
            .collect(),
    };

    let mut table = SourceTable::from_rows(rows);
    table.raw_text = Some(raw_text);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: CommandLineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(!config.use_sudo);
        assert_eq!(config.sudo_command, "sudo");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_empty_sudo() {
        let mut config = CommandLineConfig::new().with_sudo(true);
        config.sudo_command = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_lines() {
        let text = "sda disk\nsr0 cdrom\n\nsdb disk\n";
        let lines = filter_lines(text, Some("disk"), Some("sdb"));
        assert_eq!(lines, vec!["sda disk"]);
    }

    #[test]
    fn test_filter_lines_bad_pattern_ignored() {
        let lines = filter_lines("a\nb\n", Some("("), None);
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_lines_to_table_with_separators() {
        let table = lines_to_table(
            vec!["sda:disk:1".to_string(), "sdb:disk:2".to_string()],
            Some(":"),
            &[1, 3],
        );
        assert_eq!(
            table.rows,
            vec![vec!["sda", "1"], vec!["sdb", "2"]]
                .into_iter()
                .map(|r| r.into_iter().map(String::from).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_lines_to_table_without_separators() {
        let table = lines_to_table(vec!["one line".to_string()], None, &[]);
        assert_eq!(table.rows, vec![vec!["one line".to_string()]]);
        assert_eq!(table.raw_text.as_deref(), Some("one line"));
    }

    #[test]
    fn test_lines_to_table_out_of_range_column() {
        let table = lines_to_table(vec!["a;b".to_string()], Some(";"), &[1, 9]);
        assert_eq!(table.rows, vec![vec!["a".to_string(), String::new()]]);
    }

    #[test]
    fn test_capabilities() {
        let ext = CommandLineExtension::new();
        assert!(ext.supported_sources().contains(&SourceType::CommandLine));
        assert!(ext.supported_sources().contains(&SourceType::Awk));
        assert!(ext.supported_criteria().contains(&CriterionType::Process));
    }

    #[tokio::test]
    async fn test_run_shell_captures_stdout() {
        let ext = CommandLineExtension::new();
        let config = CommandLineConfig::new();
        let output = ext.run_shell(&config, "echo hello").await.unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_shell_nonzero_exit() {
        let ext = CommandLineExtension::new();
        let config = CommandLineConfig::new();
        let err = ext.run_shell(&config, "exit 3").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Execution(_)));
    }

    #[tokio::test]
    async fn test_run_shell_timeout() {
        let ext = CommandLineExtension::new();
        let config = CommandLineConfig::new().with_timeout(Duration::from_millis(50));
        let err = ext.run_shell(&config, "sleep 5").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout));
    }
}
