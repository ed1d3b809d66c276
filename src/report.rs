// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Operator facing reports.
//!
//! Failures are reported in a box holding the error, the offending paths,
//! and commands the operator can copy and paste to fix things by hand.

use crate::{
    config::ProvisionConfig,
    host::HostName,
    path::ProvisionPaths,
    provision::{ProvisionError, ProvisionResult, RollbackReport},
};

use std::error::Error;

/// Render error together with every source below it.
pub fn error_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }

    out
}

/// Draw a box around a title and body lines.
///
/// Body lines holding newlines are broken up into one row each.
pub fn boxed(title: &str, lines: &[String]) -> String {
    let lines = lines
        .iter()
        .flat_map(|line| line.trim_end().split('\n'))
        .map(|line| line.trim_end_matches('\r'))
        .collect::<Vec<_>>();
    let width = lines
        .iter()
        .map(|line| line.chars().count())
        .chain(std::iter::once(title.chars().count() + 1))
        .max()
        .unwrap_or_default();

    // INVARIANT: Top border is as wide as the rest, title included.
    let mut out = String::new();
    out.push_str(&format!(
        "┌─ {title} {}┐\n",
        "─".repeat(width - title.chars().count() - 1)
    ));
    for line in &lines {
        let pad = width - line.chars().count();
        out.push_str(&format!("│ {line}{} │\n", " ".repeat(pad)));
    }
    out.push_str(&format!("└{}┘\n", "─".repeat(width + 2)));

    out
}

/// Quote a value for a POSIX shell.
pub fn shell_quote(value: impl AsRef<str>) -> String {
    format!("'{}'", value.as_ref().replace('\'', r"'\''"))
}

/// Commands that undo a run for target host by hand.
pub fn cleanup_commands(
    host: &HostName,
    paths: &ProvisionPaths,
    config: &ProvisionConfig,
) -> Vec<String> {
    let pattern = format!("/[[:space:]]{}$/d", host.as_str().replace('.', r"\."));
    vec![
        format!("sudo rm -f {}", shell_quote(paths.enabled_link.to_string_lossy())),
        format!("sudo rm -f {}", shell_quote(paths.config_file.to_string_lossy())),
        format!("sudo rm -rf {}", shell_quote(paths.web_root.to_string_lossy())),
        format!(
            "sudo sed -i.bak {} {}",
            shell_quote(pattern),
            shell_quote(config.hosts.path.to_string_lossy())
        ),
        format!("sudo systemctl reload {}", config.nginx.service),
    ]
}

/// Commands that help figure out why a host is unreachable.
pub fn troubleshooting_commands(
    host: &HostName,
    paths: &ProvisionPaths,
    config: &ProvisionConfig,
) -> Vec<String> {
    vec![
        format!("namei -l {}", shell_quote(paths.index_file.to_string_lossy())),
        format!(
            "grep -n {} {}",
            shell_quote(host),
            shell_quote(config.hosts.path.to_string_lossy())
        ),
        format!(
            "sudo tail -n 20 {}",
            shell_quote(config.nginx.error_log.to_string_lossy())
        ),
        format!("curl -i http://{host}/"),
    ]
}

/// Paths an error points at.
pub fn offending_paths(err: &ProvisionError) -> Vec<String> {
    let paths = match err {
        ProvisionError::ConfigExists { config_file } => vec![config_file.clone()],
        ProvisionError::Link {
            link, config_file, ..
        } => vec![link.clone(), config_file.clone()],
        ProvisionError::DirectoryExists { web_root } => vec![web_root.clone()],
        _ => Vec::new(),
    };

    paths
        .into_iter()
        .map(|path| path.display().to_string())
        .collect()
}

/// Commands that fix the cause of a failure by hand.
///
/// Cleanup commands are included for every failure that happens after the run
/// started writing files, unless a rollback already undid them.
pub fn remediation(result: &ProvisionResult, config: &ProvisionConfig) -> Vec<String> {
    let Some(failure) = &result.failure else {
        return Vec::new();
    };

    let mut commands = match failure {
        ProvisionError::Permission { .. } => vec![
            format!("sudo usermod -aG {} \"$USER\"", config.web.group),
            format!("sudo vhostup -n {}", shell_quote(&result.host)),
        ],
        ProvisionError::Dependency { program } => {
            vec![format!("sudo apt install {program}")]
        }
        ProvisionError::ServiceReload { service, .. } => vec![
            "sudo nginx -t".into(),
            format!("sudo systemctl status {service}"),
        ],
        ProvisionError::Verification { .. } => {
            troubleshooting_commands(&result.host, &result.paths, config)
        }
        _ => Vec::new(),
    };

    let offered = result.failed_step().is_some_and(|step| step.offers_rollback());
    if offered && result.rollback.is_none() {
        commands.extend(cleanup_commands(&result.host, &result.paths, config));
    }

    commands
}

/// Render failure of a run.
pub fn render_failure(result: &ProvisionResult, config: &ProvisionConfig) -> String {
    let Some(failure) = &result.failure else {
        return String::new();
    };

    let title = match result.failed_step() {
        Some(step) => format!("{step} failed for {}", result.host),
        None => format!("provisioning {} failed", result.host),
    };

    let mut lines = vec![error_chain(failure)];
    let paths = offending_paths(failure);
    if !paths.is_empty() {
        lines.push(String::new());
        lines.push("offending paths:".into());
        lines.extend(paths.into_iter().map(|path| format!("  {path}")));
    }

    let commands = remediation(result, config);
    if !commands.is_empty() {
        lines.push(String::new());
        lines.push("to fix by hand:".into());
        lines.extend(commands.into_iter().map(|command| format!("  {command}")));
    }

    boxed(&title, &lines)
}

/// Render summary of a rollback.
pub fn render_rollback(host: &HostName, report: &RollbackReport) -> String {
    let mut lines = Vec::new();
    if let Some(backup) = &report.hosts_backup {
        lines.push(format!("hosts backup: {}", backup.display()));
    }
    lines.push(format!("hosts lines removed: {}", report.hosts_lines_removed));
    lines.extend(
        report
            .removed
            .iter()
            .map(|path| format!("removed: {}", path.display())),
    );
    lines.extend(
        report
            .errors
            .iter()
            .map(|err| format!("error: {}", error_chain(err))),
    );

    boxed(&format!("rollback of {host}"), &lines)
}

/// Render summary of a successful run.
pub fn render_success(result: &ProvisionResult) -> String {
    let lines = result
        .outcomes
        .iter()
        .map(|outcome| format!("✔ {}: {}", outcome.step, outcome.message))
        .collect::<Vec<_>>();

    boxed(&format!("{} is ready", result.host), &lines)
}
