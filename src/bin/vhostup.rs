// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use vhostup::{
    config::ProvisionConfig,
    host::HostName,
    path::default_config_file,
    provision::{Operator, ProvisionError, Step, StepOutcome, VhostProvisioner},
    report::{render_failure, render_rollback, render_success},
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError};
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "vhostup [options] -n <host_name>",
    version
)]
struct Cli {
    /// Hostname of virtual host to provision.
    #[arg(
        short = 'n',
        long = "name",
        value_name = "host_name",
        allow_hyphen_values = true,
        value_parser = parse_host_name
    )]
    pub host_name: HostName,

    /// Path to configuration file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Accept rollback offer without prompting.
    #[arg(short, long, group = "answer")]
    pub yes: bool,

    /// Decline rollback offer without prompting.
    #[arg(long, group = "answer")]
    pub no_rollback: bool,

    /// Undo a previous run instead of provisioning.
    #[arg(long)]
    pub remove: bool,

    /// Skip final reachability check.
    #[arg(long)]
    pub no_verify: bool,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let provisioner = VhostProvisioner::from_config(config).with_verification(!self.no_verify);
        let answer = if self.yes {
            Some(true)
        } else if self.no_rollback {
            Some(false)
        } else {
            None
        };

        if self.remove {
            run_remove(&provisioner, &self.host_name, answer)
        } else {
            run_provision(&provisioner, &self.host_name, answer)
        }
    }
}

fn parse_host_name(value: &str) -> Result<HostName, vhostup::host::HostNameError> {
    HostName::new(value)
}

/// Operator attached to the terminal.
///
/// Shows progress through a spinner, and asks before rolling back unless the
/// answer was given on the command line.
struct TerminalOperator {
    bar: ProgressBar,
    answer: Option<bool>,
}

impl TerminalOperator {
    fn new(bar: ProgressBar, answer: Option<bool>) -> Self {
        Self { bar, answer }
    }
}

impl Operator for TerminalOperator {
    fn step_started(&mut self, step: Step) {
        self.bar.set_message(format!("{step}..."));
    }

    fn step_finished(&mut self, outcome: &StepOutcome) {
        let mark = if outcome.succeeded { "✔" } else { "✘" };
        self.bar
            .println(format!("{mark} {}: {}", outcome.step, outcome.message));
    }

    fn confirm_rollback(&mut self, failure: &ProvisionError) -> bool {
        let help = failure.to_string();
        confirm(self.answer, || {
            self.bar.suspend(|| {
                Confirm::new("Roll back everything created so far?")
                    .with_default(false)
                    .with_help_message(&help)
                    .prompt()
            })
        })
    }
}

/// Settle a yes/no question, only asking if no answer was preset.
///
/// A prompt that cannot be shown counts as no.
fn confirm(preset: Option<bool>, ask: impl FnOnce() -> Result<bool, InquireError>) -> bool {
    match preset {
        Some(answer) => answer,
        None => ask().unwrap_or_else(|err| {
            warn!("cannot ask for confirmation, assuming no: {err}");
            false
        }),
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            exit(if error.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn load_config(path: Option<&Path>) -> Result<ProvisionConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_file() {
            Ok(path) if path.exists() => path,
            _ => return Ok(ProvisionConfig::default()),
        },
    };

    let data = read_to_string(&path)
        .with_context(|| format!("failed to read configuration at {:?}", path.display()))?;
    let config = data
        .parse::<ProvisionConfig>()
        .with_context(|| format!("invalid configuration at {:?}", path.display()))?;
    info!("loaded configuration from {:?}", path.display());

    Ok(config)
}

fn run_provision(
    provisioner: &VhostProvisioner,
    host: &HostName,
    answer: Option<bool>,
) -> Result<()> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let mut operator = TerminalOperator::new(bar.clone(), answer);
    let result = provisioner.run(host, &mut operator);
    bar.finish_and_clear();

    if result.succeeded() {
        print!("{}", render_success(&result));
        return Ok(());
    }

    eprint!("{}", render_failure(&result, provisioner.config()));
    if let Some(rollback) = &result.rollback {
        eprint!("{}", render_rollback(host, rollback));
    }

    bail!("provisioning of {host} failed")
}

fn run_remove(provisioner: &VhostProvisioner, host: &HostName, answer: Option<bool>) -> Result<()> {
    let confirmed = confirm(answer, || {
        Confirm::new(&format!("Remove everything provisioned for {host}?"))
            .with_default(false)
            .prompt()
    });

    if !confirmed {
        info!("leave {host} untouched");
        return Ok(());
    }

    let report = provisioner.remove(host)?;
    print!("{}", render_rollback(host, &report));
    if !report.is_clean() {
        bail!("rollback of {host} left things behind");
    }

    Ok(())
}
