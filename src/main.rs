//! Binary entry point for the `site-backup` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;

use site_backup::{
    BackupConfig, BackupError, BackupId, BackupOrchestrator, ConfigError, DashAuth, DashClient,
    DashError, DashSession, ExitGuard, HostPlatform, HttpTransport, LoggingError,
    ProcessCommandRunner, RestoreError, RestoreOrchestrator, SiteDirectory, SiteLookupError,
    Toolkit, logging,
};

mod cli;

use cli::{BackupCommand, Cli, RestoreCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Lookup(#[from] SiteLookupError),
    #[error(transparent)]
    Dash(#[from] DashError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error("interrupted; the lock for {site} was left in place")]
    Interrupted { site: String },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = BackupConfig::load_without_cli_args()?;
    config.validate()?;
    logging::init(&config.log_level)?;
    let tools = Toolkit::from_config(ProcessCommandRunner, &config, HostPlatform::current());
    match cli {
        Cli::Backup(command) => backup(&config, tools, &command).await,
        Cli::Restore(command) => restore(tools, &command),
    }
}

async fn backup(
    config: &BackupConfig,
    tools: Toolkit<ProcessCommandRunner>,
    command: &BackupCommand,
) -> Result<(), CliError> {
    let dashboard = command
        .dash_auth
        .as_deref()
        .map(|raw| connect_dashboard(config, raw))
        .transpose()?;

    let site = tools.sites().lookup(&command.site)?;
    let orchestrator = BackupOrchestrator::new(tools);
    if command.list {
        let ids = orchestrator.list(&site.url)?;
        return write_generations(io::stdout().lock(), &ids);
    }

    let guard = dashboard
        .map(|(client, auth)| ExitGuard::arm(client, DashSession::new(site.url.clone(), auth)));
    tokio::select! {
        result = orchestrator.run(&site, guard) => {
            result?;
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            Err(CliError::Interrupted { site: site.url.clone() })
        }
    }
}

/// Validates `--dash-auth` and the API URL before any site work starts.
fn connect_dashboard(
    config: &BackupConfig,
    raw: &str,
) -> Result<(DashClient<HttpTransport>, DashAuth), CliError> {
    let auth: DashAuth = raw.parse()?;
    let client = DashClient::connect(config.ed_api_url.as_deref(), config.dash_retry_delay())?;
    Ok((client, auth))
}

fn restore(tools: Toolkit<ProcessCommandRunner>, command: &RestoreCommand) -> Result<(), CliError> {
    let site = tools.sites().lookup(&command.site)?;
    RestoreOrchestrator::new(tools).run(&site, command.id.as_deref())?;
    Ok(())
}

fn write_generations(mut target: impl Write, ids: &[BackupId]) -> Result<(), CliError> {
    if ids.is_empty() {
        writeln!(target, "No remote backups found.")?;
    }
    for id in ids {
        writeln!(target, "{id}")?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(ids: &[BackupId]) -> String {
        let mut buffer = Vec::new();
        write_generations(&mut buffer, ids).expect("write generations");
        String::from_utf8(buffer).expect("utf8")
    }

    #[test]
    fn empty_listing_says_so() {
        assert_eq!(rendered(&[]), "No remote backups found.\n");
    }

    #[test]
    fn listing_prints_one_id_per_line() {
        let ids: Vec<BackupId> = [
            "1704000002_2024-01-02-00-00-00/",
            "1704000001_2024-01-01-00-00-00/",
        ]
        .into_iter()
        .filter_map(BackupId::from_listing)
        .collect();

        assert_eq!(
            rendered(&ids),
            "1704000002_2024-01-02-00-00-00\n1704000001_2024-01-01-00-00-00\n"
        );
    }

    #[test]
    fn errors_are_written_verbatim() {
        let mut buffer = Vec::new();
        write_error(&mut buffer, &CliError::Dash(DashError::InvalidAuth));

        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "Invalid --dash-auth format. Expected: backup-id:backup-verification-token\n"
        );
    }
}
