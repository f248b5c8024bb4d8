use jira_gdrive_sync::config::SyncConfig;
use jira_gdrive_sync::logging::init_logging;
use jira_gdrive_sync::runtime::SyncRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Sync,
    DryRun,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cli {
    mode: CliMode,
    verbose: bool,
}

fn parse_cli<I>(args: I) -> anyhow::Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = Cli {
        mode: CliMode::Sync,
        verbose: false,
    };
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--dry-run" | "-n" => {
                if cli.mode != CliMode::Help {
                    cli.mode = CliMode::DryRun;
                }
            }
            "--verbose" | "-v" => cli.verbose = true,
            "--help" | "-h" => cli.mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(cli)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_cli(std::env::args())?;
    if cli.mode == CliMode::Help {
        println!("Usage: jira-gdrive-sync [--dry-run] [-v] [--help]");
        println!("  --dry-run, -n   List and reconcile, log the plan, change nothing");
        println!("  --verbose, -v   Debug logging for the sync and both clients");
        println!("Configuration is read from JGSYNC_* and GDRIVE_* variables or .env");
        return Ok(());
    }

    init_logging(cli.verbose);
    let config = SyncConfig::from_env()?;
    let runtime = SyncRuntime::bootstrap(&config, cli.mode == CliMode::DryRun).await?;
    let summary = runtime.run().await?;
    tracing::info!(
        uploads = summary.planned_uploads,
        deletes = summary.planned_deletes,
        folders = summary.planned_folders,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("jira-gdrive-sync")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parse_cli_defaults_to_sync() {
        let cli = parse_cli(args(&[])).unwrap();
        assert_eq!(cli, Cli { mode: CliMode::Sync, verbose: false });
    }

    #[test]
    fn parse_cli_supports_dry_run_and_verbose() {
        let cli = parse_cli(args(&["--dry-run", "-v"])).unwrap();
        assert_eq!(cli, Cli { mode: CliMode::DryRun, verbose: true });
    }

    #[test]
    fn parse_cli_help_wins() {
        let cli = parse_cli(args(&["--help", "--dry-run"])).unwrap();
        assert_eq!(cli.mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_rejects_unknown_arguments() {
        assert!(parse_cli(args(&["--force"])).is_err());
    }
}
