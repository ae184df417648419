//! `tillguard`: till user administration and the token listener.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tillguard_auth::{ActionRegistry, GroupRegistry, Notices, SessionContext};
use tillguard_infra::{
    CredentialListener, ListenerContext, NoHooks, SqliteStore, TillConfig, TokioEventLoop,
    bootstrap_superuser, enabled_users,
};
use tillguard_observability::LogFormat;

const DEFAULT_CONFIG: &str = "tillguard.toml";

#[derive(Parser)]
#[command(name = "tillguard", about = "Till user administration and token listener")]
struct Cli {
    /// Site configuration file (default: tillguard.toml, if present).
    #[arg(long, global = true, env = "TILLGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Human-readable logs instead of JSON.
    #[arg(long, global = true)]
    text_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a superuser who logs in with the given token.
    Adduser {
        fullname: String,
        shortname: String,
        usertoken: String,
    },

    /// List enabled users, ordered by id.
    Listusers,

    /// Listen for login tokens on the configured addresses until interrupted.
    Listen,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tillguard_observability::init(if cli.text_logs {
        LogFormat::Text
    } else {
        LogFormat::Json
    });

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(
        SqliteStore::open(&config.database.url)
            .with_context(|| format!("cannot open database {}", config.database.url))?,
    );

    match cli.command {
        Command::Adduser {
            fullname,
            shortname,
            usertoken,
        } => {
            bootstrap_superuser(store.as_ref(), &fullname, &shortname, &usertoken)?;
            println!("User added.");
        }
        Command::Listusers => {
            for user in enabled_users(store.as_ref())? {
                println!("{}: {}", user.id, user.full_name);
            }
        }
        Command::Listen => listen(&config, store)?,
    }
    Ok(())
}

/// An explicit path must load; the implicit default may be absent.
fn load_config(path: Option<&Path>) -> anyhow::Result<TillConfig> {
    match path {
        Some(path) => Ok(TillConfig::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(TillConfig::from_file(Path::new(DEFAULT_CONFIG))?)
        }
        None => {
            tracing::debug!("no configuration file; using defaults");
            Ok(TillConfig::default())
        }
    }
}

/// Notices go to the log; there is no screen in front of the binary.
struct LogNotices;

impl Notices for LogNotices {
    fn show_denial(&self, message: &str, title: &str) {
        tracing::warn!(title, "{}", message);
    }

    fn toast(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

fn listen(config: &TillConfig, store: Arc<SqliteStore>) -> anyhow::Result<()> {
    let addresses = config.listener_addresses()?;
    anyhow::ensure!(!addresses.is_empty(), "no [listener] address configured");

    let actions = ActionRegistry::new();
    let groups = Arc::new(GroupRegistry::new());
    let configured = config.install(&actions, &groups);
    tracing::info!(
        actions = actions.len(),
        actors = configured.len(),
        "configuration installed"
    );

    let ctx = ListenerContext {
        store,
        groups,
        session: Arc::new(SessionContext::new()),
        notices: Arc::new(LogNotices),
        hooks: Arc::new(NoHooks),
    };

    let mut event_loop = TokioEventLoop::new().context("cannot start event loop")?;
    let listeners = addresses
        .into_iter()
        .map(|addr| {
            CredentialListener::bind(addr, ctx.clone()).with_context(|| format!("cannot listen on {addr}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    for listener in &listeners {
        listener.register(&mut event_loop);
    }

    event_loop.run_until(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot wait for interrupt");
        }
    });

    tracing::info!("shutting down");
    for listener in &listeners {
        listener.close();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn adduser_takes_three_positionals() {
        let cli = Cli::try_parse_from(["tillguard", "adduser", "Till Admin", "Admin", "ROOT1"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Adduser { ref fullname, ref usertoken, .. } if fullname == "Till Admin" && usertoken == "ROOT1"
        ));

        assert!(Cli::try_parse_from(["tillguard", "adduser", "Only Name"]).is_err());
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["tillguard", "listusers", "--config", "site.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("site.toml")));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/tillguard.toml"))).is_err());
    }
}
