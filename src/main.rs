use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, warn};

use scrobble_sync::config::{
    Config, default_config_path, ledger_path, load_config, lock_path, save_config, service_keys,
    set_account, set_account_active, set_service_keys,
};
use scrobble_sync::failure::{ConsecutiveFailureCounter, classify_error};
use scrobble_sync::history::JsonHistoryFile;
use scrobble_sync::ledger::{JsonLedgerStore, RunLock};
use scrobble_sync::notify::{LogReporter, RunReporter, WebhookReporter};
use scrobble_sync::service::{ScrobbleClient, Service};
use scrobble_sync::session::{RunStatus, SessionOrchestrator, SyncOptions};

#[derive(Parser)]
#[command(
    name = "scrobble-sync",
    version,
    about = "Scrobble today's streaming history to Last.fm or Libre.fm"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Service {
        #[command(subcommand)]
        command: ServiceCommand,
    },
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },
    Sync(SyncArgs),
}

#[derive(Subcommand)]
enum ServiceCommand {
    SetKeys {
        service: String,
        #[arg(long, help = "API key")]
        api_key: String,
        #[arg(long, help = "API secret")]
        api_secret: String,
        #[arg(long, value_name = "PATH")]
        config_path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    Set {
        service: String,
        #[arg(long, help = "Account username")]
        username: String,
        #[arg(long, help = "Account password")]
        password: Option<String>,
        #[arg(long, value_name = "PATH")]
        config_path: Option<PathBuf>,
    },
    Show {
        #[arg(long, value_name = "PATH")]
        config_path: Option<PathBuf>,
    },
    /// Re-enable an account deactivated after repeated failures.
    Activate {
        #[arg(long, value_name = "PATH")]
        config_path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum LedgerCommand {
    Show {
        #[arg(long, value_name = "PATH")]
        config_path: Option<PathBuf>,
    },
    Clear {
        #[arg(long, value_name = "PATH")]
        config_path: Option<PathBuf>,
    },
}

#[derive(Parser)]
struct SyncArgs {
    #[arg(long, help = "Path to the exported listening history (JSON)")]
    history: PathBuf,
    #[arg(long, value_name = "PATH")]
    config_path: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = false,
        help = "Reconcile and report without scrobbling or writing the ledger"
    )]
    dry_run: bool,
    #[arg(
        long,
        default_value_t = false,
        help = "Log raw scrobble API responses"
    )]
    debug_response: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Service { command } => match command {
            ServiceCommand::SetKeys {
                service,
                api_key,
                api_secret,
                config_path,
            } => {
                if service != "lastfm" {
                    bail!("Only lastfm supports setting API keys.");
                }
                let config_path = config_path.unwrap_or_else(default_config_path);
                let mut config = load_config(&config_path)?;
                set_service_keys(&mut config, &service, &api_key, &api_secret);
                save_config(&config, &config_path)?;
                println!("Saved API keys for {service} in {}", config_path.display());
            }
        },
        Commands::Account { command } => handle_account(command)?,
        Commands::Ledger { command } => handle_ledger(command)?,
        Commands::Sync(args) => handle_sync(args)?,
    }
    Ok(())
}

fn handle_account(command: AccountCommand) -> Result<()> {
    match command {
        AccountCommand::Set {
            service,
            username,
            password,
            config_path,
        } => {
            Service::parse(&service)?;
            let config_path = config_path.unwrap_or_else(default_config_path);
            let mut config = load_config(&config_path)?;
            let password = match password {
                Some(value) => value,
                None => prompt_password_confirm()?,
            };
            set_account(&mut config, &service, &username, &password);
            save_config(&config, &config_path)?;
            println!(
                "Saved {service} account for {username} in {}",
                config_path.display()
            );
            if service_keys(&config, &service).is_none() {
                println!("Set API keys with `scrobble-sync service set-keys {service}` before syncing.");
            }
        }
        AccountCommand::Show { config_path } => {
            let config_path = config_path.unwrap_or_else(default_config_path);
            let config = load_config(&config_path)?;
            let Some(account) = &config.account else {
                bail!("No account configured.");
            };
            let state = if account.active { "active" } else { "deactivated" };
            println!("{}\t{}\t{state}", account.service, account.username);
            let health = JsonLedgerStore::open(&ledger_path(&config, &config_path))?
                .failure_counter();
            if let Some(kind) = health.last_kind {
                println!("{} consecutive failed runs, last {kind}", health.count);
            }
        }
        AccountCommand::Activate { config_path } => {
            let config_path = config_path.unwrap_or_else(default_config_path);
            let mut config = load_config(&config_path)?;
            if !set_account_active(&mut config, true) {
                bail!("No account configured.");
            }
            save_config(&config, &config_path)?;
            let _lock = RunLock::acquire(&lock_path(&config, &config_path))?;
            JsonLedgerStore::open(&ledger_path(&config, &config_path))?
                .set_failure_counter(ConsecutiveFailureCounter::default())?;
            println!("Account reactivated.");
        }
    }
    Ok(())
}

fn handle_ledger(command: LedgerCommand) -> Result<()> {
    match command {
        LedgerCommand::Show { config_path } => {
            let config_path = config_path.unwrap_or_else(default_config_path);
            let config = load_config(&config_path)?;
            let store = JsonLedgerStore::open(&ledger_path(&config, &config_path))?;
            let mut entries = store.entries().to_vec();
            if entries.is_empty() {
                println!("Ledger at {} is empty.", store.path().display());
                return Ok(());
            }
            entries.sort_by_key(|entry| entry.array_position);
            for entry in entries {
                println!(
                    "{}\t{}\t{}",
                    entry.array_position, entry.max_array_position, entry.key
                );
            }
        }
        LedgerCommand::Clear { config_path } => {
            let config_path = config_path.unwrap_or_else(default_config_path);
            let config = load_config(&config_path)?;
            let _lock = RunLock::acquire(&lock_path(&config, &config_path))?;
            let mut store = JsonLedgerStore::open(&ledger_path(&config, &config_path))?;
            let removed = store.clear()?;
            println!("Removed {removed} ledger entries; the next sync is a first run.");
        }
    }
    Ok(())
}

fn handle_sync(args: SyncArgs) -> Result<()> {
    let config_path = args.config_path.unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path)?;
    let Some(account) = config.account.clone() else {
        bail!("No account configured. Run `scrobble-sync account set` first.");
    };
    if !account.active {
        bail!(
            "{} account {} was deactivated after repeated failures. Run `scrobble-sync account activate` once the cause is fixed.",
            account.service,
            account.username
        );
    }
    let service = Service::parse(&account.service)?;

    let _lock = RunLock::acquire(&lock_path(&config, &config_path))?;
    let mut store = JsonLedgerStore::open(&ledger_path(&config, &config_path))?;

    let mut reporters: Vec<Box<dyn RunReporter>> = vec![Box::new(LogReporter)];
    if let Some(url) = &config.webhook_url {
        reporters.push(Box::new(WebhookReporter::new(url)?));
    }

    let scrobbler = if args.dry_run {
        None
    } else {
        let keys = service_keys(&config, &account.service)
            .with_context(|| format!("Missing API keys for {}", account.service))?;
        match ScrobbleClient::connect(service, &keys, &account, args.debug_response) {
            Ok(client) => Some(client),
            Err(err) => {
                record_connect_failure(&mut store, &mut config, &config_path, &reporters, &err)?;
                return Err(err.context(format!("Failed connecting to {}", service.display_name())));
            }
        }
    };

    let counter = store.failure_counter();
    let mut session = SessionOrchestrator::new(
        store,
        Box::new(JsonHistoryFile::new(&args.history)),
        SyncOptions::from_config(&config, args.dry_run),
    )
    .with_failure_counter(counter);
    for reporter in reporters {
        session = session.with_reporter(reporter);
    }
    if let Some(client) = scrobbler {
        session = session.with_scrobbler(Box::new(client));
    }

    let summary = session.run()?;
    let counter = session.failure_counter();
    let mut store = session.into_ledger();
    if !args.dry_run {
        store.set_failure_counter(counter)?;
    }
    if summary.deactivate {
        deactivate_account(&mut config, &config_path, counter)?;
    }

    match summary.status {
        RunStatus::Halted(kind) => bail!("Sync halted on {kind} failure"),
        RunStatus::FetchFailed(kind) => bail!("History fetch failed ({kind})"),
        RunStatus::NothingToDo | RunStatus::Completed | RunStatus::PartialFailure => Ok(()),
    }
}

/// Authentication happens before the pass starts, so its failures are counted here.
fn record_connect_failure(
    store: &mut JsonLedgerStore,
    config: &mut Config,
    config_path: &Path,
    reporters: &[Box<dyn RunReporter>],
    err: &anyhow::Error,
) -> Result<()> {
    let kind = classify_error(err);
    let mut counter = store.failure_counter();
    counter.record_failure(kind);
    store.set_failure_counter(counter)?;
    let message = format!("{err:#}");
    for reporter in reporters {
        if let Err(report_err) = reporter.emit_run_failure(&message) {
            warn!("Failed reporting run failure: {report_err:#}");
        }
    }
    if counter.should_deactivate() {
        deactivate_account(config, config_path, counter)?;
    }
    Ok(())
}

fn deactivate_account(
    config: &mut Config,
    config_path: &Path,
    counter: ConsecutiveFailureCounter,
) -> Result<()> {
    set_account_active(config, false);
    save_config(config, config_path)?;
    match counter.last_kind {
        Some(kind) => error!(
            "Deactivated account after {} consecutive {kind} failures",
            counter.count
        ),
        None => error!("Deactivated account after {} consecutive failures", counter.count),
    }
    Ok(())
}

fn prompt_password_confirm() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match.");
    }
    Ok(password)
}
