//! xmlrpc-allowlist: CLI for syncing and inspecting the XML-RPC allow list.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xmlrpc_allowlist::{
    AddressEntry, AppConfig, FsArtifactWriter, HttpFetcher, JsonCache, JsonOptionStore,
    StateLock, SyncOrchestrator, SyncOutcome, TargetKind,
};

#[derive(Parser)]
#[command(name = "xmlrpc-allowlist")]
#[command(version)]
#[command(about = "Restrict xmlrpc.php to a synced list of trusted IPs", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, default_value = "/etc/xmlrpc-allowlist.yaml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the remote list and apply the rules
    Sync {
        /// Only sync if the configured interval has passed
        #[arg(long)]
        if_due: bool,
    },

    /// Show the current sync status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the activity log, newest first
    Log {
        /// Maximum number of entries
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Print the rules for manual installation
    Rules {
        /// Server syntax (defaults to the detected target)
        #[arg(short, long, value_enum)]
        target: Option<TargetArg>,
    },

    /// Validate IP or CIDR literals
    Validate {
        /// Literals to check
        #[arg(required = true)]
        literals: Vec<String>,
    },

    /// Check whether an address is covered by the current allow list
    Check {
        /// IPv4 address
        ip: Ipv4Addr,
    },

    /// Enable syncing and sync now
    Enable,

    /// Disable syncing and remove the rules
    Disable,

    /// Set the remote IP list URL and sync
    SetSource {
        /// URL of a newline-delimited IP list
        url: String,
    },

    /// Replace the custom IPs from a file (`-` for stdin) and sync
    SetCustom {
        /// File with one IP or CIDR per line
        file: String,
    },

    /// Remove all stored data and the rules
    Uninstall,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Apache,
    Nginx,
}

impl From<TargetArg> for TargetKind {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Apache => TargetKind::Apache,
            TargetArg::Nginx => TargetKind::Nginx,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run a command. `Ok(false)` means the command ran but did not succeed.
fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    // Validation needs no state
    if let Commands::Validate { literals } = &cli.command {
        return Ok(validate(literals));
    }

    let config = AppConfig::load(&cli.config)?;

    // Held until `run` returns, so overlapping commands take turns. A
    // scheduled sync backs off instead of queueing behind another command.
    let _lock = match &cli.command {
        Commands::Sync { if_due: true } => StateLock::try_acquire(&config.state_dir)?,
        _ => StateLock::acquire(&config.state_dir)?,
    };
    let orchestrator = build_orchestrator(&config)?;

    match cli.command {
        Commands::Sync { if_due } => {
            if if_due {
                match orchestrator.sync_if_due(config.sync_interval())? {
                    Some(outcome) => Ok(report(&orchestrator, &outcome)),
                    None => {
                        println!("Sync not due yet");
                        Ok(true)
                    }
                }
            } else {
                let outcome = orchestrator.sync_cycle()?;
                Ok(report(&orchestrator, &outcome))
            }
        }
        Commands::Status { json } => {
            let status = orchestrator.status(config.sync_interval());
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", status);
            }
            Ok(true)
        }
        Commands::Log { limit } => {
            let log = orchestrator.activity_log();
            if log.is_empty() {
                println!("No activity yet");
            }
            for entry in log.newest_first().take(limit) {
                println!("{}", entry);
            }
            Ok(true)
        }
        Commands::Rules { target } => {
            let kind = target.map(TargetKind::from).unwrap_or_else(|| orchestrator.target());
            let rules = orchestrator.manual_rules(kind);
            if rules.is_empty() {
                eprintln!("No IPs available - run a sync first");
                return Ok(false);
            }
            println!("{}", rules);
            Ok(true)
        }
        Commands::Check { ip } => {
            let allow_list = orchestrator.cached_ips_for_display();
            let permitted = allow_list.permits(ip);
            println!(
                "{} is {} ({} entries checked)",
                ip,
                if permitted { "allowed" } else { "denied" },
                allow_list.len()
            );
            Ok(permitted)
        }
        Commands::Enable => match orchestrator.set_enabled(true)? {
            Some(outcome) => Ok(report(&orchestrator, &outcome)),
            None => Ok(true),
        },
        Commands::Disable => {
            orchestrator.set_enabled(false)?;
            println!("Disabled");
            Ok(true)
        }
        Commands::SetSource { url } => {
            let outcome = orchestrator.set_source(&url)?;
            Ok(report(&orchestrator, &outcome))
        }
        Commands::SetCustom { file } => {
            let raw = read_input(&file)?;
            let outcome = orchestrator.set_custom(&raw)?;
            let kept = orchestrator.custom_ips();
            println!(
                "Stored {} custom entries",
                kept.lines().filter(|l| !l.is_empty()).count()
            );
            Ok(report(&orchestrator, &outcome))
        }
        Commands::Uninstall => {
            orchestrator.uninstall()?;
            println!("Removed all data and rules");
            Ok(true)
        }
        Commands::Validate { literals } => Ok(validate(&literals)),
    }
}

fn build_orchestrator(config: &AppConfig) -> Result<SyncOrchestrator, Box<dyn std::error::Error>> {
    fs::create_dir_all(&config.state_dir)?;

    let orchestrator = SyncOrchestrator::new(
        Arc::new(HttpFetcher::new()),
        Arc::new(JsonOptionStore::open(config.options_path())?),
        Arc::new(JsonCache::open(config.cache_path())?),
        Arc::new(FsArtifactWriter),
    )
    .with_detector(config.detector())
    .with_settings(config.sync_settings());

    Ok(orchestrator)
}

/// Print a sync outcome. Returns `false` for failures.
fn report(orchestrator: &SyncOrchestrator, outcome: &SyncOutcome) -> bool {
    match outcome {
        SyncOutcome::Success { .. } => println!("{}", outcome),
        SyncOutcome::Degraded { artifact, .. } => {
            println!("{}", outcome);
            println!("Add these rules to your server configuration:\n");
            println!("{}", artifact.text(&orchestrator.settings().marker));
        }
        SyncOutcome::Failure { .. } => eprintln!("Sync failed: {}", outcome),
    }
    outcome.succeeded()
}

fn validate(literals: &[String]) -> bool {
    let mut all_valid = true;
    for literal in literals {
        match AddressEntry::parse(literal) {
            Ok(entry) => println!("{}: valid (prefix /{})", literal, entry.prefix_len()),
            Err(e) => {
                all_valid = false;
                println!("{}: invalid ({})", literal, e);
            }
        }
    }
    all_valid
}

fn read_input(file: &str) -> std::io::Result<String> {
    if file == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        Ok(raw)
    } else {
        fs::read_to_string(Path::new(file))
    }
}
