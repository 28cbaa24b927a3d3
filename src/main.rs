use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;

use relaybench::config::Settings;
use relaybench::control::ConnectionController;
use relaybench::engine::{ChannelSink, ProgressEvent, TestOrchestrator};
use relaybench::relay::{self, CatalogFilter, Endpoint, Protocol};
use relaybench::report;

#[derive(Parser)]
#[command(
    name = "relaybench",
    about = "Sequential latency and throughput testing of Mullvad VPN relays",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test relays one after another (type pause/resume/stop/status while running)
    Run(RunArgs),

    /// Connect to one relay and leave the tunnel up
    Connect {
        /// Relay hostname, e.g. se-got-wg-001
        hostname: String,
    },

    /// List relays from the local catalog
    Relays(FilterArgs),

    /// Check that mullvad, ping and speedtest are installed
    Check,
}

#[derive(Args)]
struct FilterArgs {
    /// Country code, e.g. se
    #[arg(long)]
    country: Option<String>,

    /// City code, e.g. got
    #[arg(long)]
    city: Option<String>,

    /// Tunnel protocol
    #[arg(long, value_enum)]
    protocol: Option<ProtocolChoice>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    filter: FilterArgs,

    /// Test only these hostnames, in this order (repeatable)
    #[arg(long = "host")]
    hosts: Vec<String>,

    /// Stop after this many relays
    #[arg(long)]
    limit: Option<usize>,

    /// Ping only, skip the speed test
    #[arg(long)]
    no_speedtest: bool,

    /// JSON output for machine parsing
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolChoice {
    Wireguard,
    Openvpn,
    Both,
}

impl FilterArgs {
    fn to_filter(&self, settings: &Settings) -> CatalogFilter {
        let protocol = match self.protocol {
            Some(ProtocolChoice::Wireguard) => Some(Protocol::Wireguard),
            Some(ProtocolChoice::Openvpn) => Some(Protocol::Openvpn),
            Some(ProtocolChoice::Both) => None,
            None => settings.tools.protocol,
        };
        CatalogFilter {
            country_code: self.country.clone(),
            city_code: self.city.clone(),
            protocol,
            ..Default::default()
        }
    }
}

/// Operator commands read from stdin during a run.
enum Command {
    Pause,
    Resume,
    Stop,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = tracing::subscriber::with_default(relaybench::logging::bootstrap(), || {
        Settings::load_or_default(cli.config.as_deref())
    })?;
    relaybench::logging::init(&settings.logging)?;

    match cli.command {
        Commands::Run(args) => run(&settings, args).await?,
        Commands::Connect { hostname } => connect(&settings, &hostname).await?,
        Commands::Relays(args) => list_relays(&settings, &args)?,
        Commands::Check => check(&settings).await?,
    }

    Ok(())
}

async fn run(settings: &Settings, args: RunArgs) -> Result<()> {
    let endpoints = select_endpoints(settings, &args)?;

    let mut run_config = settings.run.to_run_config()?;
    if args.no_speedtest {
        run_config.speed_test_enabled = false;
    }

    let orchestrator = TestOrchestrator::new(
        run_config,
        Arc::new(settings.tools.controller()?),
        Arc::new(settings.tools.speed_probe()),
    )?;

    let (sink, mut events) = ChannelSink::new();
    let run_id = orchestrator.start(endpoints, Arc::new(sink))?;
    tracing::info!(%run_id, "Run started");

    let mut commands = spawn_command_reader();
    if !args.json {
        println!("Commands: pause, resume, stop, status (Ctrl-C stops)\n");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ProgressEvent::RunStarted { total, .. }) => {
                    if !args.json {
                        println!("Testing {} relay(s)", total);
                    }
                }
                Some(ProgressEvent::StatusChanged(result)) => {
                    if !args.json && result.is_terminal() {
                        println!("{}", report::format_result_row(&result));
                    }
                }
                Some(ProgressEvent::RunFinished(_)) | None => break,
            },
            Some(command) = commands.recv() => match command {
                Command::Pause => orchestrator.pause(),
                Command::Resume => orchestrator.resume(),
                Command::Stop => orchestrator.stop(),
                Command::Status => {
                    let snapshot = orchestrator.status();
                    eprintln!(
                        "{} ({:.0}%)",
                        report::format_summary(&snapshot),
                        snapshot.progress() * 100.0
                    );
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, stopping run");
                orchestrator.stop();
            }
        }
    }

    orchestrator.join().await;
    let snapshot = orchestrator.status();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("\n{}", report::format_table(&snapshot.results));
        println!("{}", report::format_summary(&snapshot));
    }
    Ok(())
}

/// Catalog lookup plus `--host` ordering and `--limit`.
fn select_endpoints(settings: &Settings, args: &RunArgs) -> Result<Vec<Endpoint>> {
    let mut filter = args.filter.to_filter(settings);
    filter.hostnames = args.hosts.clone();

    let mut endpoints = relay::load_endpoints(&settings.catalog.path(), &filter)?;

    if !args.hosts.is_empty() {
        let mut ordered = Vec::with_capacity(args.hosts.len());
        for host in &args.hosts {
            match endpoints.iter().position(|e| e.hostname.eq_ignore_ascii_case(host)) {
                Some(i) => ordered.push(endpoints.swap_remove(i)),
                None => tracing::warn!(hostname = %host, "Relay not in catalog or filtered out"),
            }
        }
        endpoints = ordered;
    }

    if let Some(limit) = args.limit {
        endpoints.truncate(limit);
    }
    if endpoints.is_empty() {
        bail!("no relays match the given filters");
    }
    Ok(endpoints)
}

/// Stdin is read on a plain thread so a pending read never holds up exit.
fn spawn_command_reader() -> mpsc::UnboundedReceiver<Command> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim().to_ascii_lowercase().as_str() {
                "" => continue,
                "pause" | "p" => Command::Pause,
                "resume" | "r" => Command::Resume,
                "stop" | "s" | "quit" | "q" => Command::Stop,
                "status" => Command::Status,
                other => {
                    eprintln!("unknown command '{}' (pause, resume, stop, status)", other);
                    continue;
                }
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    });
    rx
}

async fn connect(settings: &Settings, hostname: &str) -> Result<()> {
    let filter = CatalogFilter {
        hostnames: vec![hostname.to_string()],
        include_inactive: true,
        ..Default::default()
    };
    let endpoint = relay::load_endpoints(&settings.catalog.path(), &filter)?
        .into_iter()
        .next()
        .with_context(|| format!("relay {} not found in catalog", hostname))?;

    let orchestrator = TestOrchestrator::new(
        settings.run.to_run_config()?,
        Arc::new(settings.tools.controller()?),
        Arc::new(settings.tools.speed_probe()),
    )?;
    orchestrator.connect_now(&endpoint).await?;

    println!("Connected to {} ({})", endpoint.hostname, endpoint.location());
    Ok(())
}

fn list_relays(settings: &Settings, args: &FilterArgs) -> Result<()> {
    let endpoints = relay::load_endpoints(&settings.catalog.path(), &args.to_filter(settings))?;
    if endpoints.is_empty() {
        println!("No relays found.");
        return Ok(());
    }

    println!("{:<22} | {:<28} | {:<9} | Provider", "Hostname", "Location", "Protocol");
    println!("{:-<22}-|-{:-<28}-|-{:-<9}-|-{:-<12}", "", "", "", "");
    for e in &endpoints {
        println!(
            "{:<22} | {:<28} | {:<9} | {}",
            e.hostname,
            e.location(),
            e.protocol.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            e.provider.as_deref().unwrap_or("-"),
        );
    }
    println!("\n{} relay(s)", endpoints.len());
    Ok(())
}

async fn check(settings: &Settings) -> Result<()> {
    let controller = settings.tools.controller()?;
    let probe = settings.tools.speed_probe();
    let catalog = settings.catalog.path();

    let checks = [
        ("mullvad", controller.is_available().await),
        ("ping", probe.ping.is_available().await),
        ("speedtest", probe.speedtest.is_available().await),
        ("relay catalog", catalog.exists()),
    ];

    println!("{:<15} | Status", "Dependency");
    println!("{:-<15}-|-{:-<10}", "", "");
    for (name, ok) in &checks {
        println!("{:<15} | {}", name, if *ok { "OK" } else { "MISSING" });
    }
    println!("\nRelay catalog: {}", catalog.display());

    if checks.iter().any(|(_, ok)| !ok) {
        bail!("one or more dependencies are missing");
    }
    Ok(())
}
