// desktop-mode: front-end for the remote display service
//
// Commands:
//   desktop-mode status
//   desktop-mode show [--json]
//   desktop-mode set KEY=VALUE... [--activate]
//   desktop-mode activate
//   desktop-mode trigger

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use desktop_mode_lib::{
    logging::init_logging,
    session::{
        config::Config,
        controller::{ActionSurface, ServiceAction, SessionController},
        launcher::{ProcessLauncher, ServiceLauncher},
        link::ServiceLink,
        protocol::LaunchParams,
        service_client::SocketBinder,
        settings::SettingKey,
        store::{ConfigStore, JsonConfigStore},
    },
};
use std::time::Duration;
use tracing::info;

/// How long the link must stay quiet before the session counts as settled
const SETTLE_QUIET: Duration = Duration::from_millis(500);
const BIND_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "desktop-mode", about = "Configure and control the remote display service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current action and link state
    Status,
    /// Print the persisted settings and the launch parameters derived from them
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Edit settings, e.g. `set auto-resolution=false width=1920`
    Set {
        #[arg(required = true, value_name = "KEY=VALUE")]
        assignments: Vec<String>,
        /// Perform the resulting action afterwards
        #[arg(long)]
        activate: bool,
    },
    /// Perform the current action (start, stop, apply or restart & apply)
    Activate,
    /// Start the service from the persisted settings, as the return trigger does
    Trigger,
}

/// Prints each new label on stdout
#[derive(Default)]
struct PrintSurface {
    last: Option<ServiceAction>,
}

impl ActionSurface for PrintSurface {
    fn show(&mut self, action: ServiceAction) {
        if self.last != Some(action) {
            println!("action: {}", action);
            self.last = Some(action);
        }
    }
}

fn open_store(config: &Config) -> Result<JsonConfigStore> {
    JsonConfigStore::open(config)
        .with_context(|| format!("Failed to open settings in {}", config.state_dir().display()))
}

fn open_controller(config: &Config) -> Result<SessionController> {
    let store = open_store(config)?;
    let launcher = ProcessLauncher::new(config.clone());
    let binder =
        SocketBinder::new(config.socket_path.clone()).with_poll_interval(BIND_POLL_INTERVAL);

    let mut controller = SessionController::new(
        Box::new(store),
        Box::new(launcher),
        ServiceLink::new(Box::new(binder)),
    );

    // Only worth waiting for an attach if a service process exists at all
    if config.is_service_running() {
        controller.settle(SETTLE_QUIET);
    }
    Ok(controller)
}

fn parse_assignment(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", raw))
}

fn cmd_status(config: &Config) -> Result<()> {
    let mut controller = open_controller(config)?;
    println!("action: {}", controller.action());
    println!("link: {}", controller.link_state());
    controller.shutdown();
    Ok(())
}

fn cmd_show(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let snapshot = store.load_snapshot();
    let params = LaunchParams::from(&snapshot);

    if json {
        let out = serde_json::json!({
            "settings": snapshot,
            "launch_params": params,
            "updated_at": store.updated_at(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("settings ({}):", store.path().display());
    for key in SettingKey::ALL {
        println!("  {:<26} {}", key.name(), snapshot.get(key));
    }
    println!("launch parameters:");
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}

fn cmd_set(config: &Config, assignments: &[String], activate: bool) -> Result<()> {
    let mut controller = open_controller(config)?;
    controller.set_surface(Box::new(PrintSurface::default()));

    for raw in assignments {
        let (key, value) = parse_assignment(raw)?;
        controller
            .edit_raw(key, value)
            .with_context(|| format!("Rejected '{}'", raw))?;
    }

    if activate {
        controller.activate();
        controller.settle(SETTLE_QUIET);
    }
    controller.shutdown();
    Ok(())
}

fn cmd_activate(config: &Config) -> Result<()> {
    let mut controller = open_controller(config)?;
    let before = controller.action();
    let after = controller.activate();
    controller.settle(SETTLE_QUIET);
    println!("{} -> {}", before, after);
    controller.shutdown();
    Ok(())
}

fn cmd_trigger(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let params = LaunchParams::from(&store.load_snapshot());
    info!(dpi = params.dpi, "return trigger received, starting service");

    let mut launcher = ProcessLauncher::new(config.clone());
    launcher
        .launch(&params)
        .context("Failed to start the display service")?;
    println!("service started");
    Ok(())
}

fn main() -> Result<()> {
    init_logging("warn");
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Status => cmd_status(&config),
        Command::Show { json } => cmd_show(&config, json),
        Command::Set {
            assignments,
            activate,
        } => cmd_set(&config, &assignments, activate),
        Command::Activate => cmd_activate(&config),
        Command::Trigger => cmd_trigger(&config),
    }
}
