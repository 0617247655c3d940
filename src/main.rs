//! Reactor entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::signal;

use reactor::lifecycle::LifecycleManager;
use reactor::resolver::DevcontainerResolver;
use reactor::runtime::ContainerRuntime;
use reactor::{Config, DockerRuntime, Orchestrator, ServiceRunner, Workspace, WorkspaceUpOptions};

#[derive(Parser)]
#[command(name = "reactor")]
#[command(author, version, about = "Provision containerized dev environments", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Workspace descriptor
    #[arg(short, long, global = true, default_value = "reactor-workspace.json")]
    workspace: PathBuf,

    /// Log blueprints and hook output at info level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start services (all when none are named)
    Up {
        services: Vec<String>,

        /// Remove existing containers and rebuild their images
        #[arg(long)]
        force_rebuild: bool,

        /// Mount the host's container daemon socket
        #[arg(long)]
        docker_host: bool,
    },

    /// Stop and remove services (all when none are named)
    Down { services: Vec<String> },

    /// Show the workspace's containers
    List,

    /// Run a command in a service's running container
    Exec {
        service: String,

        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

async fn run(cfg: Config, args: Args, workspace: Workspace) -> anyhow::Result<bool> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect(&cfg)?);
    let lifecycle =
        LifecycleManager::new(runtime, cfg.daemon_timeout()).with_stop_grace(cfg.stop_timeout());
    let resolver = Arc::new(DevcontainerResolver::new(
        cfg.config_root(),
        cfg.default_account.clone(),
    ));
    let runner = ServiceRunner::new(lifecycle, resolver)
        .with_naming(cfg.naming())
        .with_hook_timeout(cfg.hook_timeout());
    let orchestrator = Orchestrator::new(runner).with_exec_timeout(cfg.exec_timeout());

    match args.command {
        Command::Up {
            services,
            force_rebuild,
            docker_host,
        } => {
            let options = WorkspaceUpOptions {
                force_rebuild,
                docker_host_integration: docker_host,
                verbose: args.verbose,
                ..Default::default()
            };
            let report = orchestrator.up(&workspace, &services, &options).await?;
            print!("{}", report);
            Ok(!report.has_failures())
        }
        Command::Down { services } => {
            let report = orchestrator.down(&workspace, &services).await?;
            print!("{}", report);
            Ok(!report.has_failures())
        }
        Command::List => {
            for s in orchestrator.list(&workspace).await? {
                println!("{:<16} {:<40} {}", s.service, s.container_name, s.state);
            }
            Ok(true)
        }
        Command::Exec { service, command } => {
            let output = orchestrator.exec(&workspace, &service, &command).await?;
            print!("{}", output.output);
            Ok(output.success())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting reactor with config: {:?}", cfg);

    let workspace = Workspace::load(&args.workspace)?;

    let ok = tokio::select! {
        result = run(cfg, args, workspace) => result?,
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received Ctrl+C, aborting..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
            false
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
