//! simbridge CLI - run a simulated robot on the message bus
//!
//! Loads a TOML configuration, applies command-line overrides and runs the
//! simulation node until ctrl-c.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use simbridge::{BridgeConfig, PluginRegistry, SimulationNode};
use simbridge_bus::{Bus, Gateway};
use simbridge_physics::{
    shared, ConnectionMode, JointType, LoadOptions, PhysicsBackend, RapierBackend,
    SharedBackend,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simbridge")]
#[command(about = "Physics simulation bridge for robot descriptions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation node
    Run(RunArgs),
    /// Print the joints of a robot description
    Joints {
        /// URDF file
        urdf: PathBuf,
    },
    /// List the built-in plugins
    Plugins,
    /// Validate a configuration file and print the effective settings
    Check {
        /// TOML configuration file
        config: PathBuf,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Robot description to load (overrides robot_urdf_path)
    #[arg(short, long)]
    urdf: Option<PathBuf>,
    /// Run without a viewer
    #[arg(long)]
    headless: bool,
    /// Start paused
    #[arg(long)]
    paused: bool,
    /// Tick frequency in Hz
    #[arg(long)]
    loop_rate: Option<f64>,
    /// Anchor the robot's root link
    #[arg(long)]
    fixed_base: bool,
    /// Load a plugin, as module=Class (repeatable)
    #[arg(long = "plugin", value_parser = parse_plugin)]
    plugins: Vec<(String, String)>,
    /// Expose the bus over TCP at this address
    #[arg(long)]
    gateway: Option<String>,
}

fn parse_plugin(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((module, class)) if !module.is_empty() && !class.is_empty() => {
            Ok((module.to_string(), class.to_string()))
        }
        _ => Err(format!("expected module=Class, got {s:?}")),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run(args)) => run(args)?,
        Some(Commands::Joints { urdf }) => show_joints(&urdf)?,
        Some(Commands::Plugins) => list_plugins(),
        Some(Commands::Check { config }) => check_config(&config)?,
        None => run(RunArgs::default())?,
    }

    Ok(())
}

fn load_config(args: &RunArgs) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    if let Some(urdf) = &args.urdf {
        config.robot_urdf_path = Some(urdf.clone());
    }
    if args.headless {
        config.gui = false;
    }
    if args.paused {
        config.pause_simulation = true;
    }
    if let Some(rate) = args.loop_rate {
        config.loop_rate = rate;
    }
    if args.fixed_base {
        config.fixed_base = true;
    }
    for (module, class) in &args.plugins {
        config.plugins.insert(module.clone(), class.clone());
    }
    if let Some(addr) = &args.gateway {
        config.gateway = Some(addr.clone());
    }

    config.validate()?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: BridgeConfig) -> Result<()> {
    let backend = shared(RapierBackend::with_time_step(config.backend_time_step()));
    serve_with(config, backend, PluginRegistry::builtin()).await
}

async fn serve_with(
    config: BridgeConfig,
    backend: SharedBackend,
    registry: PluginRegistry,
) -> Result<()> {
    let bus = Bus::new();
    let gateway_addr = config.gateway.clone();

    let node = SimulationNode::start(config, backend, bus.clone(), registry)
        .context("starting simulation node")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);

    let gateway = match gateway_addr {
        Some(addr) => {
            let gateway = Gateway::bind(bus.clone(), &addr)
                .await
                .with_context(|| format!("binding gateway to {addr}"))?;
            Some(tokio::spawn(gateway.serve(stop_rx.clone())))
        }
        None => None,
    };

    let signal = {
        let stop_tx = stop_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => warn!("cannot listen for ctrl-c: {e}"),
            }
            let _ = stop_tx.send(true);
        })
    };

    let result = node.run(stop_rx).await;

    // The loop may have ended on its own; take the gateway down with it.
    let _ = stop_tx.send(true);
    signal.abort();

    if let Some(task) = gateway {
        match task.await {
            Ok(Err(e)) => warn!("gateway: {e}"),
            Err(e) => warn!("gateway task: {e}"),
            Ok(Ok(())) => {}
        }
    }

    result.context("simulation loop")?;
    Ok(())
}

fn show_joints(urdf: &Path) -> Result<()> {
    let mut backend = RapierBackend::new();
    backend.connect(ConnectionMode::Direct)?;
    let robot = backend
        .load_urdf(urdf, &LoadOptions::default())
        .with_context(|| format!("loading {}", urdf.display()))?;

    println!("{}", backend.robot_name(robot)?);
    for index in 0..backend.num_joints(robot)? {
        let info = backend.joint_info(robot, index)?;
        println!(
            "  [{index}] {} {:?} (type {}){}",
            info.name_lossy(),
            info.joint_type,
            info.joint_type.code(),
            if info.joint_type == JointType::Revolute {
                ", published"
            } else {
                ""
            }
        );
    }
    backend.disconnect();
    Ok(())
}

fn list_plugins() {
    for (module, class) in PluginRegistry::builtin().entries() {
        println!("{module} = \"{class}\"");
    }
}

fn check_config(path: &Path) -> Result<()> {
    let config = BridgeConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    config.validate()?;
    config.urdf_path()?;
    println!("{config:#?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plugin() {
        assert_eq!(
            parse_plugin("joint_control=JointControl").unwrap(),
            ("joint_control".to_string(), "JointControl".to_string())
        );
        assert!(parse_plugin("joint_control").is_err());
        assert!(parse_plugin("=JointControl").is_err());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "simbridge",
            "run",
            "--urdf",
            "arm.urdf",
            "--headless",
            "--loop-rate",
            "50",
            "--plugin",
            "joint_control=JointControl",
        ]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        let config = load_config(&args).unwrap();
        assert!(!config.gui);
        assert_eq!(config.loop_rate, 50.0);
        assert_eq!(config.robot_urdf_path, Some(PathBuf::from("arm.urdf")));
        assert_eq!(
            config.plugins.get("joint_control").map(String::as_str),
            Some("JointControl")
        );
    }

    #[tokio::test]
    async fn test_loop_error_stops_gateway_and_returns() {
        use simbridge::{Plugin, PluginError};
        use simbridge_physics::mock::MockBackend;
        use std::time::Duration;

        struct Failing;

        impl Plugin for Failing {
            fn execute(&mut self) -> Result<(), PluginError> {
                Err(PluginError::Failed("controller diverged".into()))
            }
        }

        let mut registry = PluginRegistry::new();
        registry.register("failing", "Failing", |_| {
            let plugin: Box<dyn Plugin> = Box::new(Failing);
            Ok(plugin)
        });
        let mut config = BridgeConfig {
            gui: false,
            robot_urdf_path: Some(PathBuf::from("arm.urdf")),
            gateway: Some("127.0.0.1:0".into()),
            ..BridgeConfig::default()
        };
        config.plugins.insert("failing".into(), "Failing".into());
        let backend = shared(MockBackend::new([("joint1", JointType::Revolute)]));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve_with(config, backend, registry),
        )
        .await
        .expect("serve must return once the loop fails");
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("controller diverged"));
    }

    #[test]
    fn test_bad_rate_rejected() {
        let args = RunArgs {
            loop_rate: Some(-1.0),
            ..RunArgs::default()
        };
        assert!(load_config(&args).is_err());
    }
}
