//! buildrun - run build scripts in containers
//!
//! ## Usage
//!
//! ```sh
//! buildrun detect
//! buildrun image-tag --name go ci/go.Dockerfile
//! buildrun run --image golang:1.22 --workdir /src --mount .:/src build.sh
//! ```
//!
//! ## Runtime Selection
//!
//! `--runtime` overrides `BUILDRUN_CONTAINER_RUNTIME`; without either, `PATH`
//! is probed for docker, then podman. `--host` runs containers as host
//! processes instead.

use buildrun::{
    BuildStep, BuildSteps, ContainerConfig, ContainerManager, Error, HostRuntime,
    IntermediateImage, Result, RuntimeKind, RuntimeRegistry, ScriptStep, Volume, fatal,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run build scripts in containers
#[derive(Parser)]
#[command(name = "buildrun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Container runtime (docker, podman, test)
    #[arg(short, long, global = true, env = "BUILDRUN_CONTAINER_RUNTIME")]
    runtime: Option<String>,

    /// Run containers as host processes (takes precedence over --runtime)
    #[arg(long, global = true)]
    host: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected container runtime
    Detect,

    /// Print the tag of an intermediate image built from a Dockerfile
    ImageTag {
        /// Dockerfile to checksum
        dockerfile: PathBuf,

        /// Image name
        #[arg(short, long)]
        name: String,

        /// Registry prefix (default: BUILDRUN_REGISTRY or buildrun.local)
        #[arg(long)]
        registry: Option<String>,
    },

    /// Run a script inside a container
    Run {
        /// Script file to run with sh
        script: PathBuf,

        /// Image to run the script in
        #[arg(short, long)]
        image: String,

        /// Working directory inside the container
        #[arg(short, long)]
        workdir: Option<String>,

        /// Bind mount, as SOURCE:TARGET
        #[arg(short, long = "mount", value_name = "SRC:DST")]
        mounts: Vec<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => fatal::terminate(&Error::Io(e)),
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => fatal::terminate(&e),
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(fatal::exit_code(&e) as u8)
        }
    }
}

fn registry(cli: &Cli) -> Result<RuntimeRegistry> {
    if cli.host {
        return Ok(RuntimeRegistry::from_manager(Arc::new(HostRuntime::new())));
    }
    match cli.runtime.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(name) => Ok(RuntimeRegistry::with_kind(name.parse::<RuntimeKind>()?)),
        None => Ok(RuntimeRegistry::new()),
    }
}

fn parse_mount(spec: &str) -> Result<Volume> {
    match spec.split_once(':') {
        Some((src, dst)) if !src.is_empty() && !dst.is_empty() => {
            let src = std::fs::canonicalize(src)?;
            Ok(Volume::bind(src.to_string_lossy(), dst))
        }
        _ => Err(Error::Configuration(format!(
            "mount '{}' must be SOURCE:TARGET",
            spec
        ))),
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let registry = registry(&cli)?;

    match cli.command {
        Commands::Detect => {
            let manager = registry.get_or_init()?;
            println!("{}", manager.name());
        }

        Commands::ImageTag {
            dockerfile,
            name,
            registry,
        } => {
            let recipe = std::fs::read(&dockerfile)?;
            let registry = registry.unwrap_or_else(buildrun::intermediate_registry);
            println!("{}", IntermediateImage::new(registry, name, recipe).tag());
        }

        Commands::Run {
            script,
            image,
            workdir,
            mounts,
        } => {
            let manager: Arc<dyn ContainerManager> = registry.get_or_init()?;
            let body = std::fs::read_to_string(&script)?;

            let mut config = ContainerConfig::default();
            for mount in &mounts {
                config = config.with_volume(parse_mount(mount)?);
            }
            if let Some(dir) = workdir {
                config = config.with_working_dir(dir);
            }

            let name = script
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "script".to_string());
            let step = ScriptStep::new(name, manager.clone(), image, body).with_config(config);
            info!("Running {} with {}", step.name(), manager.name());

            let mut steps = BuildSteps::new("run");
            steps.add(Arc::new(step));
            steps.run(None).await?;
        }
    }

    Ok(())
}
