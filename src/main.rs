//! HPC Launcher CLI
//!
//! Launches programs through Slurm or Flux with per-system tuning.

use anyhow::Context;
use clap::Parser;
use hpc_launcher::config::{load_registry, CliArgs, Commands, LaunchArgs, LogFormat, SchedulerChoice};
use hpc_launcher::scheduler::{
    absolute_path, HostEnv, LaunchOptions, ParallelConfig, ProcessRunner, SchedulerKind,
    ScriptOptions, INTERNAL_SCRIPT_NAME,
};
use hpc_launcher::system::SystemDefinition;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();
    init_logging(args.verbose, args.log_format);

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8, format: LogFormat) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(args: CliArgs) -> anyhow::Result<()> {
    match &args.command {
        Commands::Launch(launch) => cmd_launch(launch, None, args.verbose),
        Commands::Torchrun(torchrun) => {
            cmd_launch(&torchrun.launch, Some(&torchrun.rdv), args.verbose)
        }
        Commands::Topology { scheduler, json } => cmd_topology(*scheduler, *json),
        Commands::Systems { registry, json } => cmd_systems(registry.as_deref(), *json),
    }
}

fn current_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(e) => {
            tracing::warn!("Unable to read hostname: {}", e);
            String::new()
        }
    }
}

fn cmd_launch(args: &LaunchArgs, rdv: Option<&str>, verbose: u8) -> anyhow::Result<()> {
    let host_env = HostEnv::capture();
    let registry = args
        .system
        .load_registry()
        .context("Failed to load system registry")?;
    let mut system = args
        .system
        .resolve(&registry, &current_hostname(), host_env.clone())?;
    let kind = args.system.scheduler_kind(&system);
    tracing::info!("Using {} with {}", system, kind);

    let runner = ProcessRunner;
    let allocation = kind.num_nodes_in_allocation(&host_env, &runner);

    if let Some(protocol) = rdv {
        system.configure_torchrun(kind, protocol)?;
    }

    let job = args.job.to_job_spec(&system, allocation);
    job.validate()?;
    let scheduler = kind.instantiate(job);

    let (program, program_args) = args
        .command
        .split_first()
        .context("No command to launch")?;
    let (launch_dir, tag) = args
        .run
        .launch_dir_and_tag(scheduler.job().job_name.as_deref());
    let blocking = !args.run.batch;
    let script_options = ScriptOptions {
        save_hostlist: args.run.save_hostlist,
        launch_dir: absolute_path(&launch_dir),
    };

    if args.run.dry_run {
        print!(
            "{}",
            scheduler.launcher_script(&system, program, program_args, blocking, &script_options)
        );
        if let Some(internal) = scheduler.internal_script(&system) {
            println!("\n# --- {} ---", INTERNAL_SCRIPT_NAME);
            print!("{}", internal);
        }
        return Ok(());
    }

    let options = LaunchOptions {
        blocking,
        verbose: verbose > 0,
        script: script_options,
        tag: Some(tag),
    };

    let job_id = scheduler
        .launch(&system, program, program_args, &options, &runner)
        .with_context(|| format!("Failed to launch {}", program))?;

    match (blocking, job_id) {
        (false, Some(id)) => println!("Submitted job {}", id),
        (false, None) => println!("Submitted job (id not reported)"),
        (true, Some(id)) => tracing::info!("Finished {}", id),
        (true, None) => {}
    }
    Ok(())
}

#[derive(Serialize)]
struct TopologyReport {
    scheduler: SchedulerKind,
    nodes_in_allocation: Option<u32>,
    #[serde(flatten)]
    config: ParallelConfig,
}

fn cmd_topology(scheduler: Option<SchedulerChoice>, json: bool) -> anyhow::Result<()> {
    let env = HostEnv::capture();
    let kind = scheduler
        .map(SchedulerKind::from)
        .unwrap_or_else(|| SchedulerKind::detect(&env));

    let report = TopologyReport {
        scheduler: kind,
        nodes_in_allocation: kind.num_nodes_in_allocation(&env, &ProcessRunner),
        config: kind.get_parallel_configuration(&env)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Scheduler:           {}", report.scheduler);
        match report.nodes_in_allocation {
            Some(n) => println!("Nodes in allocation: {}", n),
            None => println!("Nodes in allocation: unknown"),
        }
        println!("World size:          {}", report.config.world_size);
        println!("Rank:                {}", report.config.rank);
        println!("Local world size:    {}", report.config.local_world_size);
        println!("Local rank:          {}", report.config.local_rank);
    }
    Ok(())
}

fn cmd_systems(registry: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let registry = load_registry(registry).context("Failed to load system registry")?;

    if json {
        let systems: BTreeMap<&str, &SystemDefinition> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&systems)?);
        return Ok(());
    }

    for (name, def) in registry.iter() {
        println!("{} [{}]", name, def.platform);
        for (partition, params) in &def.partitions {
            let marker = if *partition == def.default_partition { "*" } else { " " };
            println!(
                "  {}{:<10} {:>3} cores  {} x {:<7} {:>6.1} GB  {}",
                marker,
                partition,
                params.cores_per_node,
                params.gpus_per_node,
                if params.gpu_arch.is_empty() { "-" } else { params.gpu_arch.as_str() },
                params.mem_per_node_gb,
                params.default_scheduler_name
            );
        }
    }
    Ok(())
}
