use std::net::IpAddr;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fabricbench::bench::{run_sweep, SweepConfig};
use fabricbench::device::bind_local_device;
use fabricbench::diag;
use fabricbench::error::HarnessError;
use fabricbench::fabric::tcp::Rendezvous;
use fabricbench::group::Group;
use fabricbench::report::Reporter;
use fabricbench::verify::verify_all_pairs;

#[derive(Parser, Debug)]
#[command(name = "fabricbench")]
#[command(about = "Collective bandwidth sweep and all-pairs transfer verification")]
struct Args {
    /// Global rank of this process.
    #[arg(long, env = "RANK")]
    rank: usize,

    /// Total number of participating processes.
    #[arg(long, env = "WORLD_SIZE")]
    world_size: usize,

    /// Rendezvous address (rank 0 listens here).
    #[arg(long, env = "MASTER_ADDR")]
    master_addr: IpAddr,

    /// Rendezvous port.
    #[arg(long, env = "MASTER_PORT", default_value_t = 29500)]
    master_port: u16,

    /// Ordinal of this process on its host, used for device binding.
    #[arg(long, env = "LOCAL_RANK", default_value_t = 0)]
    local_rank: usize,

    /// Message sizes to sweep, in MB.
    #[arg(long, value_delimiter = ',', default_value = "1,8,64,256,1024")]
    sizes_mb: Vec<usize>,

    /// Untimed iterations per size before measurement starts.
    #[arg(long, default_value_t = 5)]
    warmup: u32,

    /// Timed iterations per size.
    #[arg(long, default_value_t = 10)]
    iters: u32,

    /// Message size for the all-pairs verification, in MB.
    #[arg(long, default_value_t = 64)]
    p2p_size_mb: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FABRICBENCH_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let rendezvous = Rendezvous {
        master_addr: args.master_addr,
        master_port: args.master_port,
        rank: args.rank,
        world_size: args.world_size,
    };
    let group = Group::bootstrap(&rendezvous).await?;
    info!(
        rank = group.rank(),
        world_size = group.world_size(),
        "process group is up"
    );

    let device = match bind_local_device(args.local_rank) {
        Ok(device) => Some(device),
        Err(err @ HarnessError::DeviceUnavailable { .. }) => {
            warn!("{err}, continuing host-only");
            None
        }
        Err(err) => return Err(err.into()),
    };

    diag::log_snapshot(device.as_ref());

    // Reporter capability exists on rank 0 only; every print below goes
    // through it.
    let reporter = Reporter::claim(&group);

    let config = SweepConfig {
        sizes_mb: args.sizes_mb.clone(),
        warmup_iters: args.warmup,
        timed_iters: args.iters,
    };
    let results = run_sweep(&group, device.as_ref(), &config).await?;
    if let Some(reporter) = &reporter {
        reporter.print_summary(&results);
    }

    if group.world_size() > 1 {
        let outcomes = verify_all_pairs(&group, args.p2p_size_mb).await?;
        if let Some(reporter) = &reporter {
            reporter.print_verification(&outcomes);
        }
    }

    group.barrier().await?;
    group.teardown().await?;
    info!(rank = args.rank, "benchmark complete");
    Ok(())
}
