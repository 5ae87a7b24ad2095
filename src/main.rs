use clap::Parser;
use replicheck::config::{LogFormat, ScenarioConfig};
use replicheck::controller::bootstrap_nodes;
use replicheck::oracle::Oracle;
use replicheck::sim::{SimCluster, SimConfig};
use replicheck::telemetry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(version, about)]
/// Run the replicated-table oracle against an in-process simulated cluster
struct Args {
    /// path to a TOML scenario file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// emit logs as JSON
    #[arg(long)]
    json: bool,

    /// delay before replicas fetch each other's parts
    #[arg(long = "lag-ms", default_value_t = 0)]
    lag_ms: u64,

    /// directory holding the simulated buckets (defaults to a temp dir)
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let mut cfg = ScenarioConfig::load(args.config.as_deref())?;
    if args.json {
        cfg.log_format = LogFormat::Json;
    }
    telemetry::init(cfg.log_format)?;

    let tmp;
    let root = match args.data_dir {
        Some(dir) => dir,
        None => {
            tmp = tempfile::tempdir()?;
            tmp.path().to_path_buf()
        }
    };

    let mut sim = SimConfig::new(root);
    sim.bucket = cfg.bucket.clone();
    sim.data_prefix = cfg.data_prefix.clone();
    sim.replication_lag = Duration::from_millis(args.lag_ms);
    let cluster = SimCluster::new(sim);
    bootstrap_nodes(&cluster, cfg.nodes)?;

    let oracle = Oracle::with_cluster(cfg, cluster)?;
    match oracle.run() {
        Ok(report) => {
            println!("{}", report.to_json()?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("scenario failed ({}): {}", e.class(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}
