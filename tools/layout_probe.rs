// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Secondary buffer layout probe.
//!
//! Runs several in-process ranks, each with its own worker threads executing
//! the per-thread layout protocol over pseudo-random secondary sources, and
//! checks that every rank agrees on the chunk size.

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use neurokernel::config::{load_config, validate_config, NeurokernelConfig};
use neurokernel::connectivity::{
    LocalCluster, LocalClusterRank, NodeId, Source, StaticSynapseModel, SynapseRegistry,
};
use neurokernel::observability::{debug_flags_help, init_logging, parse_debug_flags};
use neurokernel::ConnectivityKernel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

struct ProbeArgs {
    ranks: usize,
    threads: Option<usize>,
    sources: usize,
    seed: u64,
    config: Option<PathBuf>,
}

struct RankSummary {
    rank: usize,
    chunk_size: usize,
    unique_sources: usize,
    buffer_len: usize,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: layout_probe [--ranks <n>] [--threads <n>] [--sources <n>] [--seed <n>] [--config <path>]\n\n\
         Defaults:\n\
         - ranks: 2\n\
         - threads: kernel.num_threads from the config (0 = rayon pool size)\n\
         - sources: 1000 per rank\n\
         - seed: 1\n\n\
         {}",
        debug_flags_help()
    );
    process::exit(2);
}

fn parse_count(flag: &str, value: Option<String>) -> usize {
    let v = value.unwrap_or_else(|| usage_and_exit());
    v.parse().unwrap_or_else(|_| {
        eprintln!("{flag} expects a non-negative integer, got '{v}'");
        usage_and_exit();
    })
}

fn parse_args() -> ProbeArgs {
    let mut parsed = ProbeArgs {
        ranks: 2,
        threads: None,
        sources: 1000,
        seed: 1,
        config: None,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ranks" => parsed.ranks = parse_count("--ranks", args.next()),
            "--threads" => parsed.threads = Some(parse_count("--threads", args.next())),
            "--sources" => parsed.sources = parse_count("--sources", args.next()),
            "--seed" => parsed.seed = parse_count("--seed", args.next()) as u64,
            "--config" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                parsed.config = Some(PathBuf::from(v));
            }
            "-h" | "--help" => usage_and_exit(),
            // Consumed by parse_debug_flags
            other if other.starts_with("--debug-") => {}
            other => {
                eprintln!("Unknown argument: {other}");
                usage_and_exit();
            }
        }
    }

    if parsed.ranks == 0 {
        eprintln!("--ranks must be at least 1");
        usage_and_exit();
    }
    parsed
}

fn registry() -> SynapseRegistry {
    let mut registry = SynapseRegistry::new();
    registry.register(Arc::new(StaticSynapseModel::primary("static_synapse")));
    registry.register(Arc::new(StaticSynapseModel::secondary("gap_junction", 2)));
    registry.register(Arc::new(StaticSynapseModel::secondary("rate_connection", 3)));
    registry
}

/// Apply the command-line overrides and validate the result before any rank
/// thread exists; a rank failing alone blocks its peers in the reduction.
fn cluster_config(mut config: NeurokernelConfig, args: &ProbeArgs) -> Result<NeurokernelConfig> {
    if let Some(threads) = args.threads {
        config.kernel.num_threads = threads;
    }
    config.cluster.num_processes = args.ranks;
    config.cluster.rank = 0;
    validate_config(&config).context("Invalid probe configuration")?;
    Ok(config)
}

fn run_rank(
    config: NeurokernelConfig,
    collective: LocalClusterRank,
    sources: usize,
    seed: u64,
) -> Result<RankSummary> {
    let rank = config.cluster.rank;
    let kernel = ConnectivityKernel::from_config(&config, registry())
        .with_context(|| format!("rank {rank}: failed to build the kernel"))?;
    let num_threads = kernel.num_threads();
    let num_synapse_types = kernel.registry().len();

    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(rank as u64));
    let max_node = (sources as u64 / 2).max(1);
    for _ in 0..sources {
        let tid = rng.gen_range(0..num_threads);
        let syn_id = rng.gen_range(0..num_synapse_types);
        let node = NodeId(rng.gen_range(0..max_node));
        kernel.source_table().add_source(tid, syn_id, Source::new(node));
    }
    debug!("[PROBE] rank {} filled {} sources over {} threads", rank, sources, num_threads);

    let layouts = thread::scope(|scope| {
        let workers: Vec<_> = (0..num_threads)
            .map(|tid| {
                let kernel = &kernel;
                let collective = &collective;
                scope.spawn(move || {
                    kernel.source_table().compute_buffer_pos_for_unique_secondary_sources(
                        tid,
                        kernel.registry(),
                        kernel.partitioning(),
                        collective,
                    )
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().map_err(|_| anyhow!("rank {rank}: worker thread panicked")))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut layouts = layouts.into_iter();
    let layout = layouts
        .next()
        .ok_or_else(|| anyhow!("rank {rank}: no worker threads"))??;
    for other in layouts {
        if !Arc::ptr_eq(&layout, &other?) {
            bail!("rank {rank}: worker threads returned different layouts");
        }
    }

    Ok(RankSummary {
        rank,
        chunk_size: layout.chunk_size(),
        unique_sources: layout.len(),
        buffer_len: layout.buffer_len(kernel.num_processes()),
    })
}

fn main() -> Result<()> {
    let args = parse_args();
    let config = match &args.config {
        Some(path) => load_config(Some(path), None)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => NeurokernelConfig::default(),
    };
    let config = cluster_config(config, &args)?;
    let _logging = init_logging(&parse_debug_flags(), &config.logging)?;

    info!(
        "[PROBE] {} ranks, {} sources per rank, seed {}",
        args.ranks, args.sources, args.seed
    );

    let cluster = LocalCluster::new(args.ranks);
    let handles: Vec<_> = cluster
        .ranks()
        .into_iter()
        .enumerate()
        .map(|(rank, collective)| {
            let mut config = config.clone();
            config.cluster.rank = rank;
            let (sources, seed) = (args.sources, args.seed);
            thread::spawn(move || run_rank(config, collective, sources, seed))
        })
        .collect();

    let mut summaries = Vec::with_capacity(handles.len());
    for (rank, handle) in handles.into_iter().enumerate() {
        let summary = handle.join().map_err(|_| anyhow!("rank {rank} panicked"))??;
        summaries.push(summary);
    }

    for s in &summaries {
        println!(
            "rank {}: chunk size {}, {} unique secondary sources, receive buffer {} units",
            s.rank, s.chunk_size, s.unique_sources, s.buffer_len
        );
    }

    let chunk_size = summaries[0].chunk_size;
    if summaries.iter().any(|s| s.chunk_size != chunk_size) {
        bail!("ranks disagree on the chunk size");
    }
    println!("OK: all {} ranks agree on chunk size {}", summaries.len(), chunk_size);
    Ok(())
}
