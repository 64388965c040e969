use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process;

use memfold::buffers::reuse::build_net_reuse_buffers;
use memfold::buffers::{tokens_to_mb, total_buffer_tokens, total_net_buffer_tokens};
use memfold::graph::mapping::{set_double_buffers_from_mapping, ProcessorMapping};
use memfold::report::{
    buffer_records, net_buffer_records, pareto_records, partition_schedule_records, save_json,
    AllocationReport, AppSpec,
};
use memfold::search::{decode_phases, mms_buffers_multi, time_loss_ms, DELAY_PER_PHASE_MS};
use memfold::{Error, FitnessEvaluator, GaConfig, GaSearch};

#[derive(Parser)]
#[command(
    name = "memfold",
    version,
    about = "Memory-aware design-space exploration for NN inference"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search layer split factors with a genetic algorithm
    Search {
        /// Application JSON: models with their pipeline partitions
        app: PathBuf,
        /// Search parameters JSON (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the Pareto front to this file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write the buffer allocation of the best point
        #[arg(long, value_name = "PATH")]
        buffers: Option<PathBuf>,
    },
    /// Build the shared buffer allocation for a fixed split choice
    Buffers {
        /// Application JSON: models with their pipeline partitions
        app: PathBuf,
        /// Split every layer into its maximum phase count
        #[arg(long)]
        split_all: bool,
        /// Bytes per data token
        #[arg(long, default_value = "4")]
        token_size: u64,
        /// Write buffer records to this file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Size connection buffers analytically, without simulation
    NetBuffers {
        /// Application JSON: models with their pipeline partitions
        app: PathBuf,
        /// Keep every model in its own buffers
        #[arg(long)]
        isolate_models: bool,
        /// Bytes per data token
        #[arg(long, default_value = "4")]
        token_size: u64,
        /// Write buffer records to this file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report the throughput loss of splitting every layer
    Loss {
        /// Application JSON: models with their pipeline partitions
        app: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Search {
            app,
            config,
            output,
            buffers,
        } => cmd_search(app, config, output, buffers),
        Command::Buffers {
            app,
            split_all,
            token_size,
            output,
        } => cmd_buffers(app, split_all, token_size, output),
        Command::NetBuffers {
            app,
            isolate_models,
            token_size,
            output,
        } => cmd_net_buffers(app, isolate_models, token_size, output),
        Command::Loss { app } => cmd_loss(app),
    }
}

fn fail(e: Error) -> ! {
    eprintln!("error: {e}");
    process::exit(1);
}

fn load_app(path: &PathBuf) -> AppSpec {
    match AppSpec::load(path) {
        Ok(app) => app,
        Err(e) => fail(e.at_stage("loading application")),
    }
}

// --- memfold search ---

fn cmd_search(
    app_path: PathBuf,
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
    buffers_out: Option<PathBuf>,
) {
    let config = match config_path {
        Some(path) => match GaConfig::load(&path) {
            Ok(c) => c,
            Err(e) => fail(e.at_stage("loading search config")),
        },
        None => GaConfig::default(),
    };
    let app = load_app(&app_path);
    let token_size = config.data_token_size;

    let evaluator = FitnessEvaluator::new(app.partitions_per_model(), token_size);
    let mut search = match GaSearch::new(evaluator, config) {
        Ok(s) => s,
        Err(e) => fail(e.at_stage("preparing search")),
    };
    let result = match search.run() {
        Ok(r) => r,
        Err(e) => fail(e.at_stage("running search")),
    };

    eprintln!(
        "front: {} points, best {:.6} MB / {:.4} ms",
        result.pareto.len(),
        result.best.buf_size_mb,
        result.best.time_loss_ms
    );

    let records = pareto_records(&result.pareto);
    write_or_print(&records, output);

    if let Some(path) = buffers_out {
        let mut partitions = app.partitions_per_model();
        let phases = decode_phases(&max_phase_tables(&app), &result.best.dp_by_parts);
        let shared = match mms_buffers_multi(&mut partitions, &phases) {
            Ok(b) => b,
            Err(e) => fail(e.at_stage("rebuilding best buffers")),
        };
        let report = AllocationReport {
            schedules: partition_schedule_records(&app, &phases),
            buffers: buffer_records(&shared, token_size),
        };
        if let Err(e) = save_json(&report, &path) {
            fail(e.at_stage("writing buffer report"));
        }
        eprintln!("buffers -> {}", path.display());
    }
}

// --- memfold buffers ---

fn cmd_buffers(app_path: PathBuf, split_all: bool, token_size: u64, output: Option<PathBuf>) {
    let app = load_app(&app_path);
    let mut partitions = app.partitions_per_model();
    let phases: Vec<Vec<Vec<usize>>> = partitions
        .iter()
        .map(|parts| {
            parts
                .iter()
                .map(|p| {
                    if split_all {
                        p.max_phases_per_layer()
                    } else {
                        vec![1; p.layers().len()]
                    }
                })
                .collect()
        })
        .collect();

    let shared = match mms_buffers_multi(&mut partitions, &phases) {
        Ok(b) => b,
        Err(e) => fail(e.at_stage("building buffers")),
    };
    let total = total_buffer_tokens(&shared);
    eprintln!(
        "{} buffers, {} tokens, {:.6} MB",
        shared.len(),
        total,
        tokens_to_mb(total, token_size)
    );
    let report = AllocationReport {
        schedules: partition_schedule_records(&app, &phases),
        buffers: buffer_records(&shared, token_size),
    };
    write_or_print(&report, output);
}

// --- memfold net-buffers ---

fn cmd_net_buffers(
    app_path: PathBuf,
    isolate_models: bool,
    token_size: u64,
    output: Option<PathBuf>,
) {
    let mut app = load_app(&app_path);

    let mut mappings: HashMap<String, ProcessorMapping> = HashMap::new();
    for model in &mut app.models {
        if let Some(mapping) = &model.mapping {
            for partition in &mut model.partitions {
                set_double_buffers_from_mapping(partition, mapping);
                mappings.insert(partition.name.clone(), mapping.clone());
            }
        }
    }
    let nets: Vec<_> = app
        .models
        .iter()
        .flat_map(|m| m.partitions.iter().cloned())
        .collect();

    let mappings = if mappings.is_empty() {
        None
    } else {
        Some(&mappings)
    };
    let buffers = build_net_reuse_buffers(&nets, !isolate_models, mappings);
    let total = total_net_buffer_tokens(&buffers);
    eprintln!(
        "{} buffers, {} tokens, {:.6} MB",
        buffers.len(),
        total,
        tokens_to_mb(total, token_size)
    );
    write_or_print(&net_buffer_records(&buffers, token_size), output);
}

// --- memfold loss ---

fn cmd_loss(app_path: PathBuf) {
    let app = load_app(&app_path);
    let tables = max_phase_tables(&app);
    let layers: usize = tables.iter().flatten().map(Vec::len).sum();
    let splittable: usize = tables
        .iter()
        .flatten()
        .flatten()
        .filter(|&&p| p > 1)
        .count();
    let bits = vec![true; layers];
    let phases = decode_phases(&tables, &bits);
    let loss = time_loss_ms(&phases, DELAY_PER_PHASE_MS);
    println!("layers: {layers}");
    println!("splittable: {splittable}");
    println!("max time loss: {loss:.4} ms");
}

// --- Helpers ---

fn max_phase_tables(app: &AppSpec) -> Vec<Vec<Vec<usize>>> {
    app.models
        .iter()
        .map(|m| {
            m.partitions
                .iter()
                .map(|p| p.max_phases_per_layer())
                .collect()
        })
        .collect()
}

fn write_or_print<T: serde::Serialize>(records: &T, output: Option<PathBuf>) {
    match output {
        Some(path) => {
            if let Err(e) = save_json(records, &path) {
                fail(e.at_stage("writing report"));
            }
            eprintln!("report -> {}", path.display());
        }
        None => match serde_json::to_string_pretty(records) {
            Ok(text) => println!("{text}"),
            Err(e) => fail(Error::Io(e.to_string())),
        },
    }
}
