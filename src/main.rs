//! Cell Lineage CLI
//!
//! A small front end for the library: event extraction for one sample or a
//! batch, plus track and topology summaries of a lineage graph.

use anyhow::{bail, Context, Result};
use cell_lineage::prelude::*;
use std::path::Path;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("cell-lineage");

    if args.len() < 2 {
        print_usage(program);
        return;
    }

    let result = match args[1].as_str() {
        "events" => run_events(&args[2..]),
        "batch" => run_batch(&args[2..]),
        "tracks" => run_tracks(&args[2..]),
        "topologies" => run_topologies(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage(program);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(program);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        if let Some(LineageError::Validation(report)) = e.downcast_ref::<LineageError>() {
            for line in report.detailed_errors() {
                eprintln!("{}", line);
            }
        }
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("Cell Lineage v{}", cell_lineage::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  events <config.toml> <graph> <mask.npy> <out_prefix>");
    println!("                    Detect, filter and export events of one sample");
    println!("  batch <config.toml> <pattern> [out_dir]");
    println!("                    Process every <name>.npy raster matching pattern with its graph");
    println!("  tracks <graph>");
    println!("                    List cell tracks");
    println!("  topologies <graph> [config.toml]");
    println!();
    println!("Graphs are read as GraphML (.graphml, .graphmlz) or gzip JSON (.json.gz).");
    println!("                    Group cell tracks by simplified topology");
    println!("  help              Show this help message");
}

fn load_config(path: &str) -> Result<PipelineConfig> {
    let config = PipelineConfig::from_file(path)
        .with_context(|| format!("failed to read config {}", path))?;
    config.validate()?;
    Ok(config)
}

fn run_events(args: &[String]) -> Result<()> {
    let [config_path, graph_path, mask_path, prefix] = args else {
        bail!("usage: events <config.toml> <graph> <mask.npy> <out_prefix>");
    };

    let config = load_config(config_path)?;
    let graph = load_graph(graph_path).with_context(|| format!("failed to load {}", graph_path))?;
    let mask = load_mask(mask_path).with_context(|| format!("failed to load {}", mask_path))?;
    log::info!(
        "loaded {} vertices, {} edges, raster {:?}",
        graph.vertex_count(),
        graph.edge_count(),
        mask.shape()
    );

    let output = EventPipeline::new(config).run(&graph, &mask)?;
    println!("{}", output.report.summary());
    for rejection in &output.rejected {
        log::info!("event {} rejected: {:?}", rejection.event_id, rejection.reason);
    }

    save_graph(format!("{}.graphmlz", prefix), &output.graph)?;
    save_mask(format!("{}.npy", prefix), &output.mask)?;
    save_records(format!("{}_events.tsv", prefix), &output.records)?;

    println!(
        "{} events detected, {} kept, {} rejected in {}ms",
        output.n_detected,
        output.records.len(),
        output.rejected.len(),
        output.duration_ms
    );
    println!("Results written to {}.{{graphmlz,npy}} and {}_events.tsv", prefix, prefix);
    Ok(())
}

fn run_batch(args: &[String]) -> Result<()> {
    let (config_path, pattern, out_dir) = match args {
        [config, pattern] => (config, pattern, None),
        [config, pattern, out] => (config, pattern, Some(out)),
        _ => bail!("usage: batch <config.toml> <pattern> [out_dir]"),
    };

    let config = load_config(config_path)?;
    let samples = Sample::discover(pattern)?;

    let mut runner = BatchRunner::new(EventPipeline::new(config));
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir))?;
        runner = runner.with_output_dir(dir);
    }

    let tracker = ProgressTracker::new(samples.len()).with_callback(Box::new(|update| match update {
        ProgressUpdate::SampleCompleted { name, duration_ms, index, total } => {
            println!("  [{}/{}] {} ({}ms)", index, total, name, duration_ms);
        }
        ProgressUpdate::SampleFailed { name, message } => {
            eprintln!("  {} failed: {}", name, message);
        }
        ProgressUpdate::Completed { total_duration_ms, .. } => {
            println!("Batch finished in {}ms", total_duration_ms);
        }
        _ => {}
    }));

    let summary = runner.run_with_tracker(&samples, &tracker)?;
    for report in &summary.reports {
        if let Ok(s) = &report.result {
            println!(
                "{}: {} detected, {} kept, {} rejected",
                report.name, s.n_detected, s.n_selected, s.n_rejected
            );
        }
    }
    println!("{} succeeded, {} failed", summary.succeeded(), summary.failed());

    if summary.failed() > 0 {
        bail!("{} of {} samples failed", summary.failed(), summary.reports.len());
    }
    Ok(())
}

fn run_tracks(args: &[String]) -> Result<()> {
    let [graph_path] = args else {
        bail!("usage: tracks <graph>");
    };
    let graph = load_graph(graph_path)?;
    let tracks = CellTrack::summarize(&graph);

    println!("{} cell tracks", tracks.len());
    println!("track\tframes\tvertices\tmissing\tfusions\tdivisions\tarea");
    for track in &tracks {
        println!(
            "{}\t{}-{}\t{}\t{}\t{}\t{}\t{}-{}",
            track.id,
            track.frame_min,
            track.frame_max,
            track.n_vertices,
            track.n_missing,
            track.n_fusions,
            track.n_divisions,
            track.min_area,
            track.max_area
        );
    }
    Ok(())
}

fn run_topologies(args: &[String]) -> Result<()> {
    let (graph_path, config) = match args {
        [graph] => (graph, PipelineConfig::default()),
        [graph, config] => (graph, load_config(config)?),
        _ => bail!("usage: topologies <graph> [config.toml]"),
    };
    if !Path::new(graph_path).is_file() {
        bail!("graph file not found: {}", graph_path);
    }

    let graph = load_graph(graph_path)?;
    let classification = EventPipeline::new(config).classify_topologies(&graph);

    println!("{} topologies", classification.topologies.len());
    for (index, topology) in classification.topologies.iter().enumerate() {
        let c = &topology.complexity;
        println!(
            "  #{}: {} fusions, {} divisions, {} anomalies, {} vertices, {} tracks",
            index,
            c.n_fusions,
            c.n_divisions,
            c.n_anomalies,
            c.n_vertices,
            topology.tracks.len()
        );
    }

    let complex = classification.complex_tracks();
    if !complex.is_empty() {
        println!("{} tracks above the complexity limit: {:?}", complex.len(), complex);
    }
    Ok(())
}
