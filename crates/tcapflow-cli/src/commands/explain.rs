//! Program explanation command: sources, dataflow graph, and physical plan.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color};
use serde::{Deserialize, Serialize};
use tcapflow_adapters::tcap::{AtomicComputationList, AtomicOp};
use tcapflow_common::types::SetIdentifier;
use tcapflow_engine::physical::AggregationOutput;
use tcapflow_engine::{JobStage, PhysicalPlan, PhysicalPlanner, Statistics};

use crate::OutputFormat;
use crate::output::{self, Format};

/// Planner inputs taken from the command line.
pub struct PlanOptions<'a> {
    pub physical: bool,
    pub stats: Option<&'a Path>,
    pub config: Option<&'a Path>,
    pub job_id: &'a str,
}

/// A set-size entry of the `--stats` file.
#[derive(Deserialize)]
struct StatsEntry {
    db: String,
    set: String,
    num_bytes: usize,
    #[serde(default)]
    num_pages: usize,
}

/// A stored set read by the program.
#[derive(Serialize)]
struct SourceOutput {
    tuple_set: String,
    set: String,
    computation: String,
}

/// One tuple set with its producer and consumers.
#[derive(Serialize)]
struct TupleSetOutput {
    name: String,
    producer: String,
    computation: String,
    consumers: Vec<String>,
}

#[derive(Serialize)]
struct ExplainOutput {
    sources: Vec<SourceOutput>,
    tuple_sets: Vec<TupleSetOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    physical: Option<PhysicalPlan>,
}

fn sources(list: &AtomicComputationList) -> Vec<SourceOutput> {
    list.scans()
        .filter_map(|scan| match &scan.op {
            AtomicOp::Scan { db, set } => Some(SourceOutput {
                tuple_set: scan.output_name().to_string(),
                set: SetIdentifier::new(db, set).to_string(),
                computation: scan.computation_name.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn tuple_sets(list: &AtomicComputationList) -> Vec<TupleSetOutput> {
    list.iter()
        .filter(|c| !matches!(c.op, AtomicOp::Output { .. }))
        .map(|c| TupleSetOutput {
            name: c.output_name().to_string(),
            producer: c.op.name().to_string(),
            computation: c.computation_name.clone(),
            consumers: list
                .consumers(c.output_name())
                .into_iter()
                .map(|consumer| format!("{} {}", consumer.op.name(), consumer.output_name()))
                .collect(),
        })
        .collect()
}

fn load_stats(path: Option<&Path>) -> Result<Statistics> {
    let Some(path) = path else {
        return Ok(Statistics::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read stats {}", path.display()))?;
    let entries: Vec<StatsEntry> = serde_json::from_str(&text)
        .with_context(|| format!("invalid stats {}", path.display()))?;
    Ok(entries.into_iter().fold(Statistics::new(), |stats, e| {
        stats.with_set(SetIdentifier::new(e.db, e.set), e.num_bytes, e.num_pages)
    }))
}

fn explain(list: &AtomicComputationList, options: &PlanOptions<'_>) -> Result<ExplainOutput> {
    let physical = if options.physical {
        let config = super::load_config(options.config)?;
        let stats = load_stats(options.stats)?;
        Some(PhysicalPlanner::new(&config).plan(list, &stats, options.job_id)?)
    } else {
        None
    };
    Ok(ExplainOutput {
        sources: sources(list),
        tuple_sets: tuple_sets(list),
        physical,
    })
}

fn stage_row(stage: &JobStage) -> Vec<Cell> {
    let (input, work, output) = match stage {
        JobStage::TupleSet(s) => {
            let mut work = s.path.join(" → ");
            for probe in &s.probes {
                work.push_str(&format!("\nprobes {}", probe.hash_set));
            }
            (s.source.to_string(), work, s.sink.to_string())
        }
        JobStage::BroadcastJoinBuildHt(s) => (
            s.source.to_string(),
            s.target_computation.clone(),
            format!("hash set {}", s.hash_set),
        ),
        JobStage::HashPartitionedJoinBuildHt(s) => (
            s.source.to_string(),
            format!("{} x{}", s.target_computation, s.num_partitions),
            format!("hash set {}", s.hash_set),
        ),
        JobStage::Aggregation(s) => (
            s.source.to_string(),
            format!("{} x{}", s.computation, s.num_partitions),
            match &s.output {
                AggregationOutput::Set { set, .. } => format!("write {set}"),
                AggregationOutput::HashSet { name } => format!("hash set {name}"),
            },
        ),
    };
    vec![
        Cell::new(stage.id()),
        Cell::new(stage.kind()).fg(Color::Green),
        Cell::new(input),
        Cell::new(work),
        Cell::new(output),
    ]
}

/// Run the explain command.
pub fn run(
    path: &Path,
    options: PlanOptions<'_>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let list = super::load_program(path)?;
    let output = explain(&list, &options)?;

    let fmt: Format = format.into();
    match fmt {
        Format::Json => output::print_json(&output, quiet)?,
        Format::Table => {
            let mut table = output::create_table();
            output::add_header(&mut table, &["Tuple Set", "Set", "Computation"]);
            for s in &output.sources {
                table.add_row(vec![
                    Cell::new(&s.tuple_set).fg(Color::Green),
                    Cell::new(&s.set),
                    Cell::new(&s.computation),
                ]);
            }
            output::print_section("Sources", &table, quiet);

            let mut table = output::create_table();
            output::add_header(&mut table, &["Tuple Set", "Producer", "Computation", "Consumers"]);
            for t in &output.tuple_sets {
                let consumers = if t.consumers.is_empty() {
                    Cell::new("(none)").fg(Color::Yellow)
                } else {
                    Cell::new(t.consumers.join("\n"))
                };
                table.add_row(vec![
                    Cell::new(&t.name),
                    Cell::new(&t.producer),
                    Cell::new(&t.computation),
                    consumers,
                ]);
            }
            output::print_section("Tuple sets", &table, quiet);

            if let Some(plan) = &output.physical {
                let mut table = output::create_table();
                output::add_header(&mut table, &["#", "Stage", "Input", "Work", "Output"]);
                for stage in &plan.stages {
                    table.add_row(stage_row(stage));
                }
                output::print_section("Physical plan", &table, quiet);
                if !plan.intermediate_sets.is_empty() {
                    let items: Vec<(&str, String)> = vec![
                        ("Job", plan.job_id.clone()),
                        ("Stages", plan.len().to_string()),
                        (
                            "Intermediate sets",
                            plan.intermediate_sets
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join("\n"),
                        ),
                    ];
                    output::print_key_value_table(&items, quiet);
                }
            }
        }
    }
    Ok(())
}
