//! Pipeline shape command.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Color};
use serde::Serialize;
use tcapflow_adapters::tcap::AtomicComputationList;
use tcapflow_engine::describe_pipeline;

use crate::OutputFormat;
use crate::output::{self, Format};

#[derive(Serialize)]
struct StageOutput {
    tuple_set: String,
    kind: &'static str,
    computation: String,
}

#[derive(Serialize)]
struct PipelineOutput {
    source: String,
    stages: Vec<StageOutput>,
    sink: String,
    target: String,
    right_side: bool,
}

fn shape(list: &AtomicComputationList, path: &[String], target: &str) -> Result<PipelineOutput> {
    let shape = describe_pipeline(list, path, target)?;
    let stages = path
        .iter()
        .skip(1)
        .zip(&shape.stages)
        .map(|(tuple_set, kind)| StageOutput {
            tuple_set: tuple_set.clone(),
            kind: kind.name(),
            computation: list
                .producer(tuple_set)
                .map(|c| c.computation_name.clone())
                .unwrap_or_default(),
        })
        .collect();
    Ok(PipelineOutput {
        source: shape.source,
        stages,
        sink: shape.sink,
        target: target.to_string(),
        right_side: shape.right_side,
    })
}

/// Run the pipeline command.
pub fn run(
    path: &Path,
    target: &str,
    tuple_sets: &[String],
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let list = super::load_program(path)?;
    let output = shape(&list, tuple_sets, target)?;

    let fmt: Format = format.into();
    match fmt {
        Format::Json => output::print_json(&output, quiet)?,
        Format::Table => {
            let mut table = output::create_table();
            output::add_header(&mut table, &["#", "Stage", "Tuple Set", "Computation"]);
            table.add_row(vec![
                Cell::new("-"),
                Cell::new("Source").fg(Color::Cyan),
                Cell::new(&output.source),
                Cell::new("-"),
            ]);
            for (i, stage) in output.stages.iter().enumerate() {
                table.add_row(vec![
                    Cell::new(i),
                    Cell::new(stage.kind).fg(Color::Green),
                    Cell::new(&stage.tuple_set),
                    Cell::new(&stage.computation),
                ]);
            }
            let side = if output.right_side { " (right side)" } else { "" };
            table.add_row(vec![
                Cell::new("-"),
                Cell::new("Sink").fg(Color::Cyan),
                Cell::new(format!("{}{side}", output.sink)),
                Cell::new(&output.target),
            ]);
            output::print_section("Pipeline", &table, quiet);
        }
    }
    Ok(())
}
