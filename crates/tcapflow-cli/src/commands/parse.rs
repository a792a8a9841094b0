//! Statement listing command.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Color};
use serde::Serialize;
use tcapflow_adapters::tcap::{AtomicComputation, AtomicComputationList, AtomicOp};

use crate::OutputFormat;
use crate::output::{self, Format};

/// One statement of the program.
#[derive(Serialize)]
struct StatementOutput {
    index: usize,
    op: &'static str,
    output: String,
    inputs: Vec<String>,
    projection: String,
    computation: String,
    detail: Option<String>,
}

fn detail(c: &AtomicComputation) -> Option<String> {
    match &c.op {
        AtomicOp::Scan { db, set } | AtomicOp::Output { db, set } => Some(format!("{db}.{set}")),
        AtomicOp::Join {
            right_projection, ..
        } => Some(format!("right keeps {right_projection}")),
        op => op.lambda().map(|l| format!("lambda '{l}'")),
    }
}

fn statements(list: &AtomicComputationList) -> Vec<StatementOutput> {
    list.iter()
        .enumerate()
        .map(|(index, c)| {
            let mut inputs = Vec::new();
            if !c.input.set_name().is_empty() {
                inputs.push(c.input.to_string());
            }
            if let AtomicOp::Join { right_input, .. } = &c.op {
                inputs.push(right_input.to_string());
            }
            StatementOutput {
                index,
                op: c.op.name(),
                output: c.output.to_string(),
                inputs,
                projection: c.projection.to_string(),
                computation: c.computation_name.clone(),
                detail: detail(c),
            }
        })
        .collect()
}

/// Run the parse command.
pub fn run(path: &Path, format: OutputFormat, quiet: bool) -> Result<()> {
    let list = super::load_program(path)?;
    let output = statements(&list);

    let fmt: Format = format.into();
    match fmt {
        Format::Json => output::print_json(&output, quiet)?,
        Format::Table => {
            if quiet {
                return Ok(());
            }
            let mut table = output::create_table();
            output::add_header(
                &mut table,
                &["#", "Op", "Output", "Inputs", "Projection", "Computation", "Detail"],
            );
            for s in &output {
                table.add_row(vec![
                    Cell::new(s.index),
                    Cell::new(s.op).fg(Color::Green),
                    Cell::new(&s.output),
                    Cell::new(s.inputs.join("\n")),
                    Cell::new(&s.projection),
                    Cell::new(&s.computation),
                    Cell::new(s.detail.as_deref().unwrap_or("-")),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::JOIN;
    use tcapflow_adapters::tcap::parse_tcap;

    #[test]
    fn test_statements_describe_join() {
        let list = parse_tcap(JOIN).unwrap();
        let rows = statements(&list);
        assert_eq!(rows.len(), 6);

        assert_eq!(rows[0].op, "Scan");
        assert!(rows[0].inputs.is_empty());
        assert_eq!(rows[0].detail.as_deref(), Some("db.a"));

        let join = &rows[4];
        assert_eq!(join.op, "JoinSets");
        assert_eq!(join.inputs.len(), 2);
        assert_eq!(join.computation, "JoinComp_2");

        assert_eq!(rows[2].detail.as_deref(), Some("lambda '==2'"));
        assert_eq!(rows[5].detail.as_deref(), Some("db.out"));
    }
}
