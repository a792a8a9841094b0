//! Program validation command.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Color};
use serde::Serialize;
use tcapflow_adapters::tcap::{AtomicComputationList, AtomicOp, parse_tcap};
use tcapflow_common::utils::error::Error;

use crate::OutputFormat;
use crate::output::{self, Format};

/// Validation result output.
#[derive(Serialize)]
struct ValidationOutput {
    valid: bool,
    statement_count: usize,
    error_count: usize,
    warning_count: usize,
    errors: Vec<IssueOutput>,
    warnings: Vec<IssueOutput>,
}

/// A single error or warning.
#[derive(Serialize)]
struct IssueOutput {
    code: String,
    message: String,
    context: Option<String>,
}

impl IssueOutput {
    fn new(code: &str, message: impl Into<String>, context: Option<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            context,
        }
    }
}

fn error_code(e: &Error) -> &'static str {
    match e {
        Error::Parse(_) => "PARSE",
        Error::UnresolvedTupleSet { .. } => "UNRESOLVED_TUPLE_SET",
        Error::DuplicateTupleSet(_) => "DUPLICATE_TUPLE_SET",
        Error::UnknownColumn { .. } => "UNKNOWN_COLUMN",
        Error::Unsupported(_) => "UNSUPPORTED",
        _ => "INVALID",
    }
}

fn from_error(e: &Error) -> IssueOutput {
    match e {
        Error::Parse(p) => IssueOutput::new(
            error_code(e),
            p.message.clone(),
            Some(format!("line {}, column {}", p.line, p.column)),
        ),
        Error::UnresolvedTupleSet { consumer, .. } => {
            IssueOutput::new(error_code(e), e.to_string(), Some(consumer.clone()))
        }
        _ => IssueOutput::new(error_code(e), e.to_string(), None),
    }
}

/// Structural checks beyond what the parser enforces.
fn check_graph(list: &AtomicComputationList) -> (Vec<IssueOutput>, Vec<IssueOutput>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if list.scans().next().is_none() {
        errors.push(IssueOutput::new(
            "NO_SOURCE",
            "the program has no SCAN",
            None,
        ));
    }
    if list.outputs().next().is_none() {
        errors.push(IssueOutput::new(
            "NO_OUTPUT",
            "the program has no OUTPUT",
            None,
        ));
    }
    for c in list.iter() {
        if matches!(c.op, AtomicOp::Output { .. }) {
            continue;
        }
        if list.consumers(c.output_name()).is_empty() {
            warnings.push(IssueOutput::new(
                "UNCONSUMED",
                format!("tuple set '{}' is never read", c.output_name()),
                Some(c.computation_name.clone()),
            ));
        }
    }
    (errors, warnings)
}

fn validate(text: &str) -> ValidationOutput {
    let (statement_count, errors, warnings) = match parse_tcap(text) {
        Ok(list) => {
            let (errors, warnings) = check_graph(&list);
            (list.len(), errors, warnings)
        }
        Err(e) => (0, vec![from_error(&e)], Vec::new()),
    };
    ValidationOutput {
        valid: errors.is_empty(),
        statement_count,
        error_count: errors.len(),
        warning_count: warnings.len(),
        errors,
        warnings,
    }
}

fn issue_table(issues: &[IssueOutput], color: Color) -> comfy_table::Table {
    let mut table = output::create_table();
    output::add_header(&mut table, &["Code", "Message", "Context"]);
    for issue in issues {
        table.add_row(vec![
            Cell::new(&issue.code).fg(color),
            Cell::new(&issue.message),
            Cell::new(issue.context.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

/// Run the validate command.
pub fn run(path: &Path, format: OutputFormat, quiet: bool) -> Result<()> {
    let text = super::read_source(path)?;
    let output = validate(&text);

    let fmt: Format = format.into();
    match fmt {
        Format::Json => output::print_json(&output, quiet)?,
        Format::Table => {
            if output.valid {
                output::success(
                    &format!("Program is valid ({} statements)", output.statement_count),
                    quiet,
                );
            } else {
                output::error("Program has errors");
            }
            if !quiet {
                println!(
                    "\nErrors: {}, Warnings: {}\n",
                    output.error_count, output.warning_count
                );
            }
            if !output.errors.is_empty() {
                output::print_section("Errors", &issue_table(&output.errors, Color::Red), quiet);
            }
            if !output.warnings.is_empty() {
                output::print_section(
                    "Warnings",
                    &issue_table(&output.warnings, Color::Yellow),
                    quiet,
                );
            }
        }
    }

    // Return error exit code if validation failed
    if !output.valid {
        std::process::exit(1);
    }

    Ok(())
}
