//! CLI command implementations.

pub mod explain;
pub mod parse;
pub mod pipeline;
pub mod validate;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tcapflow_adapters::tcap::{AtomicComputationList, parse_tcap};
use tcapflow_engine::Config;

/// Reads TCAP text from `path`, or from stdin when `path` is `-`.
pub fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read TCAP from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Reads and parses a TCAP program.
pub fn load_program(path: &Path) -> Result<AtomicComputationList> {
    let text = read_source(path)?;
    let list = parse_tcap(&text)?;
    tracing::debug!(
        "parsed {} statements from {}",
        list.len(),
        path.display()
    );
    Ok(list)
}

/// Loads the engine configuration, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: Config = serde_json::from_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const JOIN: &str = "\
A(a) <= SCAN('a', 'db', 'ScanUserSet_0')
B(b) <= SCAN('b', 'db', 'ScanUserSet_1')
AH(a, ah) <= HASHLEFT(A(a), A(a), 'JoinComp_2', '==2')
BH(b, bh) <= HASHRIGHT(B(b), B(b), 'JoinComp_2', '==2')
J(a, b) <= JOIN(AH(ah), AH(a), BH(bh), BH(b), 'JoinComp_2')
OUT() <= OUTPUT(J(a, b), 'out', 'db', 'Output_3')
";

    pub(crate) fn write_temp(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_program() {
        let file = write_temp(JOIN);
        let list = load_program(file.path()).unwrap();
        assert_eq!(list.len(), 6);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_program(Path::new("/nonexistent/program.tcap")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_load_config() {
        assert_eq!(load_config(None).unwrap(), Config::default());

        let config = Config::default()
            .with_num_partitions(3)
            .with_broadcast_join_threshold(10);
        let file = write_temp(&serde_json::to_string(&config).unwrap());
        assert_eq!(load_config(Some(file.path())).unwrap(), config);

        let bad = write_temp("{ not json");
        assert!(load_config(Some(bad.path())).is_err());
    }
}
