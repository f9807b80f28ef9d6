//! CLI utility helpers

use cpq_engine::{CustomerContext, EngineConfig, Error, Model, Result, Selection};
use std::fs;
use std::path::{Path, PathBuf};

/// Flags that consume the following argument
const VALUE_FLAGS: &[&str] = &["--config", "--customer", "--output", "-o"];

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Value following `flag`, if present
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Positional arguments, with flags and their values removed
pub fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
        } else if !arg.starts_with("--") {
            out.push(arg.as_str());
        }
    }
    out
}

pub fn load_model(path: &str) -> Result<Model> {
    Model::load(Path::new(path))
}

/// Engine configuration from `--config`, or defaults
pub fn load_config(args: &[String]) -> Result<EngineConfig> {
    match flag_value(args, "--config") {
        Some(path) => EngineConfig::load(Path::new(path)),
        None => Ok(EngineConfig::default()),
    }
}

/// Customer context from `--customer`
pub fn load_customer(args: &[String]) -> Result<Option<CustomerContext>> {
    let Some(path) = flag_value(args, "--customer") else {
        return Ok(None);
    };
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_norway::from_str(&content)?))
}

/// Parse `opt` or `opt:qty` selection arguments
pub fn parse_selections(items: &[&str]) -> Result<Vec<Selection>> {
    items
        .iter()
        .map(|item| match item.split_once(':') {
            Some((id, qty)) => {
                let quantity: u32 = qty.parse().map_err(|_| {
                    Error::Other(format!("invalid quantity '{}' for option '{}'", qty, id))
                })?;
                Ok(Selection::new(id, quantity))
            }
            None => Ok(Selection::one(item)),
        })
        .collect()
}

/// Write content to `--output` or stdout
pub fn write_output(args: &[String], content: &str) -> Result<()> {
    let path = flag_value(args, "--output")
        .or_else(|| flag_value(args, "-o"))
        .map(PathBuf::from);
    match path {
        Some(p) => {
            fs::write(&p, content)?;
            eprintln!("Written to: {}", p.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_positional_skips_flag_values() {
        let a = args(&["m.yaml", "--config", "c.yaml", "i9", "--json", "ram:2"]);
        assert_eq!(positional(&a), vec!["m.yaml", "i9", "ram:2"]);
        assert_eq!(flag_value(&a, "--config"), Some("c.yaml"));
        assert!(has_flag(&a, "--json"));
    }

    #[test]
    fn test_parse_selections() {
        let parsed = parse_selections(&["i9", "ram:2"]).unwrap();
        assert_eq!(parsed, vec![Selection::one("i9"), Selection::new("ram", 2)]);
        assert!(parse_selections(&["ram:x"]).is_err());
    }
}
