//! Model analysis commands: conflicts, priorities, impact

use super::util::{has_flag, load_config, load_model, positional, write_output};
use cpq_engine::*;
use std::fs;

pub fn cmd_conflicts(args: &[String]) -> Result<()> {
    let positional = positional(args);
    let Some(model_path) = positional.first() else {
        return Err("Usage: cpq conflicts <model.yaml> [--config <file>] [--json]".into());
    };
    let model = load_model(model_path)?;
    let analyzer = ModelAnalyzer::new(load_config(args)?);
    let result = analyzer.detect_conflicts(&model)?;

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result);
    }

    if result.has_critical() {
        Err("Critical conflicts found".into())
    } else {
        Ok(())
    }
}

pub fn cmd_priorities(args: &[String]) -> Result<()> {
    let positional = positional(args);
    let Some(model_path) = positional.first() else {
        return Err("Usage: cpq priorities <model.yaml> [--apply] [--output <file>] [--json]".into());
    };
    let model = load_model(model_path)?;
    let analyzer = ModelAnalyzer::new(load_config(args)?);

    if has_flag(args, "--apply") {
        let updated = analyzer.apply_priorities(&model)?;
        let content = if has_flag(args, "--json") {
            updated.to_json()?
        } else {
            updated.to_yaml()?
        };
        return write_output(args, &content);
    }

    let analysis = analyzer.analyze_priorities(&model);
    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print!("{}", analysis);
    }
    Ok(())
}

pub fn cmd_impact(args: &[String]) -> Result<()> {
    let positional = positional(args);
    let [model_path, change_path, ..] = positional.as_slice() else {
        return Err("Usage: cpq impact <model.yaml> <change.yaml> [--config <file>] [--json]".into());
    };
    let model = load_model(model_path)?;
    let change = RuleChange::from_yaml(&fs::read_to_string(change_path)?)?;
    let analyzer = ModelAnalyzer::new(load_config(args)?);
    let analysis = analyzer.analyze_rule_change(&model, &change)?;

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print!("{}", analysis);
    }
    Ok(())
}
