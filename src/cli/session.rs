//! Selection commands: validate, price, options

use super::util::{has_flag, load_config, load_customer, load_model, parse_selections, positional};
use cpq_engine::*;

/// Model, engine config, selections and customer shared by every command here
struct Request {
    model: Model,
    config: EngineConfig,
    selections: Vec<Selection>,
    customer: Option<CustomerContext>,
    json: bool,
}

fn parse_request(args: &[String], usage: &str) -> Result<Request> {
    let positional = positional(args);
    let Some((model_path, items)) = positional.split_first() else {
        return Err(usage.into());
    };
    Ok(Request {
        model: load_model(model_path)?,
        config: load_config(args)?,
        selections: parse_selections(items)?,
        customer: load_customer(args)?,
        json: has_flag(args, "--json"),
    })
}

pub fn cmd_validate(args: &[String]) -> Result<()> {
    let req = parse_request(
        args,
        "Usage: cpq validate <model.yaml> [opt[:qty]...] [--config <file>] [--json]",
    )?;
    let engine = ConfigurationEngine::new(req.model, &req.config)?;
    let result = engine.validate_for(&req.selections, req.customer.as_ref())?;

    if req.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_validation(&result);
    }

    if result.is_valid {
        Ok(())
    } else {
        Err("Validation failed".into())
    }
}

fn print_validation(result: &ValidationResult) {
    if result.is_valid {
        println!("✓ {}", result);
    } else {
        println!("✗ {}", result);
    }
    for violation in &result.violations {
        println!("  {}", violation);
    }
    if !result.suggestions.is_empty() {
        println!("\nSuggestions:");
        for suggestion in &result.suggestions {
            println!("  - {}", suggestion.message);
        }
    }
}

pub fn cmd_price(args: &[String]) -> Result<()> {
    let req = parse_request(
        args,
        "Usage: cpq price <model.yaml> [opt[:qty]...] [--customer <file>] [--json]",
    )?;
    let calculator = PricingCalculator::new(std::sync::Arc::new(req.model), &req.config)?;
    let breakdown = calculator.calculate(&req.selections, req.customer.as_ref())?;

    if req.json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
    } else {
        print!("{}", breakdown);
    }
    Ok(())
}

pub fn cmd_options(args: &[String]) -> Result<()> {
    let req = parse_request(args, "Usage: cpq options <model.yaml> [opt[:qty]...] [--json]")?;
    let engine = ConfigurationEngine::new(req.model, &req.config)?;
    let options = engine.available_options_for(&req.selections, req.customer.as_ref())?;

    if req.json {
        println!("{}", serde_json::to_string_pretty(&options)?);
        return Ok(());
    }

    let mut current_group = "";
    for option in &options {
        if option.group_id != current_group {
            current_group = option.group_id.as_str();
            println!("{}:", current_group);
        }
        let marker = if option.selected {
            "*"
        } else if option.available {
            " "
        } else {
            "x"
        };
        print!("  [{}] {} ({}) {:.2}", marker, option.option_id, option.name, option.price);
        match &option.reason {
            Some(reason) if !option.available => println!("  {}", reason),
            _ => println!(),
        }
    }
    Ok(())
}
