//! Schema command

use cpq_engine::*;

pub fn cmd_schema(args: &[String]) -> Result<()> {
    let schema_name = args.first().map(|s| s.as_str()).unwrap_or("list");

    match schema_name {
        "list" => {
            println!(
                "Available schemas: model, config, customer, change, validation, price, options, conflicts, priorities, impact"
            );
            Ok(())
        }
        "model" => print_schema::<Model>(),
        "config" => print_schema::<EngineConfig>(),
        "customer" => print_schema::<CustomerContext>(),
        "change" => print_schema::<RuleChange>(),
        "validation" => print_schema::<ValidationResult>(),
        "price" => print_schema::<PriceBreakdown>(),
        "options" => print_schema::<Vec<AvailableOption>>(),
        "conflicts" => print_schema::<ConflictDetectionResult>(),
        "priorities" => print_schema::<PriorityAnalysis>(),
        "impact" => print_schema::<ImpactAnalysis>(),
        _ => Err(format!("Unknown schema: {}", schema_name).into()),
    }
}

fn print_schema<T: schemars::JsonSchema>() -> Result<()> {
    let schema = schemars::schema_for!(T);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
