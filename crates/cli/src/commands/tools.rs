//! `stepwise tools`: List the tools the agent can call.

use stepwise_config::AppConfig;
use stepwise_tools::registry_from_config;

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let definitions = registry_from_config(&config.tools).definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    if definitions.is_empty() {
        println!("No tools enabled.");
        return Ok(());
    }

    println!("Workspace: {}", config.tools.workspace_root().display());
    println!();
    for def in &definitions {
        let params: Vec<&str> = def.input_schema["properties"]
            .as_object()
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default();
        println!("  {}({})", def.name, params.join(", "));
        println!("      {}", def.description);
    }
    Ok(())
}
