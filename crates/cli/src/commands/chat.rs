//! `stepwise chat`: Interactive or single-message chat mode.
//!
//! Conversation history lives only in this process. Ctrl+C cancels the
//! request in flight; at the prompt, type `exit` to quit.

use std::io::Write;
use std::sync::Arc;
use stepwise_agent::{AgentLoop, LoopEvent};
use stepwise_config::AppConfig;
use stepwise_core::CancellationToken;
use stepwise_core::history::HistoryTurn;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Providers that refuse requests without a key.
const KEYED_PROVIDERS: &[&str] = &["openrouter", "openai"];

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup instructions
    if config.effective_api_key().is_none() {
        if KEYED_PROVIDERS.contains(&config.provider.name.as_str()) {
            eprintln!();
            eprintln!("  ERROR: No API key configured!");
            eprintln!();
            eprintln!("  Set one of these environment variables:");
            eprintln!("    OPENROUTER_API_KEY=sk-or-v1-...   (recommended)");
            eprintln!("    OPENAI_API_KEY=sk-...             (for OpenAI direct)");
            eprintln!("    STEPWISE_API_KEY=sk-...           (generic)");
            eprintln!();
            eprintln!("  Or add it to your config file:");
            eprintln!("    {}", AppConfig::config_path().display());
            eprintln!();
            return Err("No API key found. See above for setup instructions.".into());
        }
        warn!(provider = %config.provider.name, "No API key configured, sending requests without one");
    }

    let service = stepwise_providers::build_from_config(&config)?;
    let tools = Arc::new(stepwise_tools::registry_from_config(&config.tools));
    let agent = Arc::new(AgentLoop::from_config(service, tools, &config));

    if let Some(msg) = message {
        // Single message mode
        let answered = ask(&agent, &msg, &[]).await;
        return match answered {
            Some(_) => Ok(()),
            None => Err("request failed".into()),
        };
    }

    // Interactive mode
    println!();
    println!("  stepwise: interactive mode");
    println!();
    println!("  Provider:  {}", config.provider.name);
    println!(
        "  Model:     {}",
        config.model.as_deref().unwrap_or("(provider default)")
    );
    println!("  Tools:     {}", agent.tools().names().join(", "));
    println!("  Workspace: {}", config.tools.workspace_root().display());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C cancels a running request; type 'exit' to quit.");
    println!();

    let mut history: Vec<HistoryTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, "exit" | "quit") {
            break;
        }

        if let Some(answer) = ask(&agent, prompt, &history).await {
            history.push(HistoryTurn::prompt(prompt));
            history.push(HistoryTurn::response(vec![answer.as_str().into()]));
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one request, printing its events. Returns the answer, if any.
async fn ask(agent: &Arc<AgentLoop>, prompt: &str, history: &[HistoryTurn]) -> Option<String> {
    let cancel = CancellationToken::new();
    let mut rx = agent
        .clone()
        .spawn(prompt.to_string(), history.to_vec(), cancel.clone());
    let mut answer = None;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let LoopEvent::Answer { content } = &event {
                    answer = Some(content.clone());
                }
                render(&event);
            }
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                eprintln!("\n  Cancelling...");
                cancel.cancel();
            }
        }
    }

    answer
}

fn render(event: &LoopEvent) {
    match event {
        LoopEvent::Progress { message } => eprintln!("  · {message}"),
        LoopEvent::Warning { message } => eprintln!("  ! {message}"),
        LoopEvent::Answer { content } => {
            println!();
            for line in content.lines() {
                println!("  Assistant > {line}");
            }
            println!();
        }
        LoopEvent::Failure { message } => {
            eprintln!("  [Error] {message}");
            println!();
        }
    }
}
