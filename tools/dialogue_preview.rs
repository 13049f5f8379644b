/// Dialogue preview — interactive shell for talking to configured agents.
///
/// Usage: dialogue_preview --agents <path> [--knowledge <dir>] [--targets <path>]
///                         [--seed <n>] [--timeout-ms <n>] [--endpoint <url>]
///
/// Without `--endpoint` (or without the `http` feature) replies come from a
/// seeded offline backend. Set `RUST_LOG=debug` to see engine logging.
///
/// Commands:
///   say <text>        — start an exchange with the current agent
///   agent <id>        — switch agent
///   agents            — list agents
///   target <id>       — set the interaction/target id
///   next / prev       — move between the agent's exchanges
///   up / down         — move between reply options
///   pick [n]          — send the highlighted option (or option n)
///   eval <text>       — submit text for judgement
///   scene <text>      — set a scene description for `ask`
///   ask <text>        — in-character reply using the scene
///   history           — list the current agent's exchanges
///   clear [all]       — clear the current agent's (or every) exchange list
///   help              — list commands
///   quit              — exit

use narrative_dialogue::core::engine::{DialogueEngine, DialogueError};
use narrative_dialogue::core::exchange::ExchangeHandle;
use narrative_dialogue::core::generation::{CannedBackend, TextBackend};
use narrative_dialogue::schema::exchange::Exchange;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const OFFLINE_REPLIES: [&str; 5] = [
    "The crowd grows louder by the hour. I would not stand so close to the towers.",
    "Who sent you? Speak plainly, these are dangerous days.",
    "Bread, citizen. It always comes back to bread.",
    "I saw the drawbridge fall with my own eyes.",
    "Ask the soldiers, not me. I only carry stones.",
];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut agents_path = None;
    let mut knowledge_dir = None;
    let mut targets_path = None;
    let mut endpoint: Option<String> = None;
    let mut timeout_ms: Option<u64> = None;
    let mut seed: u64 = 42;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--agents" if i + 1 < args.len() => {
                i += 1;
                agents_path = Some(args[i].clone());
            }
            "--knowledge" if i + 1 < args.len() => {
                i += 1;
                knowledge_dir = Some(args[i].clone());
            }
            "--targets" if i + 1 < args.len() => {
                i += 1;
                targets_path = Some(args[i].clone());
            }
            "--endpoint" if i + 1 < args.len() => {
                i += 1;
                endpoint = Some(args[i].clone());
            }
            "--timeout-ms" if i + 1 < args.len() => {
                i += 1;
                timeout_ms = args[i].parse().ok();
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().unwrap_or(42);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut builder = DialogueEngine::builder().backend(make_backend(endpoint.as_deref(), seed));
    if let Some(ref path) = agents_path {
        builder = builder.agents_file(path);
    }
    if let Some(ref dir) = knowledge_dir {
        builder = builder.knowledge_dir(dir);
    }
    if let Some(ref path) = targets_path {
        builder = builder.targets_file(path);
    }
    if let Some(ms) = timeout_ms {
        builder = builder.generation_timeout(Duration::from_millis(ms));
    }
    let mut engine = builder.build();

    let mut current_agent: String = engine
        .directory()
        .ids()
        .next()
        .unwrap_or_default()
        .to_string();
    let mut target = String::new();
    let mut scene: Option<String> = None;

    println!("Loaded {} agents", engine.directory().len());
    println!("Talking to: {}", current_agent);
    println!("Type 'help' for commands.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{}> ", current_agent);
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Au revoir.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "say" => {
                if rest.is_empty() {
                    println!("Usage: say <text>");
                    continue;
                }
                let started = engine.start_exchange(rest, &current_agent, &target);
                report_started(&mut engine, started, &mut current_agent);
            }
            "pick" => {
                let started = match rest.parse::<usize>() {
                    Ok(n) if n > 0 => engine.select_option(n - 1, &target),
                    _ => engine.select_option_and_continue(&target),
                };
                report_started(&mut engine, started, &mut current_agent);
            }
            "agent" => {
                if !engine.directory().contains(rest) {
                    println!("Unknown agent: {}", rest);
                    continue;
                }
                current_agent = rest.to_string();
                engine.switch_agent(rest);
                show_current(&engine);
            }
            "agents" => {
                for id in engine.directory().ids() {
                    println!(
                        "  {:<20} {} ({})",
                        id,
                        engine.directory().name(id),
                        engine.directory().role(id).tag()
                    );
                }
            }
            "target" => {
                target = rest.to_string();
                println!("Target: '{}'", target);
            }
            "prev" => {
                if engine.prev_exchange() {
                    show_current(&engine);
                } else {
                    println!("(first exchange)");
                }
            }
            "next" => {
                if engine.next_exchange() {
                    show_current(&engine);
                } else {
                    println!("(latest exchange)");
                }
            }
            "up" => {
                engine.prev_option();
                show_current(&engine);
            }
            "down" => {
                engine.next_option();
                show_current(&engine);
            }
            "eval" => match engine.evaluate(rest, &target, Some(current_agent.as_str())) {
                Ok(eval) => {
                    println!("[{:?}] {}", eval.verdict, eval.feedback);
                }
                Err(e) => println!("Error: {}", e),
            },
            "scene" => {
                scene = (!rest.is_empty()).then(|| rest.to_string());
                println!("Scene {}", if scene.is_some() { "set" } else { "cleared" });
            }
            "ask" => match engine.character_response(&current_agent, rest, scene.as_deref()) {
                Ok(reply) => println!("{}", reply),
                Err(e) => println!("Error: {}", e),
            },
            "history" => {
                let exchanges = engine.history(Some(current_agent.as_str()));
                if exchanges.is_empty() {
                    println!("(no exchanges)");
                }
                for (n, exchange) in exchanges.iter().enumerate() {
                    let marker = if engine.exchange_index() == Some(n) { '>' } else { ' ' };
                    println!(
                        "{} {:>2}. {} -> {}",
                        marker,
                        n + 1,
                        exchange.player_input,
                        exchange.response.as_deref().unwrap_or("...")
                    );
                }
            }
            "clear" => {
                if rest == "all" {
                    engine.clear(None);
                    println!("Cleared every agent.");
                } else {
                    engine.clear_history(Some(current_agent.as_str()));
                    println!("Cleared {}.", current_agent);
                }
            }
            _ => println!("Unknown command: {}. Type 'help'.", cmd),
        }
    }
}

fn make_backend(endpoint: Option<&str>, seed: u64) -> Arc<dyn TextBackend> {
    if let Some(backend) = endpoint.and_then(remote_backend) {
        return backend;
    }
    let replies = OFFLINE_REPLIES.iter().map(|s| s.to_string()).collect();
    Arc::new(CannedBackend::new(replies, seed))
}

#[cfg(feature = "http")]
fn remote_backend(url: &str) -> Option<Arc<dyn TextBackend>> {
    use narrative_dialogue::core::generation::HttpBackend;

    match HttpBackend::new(url, Duration::from_secs(120)) {
        Ok(backend) => Some(Arc::new(backend)),
        Err(e) => {
            eprintln!("Cannot use {}: {}; using offline replies", url, e);
            None
        }
    }
}

#[cfg(not(feature = "http"))]
fn remote_backend(_url: &str) -> Option<Arc<dyn TextBackend>> {
    eprintln!("Built without the `http` feature; using offline replies");
    None
}

fn report_started(
    engine: &mut DialogueEngine,
    started: Result<Option<ExchangeHandle>, DialogueError>,
    current_agent: &mut String,
) {
    match started {
        Ok(Some(handle)) => {
            wait_visibly(&handle);
            if let Some(agent) = engine.current_agent() {
                *current_agent = agent.to_string();
            }
            show_current(engine);
        }
        Ok(None) => println!("(nothing to send)"),
        Err(e) => println!("Error: {}", e),
    }
}

fn wait_visibly(handle: &ExchangeHandle) {
    let mut stdout = io::stdout();
    while handle.wait_timeout(Duration::from_millis(250)).is_none() {
        print!(".");
        stdout.flush().ok();
    }
}

fn show_current(engine: &DialogueEngine) {
    let Some(exchange) = engine.current_exchange() else {
        println!("(no exchange selected)");
        return;
    };
    print_exchange(&exchange, engine.option_index());
}

fn print_exchange(exchange: &Exchange, option_index: usize) {
    println!();
    println!("You: {}", exchange.player_input);
    match exchange.response.as_deref() {
        Some(response) => println!("{}: {}", exchange.agent_name, response),
        None => println!("{}: ...", exchange.agent_name),
    }
    for (n, option) in exchange.options.iter().enumerate() {
        let marker = if n == option_index { '>' } else { ' ' };
        println!("  {} {}. {}", marker, n + 1, option);
    }
    println!();
}

fn print_usage() {
    eprintln!("Usage: dialogue_preview --agents <path> [--knowledge <dir>] [--targets <path>]");
    eprintln!("                        [--seed <n>] [--timeout-ms <n>] [--endpoint <url>]");
}

fn print_help() {
    println!("Commands:");
    println!("  say <text>    — start an exchange with the current agent");
    println!("  agent <id>    — switch agent");
    println!("  agents        — list agents");
    println!("  target <id>   — set the interaction/target id");
    println!("  next / prev   — move between exchanges");
    println!("  up / down     — move between reply options");
    println!("  pick [n]      — send the highlighted option (or option n)");
    println!("  eval <text>   — submit text for judgement");
    println!("  scene <text>  — set a scene description for `ask`");
    println!("  ask <text>    — in-character reply using the scene");
    println!("  history       — list the current agent's exchanges");
    println!("  clear [all]   — clear the current agent's (or every) exchange list");
    println!("  help          — list commands");
    println!("  quit          — exit");
}
