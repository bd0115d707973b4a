// CLI module - command-line argument parsing and handlers
//
// With no subcommand the proxy runs. Subcommands:
// - config --show: Display effective configuration
// - config --path: Show config file path
// - config --reset: Regenerate config file with defaults
// - check: Report provider credential status

use crate::config::{Config, ProviderConfig, VERSION};
use clap::{Parser, Subcommand};
use std::io::Write;

/// zroute - routing proxy for Claude Code
#[derive(Parser)]
#[command(name = "zroute")]
#[command(version = VERSION)]
#[command(about = "Routes Claude Code subagents to z.ai, everything else to Anthropic", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Check provider credentials without starting the proxy
    Check,
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_cli() -> bool {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { show, reset, path }) => {
            if path {
                handle_config_path();
            } else if show {
                handle_config_show();
            } else if reset {
                handle_config_reset();
            } else {
                println!("Usage: zroute config [--show|--reset|--path]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --reset   Reset config file to defaults");
                println!("  --path    Show config file path");
            }
            true
        }
        Some(Commands::Check) => {
            handle_check();
            true
        }
        None => false,
    }
}

/// Load config or exit with the reason
pub fn load_config_or_exit() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(path) = Config::config_path() {
                eprintln!(
                    "Fix {} or run `zroute config --reset` to restore defaults",
                    path.display()
                );
            }
            std::process::exit(1);
        }
    }
}

fn handle_config_path() {
    match Config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
    }
}

fn handle_config_show() {
    let config = load_config_or_exit();

    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());

    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        let _ = std::io::stderr().flush();

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err()
            || !input.trim().eq_ignore_ascii_case("y")
        {
            println!("Aborted.");
            return;
        }
    }

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Error creating directory: {}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = std::fs::write(&path, Config::default().to_toml()) {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config reset to defaults: {}", path.display());
}

/// One line of `zroute check` output
fn credential_status(name: &str, provider: &ProviderConfig) -> (bool, String) {
    let auth = &provider.auth;
    if auth.is_passthrough() {
        return (
            true,
            format!("{}: passthrough (client credentials forwarded)", name),
        );
    }

    let source = match &auth.key_env {
        Some(var) => format!("${}", var),
        None => "config key".to_string(),
    };
    match auth.resolve_key() {
        Some(_) => (
            true,
            format!("{}: {} from {} (resolved)", name, auth.method.as_str(), source),
        ),
        None => (
            false,
            format!("{}: {} from {} (MISSING)", name, auth.method.as_str(), source),
        ),
    }
}

fn handle_check() {
    let config = load_config_or_exit();

    let mut ok = true;
    for (name, provider) in [("anthropic", &config.anthropic), ("zai", &config.zai)] {
        let (resolved, line) = credential_status(name, provider);
        ok &= resolved;
        println!("{}  -> {}", line, provider.base_url);
    }

    if !ok {
        eprintln!("Subagent requests will be rejected upstream until the key is set");
        std::process::exit(1);
    }
}
