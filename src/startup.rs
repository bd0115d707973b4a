// Startup module - displays banner and component status
//
// Shows version, config source, routing rules, limits and the tool tracker
// before the proxy starts accepting requests.

use crate::config::{Config, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// One banner line
pub struct ComponentStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub detail: String,
}

/// Status of every component, derived from config
fn component_status(config: &Config) -> Vec<ComponentStatus> {
    let routing = &config.routing;
    let limits = &config.limits;

    let zai_model = config
        .zai
        .model
        .clone()
        .unwrap_or_else(|| "client model".to_string());
    let air_model = config
        .zai
        .air_model
        .clone()
        .unwrap_or_else(|| zai_model.clone());

    vec![
        ComponentStatus {
            name: "routing",
            enabled: true,
            detail: format!(
                "{} subagent, {} anthropic, {} air marker(s)",
                routing.subagent_markers.len(),
                routing.anthropic_markers.len(),
                routing.air_model_patterns.len()
            ),
        },
        ComponentStatus {
            name: "z.ai",
            enabled: config.zai.auth.is_passthrough() || config.zai.auth.resolve_key().is_some(),
            detail: format!("{} / {}", zai_model, air_model),
        },
        ComponentStatus {
            name: "limits",
            enabled: true,
            detail: format!(
                "body {} MB, {} conn/provider, pool wait {}s",
                limits.max_body_size / (1024 * 1024),
                limits.max_connections,
                limits.pool_timeout
            ),
        },
        ComponentStatus {
            name: "tracker",
            enabled: limits.subagent_tool_warning > 0,
            detail: if limits.subagent_tool_warning > 0 {
                format!("warn at {} subagent tools", limits.subagent_tool_warning)
            } else {
                "disabled".to_string()
            },
        },
        ComponentStatus {
            name: "events",
            enabled: config.events.enabled,
            detail: config.events.dir.display().to_string(),
        },
    ]
}

/// Print the startup banner
pub fn print_startup(config: &Config) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}zroute{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Subagents to z.ai, main session to Anthropic{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}✓{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    for component in &component_status(config) {
        let (icon, style) = if component.enabled {
            (format!("{GREEN}✓{RESET}"), "")
        } else {
            (format!("{YELLOW}○{RESET}"), DIM)
        };
        println!(
            "    {icon} {style}{:<10}{RESET} {DIM}{}{RESET}",
            component.name, component.detail
        );
    }

    println!();
    println!(
        "  {MAGENTA}▸{RESET} Proxy listening on {BOLD}{}{RESET}",
        config.bind_addr
    );
    println!(
        "  {DIM}export ANTHROPIC_BASE_URL=http://{}{RESET}",
        config.bind_addr
    );
    println!();
}

/// Same status through tracing, for file logs and headless runs
pub fn log_startup(config: &Config) {
    tracing::info!("zroute v{}", VERSION);
    for component in &component_status(config) {
        let icon = if component.enabled { "✓" } else { "○" };
        tracing::info!("  {} {} - {}", icon, component.name, component.detail);
    }
    tracing::info!("▸ Listening on {}", config.bind_addr);
}
