use std::{env, env::VarError};

/// The server takes no arguments. Passing any prints the help text and the current configuration.
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 22] = [
        "RUST_LOG",
        "ESIM_HOST",
        "ESIM_PORT",
        "ESIM_DATABASE_URL",
        "ESIM_DEV_MODE",
        "ESIM_INIT_DATA_MAX_AGE",
        "ESIM_RECHARGE_MIN_AMOUNT",
        "ESIM_RECHARGE_MAX_AMOUNT",
        "ESIM_RECHARGE_ORDER_EXPIRE_MINUTES",
        "ESIM_RECHARGE_REQUIRED_CONFIRMATIONS",
        "ESIM_RECHARGE_MONITOR_INTERVAL_SECONDS",
        "ESIM_RECHARGE_DEPOSIT_ADDRESS",
        "ESIM_EXPIRY_INTERVAL_SECONDS",
        "ESIM_ORDER_SYNC_INTERVAL_SECONDS",
        "ESIM_ORDER_MAX_SYNC_ATTEMPTS",
        "ESIM_ORDER_SYNC_BATCH_SIZE",
        "ESIM_ORDER_TIMEOUT_MINUTES",
        "ESIM_SERVER_READ_TIMEOUT",
        "ESIM_SERVER_WRITE_TIMEOUT",
        "ESIM_CHAIN_API_URL",
        "ESIM_PROVIDER_BASE_URL",
        "ESIM_PROVIDER_API_KEY",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<40} {val:<15}");
    })
}
