use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use shell_words::split as shell_split;

use authslot_core::init_logging;

mod cli;

use crate::cli::{Cli, load_app_config, output_error, resolve_cli_command, run_cli};

const CLI_SCHEMA_VERSION: &str = "authslot.cli.v1";

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn config_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("authslot.toml"),
        xdg_config_dir().join("authslot").join("authslot.toml"),
    ]
}

fn load_config_text() -> Option<String> {
    for path in config_path_candidates() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Some(content);
        }
    }
    None
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let command = match resolve_cli_command(cli) {
        Ok(Some(command)) => command,
        Ok(None) => return output_error("No command provided"),
        Err(err) => return output_error(&err.to_string()),
    };
    let config = load_app_config();
    let rt = Arc::new(tokio::runtime::Runtime::new()?);
    if let Err(err) = run_cli(&rt, command, &config) {
        return output_error(&err.to_string());
    }
    Ok(())
}
