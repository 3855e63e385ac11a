use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use super::{CLI_SCHEMA_VERSION, load_config_text, shell_split};

#[path = "cli_command_handlers.rs"]
mod cli_command_handlers;
#[path = "cli_config.rs"]
mod cli_config;
#[path = "cli_runtime_helpers.rs"]
mod cli_runtime_helpers;
pub(crate) use cli_command_handlers::run_cli;
pub(crate) use cli_config::load_app_config;
pub(crate) use cli_runtime_helpers::{
    detected_to_json, output_error, output_ok, resolve_cli_command, rewrite_preview,
};

#[derive(Parser, Debug)]
#[command(
    name = "authslot",
    version,
    about = "Keeps Google services on your preferred account"
)]
pub(crate) struct Cli {
    #[arg(short = 'c', long = "cmd")]
    cmd: Option<String>,
    #[command(subcommand)]
    pub(crate) command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Launch or attach to Chromium and keep redirecting until Ctrl-C.
    Run(RunCmd),
    /// Discover signed-in accounts.
    Scan(ScanCmd),
    Prefs(PrefsCmd),
    Accounts(AccountsCmd),
    Services(ServicesCmd),
    Manual(ManualCmd),
    /// Show what a URL would be redirected to, without touching any browser.
    Rewrite(RewriteCmd),
    /// Reset detected accounts and reinstall shortcut rules.
    Install,
}

#[derive(Args, Debug)]
pub(crate) struct BrowserArgs {
    /// DevTools websocket URL of a running browser.
    #[arg(long)]
    connect: Option<String>,
    #[arg(long)]
    headless: bool,
}

#[derive(Args, Debug)]
pub(crate) struct RunCmd {
    #[command(flatten)]
    browser: BrowserArgs,
    /// Keep preferences and detected accounts in memory only.
    #[arg(long)]
    ephemeral: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ScanCmd {
    #[command(flatten)]
    browser: BrowserArgs,
}

#[derive(Args, Debug)]
pub(crate) struct PrefsCmd {
    #[command(subcommand)]
    command: PrefsCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PrefsCommand {
    Get,
    Set { slot: String },
}

#[derive(Args, Debug)]
pub(crate) struct AccountsCmd {
    #[command(subcommand)]
    command: AccountsCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AccountsCommand {
    List,
    Reset,
}

#[derive(Args, Debug)]
pub(crate) struct ServicesCmd {
    #[command(subcommand)]
    command: ServicesCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ServicesCommand {
    List,
    Enable { name: String },
    Disable { name: String },
}

#[derive(Args, Debug)]
pub(crate) struct ManualCmd {
    #[command(subcommand)]
    command: ManualCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ManualCommand {
    On,
    Off,
}

#[derive(Args, Debug)]
pub(crate) struct RewriteCmd {
    url: String,
    /// Target slot; defaults to the stored preference.
    #[arg(long)]
    slot: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppConfig {
    store_path: Option<PathBuf>,
    cooldown: Duration,
    grace: Duration,
    scan_settle: Duration,
    scan_pages: Vec<String>,
    observer_delays: Vec<Duration>,
    chrome_path: Option<PathBuf>,
    no_sandbox: bool,
    debug_ws_url: Option<String>,
    poll: Duration,
    email_domains: Vec<String>,
    load_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::cli_config::parse_app_config;
    use super::{Cli, CliCommand, ManualCommand, PrefsCommand, resolve_cli_command};

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_app_config(None);
        assert_eq!(config.cooldown, Duration::from_millis(3000));
        assert_eq!(config.grace, Duration::from_millis(10_000));
        assert_eq!(config.scan_settle, Duration::from_millis(3000));
        assert_eq!(config.scan_pages.len(), 3);
        assert_eq!(config.scan_pages[0], "https://accounts.google.com/SignOutOptions");
        assert_eq!(config.observer_delays.len(), 3);
        assert_eq!(config.poll, Duration::from_millis(500));
        assert_eq!(config.email_domains, vec!["gmail.com".to_string()]);
        assert!(config.load_error.is_none());
    }

    #[test]
    fn config_sections_override_defaults() {
        let config = parse_app_config(Some(
            r#"
[store]
path = "/tmp/a.db"

[engine]
cooldown_ms = 1500
grace_ms = "2500"

[scan]
settle_ms = 0
pages = ["https://mail.google.com"]

[observer]
delays_ms = [100, 200]

[browser]
no_sandbox = "true"
debug_ws_url = "ws://127.0.0.1:9222/devtools/browser/x"
poll_ms = 250

[provider]
email_domains = ["example.com", "gmail.com"]
"#,
        ));
        assert_eq!(config.store_path.as_deref(), Some(std::path::Path::new("/tmp/a.db")));
        assert_eq!(config.cooldown, Duration::from_millis(1500));
        assert_eq!(config.grace, Duration::from_millis(2500));
        assert_eq!(config.scan_settle, Duration::ZERO);
        assert_eq!(config.scan_pages, vec!["https://mail.google.com".to_string()]);
        assert_eq!(
            config.observer_delays,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert!(config.no_sandbox);
        assert!(config.debug_ws_url.is_some());
        assert_eq!(config.poll, Duration::from_millis(250));
        assert_eq!(config.email_domains.len(), 2);
    }

    #[test]
    fn invalid_config_reports_error_and_keeps_defaults() {
        let config = parse_app_config(Some("[engine\ncooldown_ms = 1"));
        assert_eq!(config.load_error.as_deref(), Some("Invalid authslot.toml"));
        assert_eq!(config.cooldown, Duration::from_millis(3000));
    }

    #[test]
    fn cmd_string_is_reparsed() {
        let cli = Cli::parse_from(["authslot", "-c", "prefs set 2"]);
        let command = resolve_cli_command(cli).unwrap();
        match command {
            Some(CliCommand::Prefs(cmd)) => match cmd.command {
                PrefsCommand::Set { slot } => assert_eq!(slot, "2"),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        let cli = Cli::parse_from(["authslot", "manual", "on"]);
        assert!(matches!(
            resolve_cli_command(cli).unwrap(),
            Some(CliCommand::Manual(cmd)) if matches!(cmd.command, ManualCommand::On)
        ));

        let cli = Cli::parse_from(["authslot", "-c", ""]);
        assert!(resolve_cli_command(cli).unwrap().is_none());

        let cli = Cli::parse_from(["authslot", "-c", "prefs 'unterminated"]);
        assert!(resolve_cli_command(cli).is_err());
    }

    #[test]
    fn rewrite_preview_reports_service_and_target() {
        let preview = super::rewrite_preview(
            "https://docs.google.com/spreadsheets/d/abc/edit",
            authslot_core::AccountSlot::new(2),
        );
        assert_eq!(preview["current_slot"], "0");
        assert_eq!(preview["service"], "docs");
        assert_eq!(preview["special_case"], "docs-sub-application");
        assert_eq!(
            preview["rewritten"],
            "https://docs.google.com/spreadsheets/u/2/d/abc/edit"
        );

        let preview = super::rewrite_preview("https://example.com/", authslot_core::AccountSlot::new(1));
        assert!(preview["service"].is_null());
        assert!(preview["rewritten"].is_null());
    }
}
