use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use authslot_browser::{ChromiumConfig, ChromiumHost, ObserverSettings, TabWatcher};
use authslot_core::{
    AccountSlot, DetectedAccountStore, MemoryAccountStore, PreferenceStore, SqliteAccountStore,
    state_dir,
};
use authslot_dom::EmailShape;
use authslot_engine::{
    AccountScanner, AuthSlotService, EngineTiming, RedirectEngine, ScanSettings, ServiceCore,
    SharedShortcuts, SystemClock, install_hook, spawn_preference_watcher,
};
use authslot_rules::ServiceRuleTable;

use super::{
    AccountsCommand, AppConfig, BrowserArgs, CliCommand, ManualCommand, PrefsCommand,
    ServicesCommand, detected_to_json, output_error, output_ok, rewrite_preview,
};

const PREFERENCE_POLL: Duration = Duration::from_secs(1);

type Stores = (Arc<dyn PreferenceStore>, Arc<dyn DetectedAccountStore>);

pub(crate) fn run_cli(
    rt: &Arc<tokio::runtime::Runtime>,
    command: CliCommand,
    config: &AppConfig,
) -> Result<()> {
    if let Some(err) = config.load_error.as_deref() {
        warn!(error = %err, "falling back to default configuration");
    }

    match command {
        CliCommand::Run(cmd) => {
            let stores = if cmd.ephemeral {
                memory_stores()
            } else {
                rt.block_on(open_stores(config))?
            };
            rt.block_on(run_daemon(&cmd.browser, config, stores))?;
            output_ok(with_config_note(config, json!({ "stopped": true })))
        }
        CliCommand::Scan(cmd) => {
            let stores = rt.block_on(open_stores(config))?;
            let report = rt.block_on(run_scan(&cmd.browser, config, stores))?;
            output_ok(with_config_note(config, json!(report)))
        }
        CliCommand::Prefs(cmd) => {
            let (prefs, detected) = rt.block_on(open_stores(config))?;
            match cmd.command {
                PrefsCommand::Get => {
                    let slot = rt.block_on(prefs.selected_slot())?;
                    let state = rt.block_on(detected.load_detected())?;
                    output_ok(with_config_note(
                        config,
                        json!({
                            "selectedAuthUser": slot.to_string(),
                            "email": state.email_for(slot),
                        }),
                    ))
                }
                PrefsCommand::Set { slot } => {
                    let Ok(slot) = slot.parse::<AccountSlot>() else {
                        return output_error("Invalid account slot");
                    };
                    rt.block_on(prefs.set_selected_slot(slot))?;
                    let state = rt.block_on(detected.load_detected())?;
                    output_ok(json!({
                        "selectedAuthUser": slot.to_string(),
                        "detected": slot.index() < state.count,
                    }))
                }
            }
        }
        CliCommand::Accounts(cmd) => {
            let (_, detected) = rt.block_on(open_stores(config))?;
            if let AccountsCommand::Reset = cmd.command {
                rt.block_on(detected.reset_detected())?;
            }
            let state = rt.block_on(detected.load_detected())?;
            output_ok(detected_to_json(&state))
        }
        CliCommand::Services(cmd) => {
            let (prefs, _) = rt.block_on(open_stores(config))?;
            let table = ServiceRuleTable::google();
            let toggle = match &cmd.command {
                ServicesCommand::List => None,
                ServicesCommand::Enable { name } => Some((name.as_str(), true)),
                ServicesCommand::Disable { name } => Some((name.as_str(), false)),
            };
            if let Some((name, enabled)) = toggle {
                if table.by_name(name).is_none() {
                    return output_error(&format!("Unknown service: {}", name));
                }
                rt.block_on(prefs.set_service_enabled(name, enabled))?;
            }
            let flags = rt.block_on(prefs.enabled_services())?;
            let out: Vec<JsonValue> = table
                .rules()
                .iter()
                .map(|rule| {
                    json!({
                        "name": rule.name,
                        "host": rule.host,
                        "enabled": flags.get(rule.name).copied().unwrap_or(true),
                    })
                })
                .collect();
            output_ok(json!(out))
        }
        CliCommand::Manual(cmd) => {
            let (_, detected) = rt.block_on(open_stores(config))?;
            let enabled = matches!(cmd.command, ManualCommand::On);
            rt.block_on(detected.set_manual_mode(enabled))?;
            output_ok(json!({ "manualMode": enabled }))
        }
        CliCommand::Rewrite(cmd) => {
            let slot = match cmd.slot.as_deref() {
                Some(raw) => match raw.parse::<AccountSlot>() {
                    Ok(slot) => slot,
                    Err(_) => return output_error("Invalid account slot"),
                },
                None => {
                    let (prefs, _) = rt.block_on(open_stores(config))?;
                    rt.block_on(prefs.selected_slot())?
                }
            };
            output_ok(rewrite_preview(&cmd.url, slot))
        }
        CliCommand::Install => {
            let (prefs, detected) = rt.block_on(open_stores(config))?;
            let shortcuts = SharedShortcuts::default();
            let slot = rt.block_on(install_hook(
                prefs.as_ref(),
                detected.as_ref(),
                &shortcuts,
            ))?;
            let rules = rt.block_on(shortcuts.snapshot());
            let state = rt.block_on(detected.load_detected())?;
            output_ok(json!({
                "selectedAuthUser": slot.to_string(),
                "shortcuts": rules,
                "accounts": detected_to_json(&state),
            }))
        }
    }
}

fn with_config_note(config: &AppConfig, mut value: JsonValue) -> JsonValue {
    if let (Some(err), Some(map)) = (config.load_error.as_deref(), value.as_object_mut()) {
        map.insert("config_error".to_string(), json!(err));
    }
    value
}

fn memory_stores() -> Stores {
    let store = Arc::new(MemoryAccountStore::in_memory());
    let prefs: Arc<dyn PreferenceStore> = store.clone();
    let detected: Arc<dyn DetectedAccountStore> = store;
    (prefs, detected)
}

async fn open_stores(config: &AppConfig) -> Result<Stores> {
    let path = config
        .store_path
        .clone()
        .unwrap_or_else(|| state_dir().join("authslot.db"));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let path = path
        .to_str()
        .ok_or_else(|| anyhow!("store path is not valid UTF-8"))?;
    let store = Arc::new(SqliteAccountStore::open(path).await?);
    let prefs: Arc<dyn PreferenceStore> = store.clone();
    let detected: Arc<dyn DetectedAccountStore> = store;
    Ok((prefs, detected))
}

fn chromium_config(args: &BrowserArgs, config: &AppConfig) -> ChromiumConfig {
    ChromiumConfig {
        chrome_path: config.chrome_path.clone(),
        no_sandbox: config.no_sandbox,
        headless: args.headless,
        debug_ws_url: args.connect.clone().or_else(|| config.debug_ws_url.clone()),
    }
    .with_env()
}

fn email_shape(config: &AppConfig) -> EmailShape {
    EmailShape::new(&config.email_domains)
}

fn build_core(
    host: &ChromiumHost,
    config: &AppConfig,
    (prefs, detected): Stores,
    shortcuts: Arc<SharedShortcuts>,
) -> Arc<ServiceCore> {
    let engine = RedirectEngine::new(
        prefs.clone(),
        detected.clone(),
        host.navigator(),
        Arc::new(SystemClock),
    )
    .with_timing(EngineTiming {
        cooldown: config.cooldown,
        grace: config.grace,
    });
    let scanner = AccountScanner::new(
        host.surface_factory(),
        detected.clone(),
        ScanSettings {
            pages: config.scan_pages.clone(),
            settle: config.scan_settle,
            shape: email_shape(config),
        },
    );
    Arc::new(ServiceCore::new(
        Arc::new(engine),
        Arc::new(scanner),
        prefs,
        detected,
        shortcuts,
    ))
}

async fn run_daemon(args: &BrowserArgs, config: &AppConfig, stores: Stores) -> Result<()> {
    let host = ChromiumHost::start(chromium_config(args, config)).await?;
    let prefs = stores.0.clone();
    let shortcuts = Arc::new(SharedShortcuts::default());
    let core = build_core(&host, config, stores, shortcuts.clone());
    core.on_startup().await?;

    let service = AuthSlotService::start(core);
    let pref_watcher = spawn_preference_watcher(prefs, service.clone(), PREFERENCE_POLL);
    let watcher = TabWatcher::new(
        host,
        service,
        shortcuts,
        ObserverSettings {
            delays: config.observer_delays.clone(),
            shape: email_shape(config),
        },
    )
    .with_poll(config.poll);

    info!("watching browser tabs");
    let result = tokio::select! {
        _ = watcher.run() => Ok(()),
        signal = tokio::signal::ctrl_c() => signal.map_err(anyhow::Error::from),
    };
    pref_watcher.abort();
    info!("stopped");
    result
}

async fn run_scan(
    args: &BrowserArgs,
    config: &AppConfig,
    stores: Stores,
) -> Result<authslot_core::ScanReport> {
    let host = ChromiumHost::start(chromium_config(args, config)).await?;
    let core = build_core(&host, config, stores, Arc::new(SharedShortcuts::default()));
    let service = AuthSlotService::start(core);
    service.scan_for_accounts().await
}
