use anyhow::Result;
use clap::Parser;
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use authslot_core::{AccountSlot, DetectedAccountState};
use authslot_rules::{ServiceRuleTable, extract_slot_from, is_identity_surface, parse_url};

use super::{CLI_SCHEMA_VERSION, Cli, CliCommand, shell_split};

pub(crate) fn output_ok(value: JsonValue) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": true,
            "result": value
        }))?
    );
    Ok(())
}

pub(crate) fn output_error(message: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": false,
            "error": message
        }))?
    );
    Ok(())
}

pub(crate) fn resolve_cli_command(cli: Cli) -> Result<Option<CliCommand>> {
    if let Some(cmd) = cli.cmd {
        let parts = shell_split(&cmd).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        if parts.is_empty() {
            return Ok(None);
        }
        let mut args = Vec::with_capacity(parts.len() + 1);
        args.push("authslot".to_string());
        args.extend(parts);
        let parsed = Cli::try_parse_from(args).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        return Ok(parsed.command);
    }
    Ok(cli.command)
}

pub(crate) fn detected_to_json(state: &DetectedAccountState) -> JsonValue {
    let mut emails = JsonMap::new();
    for (slot, email) in &state.emails {
        emails.insert(slot.to_string(), json!(email));
    }
    json!({
        "detectedAccounts": state.count,
        "accountEmails": emails,
    })
}

/// Dry run of the rewrite step for `raw`, ignoring guard and preferences.
pub(crate) fn rewrite_preview(raw: &str, slot: AccountSlot) -> JsonValue {
    let Some(url) = parse_url(raw) else {
        return json!({
            "url": raw,
            "current_slot": null,
            "service": null,
            "special_case": null,
            "identity_surface": false,
            "rewritten": null,
        });
    };
    let table = ServiceRuleTable::google();
    let rule = table.for_url(&url);
    let rewritten = rule
        .and_then(|r| r.rewrite(&url, slot))
        .map(|u| u.to_string());
    json!({
        "url": raw,
        "target_slot": slot.to_string(),
        "current_slot": extract_slot_from(&url).map(|s| s.to_string()),
        "service": rule.map(|r| r.name),
        "special_case": rule.and_then(|r| r.special_case_for(&url, slot)),
        "identity_surface": is_identity_surface(&url),
        "rewritten": rewritten,
    })
}
