//! `sipcheck validate`: parse a test definition and show what it would do

use anyhow::{Context, Result};
use serde::Serialize;
use sipcheck_scenario_core::{EngineConfig, Role, RoleConfig, TestDefinition, TestParser};
use tracing::warn;

use crate::cli::ValidateArgs;

#[derive(Debug, Serialize)]
struct ValidateReport<'a> {
    definition: &'a TestDefinition,
    warnings: &'a [String],
}

/// Definition-level warnings plus accounts the configuration cannot resolve
pub fn collect_warnings(def: &TestDefinition, config: &EngineConfig) -> Vec<String> {
    let mut warnings = def.validate();

    for role in [Role::Caller, Role::Receiver] {
        let account = &def.role(role).account;
        if !account.is_empty() && config.find_account(account).is_none() {
            warnings.push(format!(
                "{} account '{}' is not configured",
                role, account
            ));
        }
    }

    warnings
}

fn print_role(role: Role, config: &RoleConfig) {
    let mut line = format!("  {}: account '{}'", role, config.account);
    if !config.uri.is_empty() {
        line.push_str(&format!(" -> {}", config.uri));
    }
    if config.auto_answer {
        line.push_str(", auto-answer");
    }
    line.push_str(&format!(", timeout {}s", config.timeout_secs));
    println!("{}", line);

    for (i, action) in config.actions.iter().enumerate() {
        println!("    {}. {}", i + 1, action);
    }
}

fn print_plan(def: &TestDefinition, warnings: &[String]) {
    println!("Test: {}", def.name);
    if !def.description.is_empty() {
        println!("  {}", def.description);
    }
    println!("  Timeout: {}s", def.timeout_secs);

    // Receiver actions run first
    print_role(Role::Receiver, &def.receiver);
    print_role(Role::Caller, &def.caller);

    let mut expect = vec![if def.expect.connected {
        "connected".to_string()
    } else {
        "not required to connect".to_string()
    }];
    if def.expect.beep_count > 0 {
        let mut beeps = format!("{} beeps", def.expect.beep_count);
        if def.expect.beep_frequency > 0.0 {
            beeps.push_str(&format!(" @ {:.0} Hz", def.expect.beep_frequency));
        }
        expect.push(beeps);
    }
    println!("  Expect: {}", expect.join(", "));

    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
}

/// Returns whether the definition is acceptable
pub fn run(args: &ValidateArgs, config: &EngineConfig) -> Result<bool> {
    let def = TestParser::new()
        .with_max_actions(config.max_actions_per_role)
        .parse_file(&args.file)
        .with_context(|| format!("Invalid test definition {}", args.file.display()))?;

    let warnings = collect_warnings(&def, config);
    for warning in &warnings {
        warn!("{}", warning);
    }

    if args.json {
        let report = ValidateReport {
            definition: &def,
            warnings: &warnings,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_plan(&def, &warnings);
    }

    Ok(!(args.strict && !warnings.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipcheck_scenario_core::{parse_test_str, AccountConfig};

    #[test]
    fn test_unconfigured_accounts_are_reported() {
        let def = parse_test_str(
            r#"{ "caller": { "account": "alice", "uri": "sip:bob@pbx" },
                 "receiver": { "account": "bob", "auto_answer": true } }"#,
        )
        .unwrap();
        let config =
            EngineConfig::default().with_account(AccountConfig::new("alice", "1001", "", "pbx"));

        let warnings = collect_warnings(&def, &config);
        assert_eq!(warnings, vec!["receiver account 'bob' is not configured".to_string()]);
    }

    #[test]
    fn test_strict_mode_rejects_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.json");
        std::fs::write(&path, r#"{ "name": "bare" }"#).unwrap();

        let lenient = ValidateArgs {
            file: path.clone(),
            strict: false,
            json: true,
        };
        assert!(run(&lenient, &EngineConfig::default()).unwrap());

        let strict = ValidateArgs {
            file: path,
            strict: true,
            json: true,
        };
        assert!(!run(&strict, &EngineConfig::default()).unwrap());
    }
}
