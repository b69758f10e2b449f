use std::path::Path;

use anyhow::Context;
use vigil_core::{ConfigError, PolicySettings};

use super::load;

/// Keep the last four characters of a secret.
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}

fn redacted(mut settings: PolicySettings) -> PolicySettings {
    settings.captcha.api_key = settings.captcha.api_key.as_deref().map(mask);
    settings
}

pub fn show(source: Option<&Path>) -> anyhow::Result<()> {
    let config = load(source)?;
    let settings = redacted(config.snapshot());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

pub fn get(source: Option<&Path>, path: &str) -> anyhow::Result<()> {
    let config = load(source)?;
    if path.starts_with("captcha.apiKey") {
        let key = config.snapshot().captcha.api_key;
        println!("{}", serde_json::to_string(&key.as_deref().map(mask))?);
        return Ok(());
    }
    let value = config
        .get(path)
        .with_context(|| format!("unknown config path: {path}"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub fn validate(source: Option<&Path>) -> anyhow::Result<()> {
    match load(source) {
        Ok(_) => {
            println!("✓ configuration is valid");
            Ok(())
        }
        Err(ConfigError::Validation(violations)) => {
            for violation in &violations {
                println!("✗ {violation}");
            }
            anyhow::bail!("{} invariant violation(s)", violations.len())
        }
        Err(e) => Err(e.into()),
    }
}
