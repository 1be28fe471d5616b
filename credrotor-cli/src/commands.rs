//! Command implementations.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use credrotor_core::{
    config, select, ApplicationHandle, ApplicationLookup, CredentialRecord, Services,
    TokenProvider,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Load the configuration and build the live services.
pub fn load_services(explicit: Option<PathBuf>) -> Result<Services> {
    let path = config::resolve_config_path(explicit)
        .context("Failed to determine the config location")?;
    let config = config::load_from_path(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    Services::from_config(config).context("Failed to initialise credrotor services")
}

/// Bind the stored secret, keeping the configured one when nothing is stored.
async fn bind_active_secret(services: &Services) -> Result<()> {
    let tenant_id = &services.config().app_registration.tenant_id;
    let stored = services
        .store
        .get(tenant_id.as_str())
        .await
        .with_context(|| format!("Failed to read stored secret for {}", tenant_id))?;

    match stored {
        Some(secret) => {
            tracing::debug!("Using stored secret {}", secret.obscured());
            services.binding.set_secret(secret);
        }
        None if services.binding.secret().is_some() => {
            tracing::debug!("No stored secret, using the configured initial secret");
        }
        None => bail!(
            "No secret stored for tenant {} and no initial_secret configured",
            tenant_id
        ),
    }
    Ok(())
}

async fn resolve_application(services: &Services) -> Result<ApplicationHandle> {
    let client_id = &services.config().app_registration.client_id;
    match services.directory.find_application(client_id).await? {
        ApplicationLookup::Found(app) => Ok(app),
        ApplicationLookup::NotFound => bail!("No application registered with client id {}", client_id),
        ApplicationLookup::Ambiguous { matches } => {
            bail!("Client id {} matches {} applications", client_id, matches)
        }
    }
}

pub async fn show(services: &Services) -> Result<()> {
    bind_active_secret(services).await?;
    let app = resolve_application(services).await?;
    let records = services.directory.list_credentials(&app).await?;

    println!(
        "Application {} ({})",
        app.display_name.as_deref().unwrap_or("<unnamed>"),
        app.object_id
    );
    if records.is_empty() {
        println!("  No password credentials");
        return Ok(());
    }

    let prefix = &services.config().rotation.display_name_prefix;
    let now = Utc::now();
    let selection = select(&records, now, prefix);
    for record in &records {
        let active = selection.active.record().is_some_and(|a| a.id == record.id);
        println!("{}", render_record(record, prefix, active, now));
    }
    Ok(())
}

pub async fn rotate(services: &Services) -> Result<()> {
    let mut engine = services.engine();
    engine.start().await.context("Failed to establish a working secret")?;
    let outcome = engine.rotate_now().await?;
    println!("{:?}", outcome);
    Ok(())
}

pub async fn probe(services: &Services) -> Result<()> {
    bind_active_secret(services).await?;
    let client_id = &services.config().app_registration.client_id;
    match services.directory.find_application(client_id).await {
        Ok(_) => {
            println!("Secret for {} is valid", client_id);
            Ok(())
        }
        Err(e) => bail!("Secret for {} failed validation: {}", client_id, e),
    }
}

pub async fn token(services: &Services, scopes: Vec<String>, format: &str) -> Result<()> {
    bind_active_secret(services).await?;
    let scopes = if scopes.is_empty() {
        vec![default_scope(&services.config().app_registration.graph_url)]
    } else {
        scopes
    };
    let token = services.tokens.access_token(&scopes).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&token)?),
        _ => println!("{}", token.access_token.expose()),
    }
    Ok(())
}

pub async fn forget(services: &Services, force: bool) -> Result<()> {
    let tenant_id = &services.config().app_registration.tenant_id;
    if !force && !confirm(&format!("Delete the stored secret for tenant {}?", tenant_id))? {
        println!("Aborted");
        return Ok(());
    }
    services
        .store
        .delete(tenant_id.as_str())
        .await
        .with_context(|| format!("Failed to delete stored secret for {}", tenant_id))?;
    println!("Stored secret for tenant {} removed", tenant_id);
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn default_scope(graph_url: &str) -> String {
    format!("{}/.default", graph_url.trim_end_matches('/'))
}

fn render_record(record: &CredentialRecord, prefix: &str, active: bool, now: DateTime<Utc>) -> String {
    let mut markers = Vec::new();
    if record.is_expired_at(now) {
        markers.push("expired");
    }
    if record.display_name.starts_with(prefix) {
        markers.push("managed");
    }
    if active {
        markers.push("active");
    }

    let name = if record.display_name.is_empty() {
        "<unnamed>"
    } else {
        record.display_name.as_str()
    };
    let mut line = format!(
        "  {:<24} {}  {} - {}",
        name,
        record.id,
        format_time(record.start_time),
        format_time(record.end_time)
    );
    if !markers.is_empty() {
        line.push_str(&format!("  [{}]", markers.join(", ")));
    }
    line
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use credrotor_core::CredentialId;

    #[test]
    fn test_render_marks_expired_managed_active() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let record = CredentialRecord::new(
            CredentialId::generate(),
            "By credrotor 3",
            Some(now - Duration::days(2)),
            Some(now - Duration::days(1)),
        );

        let line = render_record(&record, "By credrotor", false, now);
        assert!(line.contains("By credrotor 3"));
        assert!(line.contains("2024-02-28 00:00"));
        assert!(line.ends_with("[expired, managed]"));

        let active = CredentialRecord::new(
            CredentialId::generate(),
            "By credrotor 4",
            None,
            Some(now + Duration::days(1)),
        );
        let line = render_record(&active, "By credrotor", true, now);
        assert!(line.ends_with("[managed, active]"));
        assert!(line.contains(" - - 2024-03-02"));
    }

    #[test]
    fn test_render_unmanaged_has_no_markers() {
        let now = Utc::now();
        let record = CredentialRecord::new(CredentialId::generate(), "", None, None);
        let line = render_record(&record, "By credrotor", false, now);
        assert!(line.contains("<unnamed>"));
        assert!(!line.contains('['));
    }

    #[test]
    fn test_default_scope() {
        assert_eq!(
            default_scope("https://graph.microsoft.com/"),
            "https://graph.microsoft.com/.default"
        );
    }
}
