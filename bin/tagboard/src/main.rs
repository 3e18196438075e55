//! # Tagboard
//!
//! Prepares a board database: applies migrations, makes sure the owner
//! account exists and, on request, issues an invitation token.

use anyhow::{bail, Context};
use secrecy::ExposeSecret;
use tb_auth_argon::ArgonCredentials;
use tb_configs::{LogSettings, Settings};
use tb_db_sqlite::Database;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Number of sign-ups the printed invitation allows (`-1` for unlimited).
const INVITE_USES_VAR: &str = "TAGBOARD_INVITE_USES";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings.log);

    let core = settings.core_config();
    let credentials = ArgonCredentials::new(core.hash_timeout).into_provider();
    let db = Database::open(
        &settings.database.url,
        settings.database.max_connections,
        core,
        credentials,
    )
    .await
    .context("opening database")?;

    let password = settings
        .owner
        .password
        .as_ref()
        .map(|p| p.expose_secret())
        .unwrap_or_default();
    let created = db.bootstrap_owner(password).await.with_context(|| {
        format!(
            "creating owner account {:?} (set TAGBOARD__OWNER__PASSWORD)",
            settings.owner.username
        )
    })?;
    if created {
        tracing::info!(owner = %settings.owner.username, "board initialized");
    }

    let result = match std::env::var(INVITE_USES_VAR) {
        Ok(uses) => invite(&db, password, &uses).await,
        Err(_) => Ok(()),
    };
    db.close().await;
    result
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| log.filter.as_str().into());
    tracing_subscriber::registry()
        .with(filter)
        .with(log.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!log.json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Signs in as the owner, prints a fresh token and signs out again.
async fn invite(db: &Database, password: &str, uses: &str) -> anyhow::Result<()> {
    let uses: i64 = uses
        .trim()
        .parse()
        .with_context(|| format!("{INVITE_USES_VAR}={uses:?} is not a number"))?;
    if password.is_empty() {
        bail!("issuing an invitation needs TAGBOARD__OWNER__PASSWORD");
    }
    let owner = db.config().owner_username.clone();

    let session = db
        .acquire_guest(async |tx| tx.signin(&owner, password, "tagboard-cli").await)
        .await
        .context("signing in as owner")?;
    let token = db
        .acquire(&session.token, async |tx| {
            let token = tx.create_token(uses).await?;
            tx.signout().await?;
            Ok(token)
        })
        .await
        .context("creating invitation")?;

    tracing::info!(uses, "invitation issued");
    println!("{}", token.token);
    Ok(())
}
