mod report;
mod salesforce;
mod syncer;

use tidemark_config::{init_tracing, AppConfig, SyncPlan};
use tidemark_db::PgTargetStore;

use crate::salesforce::client::{SalesforceClient, SalesforceClientConfig};
use crate::syncer::DataSyncer;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env().expect("invalid configuration");
    init_tracing(&config.log_level);

    tracing::info!(service = "tidemark-sync", "starting");

    let plan = SyncPlan::from_file(&config.sync_plan_path).expect("failed to load sync plan");
    tracing::info!(
        path = %config.sync_plan_path,
        tables = plan.tables.len(),
        "sync plan loaded"
    );

    let sf_config = SalesforceClientConfig::from_env().expect("invalid salesforce configuration");
    tracing::info!(
        login_url = %sf_config.login_url,
        api_version = %sf_config.api_version,
        include_deleted = sf_config.include_deleted,
        "salesforce connector configured"
    );
    let client = SalesforceClient::new(sf_config).expect("failed to create salesforce client");

    let store = PgTargetStore::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Nothing is extracted without a valid token.
    if let Err(e) = client.authenticate().await {
        tracing::error!(error = %e, "aborting run");
        store.disconnect().await;
        std::process::exit(1);
    }

    let mut syncer = DataSyncer::new(client, store);
    let summary = syncer.sync_all(&plan.tables).await;

    let (_, store) = syncer.into_parts();
    store.disconnect().await;

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "failed to serialize run summary"),
    }

    tracing::info!(success = summary.success, "sync service finished");
    if !summary.success {
        std::process::exit(1);
    }
}
