//! End-to-end tunnel smoke check.
//!
//! Builds the full stack from the environment, acquires a pooled connection
//! through the bastion tunnel, and runs one round-trip query.
//!
//! Run with:
//!   BASTIONDB_CONFIG=bastiondb.json cargo run --bin tunnel_check
//!
//! With the env secret backend, the bundles come from variables like
//! BASTIONDB_BASTION_HOST, BASTIONDB_BASTION_USERNAME,
//! BASTIONDB_BASTION_PRIVATE_KEY, BASTIONDB_DATABASE_HOST and so on.

use std::time::Duration;

use anyhow::Result;
use bastiondb::config::Settings;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tunnel_check=debug".parse().unwrap())
                .add_directive("bastiondb=debug".parse().unwrap())
                .add_directive("warn".parse().unwrap()),
        )
        .init();

    smol::block_on(async {
        let settings = Settings::from_env().await?;
        let provider = bastiondb::wire(settings);
        provider.supervisor().start_health_loop();

        println!("→ acquiring connection through the tunnel");
        let pool = provider.acquire().await?;

        let (generation, local_addr) = provider
            .supervisor()
            .current()
            .await
            .expect("tunnel is up after a successful acquire");
        println!("✓ tunnel {generation} forwarding on {local_addr}");

        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
        println!("✓ SELECT 1 = {}", row.0);

        // Let one health tick land before tearing down.
        let events = provider.supervisor().subscribe_health();
        let tick = async {
            let event = events.recv().await;
            if let Ok(event) = event {
                println!(
                    "✓ health probe: healthy={} failures={}",
                    event.healthy, event.consecutive_failures
                );
            }
        };
        let give_up = async {
            smol::Timer::after(Duration::from_secs(35)).await;
            println!("→ no health tick within the window, skipping");
        };
        futures::future::select(std::pin::pin!(tick), std::pin::pin!(give_up)).await;

        let stats = provider.stats().await;
        println!("→ acquires={} failures={}", stats.acquires, stats.failures);

        pool.close().await;
        provider.shutdown().await;
        println!("✓ shut down cleanly");
        Ok(())
    })
}
