use keyflight::prelude::*;
use keyflight::TracingMetrics; // Explicit import
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing subscriber
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE) // Enable TRACE to see latency logs
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    println!("🔍 Initialized tracing...");

    // 2. Create a cache and a coalescer reporting through tracing
    let metrics = TracingMetrics::new().with_service_name("example-service");
    let cache: TtlCache<String, CacheError, TracingMetrics> =
        TtlCache::with_metrics(TtlCacheConfig::with_ttl(Duration::from_secs(60)), metrics.clone());
    let saves: RequestCoalescer<u64, CacheError, TracingMetrics> =
        RequestCoalescer::with_metrics(CoalescerConfig::default(), metrics);

    println!("\n⚡ Fetching value (Miss)...");
    let val = cache
        .get_or_fetch_default("user:1", || async { Ok("Alice".to_string()) })
        .await?;
    println!("   Got: {:?}", val);

    println!("\n⚡ Fetching again (Hit)...");
    let val = cache
        .get_or_fetch_default("user:1", || async { Ok("Bob".to_string()) })
        .await?;
    println!("   Got: {:?}", val);

    println!("\n⚡ Failing fetch...");
    let err = cache
        .get_or_fetch_default("user:99", || async { Err(CacheError::NotFound("user:99".into())) })
        .await;
    println!("   Got: {:?}", err);

    println!("\n⚡ Two saves in a row (second one throttled)...");
    saves.throttled_request("form:1", || async { Ok(1) }).await?;
    saves.throttled_request("form:1", || async { Ok(2) }).await?;

    cache.invalidate("user:1");

    println!("\n✅ Check your console output for structured logs!");

    Ok(())
}
