use keyflight::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // 1. Setup cache
    let cache: TtlCache<String> = TtlCache::with_defaults();

    // 2. Shared counter to track actual fetches
    let fetch_count = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    let key = "expensive_data";

    println!("Spawning 10 concurrent requests for key '{}'...", key);

    // 3. Launch concurrent requests
    for _ in 0..10 {
        let cache = cache.clone();
        let fetch_count = fetch_count.clone();

        handles.push(tokio::spawn(async move {
            cache
                .get_or_fetch(key, Duration::from_secs(30), move || async move {
                    // Simulate a slow upstream (100ms)
                    sleep(Duration::from_millis(100)).await;
                    let count = fetch_count.fetch_add(1, Ordering::SeqCst) + 1;
                    println!("Fetching... (count: {})", count);
                    Ok("fetched_value".to_string())
                })
                .await
        }));
    }

    // 4. Wait for all to complete
    for h in handles {
        assert_eq!(h.await??, "fetched_value");
    }

    // 5. Verify coalescing
    let total = fetch_count.load(Ordering::SeqCst);
    println!("Total fetches performed: {}", total);

    if total != 1 {
        panic!("Coalescing failed! Expected 1 fetch, got {}", total);
    } else {
        println!("SUCCESS: Request coalescing worked correctly.");
    }

    println!("Stats: {:?}", cache.stats());
    Ok(())
}
