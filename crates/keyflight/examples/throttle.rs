use keyflight::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

async fn search(term: &'static str, started: Instant) -> Result<Vec<String>> {
    println!("  search('{}') runs at +{:?}", term, started.elapsed());
    Ok(vec![format!("{term}-1"), format!("{term}-2")])
}

#[tokio::main]
async fn main() -> Result<()> {
    let searches: RequestCoalescer<Vec<String>> =
        RequestCoalescer::new(CoalescerConfig::with_throttle(Duration::from_millis(500)));
    let started = Instant::now();

    println!("⚡ First search runs immediately");
    let first = searches
        .throttled_request("search:foo", move || search("foo", started))
        .await?;
    println!("   Got: {:?}", first);

    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\n⚡ Three more searches 100ms later share one call, delayed to +500ms");
    let (a, b, c) = tokio::join!(
        searches.throttled_request("search:foo", move || search("foo", started)),
        searches.throttled_request("search:foo", move || search("foo", started)),
        searches.throttled_request("search:foo", move || search("foo", started)),
    );
    assert_eq!(a?, b.clone()?);
    assert_eq!(b?, c?);
    assert!(started.elapsed() >= Duration::from_millis(500));

    println!("\n⚡ Another key is not throttled");
    searches
        .throttled_request("search:bar", move || search("bar", started))
        .await?;

    println!("\n⚡ clear() forgets the window");
    searches.clear("search:foo");
    searches
        .throttled_request("search:foo", move || search("foo", started))
        .await?;

    println!("\nStats: {:?}", searches.stats());
    Ok(())
}
