use keyflight::prelude::*;
use std::time::Duration;

#[derive(Debug, RequestKey)]
#[request_key(namespace = "users")]
struct UserKey {
    tenant_id: u64,
    user_id: u64,
}

#[derive(Debug, RequestKey)]
#[request_key(separator = "/")]
struct PathKey {
    folder: String,
    file: String,
    #[request_key(skip)]
    _metadata: String,
}

#[derive(Debug, RequestKey)]
struct EmptyKey;

#[tokio::main]
async fn main() -> Result<()> {
    let key = UserKey {
        tenant_id: 100,
        user_id: 456,
    };

    println!("UserKey: {}", key.key_body());
    println!("Full Key: {}", key.render());
    assert_eq!(key.key_body(), "100:456");
    assert_eq!(key.render(), "users:100:456");

    let path = PathKey {
        folder: "docs".to_string(),
        file: "report.pdf".to_string(),
        _metadata: "hidden".to_string(),
    };

    println!("PathKey: {}", path.key_body());
    assert_eq!(path.key_body(), "docs/report.pdf");

    let empty = EmptyKey;
    println!("EmptyKey: '{}'", empty.key_body());
    assert_eq!(empty.key_body(), "");

    // Derived keys plug straight into the cache
    let cache: TtlCache<String> = TtlCache::with_defaults();
    let name = cache
        .get_or_fetch(&key, Duration::from_secs(30), || async {
            Ok("Alice".to_string())
        })
        .await?;
    assert_eq!(name, "Alice");
    assert_eq!(cache.stats().cached_keys, vec!["users:100:456".to_string()]);

    println!("\n✅ All keys generated correctly via #[derive(RequestKey)]");
    Ok(())
}
