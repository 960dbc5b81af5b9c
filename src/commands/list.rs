use anyhow::Result;
use obj_store::{ListOptions, ObjectStore};

use super::human_bytes;

pub async fn run(store: &ObjectStore, prefix: &str, start_after: Option<String>) -> Result<()> {
    let prefix = store.parse_url(prefix)?;
    let opts = match start_after {
        Some(after) => ListOptions::start_after(after),
        None => ListOptions::default(),
    };

    let objects = store.list_prefix(&prefix, &opts).await?;
    let mut total = 0u64;
    for object in &objects {
        let modified = object
            .metadata
            .modified
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>10}  {:<25}  {}",
            human_bytes(object.metadata.size),
            modified,
            object.url
        );
        total += object.metadata.size;
    }
    println!("{} objects, {}", objects.len(), human_bytes(total));
    Ok(())
}
