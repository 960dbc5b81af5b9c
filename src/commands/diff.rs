use anyhow::Result;
use obj_store::{assoc::associate, ListOptions, ObjectStore};

use super::human_bytes;

pub async fn run(store: &ObjectStore, left: &str, right: &str) -> Result<()> {
    let left_prefix = store.parse_url(left)?;
    let right_prefix = store.parse_url(right)?;

    let left_objects = store
        .list_prefix(&left_prefix, &ListOptions::default())
        .await?;
    let right_objects = store
        .list_prefix(&right_prefix, &ListOptions::default())
        .await?;

    let pairs = associate(&left_prefix, &left_objects, &right_prefix, &right_objects);

    let mut differences = 0usize;
    for pair in &pairs {
        match (&pair.left, &pair.right) {
            (Some(_), None) => {
                differences += 1;
                println!("RIGHT MISSING  {}", pair.path);
            }
            (None, Some(_)) => {
                differences += 1;
                println!("LEFT MISSING   {}", pair.path);
            }
            (Some(l), Some(r)) if l.metadata.size != r.metadata.size => {
                differences += 1;
                println!(
                    "SIZE DIFFERS   {} ({} vs {})",
                    pair.path,
                    human_bytes(l.metadata.size),
                    human_bytes(r.metadata.size)
                );
            }
            _ => {}
        }
    }

    println!(
        "{} objects compared, {} difference{}",
        pairs.len(),
        differences,
        if differences == 1 { "" } else { "s" }
    );
    Ok(())
}
