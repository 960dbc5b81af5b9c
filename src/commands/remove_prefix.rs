use anyhow::Result;
use obj_store::{ListOptions, ObjectStore};
use tracing::info;

use super::run_bounded;

pub async fn run(store: &ObjectStore, prefix: &str, max_concurrent: usize) -> Result<()> {
    let prefix = store.parse_url(prefix)?;

    let objects = store.list_prefix(&prefix, &ListOptions::default()).await?;
    info!(count = objects.len(), "removing objects");

    run_bounded(objects, max_concurrent, |object| async move {
        store.delete(&object.url).await?;
        Ok(())
    })
    .await
}
