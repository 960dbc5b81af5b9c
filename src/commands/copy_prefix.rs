use anyhow::Result;
use obj_store::{url_util, ListOptions, ObjectStore};
use tracing::info;

use super::run_bounded;

pub async fn run(
    store: &ObjectStore,
    src_prefix: &str,
    dst_prefix: &str,
    max_concurrent: usize,
) -> Result<()> {
    let src_prefix = store.parse_url(src_prefix)?;
    let dst_prefix = store.parse_url(dst_prefix)?;

    let objects = store
        .list_prefix(&src_prefix, &ListOptions::default())
        .await?;
    info!(count = objects.len(), "copying objects");

    run_bounded(objects, max_concurrent, |object| {
        let src_prefix = src_prefix.clone();
        let dst_prefix = dst_prefix.clone();
        async move {
            let dst = url_util::rebase(&dst_prefix, &src_prefix, &object.url);
            store.copy(&object.url, &dst).await?;
            Ok(())
        }
    })
    .await
}
