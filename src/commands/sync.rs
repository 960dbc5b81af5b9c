use anyhow::Result;
use obj_store::{assoc::associate, url_util, ListOptions, ObjectStore};
use tracing::info;

use super::run_bounded;

/// Make the objects under `dst` match the objects under `src` by relative
/// path and size: copy what is missing or differs, delete what only
/// exists on the destination side.
pub async fn run(
    store: &ObjectStore,
    src: &str,
    dst: &str,
    max_concurrent: usize,
) -> Result<()> {
    let src_prefix = store.parse_url(src)?;
    let dst_prefix = store.parse_url(dst)?;

    let src_objects = store
        .list_prefix(&src_prefix, &ListOptions::default())
        .await?;
    let dst_objects = store
        .list_prefix(&dst_prefix, &ListOptions::default())
        .await?;

    let pairs = associate(&src_prefix, &src_objects, &dst_prefix, &dst_objects);

    enum Action {
        Copy(obj_store::Object),
        Delete(obj_store::Object),
    }

    let mut actions = Vec::new();
    for pair in pairs {
        match (pair.left, pair.right) {
            (Some(src), None) => actions.push(Action::Copy(src)),
            (Some(src), Some(dst)) if src.metadata.size != dst.metadata.size => {
                actions.push(Action::Copy(src))
            }
            (None, Some(dst)) => actions.push(Action::Delete(dst)),
            _ => {}
        }
    }
    info!(actions = actions.len(), "synchronizing prefixes");

    run_bounded(actions, max_concurrent, |action| {
        let src_prefix = src_prefix.clone();
        let dst_prefix = dst_prefix.clone();
        async move {
            match action {
                Action::Copy(object) => {
                    let dst = url_util::rebase(&dst_prefix, &src_prefix, &object.url);
                    store.copy(&object.url, &dst).await?;
                }
                Action::Delete(object) => store.delete(&object.url).await?,
            }
            Ok(())
        }
    })
    .await
}
