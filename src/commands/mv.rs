use anyhow::Result;
use obj_store::ObjectStore;

use super::destination_for;

pub async fn run(store: &ObjectStore, src: &str, dst: &str) -> Result<()> {
    let src = store.parse_url(src)?;
    let dst = destination_for(&src, &store.parse_url(dst)?)?;
    store.move_object(&src, &dst).await?;
    Ok(())
}
