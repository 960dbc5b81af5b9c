use anyhow::Result;
use obj_store::ObjectStore;

pub async fn run(store: &ObjectStore, url: &str) -> Result<()> {
    let url = store.parse_url(url)?;
    store.delete(&url).await?;
    Ok(())
}
