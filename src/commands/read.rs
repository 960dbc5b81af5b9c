use anyhow::Result;
use obj_store::ObjectStore;
use tokio::io::AsyncWriteExt;

pub async fn run(store: &ObjectStore, url: &str) -> Result<()> {
    let url = store.parse_url(url)?;
    let mut reader = store.reader(&url).await?;
    let mut stdout = tokio::io::stdout();

    let result = async {
        while let Some(chunk) = reader.next_chunk().await? {
            stdout.write_all(&chunk).await?;
        }
        stdout.flush().await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    let close_result = reader.close().await;
    result?;
    close_result?;
    Ok(())
}
