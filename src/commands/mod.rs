pub mod copy;
pub mod copy_prefix;
pub mod diff;
pub mod list;
pub mod mv;
pub mod read;
pub mod remove;
pub mod remove_prefix;
pub mod sync;

use anyhow::{anyhow, Result};
use futures::{stream, StreamExt};
use url::Url;

/// Resolve the effective destination of a single-object transfer: a
/// destination ending in `/` is treated as a directory and the source
/// basename is appended.
pub fn destination_for(src: &Url, dst: &Url) -> Result<Url> {
    if !dst.path().ends_with('/') && !dst.as_str().ends_with('/') {
        return Ok(dst.clone());
    }
    let basename = src
        .path()
        .rsplit('/')
        .find(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("cannot derive a file name from {src}"))?;
    Ok(dst.join(basename)?)
}

/// Run one fallible async action per item with bounded concurrency,
/// keeping going past individual failures and reporting them all at
/// the end.
pub async fn run_bounded<T, F, Fut>(items: Vec<T>, limit: usize, action: F) -> Result<()>
where
    F: Fn(T) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut errors: Vec<anyhow::Error> = stream::iter(items.into_iter().map(action))
        .buffer_unordered(limit.max(1))
        .filter_map(|result| async move { result.err() })
        .collect()
        .await;

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        n => {
            let joined = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(anyhow!("{n} operations failed: {joined}"))
        }
    }
}

pub fn human_bytes(size: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_destination_gets_the_source_basename() {
        let src = Url::parse("s3://bucket/data/report.csv").unwrap();
        let dir = Url::parse("file:///tmp/out/").unwrap();
        assert_eq!(
            destination_for(&src, &dir).unwrap().as_str(),
            "file:///tmp/out/report.csv"
        );

        let exact = Url::parse("file:///tmp/out/renamed.csv").unwrap();
        assert_eq!(destination_for(&src, &exact).unwrap(), exact);
    }

    #[test]
    fn sizes_render_in_binary_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MiB");
    }

    #[tokio::test]
    async fn bounded_runner_reports_every_failure() {
        let err = run_bounded(vec![1, 2, 3, 4], 2, |n| async move {
            if n % 2 == 0 {
                Err(anyhow!("item {n}"))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("2 operations failed"));
    }
}
