use url::Url;

use crate::error::{StoreError, StoreResult};

/// Replaces a URL's scheme, tolerating special/non-special transitions that
/// `Url::set_scheme` rejects by reparsing the whole locator.
pub fn with_scheme(url: &Url, scheme: &str) -> StoreResult<Url> {
    if url.scheme() == scheme {
        return Ok(url.clone());
    }

    let mut rewritten = url.clone();
    if rewritten.set_scheme(scheme).is_ok() {
        return Ok(rewritten);
    }

    let s = url.as_str();
    let rest = &s[url.scheme().len()..];
    Url::parse(&format!("{scheme}{rest}")).map_err(StoreError::from)
}

/// Rebases `src` from `src_base` onto `dst_base`, preserving the relative
/// path. Scheme and authority come from `dst_base`.
pub fn rebase(dst_base: &Url, src_base: &Url, src: &Url) -> Url {
    let rel = src
        .path()
        .strip_prefix(src_base.path())
        .unwrap_or_else(|| src.path());

    let mut dst = dst_base.clone();
    if rel.is_empty() {
        return dst;
    }

    let joined = format!(
        "{}/{}",
        dst_base.path().trim_end_matches('/'),
        rel.trim_start_matches('/')
    );
    dst.set_path(&joined);
    dst
}

/// The object's path relative to a listing prefix, used to associate
/// objects across two prefixes.
pub fn relative_path<'a>(prefix: &Url, object_url: &'a Url) -> &'a str {
    object_url
        .path()
        .strip_prefix(prefix.path())
        .unwrap_or_else(|| object_url.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_scheme_handles_special_to_custom() {
        let u = Url::parse("file:///data/a.bin").unwrap();
        let r = with_scheme(&u, "mem").unwrap();
        assert_eq!(r.scheme(), "mem");
        assert_eq!(r.path(), "/data/a.bin");
    }

    #[test]
    fn rebase_swaps_prefixes() {
        let src_base = Url::parse("file:///tmp/src").unwrap();
        let dst_base = Url::parse("s3://bucket/backup/").unwrap();
        let src = Url::parse("file:///tmp/src/sub/obj.bin").unwrap();

        let dst = rebase(&dst_base, &src_base, &src);
        assert_eq!(dst.as_str(), "s3://bucket/backup/sub/obj.bin");
    }

    #[test]
    fn relative_path_strips_prefix_path_only() {
        let prefix = Url::parse("s3://bucket/data/").unwrap();
        let obj = Url::parse("s3://bucket/data/x/y").unwrap();
        assert_eq!(relative_path(&prefix, &obj), "x/y");
    }
}
