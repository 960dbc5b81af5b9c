use std::collections::HashMap;

use url::Url;

use crate::{types::Object, url_util::relative_path};

/// One relative path under either of two listed prefixes.
///
/// Exactly one side absent means the object exists on that side only; both
/// present means the path exists on both sides and a comparison (typically
/// size) decides what to do about it.
#[derive(Debug, Clone)]
pub struct ObjectPair {
    pub path: String,
    pub left: Option<Object>,
    pub right: Option<Object>,
}

/// Associates two prefix listings by relative path. Relative paths are
/// computed against each side's own prefix, so two different backends can
/// be associated as long as their path layouts line up.
pub fn associate(
    left_prefix: &Url,
    left_objects: &[Object],
    right_prefix: &Url,
    right_objects: &[Object],
) -> Vec<ObjectPair> {
    let right_index: HashMap<&str, &Object> = right_objects
        .iter()
        .map(|o| (relative_path(right_prefix, &o.url), o))
        .collect();
    let left_index: HashMap<&str, &Object> = left_objects
        .iter()
        .map(|o| (relative_path(left_prefix, &o.url), o))
        .collect();

    let mut pairs = Vec::with_capacity(left_objects.len() + right_objects.len());

    for left in left_objects {
        let path = relative_path(left_prefix, &left.url);
        pairs.push(ObjectPair {
            path: path.to_string(),
            left: Some(left.clone()),
            right: right_index.get(path).map(|o| (*o).clone()),
        });
    }

    for right in right_objects {
        let path = relative_path(right_prefix, &right.url);
        if !left_index.contains_key(path) {
            pairs.push(ObjectPair {
                path: path.to_string(),
                left: None,
                right: Some(right.clone()),
            });
        }
    }

    pairs
}
