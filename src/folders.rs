use std::collections::BTreeMap;

use crate::error::{GatewayError, GatewayResult};

/// Allowlisted folder labels and the drive paths they resolve to.
///
/// Labels are opaque: the only transformation is underscore to space, and a
/// label carrying a path separator or `..` is never accepted.
#[derive(Debug, Clone)]
pub struct FolderMap {
    paths: BTreeMap<String, String>,
}

fn is_plain_label(label: &str) -> bool {
    !label.trim().is_empty()
        && !label.contains(['/', '\\'])
        && !label.contains("..")
        && !label.chars().any(char::is_control)
}

impl FolderMap {
    pub fn new<I, S>(base_folder: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let base = base_folder.trim_matches('/');
        let paths = labels
            .into_iter()
            .filter_map(|label| {
                let label = label.as_ref().trim();
                if !is_plain_label(label) {
                    tracing::warn!(label, "ignoring folder label that is not a plain name");
                    return None;
                }
                Some((label.to_string(), join_label(base, label)))
            })
            .collect();
        Self { paths }
    }

    pub fn resolve(&self, label: &str) -> GatewayResult<&str> {
        self.paths
            .get(label)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::validation(format!("Unknown folder `{label}`")))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }
}

/// Drive path for a label under `base`. Callers are expected to have
/// checked the label already.
pub fn join_label(base: &str, label: &str) -> String {
    let name = label.replace('_', " ");
    if base.is_empty() {
        name
    } else {
        format!("{base}/{name}")
    }
}
