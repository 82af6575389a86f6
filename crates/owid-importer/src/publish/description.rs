use std::sync::LazyLock;

use regex::Regex;

use crate::model::OverwritePolicy;

static CATEGORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\[\s*category\s*:[^\]]*\]\]").unwrap());

/// Computes the description to store, given the freshly rendered one and
/// whatever the repository currently holds.
pub fn merge_description(policy: OverwritePolicy, new: &str, remote: Option<&str>) -> String {
    let Some(remote) = remote else {
        return new.to_string();
    };
    match policy {
        OverwritePolicy::All => new.to_string(),
        OverwritePolicy::OnlyFile => remote.to_string(),
        OverwritePolicy::AllExceptCategories => {
            let mut merged = new.trim_end().to_string();
            for category in CATEGORY.find_iter(remote) {
                if !merged.contains(category.as_str()) {
                    merged.push('\n');
                    merged.push_str(category.as_str());
                }
            }
            merged
        }
    }
}
