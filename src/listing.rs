//! Listing filter and sort helpers for the file browser

use serde::{Deserialize, Serialize};

use crate::provider::Entry;

/// Sort order for directory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Name,
    NameDesc,
    Size,
    SizeDesc,
    Modified,
    ModifiedDesc,
    /// By extension, then name
    Type,
    TypeDesc,
}

/// Filter for directory listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    /// Show hidden files (starting with .)
    #[serde(default)]
    pub show_hidden: bool,
    /// File name pattern to match (glob-style)
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub sort: SortOrder,
}

fn extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

/// Filter and sort `entries`. Directory-like entries always come first.
///
/// An invalid glob pattern is ignored rather than hiding everything.
pub fn apply_filter(mut entries: Vec<Entry>, filter: &ListFilter) -> Vec<Entry> {
    if !filter.show_hidden {
        entries.retain(|e| !e.name.starts_with('.'));
    }

    if let Some(ref pattern) = filter.pattern {
        match glob::Pattern::new(pattern) {
            Ok(glob_pattern) => {
                entries.retain(|e| e.is_directory() || glob_pattern.matches(&e.name))
            }
            Err(e) => tracing::debug!("Ignoring invalid list pattern {:?}: {}", pattern, e),
        }
    }

    sort_entries(&mut entries, filter.sort);
    entries
}

/// Sort in place, directories first
pub fn sort_entries(entries: &mut [Entry], order: SortOrder) {
    entries.sort_by(|a, b| {
        let a_is_dir = a.is_directory();
        let b_is_dir = b.is_directory();

        if a_is_dir != b_is_dir {
            return b_is_dir.cmp(&a_is_dir);
        }

        let by_name = || a.name.to_lowercase().cmp(&b.name.to_lowercase());
        match order {
            SortOrder::Name => by_name(),
            SortOrder::NameDesc => by_name().reverse(),
            SortOrder::Size => a.size.cmp(&b.size).then_with(by_name),
            SortOrder::SizeDesc => b.size.cmp(&a.size).then_with(by_name),
            SortOrder::Modified => a.modified.cmp(&b.modified).then_with(by_name),
            SortOrder::ModifiedDesc => b.modified.cmp(&a.modified).then_with(by_name),
            SortOrder::Type => extension(&a.name)
                .cmp(&extension(&b.name))
                .then_with(by_name),
            SortOrder::TypeDesc => extension(&b.name)
                .cmp(&extension(&a.name))
                .then_with(by_name),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn sample() -> Vec<Entry> {
        vec![
            Entry::file("b.txt", 30),
            Entry::directory("zdir"),
            Entry::file(".hidden", 1),
            Entry::file("a.rs", 10),
            Entry::directory("adir"),
            Entry::file("C.md", 20),
        ]
    }

    #[test]
    fn test_hidden_and_directories_first() {
        let entries = apply_filter(sample(), &ListFilter::default());
        assert_eq!(names(&entries), vec!["adir", "zdir", "a.rs", "b.txt", "C.md"]);

        let all = apply_filter(
            sample(),
            &ListFilter {
                show_hidden: true,
                ..Default::default()
            },
        );
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn test_sort_orders() {
        let by_size = apply_filter(
            sample(),
            &ListFilter {
                sort: SortOrder::SizeDesc,
                ..Default::default()
            },
        );
        assert_eq!(names(&by_size), vec!["adir", "zdir", "b.txt", "C.md", "a.rs"]);

        let by_type = apply_filter(
            sample(),
            &ListFilter {
                sort: SortOrder::Type,
                ..Default::default()
            },
        );
        assert_eq!(names(&by_type), vec!["adir", "zdir", "C.md", "a.rs", "b.txt"]);
    }

    #[test]
    fn test_pattern_keeps_directories() {
        let entries = apply_filter(
            sample(),
            &ListFilter {
                pattern: Some("*.txt".into()),
                ..Default::default()
            },
        );
        assert_eq!(names(&entries), vec!["adir", "zdir", "b.txt"]);

        let invalid = apply_filter(
            sample(),
            &ListFilter {
                pattern: Some("[".into()),
                ..Default::default()
            },
        );
        assert_eq!(invalid.len(), 5);
    }
}
