/// `"{prefix} {n}"` with the lowest `n >= 1` not already in `existing`.
///
/// Freed suffixes are reused: with "Scatter Plot 1" and "Scatter Plot 3"
/// taken, the next name is "Scatter Plot 2".
pub fn unique_name<'a>(existing: impl IntoIterator<Item = &'a str>, prefix: &str) -> String {
    let taken: std::collections::BTreeSet<&str> = existing.into_iter().collect();
    (1..)
        .map(|i| format!("{prefix} {i}"))
        .find(|name| !taken.contains(name.as_str()))
        .unwrap_or_else(|| prefix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_free_suffix_wins() {
        assert_eq!(unique_name(Vec::<&str>::new(), "Heat Map"), "Heat Map 1");
        assert_eq!(
            unique_name(["Heat Map 1", "Heat Map 3"], "Heat Map"),
            "Heat Map 2"
        );
        assert_eq!(unique_name(["Other 1"], "Heat Map"), "Heat Map 1");
    }
}
