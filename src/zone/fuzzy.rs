//! Edit-distance matching for zone names that differ only in spelling
//! between what a resource records and what a backend API expects.

/// Levenshtein distance between `a` and `b`, counted in Unicode scalar
/// values.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let target: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=target.len()).collect();

    for (row, source_char) in a.chars().enumerate() {
        let mut current = Vec::with_capacity(previous.len());
        current.push(row + 1);
        for (window, target_char) in previous.windows(2).zip(&target) {
            let &[diagonal, above] = window else {
                continue;
            };
            let left = current.last().copied().unwrap_or_default();
            let substitution = diagonal + usize::from(source_char != *target_char);
            current.push(substitution.min(above + 1).min(left + 1));
        }
        previous = current;
    }

    previous.last().copied().unwrap_or_default()
}

/// The candidate closest to `desired` by edit distance. Ties go to the
/// earliest candidate; `None` when there are no candidates.
#[must_use]
pub fn closest_zone<'a, I>(desired: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .min_by_key(|candidate| levenshtein(desired, candidate))
}
