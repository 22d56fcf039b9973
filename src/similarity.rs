//! Fuzzy similarity between a query and a stored segment.
//!
//! Score is `floor(100 * (1 - distance / max_len))` over Levenshtein distance
//! on chars. Identical strings score 100. Case folding happens before the
//! distance is computed, which can only shrink the distance.

/// Similarity of `a` and `b` in 0..=100.
pub fn score(a: &str, b: &str, case_sensitive: bool) -> u8 {
    if case_sensitive {
        score_chars(&a.chars().collect::<Vec<_>>(), &b.chars().collect::<Vec<_>>())
    } else {
        let fa: Vec<char> = a.chars().flat_map(char::to_lowercase).collect();
        let fb: Vec<char> = b.chars().flat_map(char::to_lowercase).collect();
        let folded = score_chars(&fa, &fb);
        // Some chars lowercase to several; only then can folding hurt.
        if fa.len() == a.chars().count() && fb.len() == b.chars().count() {
            folded
        } else {
            folded.max(score(a, b, true))
        }
    }
}

/// Highest score reachable for strings of these char lengths.
///
/// Distance is at least the length difference, so this bounds `score` from
/// above and lets callers skip candidates cheaply.
pub fn upper_bound(len_a: usize, len_b: usize) -> u8 {
    let max = len_a.max(len_b);
    if max == 0 {
        return 100;
    }
    from_distance(len_a.abs_diff(len_b), max)
}

fn score_chars(a: &[char], b: &[char]) -> u8 {
    let max = a.len().max(b.len());
    if max == 0 {
        return 100;
    }
    from_distance(levenshtein(a, b), max)
}

fn from_distance(distance: usize, max_len: usize) -> u8 {
    let kept = max_len.saturating_sub(distance);
    ((kept * 100) / max_len) as u8
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
