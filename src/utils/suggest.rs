//! "Did you mean" hints for tool names, argument keys and enum values.

/// Prefix shared by every canonical tool name; ignored when comparing so a
/// short typo still finds its prefixed tool.
const TOOL_PREFIX: &str = "servicenow";

fn fold(value: &str) -> String {
    let lowered: String = value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    match lowered.strip_prefix(TOOL_PREFIX) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => lowered,
    }
}

/// Edit distance where swapping two adjacent characters costs one edit
/// (optimal string alignment).
fn edit_distance(a: &[char], b: &[char]) -> usize {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return n.max(m);
    }
    let mut rows = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in rows.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        rows[0][j] = j;
    }
    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (rows[i - 1][j] + 1)
                .min(rows[i][j - 1] + 1)
                .min(rows[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(rows[i - 2][j - 2] + 1);
            }
            rows[i][j] = best;
        }
    }
    rows[n][m]
}

fn distance(input: &str, candidate: &str) -> Option<usize> {
    if input.is_empty() || candidate.is_empty() {
        return None;
    }
    if input == candidate {
        return Some(0);
    }
    if candidate.starts_with(input) || input.starts_with(candidate) {
        return Some(1);
    }
    let a: Vec<char> = input.chars().collect();
    let b: Vec<char> = candidate.chars().collect();
    Some(edit_distance(&a, &b))
}

fn tolerance(folded_len: usize) -> usize {
    match folded_len {
        0 => 0,
        1..=4 => 1,
        5..=8 => 2,
        n => (n / 3).max(3),
    }
}

/// Up to `limit` candidates close to `input`, nearest first; ties go to the
/// shorter then alphabetically earlier name.
pub fn suggest(input: &str, candidates: &[String], limit: usize) -> Vec<String> {
    let folded = fold(input);
    let allowed = tolerance(folded.len());
    if allowed == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .filter_map(|candidate| {
            distance(&folded, &fold(candidate))
                .filter(|d| *d <= allowed)
                .map(|d| (d, candidate))
        })
        .collect();
    scored.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.len().cmp(&b.1.len()))
            .then_with(|| a.1.cmp(b.1))
    });
    let mut out: Vec<String> = Vec::new();
    for (_, candidate) in scored {
        if !out.contains(candidate) {
            out.push(candidate.clone());
        }
        if out.len() >= limit.max(1) {
            break;
        }
    }
    out
}
