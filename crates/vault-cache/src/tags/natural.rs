//! Natural ordering for tag paths.

use std::cmp::Ordering;

/// Compares two strings case-insensitively, treating digit runs as numbers
/// (`tag2` sorts before `tag10`). Falls back to a plain comparison so the
/// order is total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let left_digits = take_digits(&mut left);
                let right_digits = take_digits(&mut right);
                let ordering = compare_digit_runs(&left_digits, &right_digits);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(l), Some(r)) => {
                let ordering = l.to_lowercase().cmp(r.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(ch) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(ch);
        chars.next();
    }
    digits
}

fn compare_digit_runs(left: &str, right: &str) -> Ordering {
    let left_trimmed = left.trim_start_matches('0');
    let right_trimmed = right.trim_start_matches('0');
    left_trimmed
        .len()
        .cmp(&right_trimmed.len())
        .then_with(|| left_trimmed.cmp(right_trimmed))
        // `01` after `1`
        .then_with(|| left.len().cmp(&right.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(values: &[&str]) -> Vec<String> {
        let mut values: Vec<String> = values.iter().map(|value| value.to_string()).collect();
        values.sort_by(|a, b| natural_cmp(a, b));
        values
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(sorted(&["tag10", "tag2", "tag1"]), vec!["tag1", "tag2", "tag10"]);
        assert_eq!(sorted(&["v1.10", "v1.9"]), vec!["v1.9", "v1.10"]);
    }

    #[test]
    fn case_insensitive_with_total_order() {
        assert_eq!(sorted(&["beta", "Alpha", "alpha"]), vec!["Alpha", "alpha", "beta"]);
        assert_eq!(natural_cmp("a", "a"), Ordering::Equal);
    }

    #[test]
    fn prefixes_sort_first() {
        assert_eq!(natural_cmp("proj", "proj/x"), Ordering::Less);
        assert_eq!(natural_cmp("1", "01"), Ordering::Less);
    }
}
