//! Longest increasing subsequence.
//!
//! The keyed diff records, for each new child in the unresolved middle
//! segment, the old index it was matched to (plus one; zero means "new").
//! Children on a longest increasing run of old indices are already in the
//! right relative order and are left in place; everything else moves.

/// Positions of a longest strictly increasing subsequence of `arr`,
/// ignoring zero entries.
///
/// O(n log n) patience sorting: `result` holds, for each length, the index
/// of the smallest tail found so far; `predecessors` links each index to the
/// previous element of its chain, walked backwards at the end.
pub fn longest_increasing_subsequence(arr: &[usize]) -> Vec<usize> {
    let mut predecessors = vec![0usize; arr.len()];
    let mut result: Vec<usize> = Vec::with_capacity(arr.len());

    for (i, &value) in arr.iter().enumerate() {
        if value == 0 {
            continue;
        }
        match result.last() {
            Some(&last) if arr[last] < value => {
                predecessors[i] = last;
                result.push(i);
                continue;
            }
            None => {
                result.push(i);
                continue;
            }
            _ => {}
        }

        // Smallest position in `result` whose tail is >= value.
        let (mut lo, mut hi) = (0usize, result.len() - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if arr[result[mid]] < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if value < arr[result[lo]] {
            if lo > 0 {
                predecessors[i] = result[lo - 1];
            }
            result[lo] = i;
        }
    }

    let mut len = result.len();
    if len == 0 {
        return result;
    }
    let mut current = result[len - 1];
    while len > 0 {
        len -= 1;
        result[len] = current;
        current = predecessors[current];
    }
    result
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// O(n²) reference: length of the longest increasing run of non-zero values.
    fn reference_len(arr: &[usize]) -> usize {
        let mut best = vec![0usize; arr.len()];
        let mut overall = 0;
        for i in 0..arr.len() {
            if arr[i] == 0 {
                continue;
            }
            best[i] = 1;
            for j in 0..i {
                if arr[j] != 0 && arr[j] < arr[i] {
                    best[i] = best[i].max(best[j] + 1);
                }
            }
            overall = overall.max(best[i]);
        }
        overall
    }

    fn is_valid(arr: &[usize], seq: &[usize]) -> bool {
        seq.windows(2).all(|w| w[0] < w[1] && arr[w[0]] < arr[w[1]])
            && seq.iter().all(|&i| arr[i] != 0)
    }

    #[test]
    fn reorder_scenario() {
        // new order [c, b, e, d] over old [b, c, d, e], stored as old index + 1
        let seq = longest_increasing_subsequence(&[3, 2, 5, 4]);
        assert_eq!(seq, vec![1, 3]);
    }

    #[test]
    fn zeros_are_ignored() {
        assert_eq!(longest_increasing_subsequence(&[0, 0]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[2, 0, 3, 1]), vec![0, 2]);
    }

    #[test]
    fn already_sorted() {
        assert_eq!(longest_increasing_subsequence(&[1, 2, 3, 4]), vec![0, 1, 2, 3]);
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
    }

    proptest! {
        #[test]
        fn matches_quadratic_reference(arr in proptest::collection::vec(0usize..12, 0..14)) {
            let seq = longest_increasing_subsequence(&arr);
            prop_assert!(is_valid(&arr, &seq));
            prop_assert_eq!(seq.len(), reference_len(&arr));
        }

        #[test]
        fn permutations_keep_a_maximal_run(
            perm in Just((1usize..=9).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let seq = longest_increasing_subsequence(&perm);
            prop_assert!(is_valid(&perm, &seq));
            prop_assert_eq!(seq.len(), reference_len(&perm));
        }
    }
}
