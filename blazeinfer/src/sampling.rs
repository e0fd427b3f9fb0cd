//! Greedy token selection.

use ndarray::ArrayView1;

use crate::TokenId;

/// Index of the highest score. Ties go to the lowest index and NaN never
/// wins. `None` when the row has no comparable value.
pub fn greedy_argmax(row: ArrayView1<'_, f32>) -> Option<TokenId> {
    let mut best: Option<(TokenId, f32)> = None;
    for (id, &score) in row.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((id, score)),
        }
    }
    best.map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn picks_maximum() {
        assert_eq!(greedy_argmax(arr1(&[0.1, 3.0, -2.0, 2.9]).view()), Some(1));
    }

    #[test]
    fn ties_go_to_lowest_id() {
        assert_eq!(greedy_argmax(arr1(&[1.0, 5.0, 5.0, 5.0]).view()), Some(1));
        assert_eq!(greedy_argmax(arr1(&[7.0, 7.0]).view()), Some(0));
    }

    #[test]
    fn nan_is_skipped() {
        assert_eq!(greedy_argmax(arr1(&[f32::NAN, 1.0, f32::NAN]).view()), Some(1));
        assert_eq!(greedy_argmax(arr1(&[f32::NAN, f32::NAN]).view()), None);
    }

    #[test]
    fn infinities_compare() {
        assert_eq!(
            greedy_argmax(arr1(&[f32::NEG_INFINITY, f32::NEG_INFINITY]).view()),
            Some(0)
        );
        assert_eq!(greedy_argmax(arr1(&[1.0, f32::INFINITY]).view()), Some(1));
    }

    #[test]
    fn empty_row() {
        assert_eq!(greedy_argmax(arr1(&[] as &[f32]).view()), None);
    }
}
