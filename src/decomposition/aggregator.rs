use super::error::DecompositionError;
use crate::grid::types::ResultHandle;

use std::collections::HashMap;

/// Width of an encoded result value.
pub const VALUE_BYTES: usize = 4;

/// Sums `values` with `u32` wraparound. `None` for an empty input.
///
/// Wrapping addition is associative and commutative, so leaves may complete
/// and be combined in any order.
pub fn combine(values: &[u32]) -> Option<u32> {
    values.iter().copied().reduce(u32::wrapping_add)
}

pub fn encode_value(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn decode_value(bytes: &[u8]) -> Result<u32, DecompositionError> {
    let raw: [u8; VALUE_BYTES] = bytes.try_into().map_err(|_| {
        DecompositionError::Combine(format!(
            "expected a {}-byte value, got {} bytes",
            VALUE_BYTES,
            bytes.len()
        ))
    })?;
    Ok(u32::from_le_bytes(raw))
}

/// Decodes and combines resolved dependency results.
pub fn combine_dependencies(
    dependencies: &HashMap<ResultHandle, Vec<u8>>,
) -> Result<u32, DecompositionError> {
    let values = dependencies
        .iter()
        .map(|(handle, bytes)| {
            decode_value(bytes).map_err(|_| {
                DecompositionError::Combine(format!(
                    "dependency {} holds {} bytes, expected {}",
                    handle,
                    bytes.len(),
                    VALUE_BYTES
                ))
            })
        })
        .collect::<Result<Vec<u32>, _>>()?;

    combine(&values)
        .ok_or_else(|| DecompositionError::Combine("no dependency values to combine".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_combine_sums() {
        assert_eq!(combine(&[1, 2, 3, 4, 5]), Some(15));
        assert_eq!(combine(&[7]), Some(7));
    }

    #[test]
    fn test_combine_wraps_on_overflow() {
        assert_eq!(combine(&[u32::MAX, 2]), Some(1));
    }

    #[test]
    fn test_combine_empty_is_none() {
        assert_eq!(combine(&[]), None);
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        let result = decode_value(&[1, 0, 0, 0, 0, 0, 0, 0]);

        assert!(matches!(result, Err(DecompositionError::Combine(_))));
    }

    #[test]
    fn test_combine_dependencies() {
        let dependencies: HashMap<ResultHandle, Vec<u8>> = [3u32, 7, 5]
            .into_iter()
            .map(|v| (ResultHandle::new(), encode_value(v)))
            .collect();

        assert_eq!(combine_dependencies(&dependencies).unwrap(), 15);
    }

    #[test]
    fn test_combine_dependencies_empty_fails() {
        let result = combine_dependencies(&HashMap::new());

        assert!(matches!(result, Err(DecompositionError::Combine(_))));
    }

    proptest! {
        #[test]
        fn prop_combine_ignores_order(values in prop::collection::vec(any::<u32>(), 1..100), seed in any::<u64>()) {
            let mut shuffled = values.clone();
            // Deterministic Fisher-Yates driven by the seed
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            prop_assert_eq!(combine(&shuffled), combine(&values));
        }

        #[test]
        fn prop_combine_of_parts_equals_whole(values in prop::collection::vec(any::<u32>(), 2..100), cut in 1usize..99) {
            let cut = cut.min(values.len() - 1);
            let (left, right) = values.split_at(cut);

            let parts = [combine(left).unwrap(), combine(right).unwrap()];

            prop_assert_eq!(combine(&parts), combine(&values));
        }

        #[test]
        fn prop_value_encoding_is_four_le_bytes(value in any::<u32>()) {
            let bytes = encode_value(value);

            prop_assert_eq!(bytes.len(), VALUE_BYTES);
            prop_assert_eq!(decode_value(&bytes).unwrap(), value);
        }
    }
}
