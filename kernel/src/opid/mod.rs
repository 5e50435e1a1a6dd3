// OpId Algebra
//
// Total order over replicated log positions. Term is the primary key,
// index the secondary key. An uninitialized position is `None` and is
// never confused with `OpId::MIN`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Rendering of a position that has not been assigned yet.
pub const UNINITIALIZED_OP: &str = "<uninitialized op>";

/// Position of an entry in the replicated log.
#[derive(Debug, Clone, Copy)]
pub struct OpId {
    term: i64,
    index: i64,
}

impl OpId {
    pub const MIN: OpId = OpId { term: 0, index: 0 };
    pub const MAX: OpId = OpId {
        term: i64::MAX,
        index: i64::MAX,
    };

    pub fn new(term: i64, index: i64) -> Result<Self> {
        if term < 0 || index < 0 {
            return Err(Error::InvalidState(format!(
                "op id components must be non-negative, got {term}.{index}"
            )));
        }
        Ok(Self { term, index })
    }

    pub fn term(&self) -> i64 {
        self.term
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    /// Three-way comparison every other relation is derived from.
    pub fn compare(&self, other: &OpId) -> Ordering {
        match self.term.cmp(&other.term) {
            Ordering::Equal => self.index.cmp(&other.index),
            unequal => unequal,
        }
    }

    /// `(term + 31) ^ index`, the bucket key used for op id maps.
    pub fn hash_code(&self) -> u64 {
        (self.term.wrapping_add(31) ^ self.index) as u64
    }
}

impl PartialEq for OpId {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for OpId {}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl Hash for OpId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}

fn both<'a>(
    op: &str,
    left: Option<&'a OpId>,
    right: Option<&'a OpId>,
) -> Result<(&'a OpId, &'a OpId)> {
    match (left, right) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => {
            tracing::error!(
                left = %display_op_id(left),
                right = %display_op_id(right),
                "{op} on uninitialized op id"
            );
            Err(Error::InvalidState(format!(
                "{op} called with uninitialized op id ({} vs {})",
                display_op_id(left),
                display_op_id(right)
            )))
        }
    }
}

/// Compare two possibly unassigned positions. Either side being `None`
/// is a contract violation.
pub fn compare(left: Option<&OpId>, right: Option<&OpId>) -> Result<Ordering> {
    let (l, r) = both("compare", left, right)?;
    Ok(l.compare(r))
}

pub fn equals(left: Option<&OpId>, right: Option<&OpId>) -> Result<bool> {
    Ok(compare(left, right)? == Ordering::Equal)
}

pub fn less_than(left: Option<&OpId>, right: Option<&OpId>) -> Result<bool> {
    Ok(compare(left, right)? == Ordering::Less)
}

pub fn greater_than(left: Option<&OpId>, right: Option<&OpId>) -> Result<bool> {
    Ok(compare(left, right)? == Ordering::Greater)
}

/// Lower `target` to `candidate` when the candidate is assigned and either
/// the target is not, or the candidate sorts strictly before it.
///
/// Returns whether `target` changed.
pub fn copy_if_less(candidate: Option<&OpId>, target: &mut Option<OpId>) -> bool {
    let Some(candidate) = candidate else {
        return false;
    };
    if let Some(current) = target.as_ref() {
        if candidate.compare(current) != Ordering::Less {
            return false;
        }
    }
    *target = Some(*candidate);
    true
}

pub fn display_op_id(op: Option<&OpId>) -> String {
    match op {
        Some(op) => op.to_string(),
        None => UNINITIALIZED_OP.to_string(),
    }
}

/// `[first-last]` span of a batch of ops, `[]` when empty.
pub fn ops_range_string(ops: &[OpId]) -> String {
    match (ops.first(), ops.last()) {
        (Some(first), Some(last)) => format!("[{first}-{last}]"),
        _ => "[]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn op(term: i64, index: i64) -> OpId {
        OpId::new(term, index).unwrap()
    }

    fn sample() -> Vec<OpId> {
        vec![
            OpId::MIN,
            op(0, 7),
            op(1, 0),
            op(1, 1),
            op(1, 5),
            op(2, 3),
            op(3, 1),
            op(i64::MAX, 0),
            OpId::MAX,
        ]
    }

    #[test]
    fn term_dominates_index() {
        assert_eq!(op(1, 100).compare(&op(2, 1)), Ordering::Less);
        assert_eq!(op(2, 1).compare(&op(1, 100)), Ordering::Greater);
        assert_eq!(op(2, 1).compare(&op(2, 2)), Ordering::Less);
        assert_eq!(op(2, 2).compare(&op(2, 2)), Ordering::Equal);
    }

    #[test]
    fn compare_is_a_total_order() {
        let ops = sample();
        for a in &ops {
            for b in &ops {
                assert_eq!(a.compare(b), b.compare(a).reverse(), "{a} vs {b}");
                assert_eq!(a == b, a.compare(b) == Ordering::Equal);
                assert_eq!(a < b, a.compare(b) == Ordering::Less);
                assert_eq!(a > b, a.compare(b) == Ordering::Greater);
                for c in &ops {
                    if a < b && b < c {
                        assert!(a < c, "{a} < {b} < {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn sentinels_bound_everything() {
        for o in sample() {
            assert!(OpId::MIN <= o);
            assert!(o <= OpId::MAX);
        }
    }

    #[test]
    fn derived_relations_agree_with_compare() {
        let (a, b) = (op(1, 2), op(1, 3));
        assert!(less_than(Some(&a), Some(&b)).unwrap());
        assert!(!greater_than(Some(&a), Some(&b)).unwrap());
        assert!(equals(Some(&a), Some(&a)).unwrap());
        assert_eq!(compare(Some(&b), Some(&a)).unwrap(), Ordering::Greater);
    }

    #[test]
    fn uninitialized_operand_is_a_contract_violation() {
        let err = compare(None, Some(&OpId::MIN)).unwrap_err();
        assert!(err.is_fatal());
        assert!(less_than(Some(&OpId::MIN), None).unwrap_err().is_fatal());
    }

    #[test]
    fn negative_components_are_rejected() {
        assert!(OpId::new(-1, 0).unwrap_err().is_fatal());
        assert!(OpId::new(0, -5).is_err());
    }

    #[test]
    fn copy_if_less_tracks_minimum() {
        let mut target = None;
        assert!(!copy_if_less(None, &mut target));
        assert!(target.is_none());

        assert!(copy_if_less(Some(&op(2, 5)), &mut target));
        assert_eq!(target, Some(op(2, 5)));

        // equal and greater candidates leave the watermark alone
        assert!(!copy_if_less(Some(&op(2, 5)), &mut target));
        assert!(!copy_if_less(Some(&op(3, 0)), &mut target));
        assert!(!copy_if_less(None, &mut target));

        assert!(copy_if_less(Some(&op(2, 4)), &mut target));
        assert_eq!(target, Some(op(2, 4)));
        assert!(copy_if_less(Some(&OpId::MIN), &mut target));
        assert_eq!(target, Some(OpId::MIN));
    }

    #[test]
    fn rendering() {
        assert_eq!(op(3, 42).to_string(), "3.42");
        assert_eq!(display_op_id(Some(&OpId::MIN)), "0.0");
        assert_eq!(display_op_id(None), UNINITIALIZED_OP);
        assert_eq!(ops_range_string(&[]), "[]");
        assert_eq!(ops_range_string(&[op(1, 1), op(1, 2), op(2, 3)]), "[1.1-2.3]");
    }

    #[test]
    fn usable_as_map_key() {
        assert_eq!(op(4, 9).hash_code(), op(4, 9).hash_code());
        assert_eq!(op(0, 0).hash_code(), 31);
        // MAX must not overflow
        let _ = OpId::MAX.hash_code();

        let set: HashSet<OpId> = [op(1, 1), op(1, 1), op(1, 2)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
