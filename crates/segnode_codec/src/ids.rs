//! Primary-key sets.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};

/// A homogeneous list of primary keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdSet {
    /// Int64 keys.
    Int(Vec<i64>),
    /// VarChar keys.
    Str(Vec<String>),
}

impl IdSet {
    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    /// Returns true if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the stable permutation that sorts the keys ascending.
    #[must_use]
    pub fn sort_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        match self {
            Self::Int(v) => order.sort_by_key(|&i| v[i]),
            Self::Str(v) => order.sort_by(|&a, &b| v[a].cmp(&v[b])),
        }
        order
    }

    /// Rearranges keys so that new key `i` is old key `order[i]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `order` does not index every key exactly in range.
    pub fn reorder(&mut self, order: &[usize]) -> CodecResult<()> {
        let len = self.len();
        if order.len() != len || order.iter().any(|&i| i >= len) {
            return Err(CodecError::schema_mismatch(format!(
                "reorder of {len} ids given an invalid order"
            )));
        }
        match self {
            Self::Int(v) => *v = order.iter().map(|&i| v[i]).collect(),
            Self::Str(v) => *v = order.iter().map(|&i| v[i].clone()).collect(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_order_is_stable() {
        let ids = IdSet::Int(vec![5, 1, 5, 0]);
        assert_eq!(ids.sort_order(), vec![3, 1, 0, 2]);
    }

    #[test]
    fn string_sort_order() {
        let ids = IdSet::Str(vec!["b".into(), "a".into(), "c".into()]);
        assert_eq!(ids.sort_order(), vec![1, 0, 2]);
    }

    #[test]
    fn reorder_applies_permutation() {
        let mut ids = IdSet::Str(vec!["b".into(), "a".into()]);
        ids.reorder(&[1, 0]).unwrap();
        assert_eq!(ids, IdSet::Str(vec!["a".into(), "b".into()]));
        assert!(ids.reorder(&[0]).is_err());
    }

    #[test]
    fn empty_set() {
        assert!(IdSet::Int(vec![]).is_empty());
        assert_eq!(IdSet::Str(vec!["x".into()]).len(), 1);
    }
}
