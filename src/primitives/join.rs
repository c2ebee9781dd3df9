//! Streaming equi-join over two key-sorted streams.

use std::collections::VecDeque;

use crate::error::Result;

/// Whether unmatched left rows are kept (`Left`) or dropped (`Inner`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Merge-joins two streams that are each sorted by their join key. Duplicate
/// keys on the right are buffered one key group at a time; duplicate keys on
/// the left produce one output row per left row and right-group member.
pub fn merge_join<L, R, K, I, J, FL, FR>(
    left: I,
    right: J,
    left_key: FL,
    right_key: FR,
    kind: JoinKind,
) -> MergeJoin<L, R, K, I, J, FL, FR>
where
    L: Clone,
    R: Clone,
    K: Ord,
    I: Iterator<Item = Result<L>>,
    J: Iterator<Item = Result<R>>,
    FL: Fn(&L) -> K,
    FR: Fn(&R) -> K,
{
    MergeJoin {
        left,
        right,
        left_key,
        right_key,
        kind,
        right_lookahead: None,
        right_done: false,
        current_key: None,
        current_group: Vec::new(),
        pending: VecDeque::new(),
    }
}

pub struct MergeJoin<L, R, K, I, J, FL, FR> {
    left: I,
    right: J,
    left_key: FL,
    right_key: FR,
    kind: JoinKind,
    right_lookahead: Option<(K, R)>,
    right_done: bool,
    current_key: Option<K>,
    current_group: Vec<R>,
    pending: VecDeque<(L, Option<R>)>,
}

impl<L, R, K, I, J, FL, FR> MergeJoin<L, R, K, I, J, FL, FR>
where
    L: Clone,
    R: Clone,
    K: Ord,
    I: Iterator<Item = Result<L>>,
    J: Iterator<Item = Result<R>>,
    FL: Fn(&L) -> K,
    FR: Fn(&R) -> K,
{
    /// Discards right groups keyed below `target` and loads the first group
    /// keyed at or above it.
    fn advance_right_to(&mut self, target: &K) -> Result<()> {
        loop {
            if let Some(key) = &self.current_key {
                if key >= target {
                    return Ok(());
                }
            } else if self.right_done && self.right_lookahead.is_none() {
                return Ok(());
            }

            let (key, first) = match self.right_lookahead.take() {
                Some(entry) => entry,
                None => match self.right.next() {
                    None => {
                        self.right_done = true;
                        self.current_key = None;
                        self.current_group.clear();
                        return Ok(());
                    }
                    Some(Err(err)) => return Err(err),
                    Some(Ok(item)) => ((self.right_key)(&item), item),
                },
            };
            let mut group = vec![first];
            loop {
                match self.right.next() {
                    None => {
                        self.right_done = true;
                        break;
                    }
                    Some(Err(err)) => return Err(err),
                    Some(Ok(item)) => {
                        let next_key = (self.right_key)(&item);
                        if next_key == key {
                            group.push(item);
                        } else {
                            self.right_lookahead = Some((next_key, item));
                            break;
                        }
                    }
                }
            }
            self.current_key = Some(key);
            self.current_group = group;
        }
    }
}

impl<L, R, K, I, J, FL, FR> Iterator for MergeJoin<L, R, K, I, J, FL, FR>
where
    L: Clone,
    R: Clone,
    K: Ord,
    I: Iterator<Item = Result<L>>,
    J: Iterator<Item = Result<R>>,
    FL: Fn(&L) -> K,
    FR: Fn(&R) -> K,
{
    type Item = Result<(L, Option<R>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.pending.pop_front() {
                return Some(Ok(pair));
            }
            let left_item = match self.left.next() {
                None => return None,
                Some(Err(err)) => return Some(Err(err)),
                Some(Ok(item)) => item,
            };
            let key = (self.left_key)(&left_item);
            if let Err(err) = self.advance_right_to(&key) {
                return Some(Err(err));
            }
            if self.current_key.as_ref() == Some(&key) {
                for right_item in &self.current_group {
                    self.pending
                        .push_back((left_item.clone(), Some(right_item.clone())));
                }
            } else {
                match self.kind {
                    JoinKind::Left => return Some(Ok((left_item, None))),
                    JoinKind::Inner => continue,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_stream<T: Clone>(items: &[T]) -> impl Iterator<Item = Result<T>> + '_ {
        items.iter().cloned().map(Ok)
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let left = vec![("a", 1), ("b", 2), ("c", 3)];
        let right = vec![("a", 10.0), ("c", 30.0)];
        let joined: Vec<_> = merge_join(
            ok_stream(&left),
            ok_stream(&right),
            |l| l.0,
            |r| r.0,
            JoinKind::Left,
        )
        .map(|pair| pair.unwrap())
        .collect();
        assert_eq!(joined.len(), 3);
        assert_eq!(joined[0].1, Some(("a", 10.0)));
        assert_eq!(joined[1].1, None);
        assert_eq!(joined[2].1, Some(("c", 30.0)));
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let left = vec![("a", 1), ("b", 2), ("c", 3)];
        let right = vec![("b", 20.0)];
        let joined: Vec<_> = merge_join(
            ok_stream(&left),
            ok_stream(&right),
            |l| l.0,
            |r| r.0,
            JoinKind::Inner,
        )
        .map(|pair| pair.unwrap())
        .collect();
        assert_eq!(joined, vec![(("b", 2), Some(("b", 20.0)))]);
    }

    #[test]
    fn duplicate_keys_produce_cross_products() {
        let left = vec![("a", 1), ("a", 2)];
        let right = vec![("a", 10.0), ("a", 20.0)];
        let joined: Vec<_> = merge_join(
            ok_stream(&left),
            ok_stream(&right),
            |l| l.0,
            |r| r.0,
            JoinKind::Inner,
        )
        .map(|pair| pair.unwrap())
        .collect();
        assert_eq!(joined.len(), 4);
        assert_eq!(joined[0], (("a", 1), Some(("a", 10.0))));
        assert_eq!(joined[3], (("a", 2), Some(("a", 20.0))));
    }

    #[test]
    fn right_rows_before_first_left_key_are_skipped() {
        let left = vec![("m", 1)];
        let right = vec![("a", 1.0), ("b", 2.0), ("m", 3.0), ("z", 4.0)];
        let joined: Vec<_> = merge_join(
            ok_stream(&left),
            ok_stream(&right),
            |l| l.0,
            |r| r.0,
            JoinKind::Inner,
        )
        .map(|pair| pair.unwrap())
        .collect();
        assert_eq!(joined, vec![(("m", 1), Some(("m", 3.0)))]);
    }
}
