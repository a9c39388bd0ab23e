//! Property-based test generators using proptest.
//!
//! Index-carrying operations use [`prop::sample::Index`] so a generated
//! sequence stays meaningful whatever length the structure has reached.

use proptest::prelude::*;
use proptest::sample::Index;

/// One mutation of a persistent array.
#[derive(Debug, Clone)]
pub enum ArrayOp {
    /// Append a value.
    Push(i32),
    /// Prepend a value.
    PushFront(i32),
    /// Insert at a position in `0..=len`.
    Insert(Index, i32),
    /// Overwrite a position in `0..len`.
    Set(Index, i32),
    /// Remove a position in `0..len`.
    RemoveAt(Index),
    /// Remove the last value.
    Pop,
    /// Remove the first value.
    PopFront,
    /// Remove everything.
    Clear,
}

/// One mutation of a keyed map.
#[derive(Debug, Clone)]
pub enum MapOp {
    /// Insert or overwrite a key.
    Put(String, i32),
    /// Remove a key.
    Remove(String),
    /// Remove every key.
    Clear,
}

/// Strategy for generating array operations.
///
/// Front inserts are weighted up so reindexing is exercised.
pub fn array_op_strategy() -> impl Strategy<Value = ArrayOp> {
    prop_oneof![
        3 => any::<i32>().prop_map(ArrayOp::Push),
        4 => any::<i32>().prop_map(ArrayOp::PushFront),
        2 => (any::<Index>(), any::<i32>()).prop_map(|(i, v)| ArrayOp::Insert(i, v)),
        1 => (any::<Index>(), any::<i32>()).prop_map(|(i, v)| ArrayOp::Set(i, v)),
        2 => any::<Index>().prop_map(ArrayOp::RemoveAt),
        1 => Just(ArrayOp::Pop),
        2 => Just(ArrayOp::PopFront),
        1 => Just(ArrayOp::Clear),
    ]
}

/// Strategy for generating a sequence of array operations.
pub fn array_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<ArrayOp>> {
    prop::collection::vec(array_op_strategy(), 1..max_ops)
}

/// Strategy for generating labeled map keys: any text without a newline.
pub fn labeled_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[^\n]{0,24}").expect("Invalid regex")
}

/// Strategy for generating map keys from a small pool, so operations collide.
pub fn pooled_key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e", "f"]).prop_map(str::to_string)
}

/// Strategy for generating map operations over [`pooled_key_strategy`] keys.
pub fn map_op_strategy() -> impl Strategy<Value = MapOp> {
    prop_oneof![
        5 => (pooled_key_strategy(), any::<i32>()).prop_map(|(k, v)| MapOp::Put(k, v)),
        3 => pooled_key_strategy().prop_map(MapOp::Remove),
        1 => Just(MapOp::Clear),
    ]
}

/// Strategy for generating a sequence of map operations.
pub fn map_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<MapOp>> {
    prop::collection::vec(map_op_strategy(), 1..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    ///
    /// Every case touches the filesystem, so this is the usual choice.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 24,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn labeled_keys_have_no_newline(key in labeled_key_strategy()) {
            prop_assert!(!key.contains('\n'));
        }

        #[test]
        fn op_sequences_are_non_empty(ops in array_ops_strategy(20)) {
            prop_assert!(!ops.is_empty() && ops.len() < 20);
        }
    }
}
