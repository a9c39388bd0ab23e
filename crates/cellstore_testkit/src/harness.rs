//! Model-tracking harnesses.
//!
//! A harness pairs a persistent structure with a plain in-memory twin,
//! applies every operation to both and checks that they agree. Tests then
//! only have to generate operations.

use crate::generators::{ArrayOp, MapOp};
use cellstore_core::{CoreError, PersistentArray, PersistentLabeledMap, PersistentMap};
use cellstore_storage::CellOptions;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// A persistent array checked against a `VecDeque`.
pub struct ArrayHarness {
    root: PathBuf,
    options: CellOptions,
    array: Option<PersistentArray<i32>>,
    model: VecDeque<i32>,
}

impl ArrayHarness {
    /// Opens an empty array at `root`.
    pub fn new(root: &Path, options: CellOptions) -> Self {
        Self {
            root: root.to_path_buf(),
            array: Some(PersistentArray::open(root, options.clone()).expect("Failed to open array")),
            options,
            model: VecDeque::new(),
        }
    }

    /// Returns the structure under test.
    pub fn array(&self) -> &PersistentArray<i32> {
        self.array.as_ref().expect("array is open")
    }

    fn array_mut(&mut self) -> &mut PersistentArray<i32> {
        self.array.as_mut().expect("array is open")
    }

    /// Returns the expected contents.
    #[must_use]
    pub fn model(&self) -> &VecDeque<i32> {
        &self.model
    }

    /// Applies `op` to both sides and asserts the results match.
    pub fn apply(&mut self, op: &ArrayOp) {
        let len = self.model.len();
        match op {
            ArrayOp::Push(v) => {
                self.array_mut().push(*v).expect("push failed");
                self.model.push_back(*v);
            }
            ArrayOp::PushFront(v) => {
                self.array_mut().push_front(*v).expect("push_front failed");
                self.model.push_front(*v);
            }
            ArrayOp::Insert(index, v) => {
                let i = index.index(len + 1);
                self.array_mut().insert(i as u64, *v).expect("insert failed");
                self.model.insert(i, *v);
            }
            ArrayOp::Set(index, v) => {
                if len == 0 {
                    assert!(matches!(
                        self.array_mut().set(0, v),
                        Err(CoreError::IndexOutOfRange { index: 0, len: 0 })
                    ));
                } else {
                    let i = index.index(len);
                    self.array_mut().set(i as u64, v).expect("set failed");
                    self.model[i] = *v;
                }
            }
            ArrayOp::RemoveAt(index) => {
                if len == 0 {
                    assert!(matches!(
                        self.array_mut().remove_at(0),
                        Err(CoreError::IndexOutOfRange { .. })
                    ));
                } else {
                    let i = index.index(len);
                    let removed = self.array_mut().remove_at(i as u64).expect("remove_at failed");
                    assert_eq!(Some(removed), self.model.remove(i));
                }
            }
            ArrayOp::Pop => {
                let popped = self.array_mut().pop().expect("pop failed");
                assert_eq!(popped, self.model.pop_back());
            }
            ArrayOp::PopFront => {
                let popped = self.array_mut().pop_front().expect("pop_front failed");
                assert_eq!(popped, self.model.pop_front());
            }
            ArrayOp::Clear => {
                self.array_mut().clear().expect("clear failed");
                self.model.clear();
            }
        }
    }

    /// Asserts the array matches the model.
    pub fn check(&self) {
        let actual = self.array().to_vec().expect("to_vec failed");
        assert_eq!(actual, Vec::from(self.model.clone()));
        assert_eq!(self.array().len().expect("len failed"), self.model.len() as u64);
    }

    /// Closes and reopens the array, then checks it again.
    pub fn reopen(&mut self) {
        // The old handle must release its locks before the new one opens.
        if let Some(array) = self.array.take() {
            array.dispose().expect("Failed to close array");
        }
        self.array = Some(
            PersistentArray::open(&self.root, self.options.clone()).expect("Failed to reopen array"),
        );
        self.check();
    }
}

/// Expected contents of a map, in insertion order.
#[derive(Debug, Default, Clone)]
pub struct MapModel {
    entries: Vec<(String, i32)>,
}

impl MapModel {
    /// Applies `op`. Returns what `put`/`remove` should report.
    pub fn apply(&mut self, op: &MapOp) -> bool {
        match op {
            MapOp::Put(key, value) => match self.entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => {
                    entry.1 = *value;
                    true
                }
                None => {
                    self.entries.push((key.clone(), *value));
                    false
                }
            },
            MapOp::Remove(key) => {
                let before = self.entries.len();
                self.entries.retain(|(k, _)| k != key);
                self.entries.len() != before
            }
            MapOp::Clear => {
                self.entries.clear();
                false
            }
        }
    }

    /// Returns the expected entries.
    #[must_use]
    pub fn entries(&self) -> &[(String, i32)] {
        &self.entries
    }
}

/// A persistent map checked against a [`MapModel`].
pub struct MapHarness {
    /// The structure under test.
    pub map: PersistentMap<String, i32>,
    model: MapModel,
}

impl MapHarness {
    /// Opens an empty map at `root`.
    pub fn new(root: &Path, options: CellOptions) -> Self {
        Self {
            map: PersistentMap::open(root, options).expect("Failed to open map"),
            model: MapModel::default(),
        }
    }

    /// Applies `op` to both sides and asserts the results match.
    pub fn apply(&mut self, op: &MapOp) {
        let expected = self.model.apply(op);
        match op {
            MapOp::Put(key, value) => {
                assert_eq!(self.map.put(key.clone(), value).expect("put failed"), expected);
            }
            MapOp::Remove(key) => {
                assert_eq!(self.map.remove(key).expect("remove failed"), expected);
            }
            MapOp::Clear => self.map.clear().expect("clear failed"),
        }
    }

    /// Asserts the map matches the model.
    pub fn check(&self) {
        assert_eq!(self.map.entries().expect("entries failed"), self.model.entries());
    }
}

/// A labeled map checked against a [`MapModel`].
pub struct LabeledHarness {
    /// The structure under test.
    pub map: PersistentLabeledMap<i32>,
    model: MapModel,
}

impl LabeledHarness {
    /// Opens an empty labeled map at `root`.
    pub fn new(root: &Path, options: CellOptions) -> Self {
        Self {
            map: PersistentLabeledMap::open(root, options).expect("Failed to open labeled map"),
            model: MapModel::default(),
        }
    }

    /// Applies `op` to both sides and asserts the results match.
    pub fn apply(&mut self, op: &MapOp) {
        let expected = self.model.apply(op);
        match op {
            MapOp::Put(key, value) => {
                assert_eq!(self.map.put(key, value).expect("put failed"), expected);
            }
            MapOp::Remove(key) => {
                assert_eq!(self.map.remove(key).expect("remove failed"), expected);
            }
            MapOp::Clear => self.map.clear().expect("clear failed"),
        }
    }

    /// Asserts the labeled map matches the model.
    pub fn check(&self) {
        assert_eq!(self.map.entries().expect("entries failed"), self.model.entries());
    }
}
