//! Observable lists.
//!
//! List-valued properties hold one `ObservableList` for the life of the
//! entity. Mutations publish structured change records instead of a reset,
//! and [`ObservableList::reconcile`] turns "make the list look like this"
//! into the smallest run of removes and inserts it can find.

use crate::error::{ModelError, Result};
use crate::events::Channel;
use crate::value::{Value, ValueType};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// One structural change to a list.
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange {
    Added { index: usize, items: Vec<Value> },
    Removed { index: usize, items: Vec<Value> },
    Replaced { old: Vec<Value>, new: Vec<Value> },
    Moved { from: usize, to: usize },
}

/// Published once per mutation, or once per [`ObservableList::batch`].
#[derive(Debug, Clone)]
pub struct ListChanged {
    pub list: ObservableList,
    pub changes: Vec<ListChange>,
}

struct ListInner {
    items: RefCell<Vec<Value>>,
    item_type: Option<ValueType>,
    changed: Channel<ListChanged>,
    batch_depth: Cell<usize>,
    batched: RefCell<Vec<ListChange>>,
}

/// A shared list handle with a change channel.
#[derive(Clone)]
pub struct ObservableList(Rc<ListInner>);

impl PartialEq for ObservableList {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObservableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.items.borrow().iter()).finish()
    }
}

impl Default for ObservableList {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableList {
    /// An untyped, empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, Vec::new())
    }

    /// An empty list whose items must satisfy `item_type`.
    #[must_use]
    pub fn with_item_type(item_type: ValueType) -> Self {
        Self::build(Some(item_type), Vec::new())
    }

    /// A list holding `items`, checked against `item_type`.
    pub fn from_values(item_type: Option<ValueType>, items: Vec<Value>) -> Result<Self> {
        if let Some(ty) = &item_type {
            check_items(ty, &items)?;
        }
        Ok(Self::build(item_type, items))
    }

    fn build(item_type: Option<ValueType>, items: Vec<Value>) -> Self {
        Self(Rc::new(ListInner {
            items: RefCell::new(items),
            item_type,
            changed: Channel::new(),
            batch_depth: Cell::new(0),
            batched: RefCell::new(Vec::new()),
        }))
    }

    /// A new list with the same item type and items. Subscribers are not
    /// copied.
    #[must_use]
    pub fn detached_copy(&self) -> Self {
        Self::build(self.0.item_type.clone(), self.items())
    }

    #[must_use]
    pub fn item_type(&self) -> Option<&ValueType> {
        self.0.item_type.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    /// Snapshot of the items.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    #[must_use]
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.0.items.borrow().iter().position(|v| v.same_as(value))
    }

    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.index_of(value).is_some()
    }

    /// Change channel.
    #[must_use]
    pub fn changed(&self) -> &Channel<ListChanged> {
        &self.0.changed
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let len = self.len();
        self.insert_range(len, vec![value.into()])
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.insert_range(index, vec![value.into()])
    }

    pub fn insert_range(&self, index: usize, values: Vec<Value>) -> Result<()> {
        let len = self.len();
        if index > len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }
        if values.is_empty() {
            return Ok(());
        }
        self.check(&values)?;
        {
            let mut items = self.0.items.borrow_mut();
            items.splice(index..index, values.iter().cloned());
        }
        self.record(ListChange::Added {
            index,
            items: values,
        })
    }

    /// Removes the first item equal to `value`. Returns false if absent.
    pub fn remove(&self, value: &Value) -> Result<bool> {
        match self.index_of(value) {
            Some(index) => {
                self.remove_range(index, 1)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove_at(&self, index: usize) -> Result<Value> {
        let mut removed = self.remove_range(index, 1)?;
        removed.pop().ok_or(ModelError::IndexOutOfRange {
            index,
            len: self.len(),
        })
    }

    pub fn remove_range(&self, index: usize, count: usize) -> Result<Vec<Value>> {
        let len = self.len();
        let end = index.saturating_add(count);
        if end > len || (count > 0 && index >= len) {
            return Err(ModelError::IndexOutOfRange { index: end, len });
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let removed: Vec<Value> = self.0.items.borrow_mut().drain(index..end).collect();
        self.record(ListChange::Removed {
            index,
            items: removed.clone(),
        })?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        let len = self.len();
        if len == 0 {
            return Ok(());
        }
        self.remove_range(0, len).map(drop)
    }

    /// Swaps the whole content, publishing a single `Replaced` record.
    pub fn replace_all(&self, values: Vec<Value>) -> Result<()> {
        self.check(&values)?;
        let old = std::mem::replace(&mut *self.0.items.borrow_mut(), values.clone());
        self.record(ListChange::Replaced { old, new: values })
    }

    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        let len = self.len();
        for index in [from, to] {
            if index >= len {
                return Err(ModelError::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        {
            let mut items = self.0.items.borrow_mut();
            let item = items.remove(from);
            items.insert(to, item);
        }
        self.record(ListChange::Moved { from, to })
    }

    /// Runs `work` with publication suspended, then publishes everything it
    /// did as one event. Batches nest; the outermost one publishes.
    pub fn batch<T>(&self, work: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.0.batch_depth.set(self.0.batch_depth.get() + 1);
        let result = work(self);
        let depth = self.0.batch_depth.get() - 1;
        self.0.batch_depth.set(depth);
        if depth == 0 {
            let changes = std::mem::take(&mut *self.0.batched.borrow_mut());
            if !changes.is_empty() {
                let published = self.publish(changes);
                let value = result?;
                published?;
                return Ok(value);
            }
        }
        result
    }

    /// Edits the list in place until it equals `target`.
    ///
    /// Matching runs are kept. At a mismatch the scan widens a lookahead
    /// window over both sequences until the two sides line up again, then
    /// removes the stale run and inserts the new one. Everything is published
    /// as one batch.
    pub fn reconcile(&self, target: &[Value]) -> Result<()> {
        self.check(target)?;
        let current = self.items();
        self.batch(|list| {
            let (mut i, mut j, mut pos) = (0, 0, 0);
            while i < current.len() && j < target.len() {
                if current[i].same_as(&target[j]) {
                    i += 1;
                    j += 1;
                    pos += 1;
                    continue;
                }
                let Some((skip_current, skip_target)) = find_resync(&current[i..], &target[j..])
                else {
                    break;
                };
                if skip_current > 0 {
                    list.remove_range(pos, skip_current)?;
                }
                if skip_target > 0 {
                    list.insert_range(pos, target[j..j + skip_target].to_vec())?;
                    pos += skip_target;
                }
                i += skip_current;
                j += skip_target;
            }
            if i < current.len() {
                list.remove_range(pos, current.len() - i)?;
            }
            if j < target.len() {
                list.insert_range(pos, target[j..].to_vec())?;
            }
            Ok(())
        })
    }

    fn check(&self, values: &[Value]) -> Result<()> {
        match &self.0.item_type {
            Some(ty) => check_items(ty, values),
            None => Ok(()),
        }
    }

    fn record(&self, change: ListChange) -> Result<()> {
        if self.0.batch_depth.get() > 0 {
            self.0.batched.borrow_mut().push(change);
            Ok(())
        } else {
            self.publish(vec![change])
        }
    }

    fn publish(&self, changes: Vec<ListChange>) -> Result<()> {
        let event = ListChanged {
            list: self.clone(),
            changes,
        };
        self.0.changed.publish(&event)
    }

    /// Drops subscribers and items.
    pub(crate) fn teardown(&self) {
        self.0.changed.clear();
        let items = std::mem::take(&mut *self.0.items.borrow_mut());
        drop(items);
    }
}

fn check_items(item_type: &ValueType, values: &[Value]) -> Result<()> {
    match values.iter().find(|v| !item_type.accepts(v)) {
        Some(bad) => Err(ModelError::TypeMismatch {
            property: "list item".into(),
            expected: item_type.to_string(),
            actual: bad.kind_name().into(),
        }),
        None => Ok(()),
    }
}

/// Smallest `(skip_a, skip_b)` with `a[skip_a] == b[skip_b]`, searching
/// windows of growing size so short detours win over long ones.
fn find_resync(a: &[Value], b: &[Value]) -> Option<(usize, usize)> {
    let widest = a.len().max(b.len());
    for window in 1..widest {
        for other in 0..=window {
            for (x, y) in [(window, other), (other, window)] {
                if x < a.len() && y < b.len() && a[x].same_as(&b[y]) {
                    return Some((x, y));
                }
            }
        }
    }
    None
}
