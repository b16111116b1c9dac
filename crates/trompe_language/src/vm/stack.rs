//! The value stack shared by every frame of a call chain.
//!
//! Slots are absolute offsets; a frame addresses its locals relative to its
//! base pointer.

use tracing::trace;
use trompe_foundation::{Error, Result, Value};

/// One growable stack of values.
pub(crate) struct ValueStack {
    values: Vec<Value>,
    extra: usize,
}

impl ValueStack {
    pub(crate) fn new(capacity: usize, extra: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            extra,
        }
    }

    /// Ensures `needed` more slots fit without reallocating.
    ///
    /// Growth happens before a frame computes its slot indices.
    pub(crate) fn reserve(&mut self, needed: usize) {
        let free = self.values.capacity() - self.values.len();
        if needed > free {
            let grow = needed + self.extra;
            trace!(
                from = self.values.capacity(),
                to = self.values.len() + grow,
                "growing value stack"
            );
            self.values.reserve(grow);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<Value> {
        self.values
            .pop()
            .ok_or_else(|| Error::internal("value stack underflow"))
    }

    pub(crate) fn peek(&self) -> Result<&Value> {
        self.values
            .last()
            .ok_or_else(|| Error::internal("value stack underflow"))
    }

    /// Pops the top `n` values, bottom first.
    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
        let at = self
            .values
            .len()
            .checked_sub(n)
            .ok_or_else(|| Error::internal("value stack underflow"))?;
        Ok(self.values.split_off(at))
    }

    pub(crate) fn get(&self, slot: usize) -> Result<&Value> {
        self.values
            .get(slot)
            .ok_or_else(|| Error::internal(format!("stack slot {slot} out of range")))
    }

    pub(crate) fn set(&mut self, slot: usize, value: Value) -> Result<()> {
        let target = self
            .values
            .get_mut(slot)
            .ok_or_else(|| Error::internal(format!("stack slot {slot} out of range")))?;
        *target = value;
        Ok(())
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.values.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_before_use() {
        let mut stack = ValueStack::new(2, 4);
        stack.push(Value::Int(1));
        stack.reserve(10);
        assert!(stack.capacity() >= 11);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn pop_n_keeps_order() {
        let mut stack = ValueStack::new(4, 0);
        for i in 0..4 {
            stack.push(Value::Int(i));
        }
        let top = stack.pop_n(2).unwrap();
        assert_eq!(top, vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(stack.len(), 2);
        assert!(stack.pop_n(3).is_err());
    }

    #[test]
    fn slots_are_absolute() {
        let mut stack = ValueStack::new(4, 0);
        stack.push(Value::Unit);
        stack.push(Value::Unit);
        stack.set(1, Value::Bool(true)).unwrap();
        assert_eq!(stack.get(1).unwrap(), &Value::Bool(true));
        assert!(stack.get(2).is_err());
        assert_eq!(stack.pop().unwrap(), Value::Bool(true));
        assert_eq!(stack.peek().unwrap(), &Value::Unit);
    }
}
