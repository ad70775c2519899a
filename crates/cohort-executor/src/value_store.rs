//! In-process reference backend.
//!
//! Holds every value in a keyed table: leaves carry raw payloads, structs
//! carry ordered element ids, calls carry a function id and optional
//! argument id. Materialization resolves structure recursively; a call
//! materializes to its function leaf's payload (constant-function reading,
//! enough for end-to-end wiring without pulling computation semantics into
//! this crate).

use std::collections::BTreeMap;
use std::sync::Mutex;

use cohort_contracts::Status;

use crate::cardinalities::CardinalityMap;
use crate::{Executor, ValueId};

#[derive(Debug, Clone)]
enum Value {
    Leaf(Vec<u8>),
    Struct(Vec<ValueId>),
    Call {
        function: ValueId,
        argument: Option<ValueId>,
    },
}

#[derive(Debug, Default)]
struct State {
    next_id: ValueId,
    values: BTreeMap<ValueId, Value>,
}

impl State {
    fn insert(&mut self, value: Value) -> ValueId {
        let id = self.next_id;
        self.next_id += 1;
        self.values.insert(id, value);
        id
    }

    fn require(&self, id: ValueId) -> Result<&Value, Status> {
        self.values
            .get(&id)
            .ok_or_else(|| Status::not_found(format!("no value with id {id}")))
    }

    fn materialize(&self, id: ValueId, out: &mut Vec<u8>) -> Result<(), Status> {
        match self.require(id)? {
            Value::Leaf(payload) => {
                out.extend_from_slice(payload);
                Ok(())
            }
            Value::Struct(elements) => {
                // Length-prefixed concatenation keeps element boundaries
                // recoverable without a codec collaborator.
                for &element in elements {
                    let mut element_bytes = Vec::new();
                    self.materialize(element, &mut element_bytes)?;
                    let len = u32::try_from(element_bytes.len()).map_err(|_| {
                        Status::invalid_argument(format!(
                            "struct element {element} exceeds the 4GiB payload limit"
                        ))
                    })?;
                    out.extend_from_slice(&len.to_le_bytes());
                    out.extend_from_slice(&element_bytes);
                }
                Ok(())
            }
            Value::Call { function, argument } => {
                // A call depends on everything it references: an argument
                // disposed before materialization fails the call even though
                // the constant-function reading never reads its payload.
                if let Some(argument) = argument {
                    self.require(*argument)?;
                }
                match self.require(*function)? {
                    Value::Leaf(payload) => {
                        out.extend_from_slice(payload);
                        Ok(())
                    }
                    _ => Err(Status::unimplemented(format!(
                        "value {function} is not callable in the value-store backend"
                    ))),
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct ValueStoreExecutor {
    state: Mutex<State>,
}

impl ValueStoreExecutor {
    /// Construction may fail: a zero-count placement describes a shape no
    /// executor can serve.
    pub fn new(cardinalities: &CardinalityMap) -> Result<Self, Status> {
        for (placement, count) in cardinalities {
            if *count == 0 {
                return Err(Status::invalid_argument(format!(
                    "placement {placement:?} requests zero participants"
                )));
            }
        }
        Ok(Self {
            state: Mutex::new(State::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned table means a panic mid-insert; the table itself is
        // still structurally sound, so keep serving.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Executor for ValueStoreExecutor {
    fn create_value(&self, value: &[u8]) -> Result<ValueId, Status> {
        Ok(self.lock().insert(Value::Leaf(value.to_vec())))
    }

    fn create_call(&self, function: ValueId, argument: Option<ValueId>) -> Result<ValueId, Status> {
        let mut state = self.lock();
        state.require(function)?;
        if let Some(arg) = argument {
            state.require(arg)?;
        }
        Ok(state.insert(Value::Call { function, argument }))
    }

    fn create_struct(&self, elements: &[ValueId]) -> Result<ValueId, Status> {
        let mut state = self.lock();
        for &element in elements {
            state.require(element)?;
        }
        Ok(state.insert(Value::Struct(elements.to_vec())))
    }

    fn create_selection(&self, source: ValueId, index: u32) -> Result<ValueId, Status> {
        let mut state = self.lock();
        let element = match state.require(source)? {
            Value::Struct(elements) => elements
                .get(index as usize)
                .copied()
                .ok_or_else(|| {
                    Status::invalid_argument(format!(
                        "selection index {index} out of range for struct of {} elements",
                        elements.len()
                    ))
                })?,
            _ => {
                return Err(Status::invalid_argument(format!(
                    "value {source} is not a struct; cannot select from it"
                )))
            }
        };
        // The selected element gets its own id so source and selection can
        // be disposed independently.
        let value = state.require(element)?.clone();
        Ok(state.insert(value))
    }

    fn materialize(&self, id: ValueId, out: &mut Vec<u8>) -> Result<(), Status> {
        self.lock().materialize(id, out)
    }

    fn dispose(&self, id: ValueId) -> Result<(), Status> {
        match self.lock().values.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Status::not_found(format!("no value with id {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_contracts::StatusCode;

    fn backend() -> ValueStoreExecutor {
        let mut cardinalities = CardinalityMap::new();
        cardinalities.insert("clients".to_string(), 3);
        ValueStoreExecutor::new(&cardinalities).expect("construct backend")
    }

    #[test]
    fn rejects_zero_count_placement() {
        let mut cardinalities = CardinalityMap::new();
        cardinalities.insert("clients".to_string(), 0);
        let err = ValueStoreExecutor::new(&cardinalities).unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }

    #[test]
    fn leaf_round_trip() {
        let ex = backend();
        let id = ex.create_value(b"payload").unwrap();
        let mut out = Vec::new();
        ex.materialize(id, &mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn struct_materializes_length_prefixed_elements() {
        let ex = backend();
        let a = ex.create_value(b"aa").unwrap();
        let b = ex.create_value(b"b").unwrap();
        let s = ex.create_struct(&[a, b]).unwrap();

        let mut out = Vec::new();
        ex.materialize(s, &mut out).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"aa");
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(b"b");
        assert_eq!(out, expected);
    }

    #[test]
    fn call_materializes_function_payload() {
        let ex = backend();
        let f = ex.create_value(b"result").unwrap();
        let arg = ex.create_value(b"ignored").unwrap();
        let call = ex.create_call(f, Some(arg)).unwrap();

        let mut out = Vec::new();
        ex.materialize(call, &mut out).unwrap();
        assert_eq!(out, b"result");
    }

    #[test]
    fn call_with_disposed_argument_fails_to_materialize() {
        let ex = backend();
        let f = ex.create_value(b"result").unwrap();
        let arg = ex.create_value(b"input").unwrap();
        let call = ex.create_call(f, Some(arg)).unwrap();

        ex.dispose(arg).unwrap();
        let mut out = Vec::new();
        let err = ex.materialize(call, &mut out).unwrap_err();
        assert_eq!(err.code, StatusCode::NotFound);
    }

    #[test]
    fn call_with_unknown_function_is_not_found() {
        let ex = backend();
        let err = ex.create_call(999, None).unwrap_err();
        assert_eq!(err.code, StatusCode::NotFound);
    }

    #[test]
    fn selection_copies_element_with_fresh_id() {
        let ex = backend();
        let a = ex.create_value(b"a").unwrap();
        let b = ex.create_value(b"b").unwrap();
        let s = ex.create_struct(&[a, b]).unwrap();

        let selected = ex.create_selection(s, 1).unwrap();
        assert_ne!(selected, b);

        // Disposing the source leaves the selection materializable.
        ex.dispose(s).unwrap();
        let mut out = Vec::new();
        ex.materialize(selected, &mut out).unwrap();
        assert_eq!(out, b"b");
    }

    #[test]
    fn selection_out_of_range_is_invalid_argument() {
        let ex = backend();
        let a = ex.create_value(b"a").unwrap();
        let s = ex.create_struct(&[a]).unwrap();
        let err = ex.create_selection(s, 5).unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);

        let err = ex.create_selection(a, 0).unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }

    #[test]
    fn dispose_unknown_id_is_not_found() {
        let ex = backend();
        let id = ex.create_value(b"x").unwrap();
        ex.dispose(id).unwrap();
        let err = ex.dispose(id).unwrap_err();
        assert_eq!(err.code, StatusCode::NotFound);
    }
}
