//! Request dispatch: translates wire operations into registry lookups and
//! executor capability calls.
//!
//! Every value-producing handler follows one pattern: resolve the executor,
//! decode incoming refs, invoke the capability and adopt the produced id
//! into an ownership guard, then release the guard into the response.
//! Capability failures are funneled through
//! [`ExecutorService::handle_failure`], which evicts the executor on
//! `FailedPrecondition` before the error is returned. Value-level dispose
//! failures are the one exception: they report without evicting.

use std::sync::Arc;

use cohort_contracts::{
    decode_payload, encode_payload, RequestOp, ResponsePayload, Status, StatusCode,
};
use cohort_executor::cardinalities::cardinality_map_from_wire;
use cohort_executor::{Executor, ExecutorFactory, ExecutorRequirements, OwnedValueId, ValueId};

use crate::resolver::ExecutorResolver;

/// Decodes a wire value reference: the decimal digits of a backend-local id.
fn remote_value_to_id(value_ref: &str) -> Result<ValueId, Status> {
    value_ref.parse::<ValueId>().map_err(|_| {
        Status::invalid_argument(format!(
            "expected value ref to be an integer id, found {value_ref:?}"
        ))
    })
}

fn id_to_remote_value(id: ValueId) -> String {
    id.to_string()
}

/// Consumes the guard on the success path: ownership moves to the client
/// holding the response.
fn release_to_wire(owned: OwnedValueId) -> ResponsePayload {
    ResponsePayload::ValueRef {
        value_ref: id_to_remote_value(owned.release()),
    }
}

pub struct ExecutorService {
    resolver: ExecutorResolver,
}

impl ExecutorService {
    pub fn new(service_id: impl Into<String>, factory: ExecutorFactory) -> Self {
        Self {
            resolver: ExecutorResolver::new(service_id, factory),
        }
    }

    pub fn resolver(&self) -> &ExecutorResolver {
        &self.resolver
    }

    /// Dispatches one wire operation to its handler.
    pub fn handle(&self, op: &RequestOp) -> Result<ResponsePayload, Status> {
        match op {
            RequestOp::GetExecutor { cardinalities } => {
                let cardinalities = cardinality_map_from_wire(cardinalities)?;
                let entry = self
                    .resolver
                    .for_requirements(&ExecutorRequirements { cardinalities })?;
                Ok(ResponsePayload::Executor {
                    executor_id: entry.executor_key,
                })
            }
            RequestOp::CreateValue { executor_id, value } => {
                let executor = self.require_executor(op.label(), executor_id)?;
                let payload = decode_payload(value)?;
                let owned = self.adopt(&executor, executor_id, executor.create_value(&payload))?;
                Ok(release_to_wire(owned))
            }
            RequestOp::CreateCall {
                executor_id,
                function_ref,
                argument_ref,
            } => {
                let executor = self.require_executor(op.label(), executor_id)?;
                let function = remote_value_to_id(function_ref)?;
                let argument = argument_ref
                    .as_deref()
                    .map(remote_value_to_id)
                    .transpose()?;
                let owned = self.adopt(
                    &executor,
                    executor_id,
                    executor.create_call(function, argument),
                )?;
                Ok(release_to_wire(owned))
            }
            RequestOp::CreateStruct {
                executor_id,
                element_refs,
            } => {
                let executor = self.require_executor(op.label(), executor_id)?;
                let mut elements = Vec::with_capacity(element_refs.len());
                for element_ref in element_refs {
                    elements.push(remote_value_to_id(element_ref)?);
                }
                let owned =
                    self.adopt(&executor, executor_id, executor.create_struct(&elements))?;
                Ok(release_to_wire(owned))
            }
            RequestOp::CreateSelection {
                executor_id,
                source_ref,
                index,
            } => {
                let executor = self.require_executor(op.label(), executor_id)?;
                let source = remote_value_to_id(source_ref)?;
                let owned = self.adopt(
                    &executor,
                    executor_id,
                    executor.create_selection(source, *index),
                )?;
                Ok(release_to_wire(owned))
            }
            RequestOp::Compute {
                executor_id,
                value_ref,
            } => {
                let executor = self.require_executor(op.label(), executor_id)?;
                let id = remote_value_to_id(value_ref)?;
                let mut out = Vec::new();
                executor
                    .materialize(id, &mut out)
                    .map_err(|status| self.handle_failure(status, executor_id))?;
                Ok(ResponsePayload::Value {
                    value: encode_payload(&out),
                })
            }
            RequestOp::Dispose {
                executor_id,
                value_refs,
            } => {
                // The targeted values are certainly gone if their executor
                // is; a vanished executor makes this dispose a success.
                let executor = match self.require_executor(op.label(), executor_id) {
                    Ok(executor) => executor,
                    Err(_) => return Ok(ResponsePayload::Empty {}),
                };
                for value_ref in value_refs {
                    // Refs that fail to decode are skipped without aborting
                    // the batch; the first capability failure aborts it.
                    // Dispose failures are reported as-is, with no eviction:
                    // a backend refusing to drop a value says nothing about
                    // whether the executor can still serve.
                    let Ok(id) = remote_value_to_id(value_ref) else {
                        continue;
                    };
                    executor.dispose(id)?;
                }
                Ok(ResponsePayload::Empty {})
            }
            RequestOp::DisposeExecutor { executor_id } => {
                self.resolver.dispose_executor(executor_id)?;
                Ok(ResponsePayload::Empty {})
            }
        }
    }

    fn require_executor(
        &self,
        op_label: &str,
        executor_id: &str,
    ) -> Result<Arc<dyn Executor>, Status> {
        Ok(self.resolver.for_id(executor_id, op_label)?.executor)
    }

    /// Adopts the result of a value-producing capability call. A produced
    /// id is wrapped in its ownership guard right here, so every early
    /// return between production and the wire response disposes the value
    /// instead of leaking it; a failure goes through the eviction rule.
    fn adopt(
        &self,
        executor: &Arc<dyn Executor>,
        executor_id: &str,
        produced: Result<ValueId, Status>,
    ) -> Result<OwnedValueId, Status> {
        produced
            .map(|id| OwnedValueId::new(id, Arc::clone(executor)))
            .map_err(|status| self.handle_failure(status, executor_id))
    }

    /// Fault-eviction rule: a `FailedPrecondition` from a backend marks the
    /// instance untrustworthy and removes it from the registry before the
    /// error propagates. Later operations against the same identifier hit
    /// the retryable unknown-executor path.
    fn handle_failure(&self, status: Status, executor_id: &str) -> Status {
        if status.code == StatusCode::FailedPrecondition {
            eprintln!("cohortd: evicting executor {executor_id:?} after: {status}");
            self.resolver.destroy_executor(executor_id);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_value_decoding() {
        assert_eq!(remote_value_to_id("0").unwrap(), 0);
        assert_eq!(remote_value_to_id("42").unwrap(), 42);
        for bad in ["", "-1", "4.2", "abc", "7seven"] {
            let err = remote_value_to_id(bad).unwrap_err();
            assert_eq!(err.code, StatusCode::InvalidArgument, "input {bad:?}");
        }
        assert_eq!(id_to_remote_value(42), "42");
    }
}
