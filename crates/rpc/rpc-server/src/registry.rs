// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Named operations and the per-request dispatch into them.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use rpc_common::{Request, Response, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::Arguments;

/// A registered operation. It receives the server's session object and the request's
/// arguments; an `Err` is reported to the caller and never affects the server.
pub type Operation<S> = Arc<dyn Fn(&S, &Arguments) -> eyre::Result<Value> + Send + Sync>;

/// Why a single request could not produce a value. All of these are answered with an `ok:false`
/// response; none of them stop the dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchFault {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("operation '{name}' failed: {description}")]
    OperationFailed { name: String, description: String },
    #[error("operation '{name}' panicked: {message}")]
    OperationPanicked { name: String, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<DispatchFault> for Response {
    fn from(fault: DispatchFault) -> Self {
        Response::failure(fault.to_string())
    }
}

/// Mapping from operation name to callable. Re-registering a name replaces the previous
/// operation.
pub struct OperationRegistry<S> {
    operations: RwLock<HashMap<String, Operation<S>>>,
}

impl<S> Default for OperationRegistry<S> {
    fn default() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
        }
    }
}

impl<S> OperationRegistry<S> {
    pub fn register<F>(&self, name: impl Into<String>, operation: F)
    where
        F: Fn(&S, &Arguments) -> eyre::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut operations = self
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if operations.insert(name.clone(), Arc::new(operation)).is_some() {
            debug!(operation = name.as_str(), "Replaced previously registered operation");
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Operation<S>> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Look up and run the operation a request names.
    pub fn invoke(&self, session: &S, request: Request) -> Result<Value, DispatchFault> {
        let Some(operation) = self.lookup(&request.name) else {
            return Err(DispatchFault::UnknownOperation(request.name));
        };
        let arguments = Arguments::new(request.args, request.kwargs);

        match catch_unwind(AssertUnwindSafe(|| operation(session, &arguments))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(report)) => {
                error!(operation = request.name.as_str(), error = ?report, "Operation failed");
                Err(DispatchFault::OperationFailed {
                    name: request.name,
                    description: format!("{report:#}"),
                })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    operation = request.name.as_str(),
                    message = message.as_str(),
                    "Operation panicked"
                );
                Err(DispatchFault::OperationPanicked {
                    name: request.name,
                    message,
                })
            }
        }
    }

    /// Turn one request into exactly one response.
    pub fn dispatch(&self, session: &S, request: Request) -> Response {
        match self.invoke(session, request) {
            Ok(value) => Response::success(value),
            Err(fault) => fault.into(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::{WrapErr, bail};
    use rpc_common::Kwargs;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Session {
        calls: AtomicUsize,
    }

    fn registry() -> OperationRegistry<Session> {
        let registry = OperationRegistry::default();
        registry.register("echo", |session: &Session, args: &Arguments| {
            session.calls.fetch_add(1, Ordering::SeqCst);
            Ok(args.get::<Value>(0, "x")?)
        });
        registry.register("fail", |_: &Session, _: &Arguments| {
            Err(std::io::Error::other("disk on fire")).wrap_err("boom")
        });
        registry.register("explode", |_: &Session, _: &Arguments| panic!("kaboom"));
        registry
    }

    fn session() -> Session {
        Session {
            calls: AtomicUsize::new(0),
        }
    }

    fn request(name: &str, args: Vec<Value>) -> Request {
        Request::new(name, args, Kwargs::new())
    }

    #[test]
    fn echo_returns_its_argument() {
        let session = session();
        let response = registry().dispatch(&session, request("echo", vec![json!(42)]));
        assert_eq!(response, Response::success(json!(42)));
        assert_eq!(session.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_description_carries_the_whole_chain() {
        let response = registry().dispatch(&session(), request("fail", vec![]));
        assert!(!response.ok);
        let description = response.payload.as_str().unwrap();
        assert!(description.contains("boom"));
        assert!(description.contains("disk on fire"));
    }

    #[test]
    fn panics_are_contained() {
        let registry = registry();
        let session = session();
        let response = registry.dispatch(&session, request("explode", vec![]));
        assert!(!response.ok);
        assert!(response.payload.as_str().unwrap().contains("kaboom"));

        let response = registry.dispatch(&session, request("echo", vec![json!("still here")]));
        assert_eq!(response.payload, json!("still here"));
    }

    #[test]
    fn unknown_operation_is_a_failed_response() {
        let response = registry().dispatch(&session(), request("nope", vec![]));
        assert_eq!(response, Response::failure("unknown operation 'nope'"));
    }

    #[test]
    fn argument_errors_surface_as_faults() {
        let response = registry().dispatch(&session(), request("echo", vec![]));
        assert!(!response.ok);
        assert!(response.payload.as_str().unwrap().contains("missing argument 'x'"));
    }

    #[test]
    fn last_registration_wins() {
        let registry = registry();
        registry.register("echo", |_: &Session, _: &Arguments| Ok(json!("replaced")));
        let response = registry.dispatch(&session(), request("echo", vec![json!(1)]));
        assert_eq!(response.payload, json!("replaced"));
        assert_eq!(registry.names(), vec!["echo", "explode", "fail"]);
    }

    #[test]
    fn bail_messages_are_kept() {
        let registry = OperationRegistry::<()>::default();
        registry.register("reject", |_: &(), _: &Arguments| bail!("order rejected"));
        let response = registry.dispatch(&(), request("reject", vec![]));
        assert_eq!(
            response,
            Response::failure("operation 'reject' failed: order rejected")
        );
    }
}
