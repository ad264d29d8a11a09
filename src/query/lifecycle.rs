//! Per-request lifecycle.
//!
//! `Received -> ResolveLocality -> {LocalServe | RemoteRedirect} -> {Responded | RespondedError}`
//!
//! Each phase is its own type and transitions consume the previous one, so a
//! request cannot be served before its locality is resolved or answered twice.

use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;
use uuid::Uuid;

use crate::directory::assignment::NodeInfo;
use crate::error::{Result, StateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    ResolveLocality,
    LocalServe,
    RemoteRedirect,
    Responded,
    RespondedError,
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestPhase::Received => "RECEIVED",
            RequestPhase::ResolveLocality => "RESOLVE_LOCALITY",
            RequestPhase::LocalServe => "LOCAL_SERVE",
            RequestPhase::RemoteRedirect => "REMOTE_REDIRECT",
            RequestPhase::Responded => "RESPONDED",
            RequestPhase::RespondedError => "RESPONDED_ERROR",
        };
        f.write_str(name)
    }
}

pub struct Received;
pub struct Resolving;
pub struct Serving;
pub struct Redirecting;

/// Phases from which a request may be answered.
pub trait Answerable {
    const PHASE: RequestPhase;
}

impl Answerable for Resolving {
    const PHASE: RequestPhase = RequestPhase::ResolveLocality;
}

impl Answerable for Serving {
    const PHASE: RequestPhase = RequestPhase::LocalServe;
}

impl Answerable for Redirecting {
    const PHASE: RequestPhase = RequestPhase::RemoteRedirect;
}

pub struct Request<P> {
    id: Uuid,
    operation: &'static str,
    store: String,
    started: Instant,
    _phase: PhantomData<P>,
}

impl<P> Request<P> {
    fn advance<Q>(self, next: RequestPhase) -> Request<Q> {
        tracing::debug!(
            request = %self.id,
            op = self.operation,
            store = %self.store,
            "-> {}",
            next
        );
        Request {
            id: self.id,
            operation: self.operation,
            store: self.store,
            started: self.started,
            _phase: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Request<Received> {
    pub fn received(operation: &'static str, store: &str) -> Self {
        let request = Request {
            id: Uuid::new_v4(),
            operation,
            store: store.to_string(),
            started: Instant::now(),
            _phase: PhantomData,
        };
        tracing::debug!(
            request = %request.id,
            op = operation,
            store = %store,
            "{}",
            RequestPhase::Received
        );
        request
    }

    pub fn resolve_locality(self) -> Request<Resolving> {
        self.advance(RequestPhase::ResolveLocality)
    }
}

impl Request<Resolving> {
    pub fn serve_locally(self) -> Request<Serving> {
        self.advance(RequestPhase::LocalServe)
    }

    pub fn redirect(self, owner: &NodeInfo) -> Request<Redirecting> {
        tracing::debug!(request = %self.id, owner = %owner.id, "redirecting to {}", owner.address());
        self.advance(RequestPhase::RemoteRedirect)
    }
}

impl<P: Answerable> Request<P> {
    pub fn respond<T>(self, result: Result<T>) -> Completed<T> {
        let phase = match &result {
            Ok(_) => RequestPhase::Responded,
            Err(_) => RequestPhase::RespondedError,
        };
        let elapsed = self.started.elapsed();
        match &result {
            Ok(_) => tracing::debug!(
                request = %self.id,
                op = self.operation,
                store = %self.store,
                from = %P::PHASE,
                ?elapsed,
                "{}",
                phase
            ),
            Err(e) => tracing::debug!(
                request = %self.id,
                op = self.operation,
                store = %self.store,
                from = %P::PHASE,
                ?elapsed,
                error = %e,
                "{}",
                phase
            ),
        }
        Completed {
            answered_from: P::PHASE,
            phase,
            result,
        }
    }

    pub fn fail<T>(self, error: StateError) -> Completed<T> {
        self.respond(Err(error))
    }
}

/// A request in a terminal phase.
#[derive(Debug)]
pub struct Completed<T> {
    answered_from: RequestPhase,
    phase: RequestPhase,
    result: Result<T>,
}

impl<T> Completed<T> {
    /// `Responded` or `RespondedError`.
    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    /// The phase the request was answered from.
    pub fn answered_from(&self) -> RequestPhase {
        self.answered_from
    }

    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_success_path() {
        let completed = Request::received("get", "s")
            .resolve_locality()
            .serve_locally()
            .respond(Ok(5));

        assert_eq!(completed.phase(), RequestPhase::Responded);
        assert_eq!(completed.answered_from(), RequestPhase::LocalServe);
        assert_eq!(completed.into_result(), Ok(5));
    }

    #[test]
    fn test_resolution_failure_ends_in_error() {
        let completed: Completed<()> = Request::received("get", "nope")
            .resolve_locality()
            .fail(StateError::StoreNotFound("nope".into()));

        assert_eq!(completed.phase(), RequestPhase::RespondedError);
        assert_eq!(completed.answered_from(), RequestPhase::ResolveLocality);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(RequestPhase::RemoteRedirect.to_string(), "REMOTE_REDIRECT");
        assert_eq!(RequestPhase::RespondedError.to_string(), "RESPONDED_ERROR");
    }
}
