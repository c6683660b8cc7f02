//! The handler seam: get, set and call operations over a part of the graph.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::envelope::{GraphEnvelope, GraphResponse};
use crate::error::{Error, Result};
use crate::path::Path;
use crate::value::GraphValue;

/// Who is making a request. Anonymous requests carry no user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Identity { user: None }
    }

    pub fn user(user: impl Into<String>) -> Self {
        Identity {
            user: Some(user.into()),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

/// A capability check run before any mutation.
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self, identity: &Identity) -> bool;
}

/// Allows any identified user, and nobody else.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireUser;

impl Authorizer for RequireUser {
    fn is_authorized(&self, identity: &Identity) -> bool {
        identity.user.is_some()
    }
}

impl<F> Authorizer for F
where
    F: Fn(&Identity) -> bool + Send + Sync,
{
    fn is_authorized(&self, identity: &Identity) -> bool {
        self(identity)
    }
}

/// Run the authorization check for a mutation, returning the user it is
/// made on behalf of.
pub fn authorize<'a>(authorizer: &dyn Authorizer, identity: &'a Identity) -> Result<&'a str> {
    match identity.user_id() {
        Some(user) if authorizer.is_authorized(identity) => Ok(user),
        _ => {
            debug!(?identity, "rejecting unauthorized mutation");
            Err(Error::Unauthorized)
        }
    }
}

/// The three operations a part of the graph can offer.
///
/// `get` resolves a query into path values. `set` applies the leaves of an
/// envelope and reports what they ended up as. `call` runs a named function
/// at a path. Handlers only offering reads leave `set` and `call` at their
/// defaults, which fail with [`Error::Unsupported`].
///
/// Per-key failures come back inside the response as path values; an `Err`
/// means the whole operation was rejected (see [`Error::is_call_level`]) or
/// its backend failed outright.
#[async_trait]
pub trait Handler: Send + Sync {
    type Query: Send + Sync;

    async fn get(&self, identity: &Identity, query: &Self::Query) -> Result<GraphResponse>;

    async fn set(&self, _identity: &Identity, _envelope: &GraphEnvelope) -> Result<GraphResponse> {
        Err(Error::Unsupported("set".to_owned()))
    }

    async fn call(
        &self,
        _identity: &Identity,
        path: &Path,
        _args: &[GraphValue],
    ) -> Result<GraphResponse> {
        Err(Error::Unsupported(format!("call {}", path)))
    }
}
