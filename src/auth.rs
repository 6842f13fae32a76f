//! Per-thing authorization headers

use std::{fmt, sync::Arc};

use tracing::warn;

use crate::repository::{AuthorizationRecord, Repository};

/// Value of an `Authorization` header, `<scheme> <credentials>`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthHeader(String);

impl AuthHeader {
    pub fn new(scheme: &str, credentials: &str) -> Self {
        Self(format!("{scheme} {credentials}"))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&AuthorizationRecord> for AuthHeader {
    fn from(record: &AuthorizationRecord) -> Self {
        Self::new(&record.scheme, &record.credentials)
    }
}

// Credentials never end up in logs
impl fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = self.0.split_once(' ').map_or("", |(scheme, _)| scheme);
        write!(f, "AuthHeader({scheme} ***)")
    }
}

/// Builds the headers attached to Thing requests
#[derive(Clone)]
pub struct AuthorizationResolver {
    repository: Arc<dyn Repository>,
}

impl AuthorizationResolver {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// The header for `thing_id`, or `None` when no credential is stored.
    ///
    /// A failing store is treated like a missing record.
    pub async fn resolve(&self, thing_id: &str) -> Option<AuthHeader> {
        match self.repository.get_authorization(thing_id).await {
            Ok(record) => record.as_ref().map(AuthHeader::from),
            Err(error) => {
                warn!(thing_id, %error, "cannot read authorization record");
                None
            }
        }
    }
}
