//! How a client reaches one endpoint
//!
//! A transport failure (`Err` with [`Error::is_transport_failure`]) is kept
//! distinct from an application-level rejection, which arrives as an
//! ordinary [`AcceptRejectResponse`].
//!
//! [`Error::is_transport_failure`]: crate::common::Error::is_transport_failure

use crate::common::Result;
use crate::protocol::{AcceptRejectResponse, ChangeRecord, DiscoverResponse, MutativeMessage, NomadChange};
use std::future::Future;

pub trait NomadTransport<C: NomadChange>: Send + Sync + 'static {
    fn discover(&self, endpoint: &str) -> impl Future<Output = Result<DiscoverResponse<C>>> + Send;

    fn mutate(
        &self,
        endpoint: &str,
        message: MutativeMessage<C>,
    ) -> impl Future<Output = Result<AcceptRejectResponse>> + Send;

    /// Records with a version above `version`, for resynchronizing an endpoint
    fn changes_since(
        &self,
        endpoint: &str,
        version: u64,
    ) -> impl Future<Output = Result<Vec<ChangeRecord<C>>>> + Send;
}
