//! Remote API.
//!
//! The engine talks to the server through small traits defined next to
//! their consumers ([`CatalogSource`](crate::sync::CatalogSource),
//! [`TargetResolver`](crate::transfer::TargetResolver),
//! [`BulkApi`](crate::bulk::BulkApi),
//! [`LocalStateRefresher`](crate::bulk::LocalStateRefresher)).
//! [`HttpApiClient`] implements all of them over plain JSON.

mod client;
mod error;

use std::future::Future;
use std::pin::Pin;

pub use client::{ApiConfig, HttpApiClient, DEFAULT_API_TIMEOUT};
pub use error::{ApiError, ApiResult};

/// Boxed future returned by the dyn-compatible collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
