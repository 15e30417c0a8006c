//! # Enumerator
//!
//! Lazy, paginated discovery of encrypted resources.
//!
//! [`Enumerator::list`] returns a flat stream; pages are fetched on demand as
//! the consumer pulls items, so a slow worker pool never buffers more than one
//! page. Every call starts a fresh listing. A failed page ends the stream with
//! a single [`DiscoveryError`].

use super::budget::{ApiBudget, CallError};
use super::types::EncryptedResourceRef;
use crate::cluster::{ClusterError, EncryptedResourceStore};
use crate::config::Scope;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Discovery failed; fatal for the run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("listing unavailable after {listed} items: {source}")]
    Unavailable { listed: usize, source: ClusterError },
    #[error("continuation token rejected after {listed} items: {message}")]
    ContinuationRejected { listed: usize, message: String },
    #[error("not authorized to list SealedSecrets: {0}")]
    Unauthorized(String),
    #[error("listing cancelled")]
    Cancelled,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

struct ListState {
    cursor: Cursor,
    listed: usize,
}

/// Produces encrypted-resource descriptors for a scope
#[derive(Clone)]
pub struct Enumerator {
    store: Arc<dyn EncryptedResourceStore>,
    budget: Arc<ApiBudget>,
    page_size: u32,
}

impl Enumerator {
    pub fn new(
        store: Arc<dyn EncryptedResourceStore>,
        budget: Arc<ApiBudget>,
        page_size: u32,
    ) -> Self {
        Self {
            store,
            budget,
            page_size,
        }
    }

    /// Stream every encrypted resource in `scope`
    pub fn list(
        &self,
        scope: Scope,
    ) -> BoxStream<'static, Result<EncryptedResourceRef, DiscoveryError>> {
        let this = self.clone();
        let scope = Arc::new(scope);
        let initial = ListState {
            cursor: Cursor::Start,
            listed: 0,
        };

        stream::try_unfold(initial, move |state| {
            let this = this.clone();
            let scope = Arc::clone(&scope);
            async move {
                let token = match state.cursor {
                    Cursor::Done => return Ok(None),
                    Cursor::Start => None,
                    Cursor::Next(token) => Some(token),
                };
                let (items, next) = this.fetch_page(&scope, token, state.listed).await?;
                let listed = state.listed + items.len();
                let cursor = next.map_or(Cursor::Done, Cursor::Next);
                Ok::<_, DiscoveryError>(Some((
                    stream::iter(items.into_iter().map(Ok::<_, DiscoveryError>)),
                    ListState { cursor, listed },
                )))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn fetch_page(
        &self,
        scope: &Scope,
        token: Option<String>,
        listed: usize,
    ) -> Result<(Vec<EncryptedResourceRef>, Option<String>), DiscoveryError> {
        let store = &self.store;
        let page_size = self.page_size;
        let continuing = token.is_some();
        let token = token.as_deref();
        let page = self
            .budget
            .call("list", move || store.list_page(scope, page_size, token))
            .await
            .map_err(|err| match err {
                CallError::Cancelled => DiscoveryError::Cancelled,
                CallError::Failed(ClusterError::Unauthorized(message)) => {
                    DiscoveryError::Unauthorized(message)
                }
                CallError::Failed(ClusterError::Gone(message)) if continuing => {
                    DiscoveryError::ContinuationRejected { listed, message }
                }
                CallError::Failed(source) => DiscoveryError::Unavailable { listed, source },
            })?;

        debug!(
            scope = %scope.describe(),
            items = page.items.len(),
            listed_before = listed,
            more = page.continue_token.is_some(),
            "fetched discovery page"
        );
        Ok((page.items, page.continue_token))
    }
}
