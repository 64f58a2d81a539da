

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::base::{Registry, SourceAdapter, SourceError, SourceQuery, SourceRecord};
use crate::captcha::ChallengeSite;


/// A registry client that performs blocking network and parsing work.
pub trait BlockingSourceAdapter: Send + Sync + 'static {

    fn registry(&self) -> Registry;

    fn challenge(&self) -> Option<&ChallengeSite> {
        None
    }

    fn requires_issue_date(&self) -> bool {
        false
    }

    fn lookup_blocking(&self, query: &SourceQuery) -> Result<SourceRecord, SourceError>;
}


/// Runs a [`BlockingSourceAdapter`] on the blocking thread pool so that it
/// never stalls the async workers.
pub struct BlockingSource<A> {
    inner: Arc<A>,
}

impl<A: BlockingSourceAdapter> BlockingSource<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl<A: BlockingSourceAdapter> SourceAdapter for BlockingSource<A> {
    fn registry(&self) -> Registry {
        self.inner.registry()
    }

    fn challenge(&self) -> Option<&ChallengeSite> {
        self.inner.challenge()
    }

    fn requires_issue_date(&self) -> bool {
        self.inner.requires_issue_date()
    }

    async fn lookup(&self, query: &SourceQuery) -> Result<SourceRecord, SourceError> {
        let inner = Arc::clone(&self.inner);
        let query = query.clone();

        match tokio::task::spawn_blocking(move || inner.lookup_blocking(&query)).await {
            Ok(result) => result,
            Err(e) => {
                error!("Blocking lookup for {} panicked: {}", self.inner.registry(), e);
                Err(SourceError::Internal(format!("adapter task failed: {}", e)))
            }
        }
    }
}
