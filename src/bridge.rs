//! Adapter between the two query service shapes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueryError;
use crate::query::{AsyncQueryService, QueryService, Request, ResultIterator};

/// Wraps an [`AsyncQueryService`] as a blocking [`QueryService`]: submit,
/// then wait for the handle to become ready.
///
/// A refused submission stays an `Err`; a query that ran and failed comes
/// back as an iterator carrying the error, so the two failure classes
/// survive the bridge.
pub struct QueryServiceBridge {
    service: Arc<dyn AsyncQueryService>,
}

impl QueryServiceBridge {
    pub fn new(service: Arc<dyn AsyncQueryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueryService for QueryServiceBridge {
    async fn query(&self, req: Request) -> Result<ResultIterator, QueryError> {
        let mut handle = self.service.submit(req).await?;
        let results = handle.ready().await;
        let err = handle.err();
        handle.done();
        Ok(match err {
            Some(err) => ResultIterator::from_error(err),
            None => ResultIterator::from_results(results.unwrap_or_default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::QueryServiceBridge;
    use crate::error::QueryError;
    use crate::query::{
        AsyncQueryService, QueryHandle, QueryService, Request, ResultSet, ResultSets,
    };

    enum StubBehavior {
        Refuse,
        Fail,
        Succeed,
    }

    struct StubService {
        behavior: StubBehavior,
    }

    #[async_trait]
    impl AsyncQueryService for StubService {
        async fn submit(&self, _req: Request) -> Result<QueryHandle, QueryError> {
            let (completion, handle) = QueryHandle::pending();
            match self.behavior {
                StubBehavior::Refuse => return Err(QueryError::new("refused")),
                StubBehavior::Fail => completion.fail(QueryError::new("evaluation failed")),
                StubBehavior::Succeed => {
                    let mut results = ResultSets::new();
                    results.insert(
                        "res".to_string(),
                        ResultSet {
                            name: "res".to_string(),
                            ..Default::default()
                        },
                    );
                    completion.succeed(results);
                }
            }
            Ok(handle)
        }
    }

    fn request() -> Request {
        Request {
            org: crate::id::Id(1),
            spec: crate::lang::compile("from(bucket: \"one\")", 123).unwrap(),
            authorization: crate::query::Authorization::for_user(crate::id::Id(2)),
        }
    }

    #[tokio::test]
    async fn refusal_stays_an_error() {
        let bridge = QueryServiceBridge::new(Arc::new(StubService {
            behavior: StubBehavior::Refuse,
        }));
        let err = bridge.query(request()).await.unwrap_err();
        assert_eq!(err, QueryError::new("refused"));
    }

    #[tokio::test]
    async fn evaluation_failure_rides_the_iterator() {
        let bridge = QueryServiceBridge::new(Arc::new(StubService {
            behavior: StubBehavior::Fail,
        }));
        let iter = bridge.query(request()).await.unwrap();
        assert_eq!(iter.err(), Some(QueryError::new("evaluation failed")));
    }

    #[tokio::test]
    async fn success_delivers_results() {
        let bridge = QueryServiceBridge::new(Arc::new(StubService {
            behavior: StubBehavior::Succeed,
        }));
        let mut iter = bridge.query(request()).await.unwrap();
        assert_eq!(iter.err(), None);
        iter.drain();
        iter.release();
    }
}
