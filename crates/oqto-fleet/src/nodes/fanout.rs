//! Run one operation per node concurrently.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;

/// Run `op` against every host at once, each bounded by `limit`.
///
/// Results come back in input order. A host that errors or exceeds the limit
/// yields `Err(reason)` without affecting the others.
pub async fn for_each_node<T, E, F, Fut>(
    hosts: Vec<String>,
    limit: Duration,
    op: F,
) -> Vec<(String, Result<T, String>)>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let tasks = hosts.into_iter().map(|host| {
        let fut = op(host.clone());
        async move {
            let result = match timeout(limit, fut).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}s", limit.as_secs_f64())),
            };
            (host, result)
        }
    });

    join_all(tasks).await
}
