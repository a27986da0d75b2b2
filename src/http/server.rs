//! HTTP server lifecycle.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;

/// Serve `app` until `signal` resolves.
///
/// After the signal fires no new connections are accepted and in-flight
/// requests get up to `grace` to finish. The future resolves once the
/// server has drained or the grace period has run out; flushing limiter
/// state is left to the caller.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (fired_tx, mut fired_rx) = watch::channel(false);

    info!(addr = ?listener.local_addr().ok(), "Starting HTTP server");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        signal.await;
        let _ = fired_tx.send(true);
    })
    .into_future();
    tokio::pin!(server);

    tokio::select! {
        biased;
        result = &mut server => {
            return result.map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e.into()
            });
        }
        _ = fired_rx.changed() => {}
    }

    info!(
        grace_secs = grace.as_secs(),
        "Stopped accepting connections, draining in-flight requests"
    );

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result?,
        Err(_) => warn!(
            grace_secs = grace.as_secs(),
            "Grace period elapsed with requests still in flight"
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{router, AppState};
    use crate::persistence::MemoryPersistence;
    use crate::ratelimit::{LimiterSettings, RateLimiter, GLOBAL_KEY};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn raw_get(addr: SocketAddr, ip: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET / HTTP/1.1\r\nHost: localhost\r\nX-Forwarded-For: {}\r\nConnection: close\r\n\r\n",
            ip
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_until_shutdown_then_returns() {
        let limiter = Arc::new(
            RateLimiter::new(LimiterSettings::default(), Arc::new(MemoryPersistence::new()))
                .unwrap(),
        );
        let state = AppState::new(limiter.clone(), "X-Forwarded-For").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(serve_with_shutdown(
            listener,
            router(state),
            async move {
                let _ = stop_rx.await;
            },
            Duration::from_secs(5),
        ));

        let response = raw_get(addr, "10.0.0.1").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("global=1 identity=1 rejected=false"));

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(limiter.count(GLOBAL_KEY), Some(1));
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
