use crate::error::{ProxyError, Result};
use std::{future::Future, io, net::SocketAddr};
use tracing::debug;

/// Resolver turns a target host and port into candidate socket addresses.
///
/// Implementations must not block the runtime thread: the future is awaited
/// from the session's own task, so only that session waits on it.
pub trait Resolver: Send + Sync + 'static {
    fn lookup(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Vec<SocketAddr>>> + Send;
}

/// SystemResolver uses the platform resolver through tokio, which runs
/// getaddrinfo on the blocking pool
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// resolve runs a lookup and picks the first candidate. Later candidates
/// are never tried.
pub async fn resolve<R: Resolver>(resolver: &R, host: &str, port: u16) -> Result<SocketAddr> {
    let candidates = resolver
        .lookup(host, port)
        .await
        .map_err(|source| ProxyError::Resolution {
            host: host.to_string(),
            source,
        })?;

    debug!("resolved {host}:{port} to {} candidate(s)", candidates.len());

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProxyError::NoCandidates(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<SocketAddr>);

    impl Resolver for Fixed {
        async fn lookup(&self, _: &str, _: u16) -> io::Result<Vec<SocketAddr>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn picks_first_candidate() {
        let first: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let second: SocketAddr = "10.0.0.2:80".parse().unwrap();
        let resolver = Fixed(vec![first, second]);

        assert_eq!(resolve(&resolver, "example.com", 80).await.unwrap(), first);
    }

    #[tokio::test]
    async fn empty_candidate_list_is_a_resolution_error() {
        let err = resolve(&Fixed(vec![]), "example.com", 80).await.unwrap_err();
        assert!(err.is_resolution());
    }

    #[tokio::test]
    async fn system_resolver_handles_ip_literals() {
        let addr = resolve(&SystemResolver, "127.0.0.1", 8080).await.unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn system_resolver_fails_on_raw_octet_host() {
        let err = resolve(&SystemResolver, "\u{7f}\0\0\u{1}", 80).await.unwrap_err();
        assert!(err.is_resolution());
    }
}
