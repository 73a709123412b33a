//! Transport chain, connect and rotation behaviour through the public API.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use vidrelay::bot::resilient::ResilientInvoker;
use vidrelay::bot::transport::{
    build_chain, Connector, PathId, TransportError, TransportPath, TransportSelector,
};
use vidrelay::config::Settings;

/// Connector whose "client" is just the path id; probes fail for `down`.
struct FakeConnector {
    down: HashSet<PathId>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Client = PathId;

    fn client_for(&self, path: &TransportPath) -> Result<PathId, TransportError> {
        Ok(path.id)
    }

    async fn probe(&self, client: &PathId) -> Result<(), TransportError> {
        if self.down.contains(client) {
            Err(TransportError::Probe(format!("{client} unreachable")))
        } else {
            Ok(())
        }
    }
}

fn full_settings() -> Settings {
    let mut settings = Settings::with_token("123:abc");
    settings.socks5_host = Some("127.0.0.1".to_string());
    settings.socks5_port = Some("1080".to_string());
    settings.mtproto_host = Some("proxy.example".to_string());
    settings.mtproto_port = Some("443".to_string());
    settings.mtproto_secret = Some("ee00".to_string());
    settings
}

fn invoker(settings: Settings, down: &[PathId]) -> ResilientInvoker<FakeConnector> {
    let connector = FakeConnector {
        down: down.iter().copied().collect(),
    };
    ResilientInvoker::new(Arc::new(TransportSelector::new(
        connector,
        Arc::new(settings),
    )))
}

fn record(visits: &Mutex<Vec<PathId>>, id: PathId) {
    match visits.lock() {
        Ok(mut v) => v.push(id),
        Err(poisoned) => poisoned.into_inner().push(id),
    }
}

fn recorded(visits: &Mutex<Vec<PathId>>) -> Vec<PathId> {
    match visits.lock() {
        Ok(v) => v.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[test]
fn chain_order_is_socks5_mtproto_direct() {
    let ids: Vec<PathId> = build_chain(&full_settings()).iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![PathId::Socks5, PathId::Mtproto, PathId::Direct]);

    let ids: Vec<PathId> = build_chain(&Settings::with_token("t"))
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![PathId::Direct]);
}

#[tokio::test]
async fn startup_fails_when_no_path_is_reachable() {
    let invoker = invoker(
        full_settings(),
        &[PathId::Socks5, PathId::Mtproto, PathId::Direct],
    );
    match invoker.connect().await {
        Err(TransportError::Unreachable { tried }) => assert_eq!(tried, 3),
        other => panic!("expected Unreachable, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_picks_first_healthy_path() -> Result<(), TransportError> {
    let invoker = invoker(full_settings(), &[PathId::Socks5]);
    let path = invoker.connect().await?;
    assert_eq!(path.id, PathId::Mtproto);
    assert_eq!(invoker.selector().active_id(), Some(PathId::Mtproto));
    Ok(())
}

#[tokio::test]
async fn invoke_rotates_from_active_path() -> Result<(), TransportError> {
    let invoker = invoker(full_settings(), &[PathId::Socks5]);
    invoker.connect().await?;

    let visits = Mutex::new(Vec::new());
    let served_by = invoker
        .invoke(|client| {
            record(&visits, client);
            async move {
                if client == PathId::Mtproto {
                    Err("timed out")
                } else {
                    Ok(client)
                }
            }
        })
        .await?;

    assert_eq!(served_by, PathId::Direct);
    assert_eq!(recorded(&visits), vec![PathId::Mtproto, PathId::Direct]);
    // The next call starts where the last one succeeded
    assert_eq!(invoker.selector().active_id(), Some(PathId::Direct));
    Ok(())
}

#[tokio::test]
async fn invoke_surfaces_last_failure_after_full_rotation() -> Result<(), TransportError> {
    let invoker = invoker(full_settings(), &[]);
    invoker.connect().await?;
    assert_eq!(invoker.selector().active_id(), Some(PathId::Socks5));

    let visits = Mutex::new(Vec::new());
    let result: Result<(), TransportError> = invoker
        .invoke(|client| {
            record(&visits, client);
            async move { Err::<(), _>(format!("{client} refused")) }
        })
        .await;

    match result {
        Err(TransportError::Exhausted {
            attempts,
            path,
            message,
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(path, PathId::Direct);
            assert_eq!(message, "direct refused");
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(
        recorded(&visits),
        vec![PathId::Socks5, PathId::Mtproto, PathId::Direct]
    );
    Ok(())
}

#[tokio::test]
async fn invalid_port_drops_the_path() -> Result<(), TransportError> {
    let mut settings = full_settings();
    settings.socks5_port = Some("not-a-port".to_string());
    let invoker = invoker(settings, &[]);

    let ids: Vec<PathId> = invoker.rotation().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![PathId::Mtproto, PathId::Direct]);
    assert_eq!(invoker.connect().await?.id, PathId::Mtproto);
    Ok(())
}
