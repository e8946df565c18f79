//! Mesh 广播：推送自身广播数据，后台轮询对等节点并发布 PeerDetected / PeerLost

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{GridClient, Peer};
use crate::core::events::{AgentEvent, EventBus};
use crate::core::policy::{AdvertisedStats, Mesh};

struct Inner {
    client: GridClient,
    events: EventBus,
    poll_interval: Duration,
    advertisement: RwLock<Value>,
    peers: RwLock<Vec<Peer>>,
}

/// 基于 GridClient 的 Mesh 实现
#[derive(Clone)]
pub struct Advertiser {
    inner: Arc<Inner>,
}

impl Advertiser {
    pub fn new(client: GridClient, events: EventBus, name: &str, poll_interval: Duration) -> Self {
        let advertisement = serde_json::json!({
            "name": name,
            "identity": "",
            "version": env!("CARGO_PKG_VERSION"),
            "pwnd_run": 0,
            "pwnd_tot": 0,
            "uptime": 0,
            "epoch": 0,
            "policy": {},
        });
        Self {
            inner: Arc::new(Inner {
                client,
                events,
                poll_interval: poll_interval.max(Duration::from_secs(1)),
                advertisement: RwLock::new(advertisement),
                peers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// 广播中携带的自身策略参数
    pub fn with_policy(self, policy: Value) -> Self {
        if let Ok(mut adv) = self.inner.advertisement.try_write() {
            adv["policy"] = policy;
        }
        self
    }

    /// 用新的节点列表替换旧表，返回 (新出现, 已消失)
    async fn refresh_peers(&self, fresh: Vec<Peer>) -> (Vec<Peer>, Vec<Peer>) {
        let mut peers = self.inner.peers.write().await;
        let detected: Vec<Peer> = fresh
            .iter()
            .filter(|p| !peers.iter().any(|old| old.identity() == p.identity()))
            .cloned()
            .collect();
        let lost: Vec<Peer> = peers
            .iter()
            .filter(|old| !fresh.iter().any(|p| p.identity() == old.identity()))
            .cloned()
            .collect();
        *peers = fresh;
        (detected, lost)
    }

    async fn poll_once(&self) {
        match self.inner.client.peers().await {
            Ok(fresh) => {
                let (detected, lost) = self.refresh_peers(fresh).await;
                for peer in detected {
                    tracing::info!("Peer detected: {} ({})", peer.name(), peer.identity());
                    self.inner.events.publish(AgentEvent::PeerDetected { peer });
                }
                for peer in lost {
                    tracing::info!("Peer lost: {} ({})", peer.name(), peer.identity());
                    self.inner.events.publish(AgentEvent::PeerLost { peer });
                }
            }
            Err(e) => tracing::debug!("Error while polling peers ({})", e),
        }
    }
}

#[async_trait]
impl Mesh for Advertiser {
    async fn start_advertising(&self) {
        let data = self.inner.advertisement.read().await.clone();
        if let Err(e) = self.inner.client.set_advertisement_data(data).await {
            tracing::warn!("Error while setting advertisement data ({})", e);
        }
        if let Err(e) = self.inner.client.advertise(true).await {
            tracing::warn!("Error while enabling advertising ({})", e);
        }

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                this.poll_once().await;
                tokio::time::sleep(this.inner.poll_interval).await;
            }
        });
    }

    async fn peers(&self) -> Vec<Peer> {
        self.inner.peers.read().await.clone()
    }

    async fn update_advertisement(&self, stats: AdvertisedStats) {
        let data = {
            let mut adv = self.inner.advertisement.write().await;
            adv["pwnd_run"] = stats.pwnd_run.into();
            adv["pwnd_tot"] = stats.pwnd_tot.into();
            adv["uptime"] = stats.uptime.into();
            adv["epoch"] = stats.epoch.into();
            adv.clone()
        };
        if let Err(e) = self.inner.client.set_advertisement_data(data).await {
            tracing::debug!("Error while updating advertisement ({})", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridSection;

    fn peer(fp: &str) -> Peer {
        Peer {
            fingerprint: fp.into(),
            ..Default::default()
        }
    }

    fn advertiser() -> Advertiser {
        let cfg = GridSection {
            api_address: "http://127.0.0.1:1/api/v1".into(),
            ..Default::default()
        };
        Advertiser::new(GridClient::new(&cfg), EventBus::new(8), "unit", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_refresh_peers_diff() {
        let adv = advertiser();
        let (detected, lost) = adv.refresh_peers(vec![peer("a"), peer("b")]).await;
        assert_eq!(detected.len(), 2);
        assert!(lost.is_empty());

        let (detected, lost) = adv.refresh_peers(vec![peer("b"), peer("c")]).await;
        assert_eq!(detected, vec![peer("c")]);
        assert_eq!(lost, vec![peer("a")]);

        assert_eq!(adv.closest_peer().await.unwrap().fingerprint, "b");
    }

    #[tokio::test]
    async fn test_update_advertisement_tolerates_unreachable_daemon() {
        let adv = advertiser();
        adv.update_advertisement(AdvertisedStats {
            pwnd_run: 2,
            pwnd_tot: 5,
            uptime: 60,
            epoch: 3,
        })
        .await;
        let data = adv.inner.advertisement.read().await.clone();
        assert_eq!(data["pwnd_tot"], 5);
        assert_eq!(data["epoch"], 3);
        assert_eq!(data["name"], "unit");
    }

    #[tokio::test]
    async fn test_with_policy_is_advertised() {
        let adv = advertiser().with_policy(serde_json::json!({"deauth": false}));
        let data = adv.inner.advertisement.read().await.clone();
        assert_eq!(data["policy"]["deauth"], false);
        assert_eq!(data["identity"], "");
    }
}
