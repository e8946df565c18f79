//! Epoch：一次「扫描 → 交互 → 跳信道」循环的活动记录
//!
//! 每轮标记 did_deauth / did_associate 等，供跳信道等待时长与空闲判定使用；
//! `next()` 结束当前 epoch，返回其快照并重置本轮标记。

use serde::Serialize;

use crate::api::AccessPoint;
use crate::grid::Peer;

/// 已结束（或当前）epoch 的快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpochData {
    pub epoch: u64,
    pub active_for: u64,
    pub inactive_for: u64,
    pub blind_for: u64,
    pub missed_interactions: u64,
    pub num_hops: u64,
    pub num_deauths: u64,
    pub num_associations: u64,
    pub num_handshakes: u64,
    pub num_aps: usize,
    pub num_stations: usize,
    pub num_peers: usize,
    pub did_deauth: bool,
    pub did_associate: bool,
    pub did_handshakes: bool,
}

/// 本次进程（含恢复后）累计值，用于遥测上报
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochTotals {
    pub deauths: u64,
    pub associations: u64,
    pub handshakes: u64,
}

#[derive(Debug, Default)]
pub struct Epoch {
    pub epoch: u64,
    pub inactive_for: u64,
    pub active_for: u64,
    pub blind_for: u64,
    pub did_deauth: bool,
    pub num_deauths: u64,
    pub did_associate: bool,
    pub num_assocs: u64,
    pub num_missed: u64,
    pub did_handshakes: bool,
    pub num_shakes: u64,
    pub num_hops: u64,
    pub num_aps: usize,
    pub num_stations: usize,
    pub num_peers: usize,
    pub any_activity: bool,
    totals: EpochTotals,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录本轮看到的 AP 与对等节点
    pub fn observe(&mut self, aps: &[AccessPoint], peers: &[Peer]) {
        self.num_aps = aps.len();
        self.num_stations = aps.iter().map(|ap| ap.clients.len()).sum();
        self.num_peers = peers.len();
        if self.num_aps == 0 {
            self.blind_for += 1;
        } else {
            self.blind_for = 0;
        }
    }

    pub fn track_deauth(&mut self) {
        self.did_deauth = true;
        self.num_deauths += 1;
        self.totals.deauths += 1;
        self.any_activity = true;
    }

    pub fn track_assoc(&mut self) {
        self.did_associate = true;
        self.num_assocs += 1;
        self.totals.associations += 1;
        self.any_activity = true;
    }

    pub fn track_handshakes(&mut self, inc: u64) {
        if inc == 0 {
            return;
        }
        self.did_handshakes = true;
        self.num_shakes += inc;
        self.totals.handshakes += inc;
    }

    pub fn track_hop(&mut self) {
        self.num_hops += 1;
    }

    pub fn track_miss(&mut self) {
        self.num_missed += 1;
    }

    pub fn totals(&self) -> EpochTotals {
        self.totals
    }

    pub fn data(&self) -> EpochData {
        EpochData {
            epoch: self.epoch,
            active_for: self.active_for,
            inactive_for: self.inactive_for,
            blind_for: self.blind_for,
            missed_interactions: self.num_missed,
            num_hops: self.num_hops,
            num_deauths: self.num_deauths,
            num_associations: self.num_assocs,
            num_handshakes: self.num_shakes,
            num_aps: self.num_aps,
            num_stations: self.num_stations,
            num_peers: self.num_peers,
            did_deauth: self.did_deauth,
            did_associate: self.did_associate,
            did_handshakes: self.did_handshakes,
        }
    }

    /// 结束当前 epoch：更新活跃 / 空闲计数，返回结束时的快照
    pub fn next(&mut self) -> EpochData {
        if !self.any_activity && !self.did_handshakes {
            self.inactive_for += 1;
            self.active_for = 0;
        } else {
            self.active_for += 1;
            self.inactive_for = 0;
        }

        let data = self.data();

        self.epoch += 1;
        self.did_deauth = false;
        self.num_deauths = 0;
        self.did_associate = false;
        self.num_assocs = 0;
        self.num_missed = 0;
        self.did_handshakes = false;
        self.num_shakes = 0;
        self.num_hops = 0;
        self.any_activity = false;

        data
    }
}
