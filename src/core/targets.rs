//! 目标选择：AP 过滤、按信道分组、跳信道等待时长

use regex::Regex;

use crate::api::AccessPoint;
use crate::config::PersonalitySection;
use crate::core::epoch::Epoch;

/// 工作集过滤：开放网络、白名单、正则过滤
#[derive(Debug, Clone, Default)]
pub struct ApFilter {
    whitelist: Vec<String>,
    filter: Option<Regex>,
}

impl ApFilter {
    /// 正则非法时返回错误
    pub fn new(whitelist: &[String], filter: Option<&str>) -> Result<Self, regex::Error> {
        let filter = match filter {
            Some(f) if !f.is_empty() => Some(Regex::new(f)?),
            _ => None,
        };
        Ok(Self {
            whitelist: whitelist.to_vec(),
            filter,
        })
    }

    fn is_whitelisted(&self, ap: &AccessPoint) -> bool {
        let mac = ap.mac.to_lowercase();
        let prefix: String = mac.chars().take(8).collect();
        self.whitelist
            .iter()
            .any(|w| *w == ap.hostname || *w == mac || *w == prefix)
    }

    /// 正则需从开头匹配 hostname 或 MAC
    fn is_included(&self, ap: &AccessPoint) -> bool {
        match &self.filter {
            None => true,
            Some(re) => [&ap.hostname, &ap.mac]
                .iter()
                .any(|s| re.find(s).map(|m| m.start() == 0).unwrap_or(false)),
        }
    }

    pub fn accepts(&self, ap: &AccessPoint) -> bool {
        !ap.is_open() && !self.is_whitelisted(ap) && self.is_included(ap)
    }

    /// 过滤后按信道升序（稳定排序）
    pub fn apply(&self, aps: Vec<AccessPoint>) -> Vec<AccessPoint> {
        let mut aps: Vec<AccessPoint> = aps.into_iter().filter(|ap| self.accepts(ap)).collect();
        aps.sort_by_key(|ap| ap.channel);
        aps
    }
}

/// 按信道分组（限制在 allowed 内，为空表示不限制），AP 多的信道排前面
pub fn group_by_channel(aps: &[AccessPoint], allowed: &[u32]) -> Vec<(u32, Vec<AccessPoint>)> {
    let mut grouped: Vec<(u32, Vec<AccessPoint>)> = Vec::new();
    for ap in aps {
        if !allowed.is_empty() && !allowed.contains(&ap.channel) {
            continue;
        }
        match grouped.iter_mut().find(|(ch, _)| *ch == ap.channel) {
            Some((_, bucket)) => bucket.push(ap.clone()),
            None => grouped.push((ap.channel, vec![ap.clone()])),
        }
    }
    grouped.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    grouped
}

/// 跳信道前的等待（秒）：只有 deauth 会迫使客户端重新握手，因此只有它需要长等待
pub fn hop_wait(epoch: &Epoch, personality: &PersonalitySection) -> u64 {
    if epoch.did_deauth {
        personality.hop_recon_time
    } else if epoch.did_associate {
        personality.min_recon_time
    } else {
        0
    }
}
