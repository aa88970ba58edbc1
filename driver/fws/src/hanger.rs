//! Hanger — 在途包槽位表
//!
//! 对应 brcmfmac fwsignal.c 的 `struct brcmf_fws_hanger` 与
//! `brcmf_fws_hanger_{get_free_slot,pushpkt,poppkt,mark_suppressed,cleanup}`。
//!
//! 固定 1024 槽位，slot id 写入包标签的 HSLOT 域，txstatus 据此回查。
//! 槽位状态为 arena 占用标记：Free / InUse / InUseSuppressed；对 Free 槽的
//! pop、对非 Free 槽的 push 都是逻辑错误（BadState），计数后向上返回。
//!
//! 所有权：包在途期间由槽位持有（C 版槽位存裸指针；这里槽位即唯一属主）。
//! 抑制流程中 `pop(remove=false)` 取走包去重排队，槽位经 `mark_suppressed`
//! 保持占用，重提交时 `push` 在 InUseSuppressed 槽上复用同一 slot id。

use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};
use skb::SkBuff;

/// 槽位数（对应 BRCMF_FWS_HANGER_MAXITEMS）
pub const FWS_HANGER_MAXITEMS: usize = 1024;

/// 槽位状态（对应 `enum brcmf_fws_hanger_item_state`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HangerState {
    Free = 0,
    InUse = 1,
    InUseSuppressed = 2,
}

struct HangerItem {
    state: HangerState,
    /// InUse 时必有包；InUseSuppressed 期间包可能正被抑制队列持有
    pkt: Option<SkBuff>,
}

/// Hanger 统计（对应 brcmf_fws_hanger 内嵌计数）
#[derive(Debug, Clone, Copy, Default)]
pub struct HangerStats {
    pub pushed: u32,
    pub popped: u32,
    pub failed_to_push: u32,
    pub failed_to_pop: u32,
    pub failed_slotfind: u32,
}

pub struct FwsHanger {
    items: Vec<HangerItem>,
    /// 空闲扫描游标（上次分配的槽位，下次从其后开始）
    slot_pos: usize,
    stats: HangerStats,
}

impl FwsHanger {
    pub fn new() -> Self {
        let mut items = Vec::with_capacity(FWS_HANGER_MAXITEMS);
        for _ in 0..FWS_HANGER_MAXITEMS {
            items.push(HangerItem {
                state: HangerState::Free,
                pkt: None,
            });
        }
        FwsHanger {
            items,
            slot_pos: FWS_HANGER_MAXITEMS - 1,
            stats: HangerStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> HangerStats {
        self.stats
    }

    /// 非空闲槽位数（在途包数）。
    pub fn occupied(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.state != HangerState::Free)
            .count()
    }

    /// 从游标后循环扫描第一个空闲槽位；绕回仍未找到则容量耗尽。
    /// 对应 `brcmf_fws_hanger_get_free_slot`。
    pub fn get_free_slot(&mut self) -> AxResult<u32> {
        let n = self.items.len();
        for off in 1..=n {
            let slot = (self.slot_pos + off) % n;
            if self.items[slot].state == HangerState::Free {
                self.slot_pos = slot;
                return Ok(slot as u32);
            }
        }
        self.stats.failed_slotfind += 1;
        ax_err!(NoMemory, "hanger: all slots occupied")
    }

    /// 挂入在途包。新包要求槽位 Free；抑制重提交的包要求槽位
    /// InUseSuppressed（同一 slot id 复用，不二次分配）。
    /// 对应 `brcmf_fws_hanger_pushpkt`。
    pub fn push(&mut self, slot: u32, pkt: SkBuff) -> AxResult {
        let Some(item) = self.items.get_mut(slot as usize) else {
            self.stats.failed_to_push += 1;
            return ax_err!(BadState, "hanger push: slot out of range");
        };
        match item.state {
            HangerState::Free | HangerState::InUseSuppressed => {
                item.state = HangerState::InUse;
                item.pkt = Some(pkt);
                self.stats.pushed += 1;
                Ok(())
            }
            HangerState::InUse => {
                self.stats.failed_to_push += 1;
                ax_err!(BadState, "hanger push: slot already in use")
            }
        }
    }

    /// 取出在途包。`remove=true` 释放槽位（正常完成路径）；
    /// `remove=false` 只取包不释放（抑制路径，包随后进抑制子队列，
    /// 槽位由 `mark_suppressed` 继续占用）。对应 `brcmf_fws_hanger_poppkt`。
    pub fn pop(&mut self, slot: u32, remove: bool) -> AxResult<SkBuff> {
        let Some(item) = self.items.get_mut(slot as usize) else {
            self.stats.failed_to_pop += 1;
            return ax_err!(BadState, "hanger pop: slot out of range");
        };
        if item.state == HangerState::Free {
            self.stats.failed_to_pop += 1;
            return ax_err!(BadState, "hanger pop: slot is free");
        }
        let Some(pkt) = item.pkt.take() else {
            self.stats.failed_to_pop += 1;
            return ax_err!(BadState, "hanger pop: slot has no packet");
        };
        if remove {
            item.state = HangerState::Free;
            self.stats.popped += 1;
        }
        Ok(pkt)
    }

    /// 将 InUse 槽位转为 InUseSuppressed（包已被抑制队列接管）。
    /// 对应 `brcmf_fws_hanger_mark_suppressed`。
    pub fn mark_suppressed(&mut self, slot: u32) -> AxResult {
        let Some(item) = self.items.get_mut(slot as usize) else {
            return ax_err!(BadState, "hanger mark: slot out of range");
        };
        if item.state != HangerState::InUse {
            self.stats.failed_to_pop += 1;
            return ax_err!(BadState, "hanger mark: slot not in use");
        }
        item.state = HangerState::InUseSuppressed;
        Ok(())
    }

    /// 直接释放槽位。抑制包在重提交前就被队列冲刷时，槽位处于
    /// InUseSuppressed 且无包，由冲刷方按包标签回收槽位。
    pub fn free_slot(&mut self, slot: u32) -> AxResult {
        let Some(item) = self.items.get_mut(slot as usize) else {
            return ax_err!(BadState, "hanger free: slot out of range");
        };
        if item.state == HangerState::Free {
            self.stats.failed_to_pop += 1;
            return ax_err!(BadState, "hanger free: slot already free");
        }
        item.pkt = None;
        item.state = HangerState::Free;
        self.stats.popped += 1;
        Ok(())
    }

    /// 批量释放满足 predicate 的在途包并返回（接口拆除时用）。
    /// 对应 `brcmf_fws_hanger_cleanup`。
    pub fn cleanup(&mut self, mut predicate: impl FnMut(&SkBuff) -> bool) -> Vec<SkBuff> {
        let mut freed = Vec::new();
        for item in self.items.iter_mut() {
            if item.state == HangerState::Free {
                continue;
            }
            let matched = item.pkt.as_ref().map(&mut predicate).unwrap_or(false);
            if matched {
                if let Some(pkt) = item.pkt.take() {
                    freed.push(pkt);
                }
                item.state = HangerState::Free;
                self.stats.popped += 1;
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(tag: u8) -> SkBuff {
        SkBuff::from_slice(&[tag], 0)
    }

    #[test]
    fn hanger_push_pop_conservation() {
        let mut h = FwsHanger::new();
        let s0 = h.get_free_slot().unwrap();
        h.push(s0, pkt(0)).unwrap();
        let s1 = h.get_free_slot().unwrap();
        h.push(s1, pkt(1)).unwrap();
        assert_ne!(s0, s1);
        assert_eq!(h.occupied(), 2);

        let p = h.pop(s0, true).unwrap();
        assert_eq!(p.data()[0], 0);
        assert_eq!(h.occupied(), 1);
        // 释放后的槽位再 pop 是逻辑错误
        assert!(h.pop(s0, true).is_err());
        assert_eq!(h.stats().failed_to_pop, 1);
    }

    #[test]
    fn hanger_double_push_rejected() {
        let mut h = FwsHanger::new();
        let s = h.get_free_slot().unwrap();
        h.push(s, pkt(0)).unwrap();
        assert!(h.push(s, pkt(1)).is_err());
        assert_eq!(h.stats().failed_to_push, 1);
    }

    #[test]
    fn hanger_suppress_cycle_reuses_slot() {
        let mut h = FwsHanger::new();
        let s = h.get_free_slot().unwrap();
        h.push(s, pkt(7)).unwrap();
        // 抑制：取包不释放，槽位转 suppressed
        let p = h.pop(s, false).unwrap();
        h.mark_suppressed(s).unwrap();
        assert_eq!(h.occupied(), 1);
        // 重提交复用同一槽位
        h.push(s, p).unwrap();
        let p = h.pop(s, true).unwrap();
        assert_eq!(p.data()[0], 7);
        assert_eq!(h.occupied(), 0);
    }

    #[test]
    fn hanger_full_fails() {
        let mut h = FwsHanger::new();
        for _ in 0..FWS_HANGER_MAXITEMS {
            let s = h.get_free_slot().unwrap();
            h.push(s, pkt(0)).unwrap();
        }
        assert!(h.get_free_slot().is_err());
        assert_eq!(h.stats().failed_slotfind, 1);
    }

    #[test]
    fn hanger_cleanup_by_predicate() {
        let mut h = FwsHanger::new();
        for i in 0..4 {
            let s = h.get_free_slot().unwrap();
            h.push(s, pkt(i)).unwrap();
        }
        let freed = h.cleanup(|p| p.data()[0] % 2 == 0);
        assert_eq!(freed.len(), 2);
        assert_eq!(h.occupied(), 2);
    }
}
