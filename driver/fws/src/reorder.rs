//! AMPDU 接收重排序引擎
//!
//! 对应 brcmfmac 的 `brcmf_rxreorder_process` / `brcmf_rxreorder_get_skb_list`。
//! 固件经 HOST_REORDER_RXPKTS 信令（已由 hdrpull 寄存到包 workspace）按流 id
//! 指挥主机端滑动窗口：元数据 10 字节，单字节字段位于偶数偏移
//! `[flow_id @0, max_idx @2, flags @4, cur_idx @6, exp_idx @8]`。
//! 所有窗口运算模 (max_idx + 1)。

use alloc::vec::Vec;

use skb::SkBuff;

/// 流 id 空间（对应 BRCMF_AMPDU_RX_REORDER_MAXFLOWS）
pub const RXREORDER_MAXFLOWS: usize = 256;

const FLOWID_OFFSET: usize = 0;
const MAXIDX_OFFSET: usize = 2;
const FLAGS_OFFSET: usize = 4;
const CURIDX_OFFSET: usize = 6;
const EXPIDX_OFFSET: usize = 8;

/// 删除该流并冲刷
pub const RXREORDER_DEL_FLOW: u8 = 0x01;
/// 冲刷整个窗口而非仅到新期望位置
pub const RXREORDER_FLUSH_ALL: u8 = 0x02;
/// cur_idx 字段有效
pub const RXREORDER_CURIDX_VALID: u8 = 0x04;
/// exp_idx 字段有效
pub const RXREORDER_EXPIDX_VALID: u8 = 0x08;
/// 窗口内出现新空洞，重新定窗
pub const RXREORDER_NEW_HOLE: u8 = 0x10;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReorderStats {
    pub flows_created: u32,
    pub flows_deleted: u32,
    /// 覆盖写已占用槽位（旧包被丢弃防泄漏）
    pub slot_overwrite: u32,
    pub delivered: u32,
}

struct ReorderFlow {
    max_idx: u8,
    cur_idx: u8,
    exp_idx: u8,
    pend_pkts: usize,
    slots: Vec<Option<SkBuff>>,
}

impl ReorderFlow {
    fn new(max_idx: u8) -> Self {
        let mut slots = Vec::with_capacity(max_idx as usize + 1);
        for _ in 0..=max_idx as usize {
            slots.push(None);
        }
        ReorderFlow {
            max_idx,
            cur_idx: 0,
            exp_idx: 0,
            pend_pkts: 0,
            slots,
        }
    }

    #[inline]
    fn modulus(&self) -> usize {
        self.max_idx as usize + 1
    }

    /// 从 start 到 end（循环、不含 end）收集窗内包；start == end 表示整窗。
    /// 对应 `brcmf_rxreorder_get_skb_list`（do-while 语义）。
    fn drain(&mut self, start: u8, end: u8, out: &mut Vec<SkBuff>) {
        if self.pend_pkts == 0 {
            return;
        }
        let m = self.modulus();
        let mut i = start as usize % m;
        let end = end as usize % m;
        loop {
            if let Some(skb) = self.slots[i].take() {
                self.pend_pkts -= 1;
                out.push(skb);
            }
            i = (i + 1) % m;
            if i == end {
                break;
            }
        }
    }

    /// 存入槽位；已占用则丢弃旧包（返回 true 表示发生覆盖）。
    fn store(&mut self, idx: u8, skb: SkBuff) -> bool {
        let i = idx as usize % self.modulus();
        let overwrote = self.slots[i].is_some();
        if !overwrote {
            self.pend_pkts += 1;
        }
        self.slots[i] = Some(skb);
        overwrote
    }
}

/// 全部重排序流（流 id → 窗口），fws 收包路径持有。
pub struct RxReorder {
    flows: Vec<Option<ReorderFlow>>,
    stats: ReorderStats,
}

impl RxReorder {
    pub fn new() -> Self {
        let mut flows = Vec::with_capacity(RXREORDER_MAXFLOWS);
        for _ in 0..RXREORDER_MAXFLOWS {
            flows.push(None);
        }
        RxReorder {
            flows,
            stats: ReorderStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> ReorderStats {
        self.stats
    }

    /// 处理一个带重排序元数据的收包，按序可交付的包依次追加到 `out`。
    /// 无元数据的包直接透传。对应 `brcmf_rxreorder_process`。
    pub fn process(&mut self, mut skb: SkBuff, out: &mut Vec<SkBuff>) {
        let delivered_before = out.len();
        let Some(data) = skb.ws.reorder.take() else {
            out.push(skb);
            return;
        };
        let flow_id = data[FLOWID_OFFSET] as usize;
        let flags = data[FLAGS_OFFSET];

        if flags == 0xff {
            log::warn!(target: "wireless::fws", "rxreorder: invalid flags, flow {}", flow_id);
            out.push(skb);
            return;
        }

        if flags & RXREORDER_DEL_FLOW != 0 {
            match self.flows[flow_id].take() {
                Some(mut rfi) => {
                    log::debug!(target: "wireless::fws", "rxreorder: del flow {}", flow_id);
                    let exp = rfi.exp_idx;
                    rfi.drain(exp, exp, out);
                    out.push(skb);
                    self.stats.flows_deleted += 1;
                }
                None => out.push(skb),
            }
            self.stats.delivered += (out.len() - delivered_before) as u32;
            return;
        }

        if self.flows[flow_id].is_none() {
            // 建流前收到的包直接透传；只有 NEW_HOLE 才建流
            if flags & RXREORDER_NEW_HOLE == 0 {
                out.push(skb);
                return;
            }
            let max_idx = data[MAXIDX_OFFSET];
            let mut rfi = ReorderFlow::new(max_idx);
            rfi.cur_idx = data[CURIDX_OFFSET];
            rfi.exp_idx = data[EXPIDX_OFFSET];
            log::debug!(
                target: "wireless::fws",
                "rxreorder: new flow {} max {} cur {} exp {}",
                flow_id, max_idx, rfi.cur_idx, rfi.exp_idx
            );
            let cur = rfi.cur_idx;
            rfi.store(cur, skb);
            self.flows[flow_id] = Some(rfi);
            self.stats.flows_created += 1;
            return;
        }

        let Some(rfi) = self.flows[flow_id].as_mut() else {
            out.push(skb);
            return;
        };
        if flags & RXREORDER_NEW_HOLE != 0 {
            // 旧窗口先清空再按新元数据定窗（重复投递同一 NEW_HOLE 不幂等，设计如此）
            if rfi.pend_pkts > 0 {
                let exp = rfi.exp_idx;
                rfi.drain(exp, exp, out);
            }
            let max_idx = data[MAXIDX_OFFSET];
            if max_idx != rfi.max_idx {
                *rfi = ReorderFlow::new(max_idx);
            }
            rfi.cur_idx = data[CURIDX_OFFSET];
            rfi.exp_idx = data[EXPIDX_OFFSET];
            let cur = rfi.cur_idx;
            if rfi.store(cur, skb) {
                self.stats.slot_overwrite += 1;
            }
        } else if flags & RXREORDER_CURIDX_VALID != 0 {
            let cur_idx = data[CURIDX_OFFSET];
            let exp_idx = data[EXPIDX_OFFSET];
            if exp_idx == rfi.exp_idx && cur_idx != rfi.exp_idx {
                // 空洞未补，仍在窗内存包
                if rfi.store(cur_idx, skb) {
                    log::warn!(
                        target: "wireless::fws",
                        "rxreorder: slot {} already occupied, flow {}",
                        cur_idx, flow_id
                    );
                    self.stats.slot_overwrite += 1;
                }
                rfi.cur_idx = cur_idx;
            } else if cur_idx == rfi.exp_idx {
                // 补上期望位置：存入后冲出连续段
                if rfi.store(cur_idx, skb) {
                    self.stats.slot_overwrite += 1;
                }
                rfi.drain(cur_idx, exp_idx, out);
                rfi.cur_idx = cur_idx;
                rfi.exp_idx = exp_idx;
            } else {
                // 两个下标都移动了：按 FLUSH_ALL 决定冲整窗还是冲到新期望位
                let end = if flags & RXREORDER_FLUSH_ALL != 0 {
                    rfi.exp_idx
                } else {
                    exp_idx
                };
                let start = rfi.exp_idx;
                rfi.drain(start, end, out);
                if exp_idx as usize == (cur_idx as usize + 1) % rfi.modulus() {
                    out.push(skb);
                } else if rfi.store(cur_idx, skb) {
                    self.stats.slot_overwrite += 1;
                }
                rfi.cur_idx = cur_idx;
                rfi.exp_idx = exp_idx;
            }
        } else if flags & RXREORDER_EXPIDX_VALID != 0 {
            // 仅期望位前移
            let exp_idx = data[EXPIDX_OFFSET];
            let end = if flags & RXREORDER_FLUSH_ALL != 0 {
                rfi.exp_idx
            } else {
                exp_idx
            };
            let start = rfi.exp_idx;
            rfi.drain(start, end, out);
            out.push(skb);
            rfi.exp_idx = exp_idx;
        } else {
            out.push(skb);
        }
        self.stats.delivered += (out.len() - delivered_before) as u32;
    }

    /// 删除流（接口拆除路径），窗内未交付的包返回给调用方处置。
    pub fn delete_flow(&mut self, flow_id: u8, out: &mut Vec<SkBuff>) {
        if let Some(mut rfi) = self.flows[flow_id as usize].take() {
            let exp = rfi.exp_idx;
            rfi.drain(exp, exp, out);
            self.stats.flows_deleted += 1;
        }
    }
}
