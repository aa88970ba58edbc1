//! MAC 描述符表 — 每流控端点（站点 / 本地接口 / "other"）的状态
//!
//! 对应 brcmfmac fwsignal.c 的 `struct brcmf_fws_mac_descriptor` 与
//! `struct brcmf_fws_macdesc_table`（nodes[32] + iface[16] + other）。
//! 表平铺为单数组，出队调度器按统一下标做轮转扫描；包 workspace 中的
//! `mac` 即此下标，固件重定位句柄后下标关系仍然有效。

use alloc::vec::Vec;

use skb::{PktQ, PKTQ_LEN_DEFAULT};

use crate::fwsignal::FWS_FIFO_COUNT;

/// 站点描述符数（对应 BRCMF_FWS_MAC_DESC_TABLE_SIZE；句柄低 5 位索引）
pub const FWS_MAC_DESC_TABLE_SIZE: usize = 32;
/// 接口描述符数（对应 BRCMF_MAX_IFS）
pub const FWS_MAX_IFS: usize = 16;
/// 表总长：nodes + iface + other
pub const FWS_DESC_COUNT: usize = FWS_MAC_DESC_TABLE_SIZE + FWS_MAX_IFS + 1;

/// 描述符开/关状态（对应 BRCMF_FWS_STATE_OPEN / BRCMF_FWS_STATE_CLOSE）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MacDescState {
    Open = 1,
    Close = 2,
}

/// 单个流控端点描述符。
pub struct FwsMacDesc {
    pub occupied: bool,
    /// 固件分配的 MAC 句柄（接口/other 描述符为 0）
    pub mac_handle: u8,
    pub interface_id: u8,
    pub state: MacDescState,
    /// 有包被固件抑制、尚未全部重新放行
    pub suppressed: bool,
    /// 世代位，开/关翻转；提交时盖入包标签
    pub generation: u8,
    /// 固件允许的 FIFO 位图（bit = fifo）
    pub ac_bitmap: u8,
    /// 未消化的固件点名 credit / packet 请求
    pub requested_credit: u8,
    pub requested_packet: u8,
    pub ea: [u8; 6],
    /// 每 FIFO 自由运行计数（8 位，写入包标签 FREERUN 域）
    pub seq: [u8; FWS_FIFO_COUNT],
    /// 每 FIFO 12 位序列号（seq 复用模式）
    pub seq12: [u16; FWS_FIFO_COUNT],
    /// 本端点的延迟/抑制队列：precedence = 2*fifo（延迟）与 2*fifo+1（抑制）
    pub psq: PktQ,
    /// 在途包数 / 其中经抑制重发的在途包数
    pub transit_count: i32,
    pub suppr_transit_count: i32,
    /// 待发 TIM 信令（pending bitmap 与上次上报不一致）
    pub send_tim_signal: bool,
    pub traffic_pending_bmp: u8,
    pub traffic_lastreported_bmp: u8,
}

impl FwsMacDesc {
    fn new() -> Self {
        FwsMacDesc {
            occupied: false,
            mac_handle: 0,
            interface_id: 0,
            state: MacDescState::Open,
            suppressed: false,
            generation: 0,
            ac_bitmap: 0xff,
            requested_credit: 0,
            requested_packet: 0,
            ea: [0; 6],
            seq: [0; FWS_FIFO_COUNT],
            seq12: [0; FWS_FIFO_COUNT],
            psq: PktQ::new(2 * FWS_FIFO_COUNT, PKTQ_LEN_DEFAULT),
            transit_count: 0,
            suppr_transit_count: 0,
            send_tim_signal: false,
            traffic_pending_bmp: 0,
            traffic_lastreported_bmp: 0,
        }
    }

    /// 初始化/复位描述符（对应 `brcmf_fws_macdesc_init`）。队列保持原样，
    /// 重定位（句柄换绑同一地址）时沿用在队包。
    pub fn init(&mut self, ea: [u8; 6], ifidx: u8) {
        self.occupied = true;
        self.ea = ea;
        self.interface_id = ifidx;
        self.state = MacDescState::Open;
        self.suppressed = false;
        self.generation = 0;
        self.ac_bitmap = 0xff;
        self.requested_credit = 0;
        self.requested_packet = 0;
        self.seq = [0; FWS_FIFO_COUNT];
        self.seq12 = [0; FWS_FIFO_COUNT];
        self.transit_count = 0;
        self.suppr_transit_count = 0;
        self.send_tim_signal = false;
        self.traffic_pending_bmp = 0;
        self.traffic_lastreported_bmp = 0;
    }

    /// 注销描述符（对应 `brcmf_fws_macdesc_deinit`）。队列应已冲刷。
    pub fn deinit(&mut self) {
        self.occupied = false;
        self.mac_handle = 0;
        self.suppressed = false;
        self.transit_count = 0;
        self.suppr_transit_count = 0;
    }

    /// 在途计数递减；出现负值说明不变量已破坏，钳制并报错。
    pub fn transit_dec(&mut self, suppressed: bool) {
        self.transit_count -= 1;
        if self.transit_count < 0 {
            log::error!(target: "wireless::fws", "macdesc: transit_count underflow");
            self.transit_count = 0;
        }
        if suppressed {
            self.suppr_transit_count -= 1;
            if self.suppr_transit_count < 0 {
                log::error!(target: "wireless::fws", "macdesc: suppr_transit underflow");
                self.suppr_transit_count = 0;
            }
        }
    }

    /// 刷新 pending-traffic 位图（对应 `brcmf_fws_tim_update` 的状态部分）。
    /// 与上次上报不一致时置 `send_tim_signal`，由提交路径捎带或立即发信令包。
    pub fn tim_update(&mut self, fifo: usize) {
        let pend =
            self.psq.prec_len(2 * fifo) + self.psq.prec_len(2 * fifo + 1) > 0;
        if pend {
            self.traffic_pending_bmp |= 1 << fifo;
        } else {
            self.traffic_pending_bmp &= !(1 << fifo);
        }
        self.send_tim_signal = self.traffic_pending_bmp != self.traffic_lastreported_bmp;
    }
}

/// 描述符表：`[0..32)` 站点、`[32..48)` 接口、`[48]` other，统一下标。
pub struct FwsMacDescTable {
    descs: Vec<FwsMacDesc>,
}

impl FwsMacDescTable {
    pub fn new() -> Self {
        let mut descs = Vec::with_capacity(FWS_DESC_COUNT);
        for _ in 0..FWS_DESC_COUNT {
            descs.push(FwsMacDesc::new());
        }
        // other 描述符常驻
        let other = &mut descs[FWS_DESC_COUNT - 1];
        other.occupied = true;
        FwsMacDescTable { descs }
    }

    #[inline]
    pub fn count(&self) -> usize {
        FWS_DESC_COUNT
    }

    /// 站点句柄 → 表下标（句柄低 5 位，对应 `&fws->desc.nodes[data[0] & 0x1F]`）
    #[inline]
    pub fn node_index(handle: u8) -> usize {
        (handle & 0x1f) as usize
    }

    #[inline]
    pub fn iface_index(ifidx: u8) -> usize {
        FWS_MAC_DESC_TABLE_SIZE + (ifidx as usize % FWS_MAX_IFS)
    }

    #[inline]
    pub fn other_index() -> usize {
        FWS_DESC_COUNT - 1
    }

    #[inline]
    pub fn at(&self, idx: usize) -> &FwsMacDesc {
        &self.descs[idx]
    }

    #[inline]
    pub fn at_mut(&mut self, idx: usize) -> &mut FwsMacDesc {
        &mut self.descs[idx]
    }

    /// 按硬件地址查站点描述符（对应 `brcmf_fws_macdesc_lookup`）。
    pub fn lookup(&self, ea: &[u8; 6]) -> Option<usize> {
        (0..FWS_MAC_DESC_TABLE_SIZE)
            .find(|&i| self.descs[i].occupied && self.descs[i].ea == *ea)
    }

    /// 按固件句柄查站点描述符。句柄重定位（同一地址换绑新句柄）后描述符
    /// 留在原下标，信令侧一律按句柄扫描而不是按 `node_index` 直取。
    pub fn lookup_by_handle(&self, handle: u8) -> Option<usize> {
        (0..FWS_MAC_DESC_TABLE_SIZE)
            .find(|&i| self.descs[i].occupied && self.descs[i].mac_handle == handle)
    }

    /// 发送分类（对应 `brcmf_fws_macdesc_find`）：组播走接口描述符，
    /// 单播先查站点表，查不到退回接口描述符，再退回 other。
    pub fn classify(&self, ifidx: u8, da: &[u8]) -> usize {
        let iface = Self::iface_index(ifidx);
        if da.len() >= 6 && da[0] & 0x01 == 0 {
            if let Some(idx) = self.lookup(&[da[0], da[1], da[2], da[3], da[4], da[5]]) {
                return idx;
            }
        }
        if self.descs[iface].occupied {
            iface
        } else {
            Self::other_index()
        }
    }

    /// 端点是否对 fifo 关闭（对应 `brcmf_fws_macdesc_closed`）：
    /// 站点描述符还要看所属接口；显式关闭且无点名请求、或 ac_bitmap
    /// 不含该 fifo 时视为关闭。
    pub fn closed(&self, idx: usize, fifo: usize) -> bool {
        let entry = &self.descs[idx];
        if entry.mac_handle != 0 {
            let if_entry = &self.descs[Self::iface_index(entry.interface_id)];
            if if_entry.occupied && if_entry.state == MacDescState::Close {
                return true;
            }
        }
        let closed = entry.state == MacDescState::Close
            && entry.requested_credit == 0
            && entry.requested_packet == 0;
        closed || entry.ac_bitmap & (1 << fifo) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skb::{PktState, SkBuff};

    #[test]
    fn macdesc_classify_paths() {
        let mut t = FwsMacDescTable::new();
        let ea = [2, 0, 0, 0, 0, 1];
        let ni = FwsMacDescTable::node_index(5);
        t.at_mut(ni).init(ea, 0);
        t.at_mut(ni).mac_handle = 5;
        t.at_mut(FwsMacDescTable::iface_index(0)).init([0; 6], 0);

        // 已知单播 → 站点
        assert_eq!(t.classify(0, &ea), ni);
        // 组播 → 接口
        assert_eq!(
            t.classify(0, &[0x01, 0, 0x5e, 0, 0, 1]),
            FwsMacDescTable::iface_index(0)
        );
        // 未知单播、接口未注册 → other
        assert_eq!(
            t.classify(3, &[2, 0, 0, 0, 0, 9]),
            FwsMacDescTable::other_index()
        );
    }

    #[test]
    fn macdesc_closed_rules() {
        let mut t = FwsMacDescTable::new();
        let ni = FwsMacDescTable::node_index(1);
        t.at_mut(ni).init([2, 0, 0, 0, 0, 2], 0);
        t.at_mut(ni).mac_handle = 1;
        t.at_mut(FwsMacDescTable::iface_index(0)).init([0; 6], 0);
        assert!(!t.closed(ni, 1));

        // 显式关闭且无点名 → 关闭
        t.at_mut(ni).state = MacDescState::Close;
        assert!(t.closed(ni, 1));
        // 有 credit 点名时仍可调度
        t.at_mut(ni).requested_credit = 1;
        assert!(!t.closed(ni, 1));
        // ac_bitmap 不含该 fifo → 关闭
        t.at_mut(ni).requested_credit = 0;
        t.at_mut(ni).state = MacDescState::Open;
        t.at_mut(ni).ac_bitmap = !(1 << 1);
        assert!(t.closed(ni, 1));
        assert!(!t.closed(ni, 2));
        // 所属接口关闭 → 关闭
        t.at_mut(ni).ac_bitmap = 0xff;
        t.at_mut(FwsMacDescTable::iface_index(0)).state = MacDescState::Close;
        assert!(t.closed(ni, 2));
    }

    #[test]
    fn macdesc_tim_update_tracks_pending() {
        let mut t = FwsMacDescTable::new();
        let ni = FwsMacDescTable::node_index(0);
        t.at_mut(ni).init([2, 0, 0, 0, 0, 3], 0);
        let entry = t.at_mut(ni);
        let mut skb = SkBuff::from_slice(&[0u8; 4], 0);
        skb.ws.state = PktState::Delayed;
        entry.psq.penq(2, skb).unwrap();
        entry.tim_update(1);
        assert!(entry.send_tim_signal);
        assert_eq!(entry.traffic_pending_bmp, 1 << 1);
        entry.traffic_lastreported_bmp = entry.traffic_pending_bmp;
        entry.tim_update(1);
        assert!(!entry.send_tim_signal);
    }
}
