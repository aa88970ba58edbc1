//! 固件信令 / 流控引擎核心
//!
//! 对应 brcmfmac fwsignal.c 的 `struct brcmf_fws_info` 及其外围：
//! 信用池（跨 FIFO 借用）、每端点延迟/抑制队列与轮转出队、包标签编排、
//! txstatus 回收与抑制重排、TLV 信令分发。
//!
//! 锁规则：`FwsManager` 内单把 `spin::Mutex` 保护全部引擎状态。提交循环
//! 按"锁内取包组帧、解锁写总线、回锁终结/回滚"逐包推进；包生命周期终结
//! （`FwsBus::tx_finalize`）一律缓冲在 `completed` 中，解锁后统一排空。

use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};
use skb::{PktState, PktWorkspace, SkBuff};
use spin::Mutex;

use crate::bcdc;
use crate::bus::FwsBus;
use crate::hanger::FwsHanger;
use crate::macdesc::{FwsMacDescTable, MacDescState};
use crate::reorder::{ReorderStats, RxReorder};
use crate::tlv::{self, FwsTlvType, TlvErr, TlvReader};

/// FIFO 数：4 个 AC + BCMC + ATIM（对应 BRCMF_FWS_FIFO_COUNT）
pub const FWS_FIFO_COUNT: usize = 6;

pub const FWS_FIFO_AC_BK: usize = 0;
pub const FWS_FIFO_AC_BE: usize = 1;
pub const FWS_FIFO_AC_VI: usize = 2;
pub const FWS_FIFO_AC_VO: usize = 3;
pub const FWS_FIFO_BCMC: usize = 4;
pub const FWS_FIFO_ATIM: usize = 5;

/// 802.1d 优先级 → FIFO（对应 brcmf_fws_prio2fifo）
pub const FWS_PRIO2FIFO: [usize; 8] = [
    FWS_FIFO_AC_BE,
    FWS_FIFO_AC_BK,
    FWS_FIFO_AC_BK,
    FWS_FIFO_AC_BE,
    FWS_FIFO_AC_VI,
    FWS_FIFO_AC_VI,
    FWS_FIFO_AC_VO,
    FWS_FIFO_AC_VO,
];

/// 站点新上线后的借用退避窗口（对应 BRCMF_FWS_BORROW_DEFER_PERIOD）
pub const FWS_BORROW_DEFER_PERIOD_MS: u64 = 100;

// host-to-device 32 位包标签布局（txstatus 状态字同布局）
pub const FWS_HTOD_GENERATION_MASK: u32 = 0x8000_0000;
pub const FWS_HTOD_GENERATION_SHIFT: u32 = 31;
pub const FWS_HTOD_FLAGS_MASK: u32 = 0x7800_0000;
pub const FWS_HTOD_FLAGS_SHIFT: u32 = 27;
pub const FWS_HTOD_FIFO_MASK: u32 = 0x0700_0000;
pub const FWS_HTOD_FIFO_SHIFT: u32 = 24;
pub const FWS_HTOD_HSLOT_MASK: u32 = 0x00ff_ff00;
pub const FWS_HTOD_HSLOT_SHIFT: u32 = 8;
pub const FWS_HTOD_FREERUN_MASK: u32 = 0x0000_00ff;
pub const FWS_HTOD_FREERUN_SHIFT: u32 = 0;

pub const FWS_HTOD_FLAG_PKTFROMHOST: u32 = 0x01;
pub const FWS_HTOD_FLAG_PKT_REQUESTED: u32 = 0x02;

// 16 位序列标签布局（seq 复用模式）
pub const FWS_HTODSEQ_FROMFW: u16 = 1 << 13;
pub const FWS_HTODSEQ_FROMDRV: u16 = 1 << 12;
pub const FWS_HTODSEQ_NR_MASK: u16 = 0x0fff;

#[inline]
pub fn tag_get(tag: u32, mask: u32, shift: u32) -> u32 {
    (tag & mask) >> shift
}

#[inline]
pub fn tag_set(tag: &mut u32, mask: u32, shift: u32, value: u32) {
    *tag = (*tag & !mask) | ((value << shift) & mask);
}

/// freerun 计数的先后关系（8 位环）：距离恰为 128 视为"不在后"，
/// 插入时排在在位者之前，保证比较关系反对称。
#[inline]
fn freerun_after(a: u32, b: u32) -> bool {
    a != b && (a.wrapping_sub(b) & 0xff) < 0x80
}

/// 流控模式（对应 brcmf_fws_fcmode）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcMode {
    /// 不流控：出包直接压 BCDC 头上总线，不经队列
    None,
    /// txstatus 隐含信用返还
    ImpliedCredit,
    /// 信用仅经 FIFO_CREDIT_BACK 信令返还
    ExplicitCredit,
}

/// txstatus 状态字 FLAGS 域取值（对应 enum brcmf_fws_txstatus）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxStatusFlag {
    /// 固件已消化（正常完成）
    Discard = 0,
    CoreSuppress = 1,
    FwPsSuppress = 2,
    FwTossed = 3,
    HostTossed = 4,
}

impl TxStatusFlag {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Discard,
            1 => Self::CoreSuppress,
            2 => Self::FwPsSuppress,
            3 => Self::FwTossed,
            4 => Self::HostTossed,
            _ => return None,
        })
    }
}

/// 引擎配置。
#[derive(Debug, Clone, Copy)]
pub struct FwsConfig {
    pub fcmode: FcMode,
    /// 固件回传 seq 供主机重用（PKTTAG 记录附 2 字节扩展）
    pub reuseseq: bool,
    /// 初始每 FIFO 信用（固件事件到来前的种子值）
    pub init_fifo_credit: [u8; FWS_FIFO_COUNT],
}

impl Default for FwsConfig {
    fn default() -> Self {
        FwsConfig {
            fcmode: FcMode::ExplicitCredit,
            reuseseq: false,
            init_fifo_credit: [0; FWS_FIFO_COUNT],
        }
    }
}

/// 引擎统计（对应 struct brcmf_fws_stats 的常用子集）。
#[derive(Debug, Clone, Copy, Default)]
pub struct FwsStats {
    pub tlv_parse_failed: u32,
    pub tlv_invalid_type: u32,
    pub header_pulls: u32,
    pub header_only_pkt: u32,
    pub pkt2bus: u32,
    pub send_pkts: [u32; FWS_FIFO_COUNT],
    pub requested_sent: [u32; FWS_FIFO_COUNT],
    pub generic_error: u32,
    pub mac_update_failed: u32,
    pub delayq_full_error: u32,
    pub supprq_full_error: u32,
    pub rollback_success: u32,
    pub rollback_failed: u32,
    pub credit_borrows: u32,
    pub fifo_credits_back: [u32; FWS_FIFO_COUNT],
    pub txs_indicate: u32,
    pub txs_discard: u32,
    pub txs_supp_core: u32,
    pub txs_supp_ps: u32,
    pub txs_tossed: u32,
    pub txs_host_tossed: u32,
}

/// 出队调度顺序：AC 从高到低，BCMC 最后；ATIM 不参与主机调度。
const WORKER_FIFO_ORDER: [usize; 5] = [
    FWS_FIFO_AC_VO,
    FWS_FIFO_AC_VI,
    FWS_FIFO_AC_BE,
    FWS_FIFO_AC_BK,
    FWS_FIFO_BCMC,
];

/// BE 借用的出借方，高类别优先；归还时同序优先偿还。
const BORROW_LENDERS: [usize; 2] = [FWS_FIFO_AC_VO, FWS_FIFO_AC_VI];

/// 提交凭据：解锁写总线期间的回滚上下文。
struct CommitToken {
    slot: u32,
    /// 提交时压入的 BCDC 头 + 信令区总长（回滚时剥离）
    hdr_len: usize,
    suppressed: bool,
    requested: bool,
    /// 本次提交消耗了公共信用（回滚/完成路径据此补账）
    credited: bool,
    fifo: usize,
}

/// 引擎全部可变状态，单锁保护。
struct FwsInfo {
    fcmode: FcMode,
    reuseseq: bool,
    hanger: FwsHanger,
    descs: FwsMacDescTable,
    fifo_credit: [i32; FWS_FIFO_COUNT],
    init_fifo_credit: [i32; FWS_FIFO_COUNT],
    /// bit = fifo 当前有可用信用
    fifo_credit_map: u32,
    /// bit = fifo 有延迟包待调度
    fifo_delay_map: u32,
    /// BCMC 是否纳入信用管控（信用种子到位前 BCMC 直发）
    bcmc_credit_check: bool,
    /// 各出借方被 BE 借走的信用数
    credits_borrowed: [i32; FWS_FIFO_COUNT],
    borrow_defer_timestamp: u64,
    /// 每 FIFO 轮转出队游标（描述符表下标）
    deq_node_pos: [usize; FWS_FIFO_COUNT],
    bus_flow_blocked: bool,
    stats: FwsStats,
    reorder: RxReorder,
    /// 待终结包（skb, success），锁外经 `FwsBus::tx_finalize` 排空
    completed: Vec<(SkBuff, bool)>,
    /// 待发的纯信令 TIM 帧（已组好字节），worker 锁外发送
    tim_frames: Vec<Vec<u8>>,
}

impl FwsInfo {
    fn new(config: FwsConfig) -> Self {
        let mut fifo_credit = [0i32; FWS_FIFO_COUNT];
        let mut map = 0u32;
        for (i, &c) in config.init_fifo_credit.iter().enumerate() {
            fifo_credit[i] = c as i32;
            if c > 0 {
                map |= 1 << i;
            }
        }
        FwsInfo {
            fcmode: config.fcmode,
            reuseseq: config.reuseseq,
            hanger: FwsHanger::new(),
            descs: FwsMacDescTable::new(),
            fifo_credit,
            init_fifo_credit: fifo_credit,
            fifo_credit_map: map,
            fifo_delay_map: 0,
            bcmc_credit_check: config.init_fifo_credit[FWS_FIFO_BCMC] > 0,
            credits_borrowed: [0; FWS_FIFO_COUNT],
            borrow_defer_timestamp: 0,
            deq_node_pos: [0; FWS_FIFO_COUNT],
            bus_flow_blocked: false,
            stats: FwsStats::default(),
            reorder: RxReorder::new(),
            completed: Vec::new(),
            tim_frames: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // 信用池
    // ------------------------------------------------------------------

    /// 信用返还（对应 `brcmf_fws_return_credits`）：BE 的返还先偿还
    /// 出借方（高类别优先），剩余入本 FIFO 池并按初始值封顶。
    fn return_credits(&mut self, fifo: usize, credits: i32) {
        let mut credits = credits;
        if fifo == FWS_FIFO_AC_BE && self.credits_borrowed.iter().any(|&b| b > 0) {
            for &lender in &BORROW_LENDERS {
                if self.credits_borrowed[lender] <= 0 {
                    continue;
                }
                let pay = self.credits_borrowed[lender].min(credits);
                self.credits_borrowed[lender] -= pay;
                self.fifo_credit[lender] += pay;
                self.fifo_credit_map |= 1 << lender;
                credits -= pay;
                if credits == 0 {
                    break;
                }
            }
        }
        if credits > 0 {
            self.fifo_credit[fifo] += credits;
            if self.fifo_credit[fifo] > self.init_fifo_credit[fifo] {
                self.fifo_credit[fifo] = self.init_fifo_credit[fifo];
            }
            if self.fifo_credit[fifo] > 0 {
                self.fifo_credit_map |= 1 << fifo;
            }
        }
    }

    /// BE 信用耗尽时向高类别借一枚（对应 `brcmf_fws_borrow_credit`）。
    /// 退避窗口内（站点新上线）不借，把高类别信用留给其本身的流量。
    fn borrow_credit(&mut self, now_ms: u64) -> bool {
        if now_ms < self.borrow_defer_timestamp {
            return false;
        }
        for &lender in &BORROW_LENDERS {
            if self.fifo_credit[lender] > 0 {
                self.credits_borrowed[lender] += 1;
                self.fifo_credit[lender] -= 1;
                if self.fifo_credit[lender] == 0 {
                    self.fifo_credit_map &= !(1 << lender);
                }
                self.fifo_credit[FWS_FIFO_AC_BE] += 1;
                self.fifo_credit_map |= 1 << FWS_FIFO_AC_BE;
                self.stats.credit_borrows += 1;
                return true;
            }
        }
        false
    }

    /// 撤销刚借入的一枚：先从 BE 池扣掉借用时记入的那枚，再走
    /// `return_credits` 偿还出借方。借用后出队落空时用，保证各池
    /// 总量不因一次空借而虚增。
    fn unborrow_credit(&mut self) {
        self.fifo_credit[FWS_FIFO_AC_BE] -= 1;
        if self.fifo_credit[FWS_FIFO_AC_BE] <= 0 {
            self.fifo_credit_map &= !(1 << FWS_FIFO_AC_BE);
        }
        self.return_credits(FWS_FIFO_AC_BE, 1);
    }

    fn seed_credits(&mut self, credits: [u8; FWS_FIFO_COUNT]) {
        for (i, &c) in credits.iter().enumerate() {
            self.init_fifo_credit[i] = c as i32;
            self.fifo_credit[i] = c as i32;
            if c > 0 {
                self.fifo_credit_map |= 1 << i;
            } else {
                self.fifo_credit_map &= !(1 << i);
            }
        }
        self.credits_borrowed = [0; FWS_FIFO_COUNT];
        self.bcmc_credit_check = true;
    }

    // ------------------------------------------------------------------
    // 入队 / 出队
    // ------------------------------------------------------------------

    /// 包入目的描述符的延迟或抑制子队列（对应 `brcmf_fws_enq`）。
    /// 抑制包按 freerun 计数有序插入，重发保持固件侧观察到的顺序。
    fn enq(&mut self, state: PktState, fifo: usize, mut skb: SkBuff) -> Result<(), SkBuff> {
        let Some(idx) = skb.ws.mac.map(|m| m as usize) else {
            self.stats.generic_error += 1;
            return Err(skb);
        };
        let suppressed = state == PktState::Suppressed;
        let prec = 2 * fifo + usize::from(suppressed);
        skb.ws.state = state;
        let entry = self.descs.at_mut(idx);
        let res = if suppressed {
            entry.psq.penq_ordered(prec, skb, |a, b| {
                freerun_after(
                    tag_get(a.ws.htod, FWS_HTOD_FREERUN_MASK, FWS_HTOD_FREERUN_SHIFT),
                    tag_get(b.ws.htod, FWS_HTOD_FREERUN_MASK, FWS_HTOD_FREERUN_SHIFT),
                )
            })
        } else {
            entry.psq.penq(prec, skb)
        };
        match res {
            Ok(()) => {
                self.fifo_delay_map |= 1 << fifo;
                self.descs.at_mut(idx).tim_update(fifo);
                Ok(())
            }
            Err(skb) => {
                if suppressed {
                    self.stats.supprq_full_error += 1;
                } else {
                    self.stats.delayq_full_error += 1;
                }
                Err(skb)
            }
        }
    }

    /// 轮转出队（对应 `brcmf_fws_deq`）：从游标起扫描描述符表，跳过
    /// 未占用/关闭端点；抑制子队列优先，但端点仍有抑制包在途时不混发
    /// 延迟包；选中后游标推进到其后，保证端点间公平。
    fn deq(&mut self, fifo: usize) -> Option<SkBuff> {
        let n = self.descs.count();
        let start = self.deq_node_pos[fifo];
        for i in 0..n {
            let idx = (start + i) % n;
            if !self.descs.at(idx).occupied {
                continue;
            }
            if self.fcmode != FcMode::None && self.descs.closed(idx, fifo) {
                continue;
            }
            let entry = self.descs.at_mut(idx);
            let both = 0b11u32 << (2 * fifo);
            let suppr_only = 0b10u32 << (2 * fifo);
            let delay_only = 0b01u32 << (2 * fifo);
            let mut got = entry
                .psq
                .mdeq(if entry.suppressed { suppr_only } else { both });
            if got.is_none() && entry.suppressed {
                if entry.suppr_transit_count > 0 {
                    continue;
                }
                entry.suppressed = false;
                got = entry.psq.mdeq(delay_only);
            }
            let Some((_prec, mut skb)) = got else {
                continue;
            };
            entry.tim_update(fifo);
            self.use_req_credit(idx, fifo, &mut skb);
            self.deq_node_pos[fifo] = (idx + 1) % n;
            return Some(skb);
        }
        self.fifo_delay_map &= !(1 << fifo);
        None
    }

    /// 消化固件点名请求（对应 `brcmf_fws_macdesc_use_req_credit`）。
    /// 显式信用模式下点名信用（request_credit）的包不占公共池：立即补一枚
    /// 抵销 worker 的扣减。点名放包（request_packet）仍走公共池，回执时
    /// 按 host-tossed 规则退账。
    fn use_req_credit(&mut self, idx: usize, fifo: usize, skb: &mut SkBuff) {
        let entry = self.descs.at_mut(idx);
        let mut offset_credit = false;
        if entry.requested_credit > 0 {
            entry.requested_credit -= 1;
            skb.ws.requested = true;
            skb.ws.requested_credit = true;
            if entry.state != MacDescState::Close {
                log::error!(target: "wireless::fws", "requested credit while mac open");
            }
            offset_credit = self.fcmode == FcMode::ExplicitCredit;
        } else if entry.requested_packet > 0 {
            entry.requested_packet -= 1;
            skb.ws.requested = true;
            skb.ws.requested_credit = false;
        } else {
            skb.ws.requested = false;
            skb.ws.requested_credit = false;
        }
        if offset_credit {
            self.return_credits(fifo, 1);
        }
    }

    // ------------------------------------------------------------------
    // 提交 / 回滚
    // ------------------------------------------------------------------

    /// 锁内组帧（对应 `brcmf_fws_precommit_skb` + hanger 挂入）：
    /// 首发分配槽位并盖 hslot/freerun/generation；抑制重发沿用原标签。
    /// 成功后包归 hanger，总线拿到的是帧字节副本。
    fn prepare_commit(
        &mut self,
        fifo: usize,
        mut skb: SkBuff,
        credited: bool,
    ) -> Result<(Vec<u8>, CommitToken), Option<SkBuff>> {
        let Some(idx) = skb.ws.mac.map(|m| m as usize) else {
            self.stats.generic_error += 1;
            return Err(Some(skb));
        };
        let suppressed = skb.ws.state == PktState::Suppressed;
        if !suppressed {
            let slot = match self.hanger.get_free_slot() {
                Ok(s) => s,
                Err(_) => return Err(Some(skb)),
            };
            let reuseseq = self.reuseseq;
            let entry = self.descs.at_mut(idx);
            tag_set(&mut skb.ws.htod, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT, slot);
            tag_set(
                &mut skb.ws.htod,
                FWS_HTOD_FREERUN_MASK,
                FWS_HTOD_FREERUN_SHIFT,
                entry.seq[fifo] as u32,
            );
            tag_set(
                &mut skb.ws.htod,
                FWS_HTOD_GENERATION_MASK,
                FWS_HTOD_GENERATION_SHIFT,
                entry.generation as u32,
            );
            entry.seq[fifo] = entry.seq[fifo].wrapping_add(1);
            if reuseseq {
                skb.ws.htod_seq = entry.seq12[fifo] & FWS_HTODSEQ_NR_MASK;
                entry.seq12[fifo] = (entry.seq12[fifo] + 1) & FWS_HTODSEQ_NR_MASK;
            }
        }
        tag_set(&mut skb.ws.htod, FWS_HTOD_FIFO_MASK, FWS_HTOD_FIFO_SHIFT, fifo as u32);
        let mut flags = FWS_HTOD_FLAG_PKTFROMHOST;
        if skb.ws.requested {
            flags |= FWS_HTOD_FLAG_PKT_REQUESTED;
        }
        tag_set(&mut skb.ws.htod, FWS_HTOD_FLAGS_MASK, FWS_HTOD_FLAGS_SHIFT, flags);
        let slot = tag_get(skb.ws.htod, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT);

        // TIM 捎带：pending bitmap 变化随本帧上报
        let entry = self.descs.at_mut(idx);
        let tim = if entry.send_tim_signal {
            entry.send_tim_signal = false;
            entry.traffic_lastreported_bmp = entry.traffic_pending_bmp;
            Some((entry.mac_handle, entry.traffic_pending_bmp))
        } else {
            None
        };

        let seq_ext = if self.reuseseq { Some(skb.ws.htod_seq) } else { None };
        let mut sig = [0u8; tlv::SIGNAL_AREA_MAX];
        let siglen = tlv::build_signal_area(&mut sig, skb.ws.htod, seq_ext, tim);
        skb.reserve(siglen + bcdc::BCDC_HEADER_LEN);
        if !skb.push(siglen) {
            self.stats.generic_error += 1;
            return Err(Some(skb));
        }
        skb.data_mut()[..siglen].copy_from_slice(&sig[..siglen]);
        let ifidx = skb.ws.ifidx;
        if bcdc::hdrpush(&mut skb, ifidx, (siglen / 4) as u8, false).is_err() {
            skb.pull(siglen);
            self.stats.generic_error += 1;
            return Err(Some(skb));
        }

        let entry = self.descs.at_mut(idx);
        entry.transit_count += 1;
        if suppressed {
            entry.suppr_transit_count += 1;
        }
        let frame = skb.data().to_vec();
        let requested = skb.ws.requested;
        if self.hanger.push(slot, skb).is_err() {
            // 槽位状态失配，包已随 push 丢弃
            self.descs.at_mut(idx).transit_dec(suppressed);
            self.stats.generic_error += 1;
            return Err(None);
        }
        Ok((
            frame,
            CommitToken {
                slot,
                hdr_len: siglen + bcdc::BCDC_HEADER_LEN,
                suppressed,
                requested,
                credited,
                fifo,
            },
        ))
    }

    fn commit_done(&mut self, token: &CommitToken) {
        self.stats.pkt2bus += 1;
        self.stats.send_pkts[token.fifo] += 1;
        if token.requested {
            self.stats.requested_sent[token.fifo] += 1;
        }
    }

    /// 总线写失败后的回滚（对应 `brcmf_fws_rollback_toq` 的在 hanger 分支）：
    /// 从槽位取回包、剥离线头、队首还回原子队列、补回信用。
    fn commit_rollback(&mut self, token: &CommitToken) {
        let popped = if token.suppressed {
            self.hanger.pop(token.slot, false).map(|skb| {
                // 槽位保持占用，包回抑制队列
                let _ = self.hanger.mark_suppressed(token.slot);
                skb
            })
        } else {
            self.hanger.pop(token.slot, true)
        };
        let Ok(mut skb) = popped else {
            self.stats.rollback_failed += 1;
            return;
        };
        skb.pull(token.hdr_len);
        if let Some(idx) = skb.ws.mac.map(|m| m as usize) {
            self.descs.at_mut(idx).transit_dec(token.suppressed);
            let prec = 2 * token.fifo + usize::from(token.suppressed);
            match self.descs.at_mut(idx).psq.penq_head(prec, skb) {
                Ok(()) => self.stats.rollback_success += 1,
                Err(skb) => {
                    if token.suppressed {
                        let _ = self.hanger.free_slot(token.slot);
                    }
                    self.stats.rollback_failed += 1;
                    self.completed.push((skb, false));
                }
            }
        } else {
            self.stats.rollback_failed += 1;
            self.completed.push((skb, false));
        }
        if token.credited {
            self.return_credits(token.fifo, 1);
        }
    }

    /// 组帧前失败（无空槽等）的回滚：包未动，直接队首还回。
    fn rollback_toq(&mut self, fifo: usize, skb: SkBuff, credited: bool) {
        let suppressed = skb.ws.state == PktState::Suppressed;
        let prec = 2 * fifo + usize::from(suppressed);
        match skb.ws.mac.map(|m| m as usize) {
            Some(idx) => match self.descs.at_mut(idx).psq.penq_head(prec, skb) {
                Ok(()) => self.stats.rollback_success += 1,
                Err(skb) => {
                    if suppressed {
                        let slot =
                            tag_get(skb.ws.htod, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT);
                        let _ = self.hanger.free_slot(slot);
                    }
                    self.stats.rollback_failed += 1;
                    self.completed.push((skb, false));
                }
            },
            None => {
                self.stats.rollback_failed += 1;
                self.completed.push((skb, false));
            }
        }
        if credited {
            self.return_credits(fifo, 1);
        }
    }

    // ------------------------------------------------------------------
    // txstatus
    // ------------------------------------------------------------------

    /// 单条 txstatus 落地（对应 `brcmf_fws_txs_process`）。
    fn txs_process(&mut self, flag: TxStatusFlag, hslot: u32, genbit: u8, seq: u16) {
        let remove = !matches!(flag, TxStatusFlag::CoreSuppress | TxStatusFlag::FwPsSuppress);
        match flag {
            TxStatusFlag::Discard => self.stats.txs_discard += 1,
            TxStatusFlag::CoreSuppress => self.stats.txs_supp_core += 1,
            TxStatusFlag::FwPsSuppress => self.stats.txs_supp_ps += 1,
            TxStatusFlag::FwTossed => self.stats.txs_tossed += 1,
            TxStatusFlag::HostTossed => self.stats.txs_host_tossed += 1,
        }
        let mut skb = match self.hanger.pop(hslot, remove) {
            Ok(skb) => skb,
            Err(_) => {
                log::warn!(target: "wireless::fws", "txstatus for vacant slot {}", hslot);
                self.stats.generic_error += 1;
                return;
            }
        };
        // 剥掉提交时压入的线头（BCDC 头 + 信令区），恢复裸载荷
        if skb.len() >= bcdc::BCDC_HEADER_LEN {
            let strip = bcdc::BCDC_HEADER_LEN + (skb.data()[3] as usize) * 4;
            skb.pull(strip);
        }
        let fifo = tag_get(skb.ws.htod, FWS_HTOD_FIFO_MASK, FWS_HTOD_FIFO_SHIFT) as usize;
        if let Some(idx) = skb.ws.mac.map(|m| m as usize) {
            let entry = self.descs.at_mut(idx);
            entry.transit_count -= 1;
            if entry.transit_count < 0 {
                log::error!(target: "wireless::fws", "txs: transit_count underflow");
                entry.transit_count = 0;
            }
            if entry.suppressed && entry.suppr_transit_count > 0 {
                entry.suppr_transit_count -= 1;
            }
        }
        if !remove {
            match self.txstatus_suppressed(hslot, skb, genbit, seq) {
                Ok(()) => return,
                Err(skb) => {
                    // 抑制队列容不下，按失败终结
                    self.completed.push((skb, false));
                    return;
                }
            }
        }
        // 隐含信用：每条回执即一枚；显式信用经 credit-back 信令返还，
        // 仅主机侧丢弃例外（点名信用包在出队时已补账，不再重复）
        let refund = match self.fcmode {
            FcMode::ImpliedCredit => true,
            FcMode::ExplicitCredit => {
                flag == TxStatusFlag::HostTossed && !skb.ws.requested_credit
            }
            FcMode::None => false,
        };
        if refund {
            self.return_credits(fifo, 1);
        }
        let success = flag == TxStatusFlag::Discard;
        self.completed.push((skb, success));
    }

    /// 抑制包回抑制子队列等待重发（对应 `brcmf_fws_txstatus_suppressed`）。
    /// 槽位保持占用，重发沿用同一 hslot；世代位按固件回报更新。
    fn txstatus_suppressed(
        &mut self,
        hslot: u32,
        mut skb: SkBuff,
        genbit: u8,
        seq: u16,
    ) -> Result<(), SkBuff> {
        let Some(idx) = skb.ws.mac.map(|m| m as usize) else {
            let _ = self.hanger.free_slot(hslot);
            self.stats.generic_error += 1;
            return Err(skb);
        };
        let fifo = tag_get(skb.ws.htod, FWS_HTOD_FIFO_MASK, FWS_HTOD_FIFO_SHIFT) as usize;
        self.descs.at_mut(idx).generation = genbit;
        tag_set(
            &mut skb.ws.htod,
            FWS_HTOD_GENERATION_MASK,
            FWS_HTOD_GENERATION_SHIFT,
            genbit as u32,
        );
        if self.reuseseq {
            skb.ws.htod_seq = seq;
            if skb.ws.htod_seq & FWS_HTODSEQ_FROMFW != 0 {
                skb.ws.htod_seq &= !FWS_HTODSEQ_FROMFW;
                skb.ws.htod_seq |= FWS_HTODSEQ_FROMDRV;
            } else {
                skb.ws.htod_seq &= !FWS_HTODSEQ_FROMDRV;
            }
        }
        if self.hanger.mark_suppressed(hslot).is_err() {
            self.stats.generic_error += 1;
        }
        match self.enq(PktState::Suppressed, fifo, skb) {
            Ok(()) => {
                self.descs.at_mut(idx).suppressed = true;
                Ok(())
            }
            Err(skb) => {
                let _ = self.hanger.free_slot(hslot);
                Err(skb)
            }
        }
    }

    // ------------------------------------------------------------------
    // 信令分发
    // ------------------------------------------------------------------

    /// 解析并落地收帧信令区的全部 TLV；返回是否需要再跑出队调度。
    /// 畸形信令丢弃余下记录，载荷照常投递。
    fn process_signal_area(&mut self, sig: &[u8], ws: &mut PktWorkspace, now_ms: u64) -> bool {
        let mut schedule = false;
        let mut rd = TlvReader::new(sig);
        loop {
            match rd.next() {
                Ok(None) => break,
                Err(TlvErr::InvalidType) => {
                    self.stats.tlv_invalid_type += 1;
                    break;
                }
                Err(TlvErr::Malformed) => {
                    self.stats.tlv_parse_failed += 1;
                    break;
                }
                Ok(Some((ty, value))) => {
                    schedule |= match ty {
                        FwsTlvType::MacOpen => self.macdesc_state_indicate(true, value),
                        FwsTlvType::MacClose => self.macdesc_state_indicate(false, value),
                        FwsTlvType::MacRequestCredit => self.request_indicate(true, value),
                        FwsTlvType::MacRequestPacket => self.request_indicate(false, value),
                        FwsTlvType::MacDescAdd => self.macdesc_indicate(true, value, now_ms),
                        FwsTlvType::MacDescDel => self.macdesc_indicate(false, value, now_ms),
                        FwsTlvType::InterfaceOpen => self.interface_state_indicate(true, value),
                        FwsTlvType::InterfaceClose => self.interface_state_indicate(false, value),
                        FwsTlvType::TxStatus => self.txstatus_indicate(value, false),
                        FwsTlvType::CompTxStatus => self.txstatus_indicate(value, true),
                        FwsTlvType::FifoCreditBack => self.creditback_indicate(value),
                        FwsTlvType::Rssi => {
                            log::debug!(target: "wireless::fws", "rssi {}", value[0] as i8);
                            false
                        }
                        FwsTlvType::TransId => {
                            log::debug!(target: "wireless::fws", "trans id signal");
                            false
                        }
                        FwsTlvType::HostReorderRxPkts => {
                            let mut meta = [0u8; 10];
                            meta.copy_from_slice(&value[..10]);
                            ws.reorder = Some(meta);
                            false
                        }
                        // 主机到固件方向的类型，不应从固件收到
                        FwsTlvType::PktTag | FwsTlvType::PendingTrafficBmp | FwsTlvType::Filler => {
                            log::debug!(target: "wireless::fws", "unexpected tlv {:?}", ty);
                            false
                        }
                    };
                }
            }
        }
        schedule
    }

    /// MAC_DESC_ADD / DEL（value = [handle, ifidx, ea[6]]）。
    /// 同一地址换绑新句柄即重定位：描述符留在原下标只改句柄，在队与
    /// 在途包的下标引用保持有效。
    fn macdesc_indicate(&mut self, add: bool, value: &[u8], now_ms: u64) -> bool {
        let handle = value[0];
        let ifidx = value[1];
        let mut ea = [0u8; 6];
        ea.copy_from_slice(&value[2..8]);
        if !add {
            match self.descs.lookup(&ea) {
                Some(idx) => {
                    self.macdesc_cleanup(idx, None);
                    self.descs.at_mut(idx).deinit();
                }
                None => self.stats.mac_update_failed += 1,
            }
            return true;
        }
        match self.descs.lookup(&ea) {
            Some(idx) => {
                let entry = self.descs.at_mut(idx);
                entry.mac_handle = handle;
                entry.interface_id = ifidx;
            }
            None => {
                let idx = FwsMacDescTable::node_index(handle);
                if self.descs.at(idx).occupied {
                    self.stats.mac_update_failed += 1;
                } else {
                    let entry = self.descs.at_mut(idx);
                    entry.init(ea, ifidx);
                    entry.mac_handle = handle;
                    self.borrow_defer_timestamp = now_ms + FWS_BORROW_DEFER_PERIOD_MS;
                }
            }
        }
        true
    }

    /// MAC_OPEN / MAC_CLOSE（value = [handle]）。关闭时逐 FIFO 刷新
    /// TIM 位图，有变化立即发纯信令帧（数据路径此时已无载体可捎带）。
    fn macdesc_state_indicate(&mut self, open: bool, value: &[u8]) -> bool {
        let Some(idx) = self.descs.lookup_by_handle(value[0]) else {
            self.stats.mac_update_failed += 1;
            return false;
        };
        let entry = self.descs.at_mut(idx);
        entry.requested_credit = 0;
        entry.requested_packet = 0;
        let target = if open {
            MacDescState::Open
        } else {
            MacDescState::Close
        };
        // 世代位跟随状态翻转；固件重发同向通告时不动
        if entry.state != target {
            entry.generation ^= 1;
        }
        if open {
            entry.state = MacDescState::Open;
        } else {
            entry.state = MacDescState::Close;
            for fifo in FWS_FIFO_AC_BK..=FWS_FIFO_AC_VO {
                entry.tim_update(fifo);
            }
            if entry.send_tim_signal {
                entry.send_tim_signal = false;
                entry.traffic_lastreported_bmp = entry.traffic_pending_bmp;
                let frame =
                    build_tim_frame(entry.interface_id, entry.mac_handle, entry.traffic_pending_bmp);
                self.tim_frames.push(frame);
            }
        }
        true
    }

    /// IF_OPEN / IF_CLOSE（value = [ifidx]）。
    fn interface_state_indicate(&mut self, open: bool, value: &[u8]) -> bool {
        let idx = FwsMacDescTable::iface_index(value[0]);
        let entry = self.descs.at_mut(idx);
        if !entry.occupied {
            self.stats.mac_update_failed += 1;
            return false;
        }
        entry.state = if open {
            MacDescState::Open
        } else {
            MacDescState::Close
        };
        open
    }

    /// MAC_REQUEST_CREDIT（value = [count, handle]）/
    /// MAC_REQUEST_PACKET（value = [count, handle, ...]）：固件为关闭
    /// 端点点名放行的额度，覆盖式记录。
    fn request_indicate(&mut self, credit: bool, value: &[u8]) -> bool {
        let Some(idx) = self.descs.lookup_by_handle(value[1]) else {
            self.stats.mac_update_failed += 1;
            return false;
        };
        let entry = self.descs.at_mut(idx);
        if credit {
            entry.requested_credit = value[0];
        } else {
            entry.requested_packet = value[0];
        }
        true
    }

    /// TXSTATUS（4 字节状态字 [+2 seq]）与 COMP_TXSTATUS（附连发计数）。
    /// 压缩形式展开为连续 hslot / 递增 seq 的多条回执。COMP_TXSTATUS 表上
    /// 最小长度 1，状态字与计数在此按实际长度校验，短记录计错后丢弃，
    /// 不影响同一信令区的后续记录。
    fn txstatus_indicate(&mut self, value: &[u8], compressed: bool) -> bool {
        let count_offset = 4 + if self.reuseseq { tlv::FWS_TYPE_SEQ_LEN } else { 0 };
        if value.len() < 4 || (compressed && value.len() <= count_offset) {
            self.stats.generic_error += 1;
            return false;
        }
        let status = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
        let hslot = tag_get(status, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT);
        let genbit = tag_get(status, FWS_HTOD_GENERATION_MASK, FWS_HTOD_GENERATION_SHIFT) as u8;
        let Some(flag) =
            TxStatusFlag::from_u32(tag_get(status, FWS_HTOD_FLAGS_MASK, FWS_HTOD_FLAGS_SHIFT))
        else {
            self.stats.generic_error += 1;
            return true;
        };
        let seq = if self.reuseseq && value.len() >= 6 {
            u16::from_le_bytes([value[4], value[5]])
        } else {
            0
        };
        let count = if compressed {
            value[count_offset] as u32
        } else {
            1
        };
        for i in 0..count {
            self.stats.txs_indicate += 1;
            self.txs_process(flag, hslot + i, genbit, seq.wrapping_add(i as u16));
        }
        true
    }

    /// FIFO_CREDIT_BACK（6 字节，每 FIFO 返还数）。仅显式信用模式落账。
    fn creditback_indicate(&mut self, value: &[u8]) -> bool {
        if self.fcmode != FcMode::ExplicitCredit {
            return true;
        }
        for fifo in 0..FWS_FIFO_COUNT {
            if value[fifo] > 0 {
                self.stats.fifo_credits_back[fifo] += value[fifo] as u32;
                self.return_credits(fifo, value[fifo] as i32);
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // 清理
    // ------------------------------------------------------------------

    /// 冲刷描述符队列（对应 `brcmf_fws_macdesc_cleanup`）：ifidx 为 None
    /// 冲全部。被冲的抑制包还占着 hanger 槽位，按标签回收。
    fn macdesc_cleanup(&mut self, idx: usize, ifidx: Option<u8>) {
        let flushed = self
            .descs
            .at_mut(idx)
            .psq
            .pflush(|p| ifidx.map_or(true, |i| p.ws.ifidx == i));
        for p in flushed {
            if p.ws.state == PktState::Suppressed {
                let slot = tag_get(p.ws.htod, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT);
                let _ = self.hanger.free_slot(slot);
            }
            self.completed.push((p, false));
        }
    }
}

/// 纯信令 TIM 帧：BCDC 头 + 单条 PENDING_TRAFFIC_BMP 记录，共 8 字节。
fn build_tim_frame(ifidx: u8, mac_handle: u8, bmp: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(bcdc::BCDC_PROTO_VER << bcdc::BCDC_FLAG_VER_SHIFT);
    frame.push(0);
    frame.push(ifidx & bcdc::BCDC_FLAG2_IF_MASK);
    frame.push(1);
    frame.push(FwsTlvType::PendingTrafficBmp as u8);
    frame.push(2);
    frame.push(mac_handle);
    frame.push(bmp);
    frame
}

/// 引擎对外句柄。所有入口可并发调用，内部单锁串行化；
/// 总线写与 `tx_finalize` 回调保证不在锁内发生。
pub struct FwsManager {
    info: Mutex<FwsInfo>,
}

impl FwsManager {
    pub fn new(config: FwsConfig) -> Self {
        FwsManager {
            info: Mutex::new(FwsInfo::new(config)),
        }
    }

    /// 主机出包入口（对应 `brcmf_fws_process_skb`）。组播走 BCMC FIFO，
    /// 单播按 802.1d 优先级映射；无流控模式直接压头上总线。
    pub fn process_outbound(
        &self,
        bus: &impl FwsBus,
        ifidx: u8,
        mut skb: SkBuff,
    ) -> AxResult {
        skb.ws.ifidx = ifidx;
        let multicast = skb.len() >= 6 && skb.data()[0] & 0x01 != 0;
        let fifo = if multicast {
            FWS_FIFO_BCMC
        } else {
            FWS_PRIO2FIFO[(skb.ws.priority & 0x07) as usize]
        };
        let bypass = self.info.lock().fcmode == FcMode::None;
        if bypass {
            // 直通：压头即走，不入队不占槽
            bcdc::hdrpush(&mut skb, ifidx, 0, false)?;
            match bus.txdata(skb.data()) {
                Ok(_) => {
                    self.info.lock().stats.pkt2bus += 1;
                    bus.tx_finalize(skb, true);
                    Ok(())
                }
                Err(e) => {
                    bus.tx_finalize(skb, false);
                    Err(e)
                }
            }
        } else {
            {
                let mut fws = self.info.lock();
                let mac_idx = {
                    let da = skb.data();
                    fws.descs.classify(ifidx, da)
                };
                skb.ws.mac = Some(mac_idx as u16);
                if let Err(skb) = fws.enq(PktState::Delayed, fifo, skb) {
                    fws.completed.push((skb, false));
                }
            }
            self.run_deq_worker(bus);
            Ok(())
        }
    }

    /// 出队调度循环（对应 `brcmf_fws_dequeue_worker`）：AC 从高到低，
    /// 信用预扣、提交失败回滚；BE 耗尽后进入借用循环；总线背压即停。
    pub fn run_deq_worker(&self, bus: &impl FwsBus) {
        let pending_tim = {
            let mut fws = self.info.lock();
            core::mem::take(&mut fws.tim_frames)
        };
        for frame in pending_tim {
            if let Err(e) = bus.txdata(&frame) {
                log::warn!(target: "wireless::fws", "tim signal tx failed: {:?}", e);
            }
        }
        'fifos: for &fifo in &WORKER_FIFO_ORDER {
            loop {
                let prepared = {
                    let mut fws = self.info.lock();
                    if fws.bus_flow_blocked {
                        break 'fifos;
                    }
                    let need_credit = fws.fcmode != FcMode::None
                        && !(fifo == FWS_FIFO_BCMC && !fws.bcmc_credit_check);
                    let mut borrowed = false;
                    if need_credit && fws.fifo_credit[fifo] <= 0 {
                        if fifo != FWS_FIFO_AC_BE || !fws.borrow_credit(bus.now_ms()) {
                            break;
                        }
                        borrowed = true;
                    }
                    let Some(skb) = fws.deq(fifo) else {
                        if borrowed {
                            fws.unborrow_credit();
                        }
                        break;
                    };
                    if need_credit {
                        fws.fifo_credit[fifo] -= 1;
                        if fws.fifo_credit[fifo] == 0 {
                            fws.fifo_credit_map &= !(1 << fifo);
                        }
                    }
                    match fws.prepare_commit(fifo, skb, need_credit) {
                        Ok(out) => Some(out),
                        Err(Some(skb)) => {
                            fws.rollback_toq(fifo, skb, need_credit);
                            None
                        }
                        Err(None) => {
                            if need_credit {
                                fws.return_credits(fifo, 1);
                            }
                            None
                        }
                    }
                };
                let Some((frame, token)) = prepared else {
                    break;
                };
                let res = bus.txdata(&frame);
                {
                    let mut fws = self.info.lock();
                    match res {
                        Ok(_) => fws.commit_done(&token),
                        Err(e) => {
                            log::debug!(
                                target: "wireless::fws",
                                "bus tx failed, rolling back slot {}: {:?}",
                                token.slot, e
                            );
                            fws.commit_rollback(&token);
                        }
                    }
                }
                if res.is_err() {
                    break;
                }
            }
        }
        self.flush_completed(bus);
    }

    /// 收帧入口（对应 bcdc hdrpull + `brcmf_fws_hdrpull`）：剥 BCDC 头、
    /// 解码并落地信令区、剥信令字节。纯信令帧（无载荷）以 `UnexpectedEof`
    /// 告知调用方不必投递。返回目的接口下标。
    pub fn hdrpull(&self, bus: &impl FwsBus, skb: &mut SkBuff) -> AxResult<u8> {
        let info = bcdc::hdrpull(skb)?;
        let mut schedule = false;
        if info.siglen > 0 {
            if skb.len() < info.siglen {
                self.info.lock().stats.tlv_parse_failed += 1;
                return ax_err!(InvalidData, "signal area exceeds frame");
            }
            let sig: Vec<u8> = skb.data()[..info.siglen].to_vec();
            {
                let mut fws = self.info.lock();
                fws.stats.header_pulls += 1;
                schedule = fws.process_signal_area(&sig, &mut skb.ws, bus.now_ms());
            }
            skb.pull(info.siglen);
        }
        if schedule {
            self.run_deq_worker(bus);
        } else {
            self.flush_completed(bus);
        }
        if skb.is_empty() {
            self.info.lock().stats.header_only_pkt += 1;
            return ax_err!(UnexpectedEof, "signal-only frame");
        }
        Ok(info.ifidx)
    }

    /// 收包重排序：带元数据的包进窗口，可交付的包按序追加到 `out`。
    pub fn rx_reorder(&self, skb: SkBuff, out: &mut Vec<SkBuff>) {
        self.info.lock().reorder.process(skb, out);
    }

    /// 总线侧的发送完成通知。流控未启用时包不在引擎手里，直接终结；
    /// 流控启用时在途包由 hanger 持有，按包标签槽位当主机侧丢弃落账，
    /// 传入的副本弃置。
    pub fn tx_complete(&self, bus: &impl FwsBus, skb: SkBuff, success: bool) {
        let fcmode = self.info.lock().fcmode;
        if fcmode == FcMode::None {
            bus.tx_finalize(skb, success);
            return;
        }
        let hslot = tag_get(skb.ws.htod, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT);
        {
            let mut fws = self.info.lock();
            fws.stats.txs_indicate += 1;
            fws.txs_process(TxStatusFlag::HostTossed, hslot, 0, 0);
        }
        self.flush_completed(bus);
    }

    /// 总线背压开关；解除时立即补跑一轮调度。
    pub fn bus_blocked(&self, bus: &impl FwsBus, blocked: bool) {
        self.info.lock().bus_flow_blocked = blocked;
        if !blocked {
            self.run_deq_worker(bus);
        }
    }

    /// 注册本地接口（对应 `brcmf_fws_add_interface`）。
    pub fn add_interface(&self, ifidx: u8) {
        let mut fws = self.info.lock();
        let idx = FwsMacDescTable::iface_index(ifidx);
        fws.descs.at_mut(idx).init([0; 6], ifidx);
    }

    /// 注销接口（对应 `brcmf_fws_del_interface`）：冲刷其接口描述符与
    /// 所属站点描述符，回收在途槽位，失败终结全部包。
    pub fn del_interface(&self, bus: &impl FwsBus, ifidx: u8) {
        {
            let mut fws = self.info.lock();
            for node in 0..FwsMacDescTable::iface_index(0) {
                if fws.descs.at(node).occupied && fws.descs.at(node).interface_id == ifidx {
                    fws.macdesc_cleanup(node, None);
                    fws.descs.at_mut(node).deinit();
                }
            }
            let idx = FwsMacDescTable::iface_index(ifidx);
            fws.macdesc_cleanup(idx, None);
            fws.descs.at_mut(idx).deinit();
            // 落在共享 other 描述符上的该接口包一并冲刷
            fws.macdesc_cleanup(FwsMacDescTable::other_index(), Some(ifidx));
            let in_flight = fws.hanger.cleanup(|p| p.ws.ifidx == ifidx);
            for mut p in in_flight {
                if p.len() >= bcdc::BCDC_HEADER_LEN {
                    let strip = bcdc::BCDC_HEADER_LEN + (p.data()[3] as usize) * 4;
                    p.pull(strip);
                }
                fws.completed.push((p, false));
            }
        }
        self.flush_completed(bus);
    }

    /// 冲刷接口的滞留包但保留注册（链路重置路径）。
    pub fn reset_interface(&self, bus: &impl FwsBus, ifidx: u8) {
        {
            let mut fws = self.info.lock();
            let idx = FwsMacDescTable::iface_index(ifidx);
            fws.macdesc_cleanup(idx, Some(ifidx));
        }
        self.flush_completed(bus);
    }

    /// 固件信用图事件落地：重置各 FIFO 初始/当前信用，启用 BCMC 管控。
    pub fn seed_credits(&self, credits: [u8; FWS_FIFO_COUNT]) {
        self.info.lock().seed_credits(credits);
    }

    pub fn stats(&self) -> FwsStats {
        self.info.lock().stats
    }

    pub fn reorder_stats(&self) -> ReorderStats {
        self.info.lock().reorder.stats()
    }

    /// 当前信用池快照（credits, credit_map, delay_map），调试接口。
    pub fn credit_snapshot(&self) -> ([i32; FWS_FIFO_COUNT], u32, u32) {
        let fws = self.info.lock();
        (fws.fifo_credit, fws.fifo_credit_map, fws.fifo_delay_map)
    }

    fn flush_completed(&self, bus: &impl FwsBus) {
        loop {
            let batch = {
                let mut fws = self.info.lock();
                if fws.completed.is_empty() {
                    break;
                }
                core::mem::take(&mut fws.completed)
            };
            for (skb, success) in batch {
                bus.tx_finalize(skb, success);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_with(fifo: usize, hslot: u32, freerun: u32) -> u32 {
        let mut tag = 0;
        tag_set(&mut tag, FWS_HTOD_FIFO_MASK, FWS_HTOD_FIFO_SHIFT, fifo as u32);
        tag_set(&mut tag, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT, hslot);
        tag_set(&mut tag, FWS_HTOD_FREERUN_MASK, FWS_HTOD_FREERUN_SHIFT, freerun);
        tag
    }

    #[test]
    fn htod_tag_field_roundtrip() {
        let mut tag = 0u32;
        tag_set(&mut tag, FWS_HTOD_GENERATION_MASK, FWS_HTOD_GENERATION_SHIFT, 1);
        tag_set(&mut tag, FWS_HTOD_FLAGS_MASK, FWS_HTOD_FLAGS_SHIFT, 0x3);
        tag_set(&mut tag, FWS_HTOD_FIFO_MASK, FWS_HTOD_FIFO_SHIFT, 5);
        tag_set(&mut tag, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT, 1023);
        tag_set(&mut tag, FWS_HTOD_FREERUN_MASK, FWS_HTOD_FREERUN_SHIFT, 0xab);
        assert_eq!(tag_get(tag, FWS_HTOD_GENERATION_MASK, FWS_HTOD_GENERATION_SHIFT), 1);
        assert_eq!(tag_get(tag, FWS_HTOD_FLAGS_MASK, FWS_HTOD_FLAGS_SHIFT), 0x3);
        assert_eq!(tag_get(tag, FWS_HTOD_FIFO_MASK, FWS_HTOD_FIFO_SHIFT), 5);
        assert_eq!(tag_get(tag, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT), 1023);
        assert_eq!(tag_get(tag, FWS_HTOD_FREERUN_MASK, FWS_HTOD_FREERUN_SHIFT), 0xab);
    }

    #[test]
    fn freerun_ordering_wraps() {
        assert!(freerun_after(1, 0));
        assert!(freerun_after(0, 255)); // 环绕
        assert!(!freerun_after(0, 1));
        assert!(!freerun_after(7, 7));
        // 距离恰为半环时判为"不在后"
        assert!(!freerun_after(128, 0));
        assert!(freerun_after(127, 0));
    }

    #[test]
    fn prio_maps_to_access_category() {
        assert_eq!(FWS_PRIO2FIFO[0], FWS_FIFO_AC_BE);
        assert_eq!(FWS_PRIO2FIFO[1], FWS_FIFO_AC_BK);
        assert_eq!(FWS_PRIO2FIFO[6], FWS_FIFO_AC_VO);
    }

    fn info_with_credits(credits: [u8; FWS_FIFO_COUNT]) -> FwsInfo {
        FwsInfo::new(FwsConfig {
            fcmode: FcMode::ExplicitCredit,
            reuseseq: false,
            init_fifo_credit: credits,
        })
    }

    #[test]
    fn borrow_and_return_pays_lender_first() {
        let mut fws = info_with_credits([0, 0, 2, 3, 0, 0]);
        // BE 空，借 VO
        assert!(fws.borrow_credit(0));
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_VO], 2);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_BE], 1);
        fws.fifo_credit[FWS_FIFO_AC_BE] -= 1; // 模拟消费
        // BE 的返还先回 VO
        fws.return_credits(FWS_FIFO_AC_BE, 1);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_VO], 3);
        assert_eq!(fws.credits_borrowed[FWS_FIFO_AC_VO], 0);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_BE], 0);
    }

    #[test]
    fn borrow_defers_inside_window() {
        let mut fws = info_with_credits([0, 0, 0, 4, 0, 0]);
        fws.borrow_defer_timestamp = 1000;
        assert!(!fws.borrow_credit(999));
        assert!(fws.borrow_credit(1000));
    }

    #[test]
    fn failed_borrow_dequeue_restores_pools() {
        let mut fws = info_with_credits([0, 0, 0, 2, 0, 0]);
        // 借成功但随后出队落空：撤销后各池回到借前
        assert!(fws.borrow_credit(0));
        fws.unborrow_credit();
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_VO], 2);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_BE], 0);
        assert_eq!(fws.credits_borrowed[FWS_FIFO_AC_VO], 0);
        assert_eq!(fws.fifo_credit_map & (1 << FWS_FIFO_AC_BE), 0);
    }

    #[test]
    fn return_credits_clamps_to_initial() {
        let mut fws = info_with_credits([0, 2, 0, 0, 0, 0]);
        fws.return_credits(FWS_FIFO_AC_BE, 5);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_BE], 2);
    }

    fn delayed_pkt(mac: usize, prio: u8) -> SkBuff {
        let mut skb = SkBuff::from_slice(&[0x02, 0, 0, 0, 0, mac as u8, 0xee], 16);
        skb.ws.priority = prio;
        skb.ws.mac = Some(mac as u16);
        skb
    }

    #[test]
    fn deq_round_robins_across_nodes() {
        let mut fws = info_with_credits([4; FWS_FIFO_COUNT]);
        for handle in [1u8, 2] {
            let idx = FwsMacDescTable::node_index(handle);
            let e = fws.descs.at_mut(idx);
            e.init([2, 0, 0, 0, 0, handle], 0);
            e.mac_handle = handle;
        }
        let fifo = FWS_FIFO_AC_BE;
        for _ in 0..2 {
            for handle in [1usize, 2] {
                let idx = FwsMacDescTable::node_index(handle as u8);
                fws.enq(PktState::Delayed, fifo, delayed_pkt(idx, 0)).unwrap();
            }
        }
        let order: Vec<u16> = core::iter::from_fn(|| fws.deq(fifo))
            .map(|s| s.ws.mac.unwrap())
            .collect();
        assert_eq!(order.len(), 4);
        // 相邻两包来自不同端点
        assert_ne!(order[0], order[1]);
        assert_ne!(order[1], order[2]);
        assert_ne!(order[2], order[3]);
    }

    #[test]
    fn suppressed_queue_served_before_delayed() {
        let mut fws = info_with_credits([4; FWS_FIFO_COUNT]);
        let idx = FwsMacDescTable::node_index(3);
        let e = fws.descs.at_mut(idx);
        e.init([2, 0, 0, 0, 0, 3], 0);
        e.mac_handle = 3;
        let fifo = FWS_FIFO_AC_VI;

        fws.enq(PktState::Delayed, fifo, delayed_pkt(idx, 4)).unwrap();
        let mut supp = delayed_pkt(idx, 4);
        supp.ws.htod = tag_with(fifo, 9, 1);
        fws.enq(PktState::Suppressed, fifo, supp).unwrap();

        let first = fws.deq(fifo).unwrap();
        assert_eq!(first.ws.state, PktState::Suppressed);
        let second = fws.deq(fifo).unwrap();
        assert_eq!(second.ws.state, PktState::Delayed);
    }

    #[test]
    fn suppr_transit_blocks_delayed_packets() {
        let mut fws = info_with_credits([4; FWS_FIFO_COUNT]);
        let idx = FwsMacDescTable::node_index(4);
        let e = fws.descs.at_mut(idx);
        e.init([2, 0, 0, 0, 0, 4], 0);
        e.mac_handle = 4;
        e.suppressed = true;
        e.suppr_transit_count = 1;
        let fifo = FWS_FIFO_AC_BE;
        fws.enq(PktState::Delayed, fifo, delayed_pkt(idx, 0)).unwrap();
        // 抑制包仍在途：延迟包不得越过
        assert!(fws.deq(fifo).is_none());
        fws.descs.at_mut(idx).suppr_transit_count = 0;
        assert!(fws.deq(fifo).is_some());
        assert!(!fws.descs.at(idx).suppressed);
    }

    #[test]
    fn request_credit_marks_and_offsets() {
        let mut fws = info_with_credits([0, 2, 0, 0, 0, 0]);
        let idx = FwsMacDescTable::node_index(6);
        let e = fws.descs.at_mut(idx);
        e.init([2, 0, 0, 0, 0, 6], 0);
        e.mac_handle = 6;
        e.state = MacDescState::Close;
        e.requested_credit = 1;
        let fifo = FWS_FIFO_AC_BE;
        fws.fifo_credit[fifo] = 1;
        fws.enq(PktState::Delayed, fifo, delayed_pkt(idx, 0)).unwrap();
        let skb = fws.deq(fifo).unwrap();
        assert!(skb.ws.requested && skb.ws.requested_credit);
        // 显式信用模式：点名包即刻补回一枚
        assert_eq!(fws.fifo_credit[fifo], 2);
        assert_eq!(fws.descs.at(idx).requested_credit, 0);
    }

    #[test]
    fn request_packet_consumes_pool_credit() {
        let mut fws = info_with_credits([0, 2, 0, 0, 0, 0]);
        let idx = FwsMacDescTable::node_index(9);
        let e = fws.descs.at_mut(idx);
        e.init([2, 0, 0, 0, 0, 9], 0);
        e.mac_handle = 9;
        e.state = MacDescState::Close;
        e.requested_packet = 1;
        let fifo = FWS_FIFO_AC_BE;
        fws.fifo_credit[fifo] = 1;
        fws.enq(PktState::Delayed, fifo, delayed_pkt(idx, 0)).unwrap();
        let skb = fws.deq(fifo).unwrap();
        assert!(skb.ws.requested && !skb.ws.requested_credit);
        // 点名放包不补信用，照常占公共池
        assert_eq!(fws.fifo_credit[fifo], 1);
        assert_eq!(fws.descs.at(idx).requested_packet, 0);
    }

    #[test]
    fn txstatus_suppress_requeues_same_slot() {
        let mut fws = info_with_credits([4; FWS_FIFO_COUNT]);
        let idx = FwsMacDescTable::node_index(7);
        let e = fws.descs.at_mut(idx);
        e.init([2, 0, 0, 0, 0, 7], 0);
        e.mac_handle = 7;
        let fifo = FWS_FIFO_AC_BE;
        fws.enq(PktState::Delayed, fifo, delayed_pkt(idx, 0)).unwrap();
        let skb = fws.deq(fifo).unwrap();
        let (_frame, token) = fws.prepare_commit(fifo, skb, true).ok().unwrap();
        fws.commit_done(&token);

        fws.txs_process(TxStatusFlag::FwPsSuppress, token.slot, 1, 0);
        assert!(fws.completed.is_empty());
        assert!(fws.descs.at(idx).suppressed);

        // 重发取回同一槽位、携带回报的世代位
        let skb = fws.deq(fifo).unwrap();
        assert_eq!(skb.ws.state, PktState::Suppressed);
        assert_eq!(
            tag_get(skb.ws.htod, FWS_HTOD_HSLOT_MASK, FWS_HTOD_HSLOT_SHIFT),
            token.slot
        );
        assert_eq!(
            tag_get(skb.ws.htod, FWS_HTOD_GENERATION_MASK, FWS_HTOD_GENERATION_SHIFT),
            1
        );
        let (_frame, token2) = fws.prepare_commit(fifo, skb, true).ok().unwrap();
        assert_eq!(token2.slot, token.slot);

        // 正常完成释放槽位与在途计数
        fws.txs_process(TxStatusFlag::Discard, token.slot, 1, 0);
        assert_eq!(fws.completed.len(), 1);
        assert!(fws.completed[0].1);
        assert_eq!(fws.hanger.occupied(), 0);
        assert_eq!(fws.descs.at(idx).transit_count, 0);
    }

    #[test]
    fn commit_rollback_restores_queue_and_credit() {
        let mut fws = info_with_credits([0, 3, 0, 0, 0, 0]);
        let idx = FwsMacDescTable::node_index(8);
        let e = fws.descs.at_mut(idx);
        e.init([2, 0, 0, 0, 0, 8], 0);
        e.mac_handle = 8;
        let fifo = FWS_FIFO_AC_BE;
        fws.enq(PktState::Delayed, fifo, delayed_pkt(idx, 0)).unwrap();
        let skb = fws.deq(fifo).unwrap();
        fws.fifo_credit[fifo] -= 1;
        let (_frame, token) = fws.prepare_commit(fifo, skb, true).ok().unwrap();
        fws.commit_rollback(&token);
        assert_eq!(fws.stats.rollback_success, 1);
        assert_eq!(fws.fifo_credit[fifo], 3);
        assert_eq!(fws.hanger.occupied(), 0);
        // 包回到队首，线头已剥
        let skb = fws.deq(fifo).unwrap();
        assert_eq!(skb.data()[6], 0xee);
        assert_eq!(fws.descs.at(idx).transit_count, 0);
    }

    #[test]
    fn signal_area_dispatch_macdesc_lifecycle() {
        let mut fws = info_with_credits([4; FWS_FIFO_COUNT]);
        let mut ws = PktWorkspace::default();
        // MAC_DESC_ADD(handle=2, ifidx=0, ea)
        let sig = [6u8, 8, 2, 0, 0x02, 0, 0, 0, 0, 0x0a];
        assert!(fws.process_signal_area(&sig, &mut ws, 0));
        let idx = fws.descs.lookup(&[0x02, 0, 0, 0, 0, 0x0a]).unwrap();
        assert_eq!(fws.descs.at(idx).mac_handle, 2);
        // 新站点触发借用退避
        assert_eq!(fws.borrow_defer_timestamp, FWS_BORROW_DEFER_PERIOD_MS);

        // MAC_CLOSE 翻转世代位并关闭
        let gen_before = fws.descs.at(idx).generation;
        let sig = [2u8, 1, 2];
        assert!(fws.process_signal_area(&sig, &mut ws, 0));
        assert_eq!(fws.descs.at(idx).state, MacDescState::Close);
        assert_ne!(fws.descs.at(idx).generation, gen_before);

        // 固件重发同向 MAC_CLOSE：世代位不动
        let gen_closed = fws.descs.at(idx).generation;
        let sig = [2u8, 1, 2];
        assert!(fws.process_signal_area(&sig, &mut ws, 0));
        assert_eq!(fws.descs.at(idx).generation, gen_closed);

        // MAC_DESC_DEL 注销
        let sig = [7u8, 8, 2, 0, 0x02, 0, 0, 0, 0, 0x0a];
        assert!(fws.process_signal_area(&sig, &mut ws, 0));
        assert!(fws.descs.lookup(&[0x02, 0, 0, 0, 0, 0x0a]).is_none());
    }

    #[test]
    fn signal_area_creditback_only_explicit() {
        let mut ws = PktWorkspace::default();
        let sig = [11u8, 6, 1, 2, 0, 0, 0, 0];
        let mut fws = info_with_credits([0; FWS_FIFO_COUNT]);
        fws.process_signal_area(&sig, &mut ws, 0);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_BK], 0); // 初始 0 封顶
        fws.init_fifo_credit = [8; FWS_FIFO_COUNT];
        fws.process_signal_area(&sig, &mut ws, 0);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_BK], 1);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_BE], 2);

        let mut implied = FwsInfo::new(FwsConfig {
            fcmode: FcMode::ImpliedCredit,
            ..FwsConfig::default()
        });
        implied.init_fifo_credit = [8; FWS_FIFO_COUNT];
        implied.process_signal_area(&sig, &mut ws, 0);
        assert_eq!(implied.fifo_credit[FWS_FIFO_AC_BE], 0);
    }

    #[test]
    fn short_comp_txstatus_skipped_not_fatal() {
        let mut fws = info_with_credits([0; FWS_FIFO_COUNT]);
        fws.init_fifo_credit = [8; FWS_FIFO_COUNT];
        let mut ws = PktWorkspace::default();
        // COMP_TXSTATUS 声明 1 字节（表上最小值），装不下状态字：
        // 计错丢弃，后续 FIFO_CREDIT_BACK 照常落账
        let sig = [19u8, 1, 0, 11, 6, 0, 0, 1, 0, 0, 0];
        fws.process_signal_area(&sig, &mut ws, 0);
        assert_eq!(fws.stats.generic_error, 1);
        assert_eq!(fws.stats.txs_indicate, 0);
        assert_eq!(fws.fifo_credit[FWS_FIFO_AC_VI], 1);
    }

    #[test]
    fn signal_area_stashes_reorder_meta() {
        let mut fws = info_with_credits([0; FWS_FIFO_COUNT]);
        let mut ws = PktWorkspace::default();
        let mut sig = [0u8; 12];
        sig[0] = 14;
        sig[1] = 10;
        sig[2] = 5; // flow id
        let schedule = fws.process_signal_area(&sig, &mut ws, 0);
        assert!(!schedule);
        assert_eq!(ws.reorder.unwrap()[0], 5);
    }
}
