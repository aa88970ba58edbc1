//! PktQ — 按 precedence 下标的多队列集合
//!
//! 对应 brcmu_utils 的 `struct pktq` 与 `brcmu_pktq_penq / pdeq / mdeq / pflush`。
//! fws 中两处使用：总线发送队列，以及每个 MAC 描述符的 psq
//! （precedence = 2*fifo 为延迟子队列，2*fifo+1 为抑制子队列）。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::SkBuff;

/// 每个 precedence 的默认包数上限（对应 brcmfmac BRCMF_FWS_PSQ_LEN）
pub const PKTQ_LEN_DEFAULT: usize = 256;

/// 多 precedence 包队列。`hi_prec` 为已知非空的最高 precedence 提示
/// （对应 brcmu pktq 的 hi_prec，加速 mdeq 扫描，不参与正确性）。
pub struct PktQ {
    queues: Vec<VecDeque<SkBuff>>,
    /// 每 precedence 包数上限（高水位；penq 超限即失败）
    max: usize,
    /// 已知非空的最高 precedence 提示
    hi_prec: usize,
    /// 总包数
    len: usize,
}

impl PktQ {
    /// 创建 num_prec 个子队列，每队列上限 max。对应 `brcmu_pktq_init`。
    pub fn new(num_prec: usize, max: usize) -> Self {
        let mut queues = Vec::with_capacity(num_prec);
        for _ in 0..num_prec {
            queues.push(VecDeque::new());
        }
        PktQ {
            queues,
            max,
            hi_prec: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn num_prec(&self) -> usize {
        self.queues.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 指定 precedence 的包数。对应 `pktq_plen`。
    #[inline]
    pub fn prec_len(&self, prec: usize) -> usize {
        self.queues.get(prec).map(VecDeque::len).unwrap_or(0)
    }

    /// 指定 precedence 是否已到高水位。对应 `pktq_pfull`。
    #[inline]
    pub fn prec_full(&self, prec: usize) -> bool {
        self.prec_len(prec) >= self.max
    }

    #[inline]
    fn note_enq(&mut self, prec: usize) {
        if prec > self.hi_prec {
            self.hi_prec = prec;
        }
        self.len += 1;
    }

    /// 队尾入队；队列满或 precedence 越界时返还包。对应 `brcmu_pktq_penq`。
    pub fn penq(&mut self, prec: usize, skb: SkBuff) -> Result<(), SkBuff> {
        if prec >= self.queues.len() || self.prec_full(prec) {
            return Err(skb);
        }
        self.queues[prec].push_back(skb);
        self.note_enq(prec);
        Ok(())
    }

    /// 队首入队（回滚时将包还回原位）。对应 `brcmu_pktq_penq_head`。
    pub fn penq_head(&mut self, prec: usize, skb: SkBuff) -> Result<(), SkBuff> {
        if prec >= self.queues.len() || self.prec_full(prec) {
            return Err(skb);
        }
        self.queues[prec].push_front(skb);
        self.note_enq(prec);
        Ok(())
    }

    /// 按序插入：`is_after(new, old)` 为真表示 new 应排在 old 之后。
    /// 从队尾向前找到第一个满足的 old，插在其后（抑制包按 freerun 计数重排时使用）。
    pub fn penq_ordered(
        &mut self,
        prec: usize,
        skb: SkBuff,
        is_after: impl Fn(&SkBuff, &SkBuff) -> bool,
    ) -> Result<(), SkBuff> {
        if prec >= self.queues.len() || self.prec_full(prec) {
            return Err(skb);
        }
        let q = &mut self.queues[prec];
        let mut pos = q.len();
        while pos > 0 && !is_after(&skb, &q[pos - 1]) {
            pos -= 1;
        }
        q.insert(pos, skb);
        self.note_enq(prec);
        Ok(())
    }

    /// 指定 precedence 队首出队。对应 `brcmu_pktq_pdeq`。
    pub fn pdeq(&mut self, prec: usize) -> Option<SkBuff> {
        let skb = self.queues.get_mut(prec)?.pop_front()?;
        self.len -= 1;
        Some(skb)
    }

    /// 指定 precedence 队尾出队。对应 `brcmu_pktq_pdeq_tail`。
    pub fn pdeq_tail(&mut self, prec: usize) -> Option<SkBuff> {
        let skb = self.queues.get_mut(prec)?.pop_back()?;
        self.len -= 1;
        Some(skb)
    }

    /// 按位图出队：从位图中最高的 precedence 向下取第一个非空队首。
    /// 对应 `brcmu_pktq_mdeq(pq, prec_bmp, &prec_out)`。
    pub fn mdeq(&mut self, prec_bmp: u32) -> Option<(usize, SkBuff)> {
        let start = self.hi_prec.min(self.queues.len().saturating_sub(1));
        for prec in (0..=start).rev() {
            if prec_bmp & (1 << prec) == 0 {
                continue;
            }
            if let Some(skb) = self.pdeq(prec) {
                return Some((prec, skb));
            }
        }
        // hi_prec 只是提示；提示之上仍可能有位图指定的队列
        for prec in (start + 1)..self.queues.len() {
            if prec_bmp & (1 << prec) == 0 {
                continue;
            }
            if let Some(skb) = self.pdeq(prec) {
                return Some((prec, skb));
            }
        }
        None
    }

    /// 冲刷所有满足 predicate 的包并返回（teardown 时 predicate 恒真）。
    /// 对应 `brcmu_pktq_pflush`。
    pub fn pflush(&mut self, mut predicate: impl FnMut(&SkBuff) -> bool) -> Vec<SkBuff> {
        let mut flushed = Vec::new();
        for q in self.queues.iter_mut() {
            let mut keep = VecDeque::new();
            while let Some(skb) = q.pop_front() {
                if predicate(&skb) {
                    flushed.push(skb);
                } else {
                    keep.push_back(skb);
                }
            }
            *q = keep;
        }
        self.len -= flushed.len();
        if self.len == 0 {
            self.hi_prec = 0;
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(tag: u8) -> SkBuff {
        SkBuff::from_slice(&[tag], 0)
    }

    #[test]
    fn pktq_penq_pdeq_order() {
        let mut pq = PktQ::new(4, 8);
        pq.penq(1, pkt(1)).unwrap();
        pq.penq(1, pkt(2)).unwrap();
        pq.penq(3, pkt(3)).unwrap();
        assert_eq!(pq.len(), 3);
        let (prec, skb) = pq.mdeq(0b1111).unwrap();
        assert_eq!((prec, skb.data()[0]), (3, 3));
        let (prec, skb) = pq.mdeq(0b1111).unwrap();
        assert_eq!((prec, skb.data()[0]), (1, 1));
        assert_eq!(pq.pdeq(1).unwrap().data()[0], 2);
        assert!(pq.mdeq(0b1111).is_none());
    }

    #[test]
    fn pktq_full_rejects() {
        let mut pq = PktQ::new(2, 2);
        pq.penq(0, pkt(0)).unwrap();
        pq.penq(0, pkt(1)).unwrap();
        assert!(pq.penq(0, pkt(2)).is_err());
        assert_eq!(pq.len(), 2);
    }

    #[test]
    fn pktq_mdeq_respects_bitmap() {
        let mut pq = PktQ::new(4, 8);
        pq.penq(0, pkt(0)).unwrap();
        pq.penq(2, pkt(2)).unwrap();
        assert!(pq.mdeq(0b0010).is_none());
        let (prec, _) = pq.mdeq(0b0001).unwrap();
        assert_eq!(prec, 0);
    }

    #[test]
    fn pktq_ordered_insert() {
        let mut pq = PktQ::new(1, 8);
        let seq = |s: &SkBuff| s.data()[0];
        let is_after = |a: &SkBuff, b: &SkBuff| {
            seq(a) != seq(b) && seq(a).wrapping_sub(seq(b)) < 0x80
        };
        pq.penq_ordered(0, pkt(10), is_after).unwrap();
        pq.penq_ordered(0, pkt(30), is_after).unwrap();
        pq.penq_ordered(0, pkt(20), is_after).unwrap();
        let order: Vec<u8> = core::iter::from_fn(|| pq.pdeq(0))
            .map(|s| s.data()[0])
            .collect();
        assert_eq!(order, [10, 20, 30]);
    }

    #[test]
    fn pktq_pflush_predicate() {
        let mut pq = PktQ::new(2, 8);
        pq.penq(0, pkt(1)).unwrap();
        pq.penq(1, pkt(2)).unwrap();
        pq.penq(1, pkt(3)).unwrap();
        let gone = pq.pflush(|s| s.data()[0] != 2);
        assert_eq!(gone.len(), 2);
        assert_eq!(pq.len(), 1);
        assert_eq!(pq.pdeq(1).unwrap().data()[0], 2);
    }
}
