//! SkBuff — 对应 Linux `struct sk_buff` 的包缓冲
//!
//! 布局：`[ headroom | data (len) | tailroom ]`，与 `skb->data`、`skb_put`、`skb_pull`、
//! `skb_push`、`skb_trim` 语义一致。另附每包 workspace（对应 `skb->cb`），供上层协议
//! （BCDC 头、fws 信令）在不额外分配的前提下寄存状态。

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

/// 包生命周期状态（对应 fwsignal.c `enum brcmf_fws_skb_state`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PktState {
    /// 新提交，尚未入延迟队列
    New = 0,
    /// 已入目的描述符延迟子队列
    Delayed = 1,
    /// 被固件抑制后重新排队
    Suppressed = 2,
}

/// 每包 workspace（对应 Linux `skb->cb` 中的 `struct brcmf_skbuff_cb`）。
///
/// 字段为上层协议的寄存区；`mac` 为目的描述符的**下标关系**而非指针，
/// 描述符被固件重定位（句柄重分配）后依然按下标查得最新状态。
#[derive(Debug, Clone)]
pub struct PktWorkspace {
    /// 目的接口下标
    pub ifidx: u8,
    /// 802.1d 优先级（对应 skb->priority，fws 据此映射 FIFO）
    pub priority: u8,
    /// 生命周期状态
    pub state: PktState,
    /// host-to-device 32 位包标签（generation/flags/fifo/hslot/freerun）
    pub htod: u32,
    /// host-to-device 16 位序列标签（fromfw/fromdrv/seq）
    pub htod_seq: u16,
    /// 固件点名请求（MAC_REQUEST_CREDIT/PACKET）发出的包
    pub requested: bool,
    /// 本包消耗的是固件点名下发的 credit
    pub requested_credit: bool,
    /// 目的 MAC 描述符在表中的下标（非拥有关系）
    pub mac: Option<u16>,
    /// host-reorder-rxpkts 信令寄存的重排序元数据（10 字节）
    pub reorder: Option<[u8; 10]>,
}

impl Default for PktWorkspace {
    fn default() -> Self {
        Self {
            ifidx: 0,
            priority: 0,
            state: PktState::New,
            htod: 0,
            htod_seq: 0,
            requested: false,
            requested_credit: false,
            mac: None,
            reorder: None,
        }
    }
}

/// 单包缓冲，与 `struct sk_buff` 语义对齐。
///
/// - `data`：当前有效载荷起始（head 之后）
/// - `put(n)`：在尾部追加 n 字节（tailroom 减少）；对应 `skb_put`
/// - `pull(n)`：从头部消费 n 字节（data 前移，len 减少）；对应 `skb_pull`
/// - `push(n)`：在 data 前扩展 n 字节（headroom 减少，len 增加）；对应 `skb_push`
/// - `trim(n)`：截短到 n 字节；对应 `skb_trim`
#[derive(Clone, Debug)]
pub struct SkBuff {
    /// 整块存储：[0..head] = headroom, [head..head+len] = data, [head+len..] = tailroom
    storage: Vec<u8>,
    /// data 区在 storage 中的起始下标
    head: usize,
    /// 当前有效 data 长度
    len: usize,
    /// 每包 workspace（对应 skb->cb）
    pub ws: PktWorkspace,
}

impl SkBuff {
    /// 分配指定总容量的缓冲；初始 data 长度 0。对应 `dev_alloc_skb(size)`。
    pub fn alloc(capacity: usize) -> Self {
        Self::alloc_with_headroom(capacity, 0)
    }

    /// 分配容量并在前端预留 headroom 字节。
    pub fn alloc_with_headroom(capacity: usize, headroom: usize) -> Self {
        let head = headroom.min(capacity);
        let mut storage = Vec::with_capacity(capacity);
        storage.resize(capacity, 0);
        SkBuff {
            storage,
            head,
            len: 0,
            ws: PktWorkspace::default(),
        }
    }

    /// 由载荷切片构造，前端预留 headroom（供 BCDC 头 + 信令区 push）。
    pub fn from_slice(payload: &[u8], headroom: usize) -> Self {
        let mut skb = Self::alloc_with_headroom(headroom + payload.len(), headroom);
        if let Some(dst) = skb.put(payload.len()) {
            dst.copy_from_slice(payload);
        }
        skb
    }

    /// 当前有效载荷（data 区）只读视图。
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.storage[self.head..self.head + self.len]
    }

    /// 当前有效载荷可写视图。
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..self.head + self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// headroom 字节数（data 前的空间）。
    #[inline]
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// tailroom 字节数（data 后的空间）。
    #[inline]
    pub fn tailroom(&self) -> usize {
        self.storage.len().saturating_sub(self.head + self.len)
    }

    /// 在尾部追加 n 字节，返回可写切片；空间不足则返回 None。对应 `skb_put(skb, n)`。
    #[inline]
    pub fn put(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.tailroom() < n {
            return None;
        }
        let start = self.head + self.len;
        self.len += n;
        Some(&mut self.storage[start..start + n])
    }

    /// 从 data 头部消费 n 字节。对应 `skb_pull(skb, n)`。
    #[inline]
    pub fn pull(&mut self, n: usize) {
        let consume = n.min(self.len);
        self.head += consume;
        self.len -= consume;
    }

    /// 在 data 前扩展 n 字节，返回是否成功（headroom 不足时失败）。对应 `skb_push(skb, n)`。
    #[inline]
    pub fn push(&mut self, n: usize) -> bool {
        if self.head < n {
            return false;
        }
        self.head -= n;
        self.len += n;
        true
    }

    /// 截短 data 到 n 字节（n 不小于当前长度时无动作）。对应 `skb_trim(skb, n)`。
    #[inline]
    pub fn trim(&mut self, n: usize) {
        if n < self.len {
            self.len = n;
        }
    }

    /// 确保 data 前至少有 n 字节 headroom，不足时整体搬移扩容。
    pub fn reserve(&mut self, n: usize) {
        if n <= self.head {
            return;
        }
        let need = n - self.head;
        let new_cap = self.storage.len() + need;
        let mut new_storage = Vec::with_capacity(new_cap);
        new_storage.resize(need, 0);
        new_storage.extend_from_slice(&self.storage[..]);
        self.storage = new_storage;
        self.head += need;
    }
}

impl Deref for SkBuff {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl DerefMut for SkBuff {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skb_put_pull_push() {
        let mut skb = SkBuff::alloc_with_headroom(64, 8);
        assert_eq!(skb.headroom(), 8);
        let p = skb.put(4).unwrap();
        p.copy_from_slice(&[1, 2, 3, 4]);
        assert!(skb.push(2));
        assert_eq!(skb.len(), 6);
        assert_eq!(skb.headroom(), 6);
        skb.pull(2);
        assert_eq!(skb.data(), &[1, 2, 3, 4]);
        skb.trim(2);
        assert_eq!(skb.data(), &[1, 2]);
    }

    #[test]
    fn skb_from_slice_keeps_headroom() {
        let skb = SkBuff::from_slice(&[0xaa; 10], 16);
        assert_eq!(skb.headroom(), 16);
        assert_eq!(skb.len(), 10);
        assert_eq!(skb.data(), &[0xaa; 10]);
    }

    #[test]
    fn skb_push_without_headroom_fails() {
        let mut skb = SkBuff::from_slice(&[1, 2, 3], 0);
        assert!(!skb.push(4));
        assert_eq!(skb.len(), 3);
    }
}
