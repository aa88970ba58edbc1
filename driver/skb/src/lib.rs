//! skb — 包缓冲与优先级队列集合
//!
//! 对应 Linux `struct sk_buff` / brcmu_utils `struct pktq` 的 Rust 化：
//! - SkBuff：headroom/data/tailroom 可调的单包缓冲，附带每包 workspace（对应 skb->cb）
//! - PktQ：按 precedence 下标的固定多队列集合（对应 brcmu_pktq_*）

#![no_std]

extern crate alloc;

mod pktq;
mod skbuff;

pub use pktq::{PktQ, PKTQ_LEN_DEFAULT};
pub use skbuff::{PktState, PktWorkspace, SkBuff};
