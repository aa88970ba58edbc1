//! BCDC 线头（4 字节）压入/剥离
//!
//! 对应 brcmfmac bcdc.c `struct brcmf_proto_bcdc_header` 与
//! `brcmf_proto_bcdc_hdrpush / brcmf_proto_bcdc_hdrpull`：
//! `[ flags | priority | flags2 | data_offset ]`
//! - flags 高 4 位协议版本（2），0x08 = 需要校验和，0x04 = 校验和正确
//! - priority 低 3 位为 802.1d 优先级
//! - flags2 低 4 位为目的接口下标
//! - data_offset 为信令区长度，单位 4 字节
//!
//! 位布局用显式掩码/移位写出，不用位域结构，保证线上格式与实现端序无关。

use axerrno::{ax_err, AxResult};
use skb::SkBuff;

/// BCDC 头长度
pub const BCDC_HEADER_LEN: usize = 4;

/// 协议版本（对应 BCDC_PROTO_VER）
pub const BCDC_PROTO_VER: u8 = 2;

pub const BCDC_FLAG_VER_MASK: u8 = 0xf0;
pub const BCDC_FLAG_VER_SHIFT: u8 = 4;
/// 设备需为本帧计算校验和
pub const BCDC_FLAG_SUM_NEEDED: u8 = 0x08;
/// 设备已验证校验和
pub const BCDC_FLAG_SUM_GOOD: u8 = 0x04;

pub const BCDC_PRIORITY_MASK: u8 = 0x07;
pub const BCDC_FLAG2_IF_MASK: u8 = 0x0f;

/// hdrpull 的解析结果
#[derive(Debug, Clone, Copy)]
pub struct BcdcInfo {
    /// 目的接口下标（flags2 低 4 位）
    pub ifidx: u8,
    /// 802.1d 优先级
    pub priority: u8,
    /// 设备已验证校验和
    pub sum_good: bool,
    /// 信令区字节长度（data_offset * 4），由调用方交给 fws 解码后剥离
    pub siglen: usize,
}

/// 压入 4 字节 BCDC 头。对应 `brcmf_proto_bcdc_hdrpush`。
/// `data_offset_words` 为已压入的信令区长度（4 字节单位）；优先级取自包 workspace。
pub fn hdrpush(skb: &mut SkBuff, ifidx: u8, data_offset_words: u8, sum_needed: bool) -> AxResult {
    skb.reserve(BCDC_HEADER_LEN);
    if !skb.push(BCDC_HEADER_LEN) {
        return ax_err!(NoMemory, "bcdc hdrpush: no headroom");
    }
    let priority = skb.ws.priority & BCDC_PRIORITY_MASK;
    let h = skb.data_mut();
    h[0] = (BCDC_PROTO_VER << BCDC_FLAG_VER_SHIFT)
        | if sum_needed { BCDC_FLAG_SUM_NEEDED } else { 0 };
    h[1] = priority;
    h[2] = ifidx & BCDC_FLAG2_IF_MASK;
    h[3] = data_offset_words;
    Ok(())
}

/// 剥离 4 字节 BCDC 头并回填包 workspace（ifidx/priority）。
/// 对应 `brcmf_proto_bcdc_hdrpull`；版本不符或长度不足为完整性错误。
/// 信令区（`siglen` 字节）由调用方解码后自行 `pull`。
pub fn hdrpull(skb: &mut SkBuff) -> AxResult<BcdcInfo> {
    if skb.len() < BCDC_HEADER_LEN {
        log::warn!(target: "wireless::fws", "bcdc hdrpull: frame too short ({})", skb.len());
        return ax_err!(InvalidData, "bcdc: short frame");
    }
    let h = skb.data();
    let ver = (h[0] & BCDC_FLAG_VER_MASK) >> BCDC_FLAG_VER_SHIFT;
    if ver != BCDC_PROTO_VER {
        log::warn!(target: "wireless::fws", "bcdc hdrpull: bad version {}", ver);
        return ax_err!(InvalidData, "bcdc: protocol version mismatch");
    }
    let info = BcdcInfo {
        ifidx: h[2] & BCDC_FLAG2_IF_MASK,
        priority: h[1] & BCDC_PRIORITY_MASK,
        sum_good: h[0] & BCDC_FLAG_SUM_GOOD != 0,
        siglen: (h[3] as usize) * 4,
    };
    skb.pull(BCDC_HEADER_LEN);
    skb.ws.ifidx = info.ifidx;
    skb.ws.priority = info.priority;
    Ok(info)
}
