//! 固件带内信令 TLV 编解码
//!
//! 对应 brcmfmac fwsignal.c 的 `enum brcmf_fws_tlv_type` / `BRCMF_FWS_TYPE_*_LEN`
//! 与 `brcmf_fws_hdrpush` 的信令区组装。记录格式 `{type:1, length:1, value:length}`，
//! FILLER（255）为单字节填充，无 length/value。
//!
//! 解码只做记录切分与长度校验（`TlvReader`），状态落地由 fwsignal 的分发完成；
//! 声明长度小于类型最小长度、或越出信令区的记录，使整个信令区按畸形丢弃。

/// TLV 类型（对应 `enum brcmf_fws_tlv_type`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FwsTlvType {
    MacOpen = 1,
    MacClose = 2,
    MacRequestCredit = 3,
    TxStatus = 4,
    PktTag = 5,
    MacDescAdd = 6,
    MacDescDel = 7,
    Rssi = 8,
    InterfaceOpen = 9,
    InterfaceClose = 10,
    FifoCreditBack = 11,
    PendingTrafficBmp = 12,
    MacRequestPacket = 13,
    HostReorderRxPkts = 14,
    TransId = 18,
    CompTxStatus = 19,
    Filler = 255,
}

impl FwsTlvType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::MacOpen,
            2 => Self::MacClose,
            3 => Self::MacRequestCredit,
            4 => Self::TxStatus,
            5 => Self::PktTag,
            6 => Self::MacDescAdd,
            7 => Self::MacDescDel,
            8 => Self::Rssi,
            9 => Self::InterfaceOpen,
            10 => Self::InterfaceClose,
            11 => Self::FifoCreditBack,
            12 => Self::PendingTrafficBmp,
            13 => Self::MacRequestPacket,
            14 => Self::HostReorderRxPkts,
            18 => Self::TransId,
            19 => Self::CompTxStatus,
            255 => Self::Filler,
            _ => return None,
        })
    }

    /// 各类型固定最小长度（对应 `BRCMF_FWS_TYPE_*_LEN` 表，非运行时解析）。
    pub const fn min_len(self) -> usize {
        match self {
            Self::MacOpen | Self::MacClose => 1,
            Self::MacRequestCredit => 2,
            Self::TxStatus | Self::PktTag => 4,
            Self::MacDescAdd | Self::MacDescDel => 8,
            Self::Rssi => 1,
            Self::InterfaceOpen | Self::InterfaceClose => 1,
            Self::FifoCreditBack => 6,
            Self::PendingTrafficBmp => 2,
            Self::MacRequestPacket => 3,
            Self::HostReorderRxPkts => 10,
            Self::TransId => 6,
            // 表上最小 1，实际长度由 txstatus 分发自行校验
            Self::CompTxStatus => 1,
            Self::Filler => 0,
        }
    }
}

/// PKTTAG/TXSTATUS 的 seq 扩展长度（对应 BRCMF_FWS_TYPE_SEQ_LEN）
pub const FWS_TYPE_SEQ_LEN: usize = 2;

/// 解码失败类别（计入不同统计项）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvErr {
    /// 未知 type 值
    InvalidType,
    /// 声明长度小于最小长度或越出信令区
    Malformed,
}

/// 信令区记录游标。`next()` 返回 `(type, value)`；畸形记录返回 `Err`，
/// 调用方应丢弃剩余信令区（载荷照常投递）。
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        TlvReader { buf, pos: 0 }
    }

    pub fn next(&mut self) -> Result<Option<(FwsTlvType, &'a [u8])>, TlvErr> {
        loop {
            if self.pos >= self.buf.len() {
                return Ok(None);
            }
            let t = self.buf[self.pos];
            if t == FwsTlvType::Filler as u8 {
                // 单字节填充，无 length/value
                self.pos += 1;
                continue;
            }
            let Some(ty) = FwsTlvType::from_u8(t) else {
                log::debug!(target: "wireless::fws", "tlv: unknown type {}", t);
                return Err(TlvErr::InvalidType);
            };
            if self.pos + 2 > self.buf.len() {
                return Err(TlvErr::Malformed);
            }
            let len = self.buf[self.pos + 1] as usize;
            if len < ty.min_len() || self.pos + 2 + len > self.buf.len() {
                log::debug!(
                    target: "wireless::fws",
                    "tlv: bad length {} for type {:?} (rem {})",
                    len, ty, self.buf.len() - self.pos
                );
                return Err(TlvErr::Malformed);
            }
            let value = &self.buf[self.pos + 2..self.pos + 2 + len];
            self.pos += 2 + len;
            return Ok(Some((ty, value)));
        }
    }
}

/// 发送侧信令区组装（对应 `brcmf_fws_hdrpush` 的 TLV 排布）。
///
/// 始终先发 PKTTAG 记录（seq 复用启用时附 2 字节 seq 扩展），其后可选
/// PENDING_TRAFFIC_BMP 记录，最后以 FILLER 补齐到 4 字节对齐。
/// 返回组装后的总长度（4 的倍数）。
pub fn build_signal_area(
    out: &mut [u8],
    htod: u32,
    htod_seq: Option<u16>,
    tim: Option<(u8, u8)>,
) -> usize {
    let tag_len = 4 + if htod_seq.is_some() { FWS_TYPE_SEQ_LEN } else { 0 };
    let mut n = 0;
    out[n] = FwsTlvType::PktTag as u8;
    out[n + 1] = tag_len as u8;
    out[n + 2..n + 6].copy_from_slice(&htod.to_le_bytes());
    n += 6;
    if let Some(seq) = htod_seq {
        out[n..n + 2].copy_from_slice(&seq.to_le_bytes());
        n += 2;
    }
    if let Some((mac_handle, bmp)) = tim {
        out[n] = FwsTlvType::PendingTrafficBmp as u8;
        out[n + 1] = 2;
        out[n + 2] = mac_handle;
        out[n + 3] = bmp;
        n += 4;
    }
    while n % 4 != 0 {
        out[n] = FwsTlvType::Filler as u8;
        n += 1;
    }
    n
}

/// `build_signal_area` 所需的最大缓冲（tag 6 + tim 4 + 对齐 3）
pub const SIGNAL_AREA_MAX: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_reader_skips_fillers() {
        // MAC_OPEN(handle=7)、两个 FILLER、RSSI(-40)
        let buf = [1u8, 1, 7, 255, 255, 8, 1, 0xd8];
        let mut rd = TlvReader::new(&buf);
        let (t, v) = rd.next().unwrap().unwrap();
        assert_eq!((t, v), (FwsTlvType::MacOpen, &[7u8][..]));
        let (t, v) = rd.next().unwrap().unwrap();
        assert_eq!((t, v), (FwsTlvType::Rssi, &[0xd8u8][..]));
        assert!(rd.next().unwrap().is_none());
    }

    #[test]
    fn tlv_reader_rejects_undersized_record() {
        // MAC_REQUEST_CREDIT 最小长度 2，这里声明 1
        let buf = [3u8, 1, 5];
        let mut rd = TlvReader::new(&buf);
        assert!(rd.next().is_err());
    }

    #[test]
    fn tlv_reader_rejects_overrun() {
        // TXSTATUS 声明 4 字节但只剩 2
        let buf = [4u8, 4, 0xaa, 0xbb];
        let mut rd = TlvReader::new(&buf);
        assert!(rd.next().is_err());
    }

    #[test]
    fn signal_area_alignment_and_layout() {
        let mut buf = [0u8; SIGNAL_AREA_MAX];
        let n = build_signal_area(&mut buf, 0x0102_0304, None, None);
        assert_eq!(n, 8); // 6 + 2 filler
        assert_eq!(buf[0], FwsTlvType::PktTag as u8);
        assert_eq!(buf[1], 4);
        assert_eq!(&buf[2..6], &0x0102_0304u32.to_le_bytes());
        assert_eq!(buf[6], 255);
        assert_eq!(buf[7], 255);

        let n = build_signal_area(&mut buf, 1, Some(0x1234), Some((9, 0b0101)));
        assert_eq!(n, 12); // 8 + 4，已对齐
        assert_eq!(buf[1], 6);
        assert_eq!(&buf[6..8], &0x1234u16.to_le_bytes());
        assert_eq!(buf[8], FwsTlvType::PendingTrafficBmp as u8);
        assert_eq!(buf[10], 9);
        assert_eq!(buf[11], 0b0101);
    }
}
