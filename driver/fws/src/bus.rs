//! 总线下行接口
//!
//! 对应 brcmfmac `brcmf_bus_ops` 中 fws 用到的最小面：数据发送 + 平台时钟 + 发送终结回调。
//! 与 BSP 侧把平台服务收敛到 ops trait 的做法一致；SDIO/USB/PCIe 字节泵本身不在本层。

use axerrno::AxResult;
use skb::SkBuff;

/// fws 对总线/平台的下行调用面。
///
/// - `txdata`：把一帧完整字节（BCDC 头 + 信令区 + 载荷）交给总线，对应 `brcmf_bus_txdata`。
///   背压不用阻塞表达：总线经 `FwsManager::bus_blocked` 翻转标志，出队循环轮询该标志。
/// - `now_ms`：平台单调毫秒时钟（对应 jiffies），仅 credit 借用的 100ms 退避窗口使用。
/// - `tx_finalize`：包生命周期终结（对应 `brcmf_txfinalize`），success 表示固件侧完成
///   而非丢弃；引擎保证在**不持内部锁**时调用。
pub trait FwsBus {
    /// 发送一帧到总线，返回写入长度。对应 `brcmf_bus_txdata`。
    fn txdata(&self, buf: &[u8]) -> AxResult<usize>;

    /// 单调毫秒时钟。
    fn now_ms(&self) -> u64;

    /// 发送终结：包离开引擎（成功完成或失败丢弃）。
    fn tx_finalize(&self, skb: SkBuff, success: bool);
}
