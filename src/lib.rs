//! wireless crate
//!
//! WLAN 主机驱动的固件信令与流控层：
//! - skb: 包缓冲与多 precedence 队列
//! - fws: BCDC 线头、带内 TLV 信令、信用引擎与出队调度、AMPDU 重排序
//!
//! 总线字节泵（SDIO/USB/PCIe）与控制平面不在本 crate，经 `fws::FwsBus`
//! trait 注入。

#![no_std]

extern crate alloc;

pub use fws;
pub use skb;

pub use fws::{FcMode, FwsConfig, FwsManager};
pub use skb::SkBuff;

/// 以默认配置（显式信用模式）创建流控引擎。
/// 固件信用图事件到达后经 `FwsManager::seed_credits` 落账。
pub fn fws_init() -> FwsManager {
    log::info!(target: "wireless", "fws: init (explicit credit mode)");
    FwsManager::new(FwsConfig::default())
}

/// 按指定模式创建流控引擎；`FcMode::None` 时出包旁路队列直发总线。
pub fn fws_init_with_mode(fcmode: FcMode) -> FwsManager {
    log::info!(target: "wireless", "fws: init (fcmode {:?})", fcmode);
    FwsManager::new(FwsConfig {
        fcmode,
        ..FwsConfig::default()
    })
}
