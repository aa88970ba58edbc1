//! fws — 固件信令与流控层
//!
//! 对应 brcmfmac 的 bcdc.c / fwsignal.c 移植：
//! - bcdc: 4 字节线头压入/剥离
//! - tlv: 带内信令记录编解码
//! - hanger: 在途包槽位表
//! - macdesc: 每端点描述符与延迟/抑制队列
//! - fwsignal: 信用引擎、轮转出队调度、txstatus 回收
//! - reorder: AMPDU 接收重排序窗口
//!
//! 总线/平台服务经 `FwsBus` trait 注入，本层不含 SDIO/USB 字节泵。

#![no_std]

extern crate alloc;

pub mod bcdc;
pub mod bus;
pub mod fwsignal;
pub mod hanger;
pub mod macdesc;
pub mod reorder;
pub mod tlv;

pub use bus::FwsBus;
pub use fwsignal::{
    FcMode, FwsConfig, FwsManager, FwsStats, TxStatusFlag, FWS_FIFO_AC_BE, FWS_FIFO_AC_BK,
    FWS_FIFO_AC_VI, FWS_FIFO_AC_VO, FWS_FIFO_BCMC, FWS_FIFO_COUNT, FWS_PRIO2FIFO,
};
pub use reorder::{ReorderStats, RxReorder};
