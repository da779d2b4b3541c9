#![doc = r#"
# braid-transport-tls

## 设计动机（Why）
- **安全入口**：在任意裸字节传输之上驱动记录式加密引擎，向调用方暴露
  与明文通道同形的读写接口——调用方不需要知道 TLS 的存在；
- **显式状态**：握手状态机、四个缓冲区域的生命周期、欠载/溢出恢复、
  部分冲刷背压与关闭握手全部显式建模，每一步都可测试；
- **可运维性**：错误按 `braid.tls.*` 稳定错误码分层（启动期材料故障、
  单连接包装故障、稳态协议故障），证书轮换通过热更容器零中断生效。

## 核心契约（What）
- [`TlsChannel`]：通道适配层；构造即同步完成握手，之后以
  [`ByteChannel`](braid_core::transport::ByteChannel) 契约读写明文；
- [`TlsEngine`]：记录式引擎契约（wrap/unwrap/阶段查询/委托任务），
  [`RustlsEngine`] 为生产实现，[`test_stubs::ScriptedEngine`] 为测试桩；
- [`ChannelFactory`]：按配置决定明文直通或 TLS 包装，按连接模式提供
  引擎实例；材料来源支持 PEM 文件与预构建配置两种。

## 实现策略（How）
- 加密与解密缓冲采用固定容量的游标对抽象 [`SessionBuffer`]，部分解码的
  残片跨调用压实保留；
- 出站单槽：上一条记录未排空前不开始新的封装，`write` 返回 `0` 即背压；
- 握手在构造线程上同步执行，尊重
  [`CallContext`](braid_core::contract::CallContext) 的截止与取消；
- 生产引擎基于 `rustls`，证书校验内联完成，委托任务队列恒空。

## 风险与考量（Trade-offs）
- 并发模型为“方向锁 + 引擎锁”的两级锁，一读一写可并行，但同方向重入
  会被串行化；
- 关闭是单向承诺：送出关闭记录后即释放传输，不等待对端回应。
"#]

mod buffer;
mod channel;
mod engine;
mod error;
mod factory;
mod hot_reload;
mod rustls_engine;
pub mod test_stubs;

pub use buffer::SessionBuffer;
pub use channel::{AdapterState, TlsChannel};
pub use engine::{
    DelegatedTask, EngineResult, EngineStatus, HandshakePhase, SessionLimits, TlsEngine,
};
pub use error::codes;
pub use factory::{
    ChannelFactory, FactoryChannel, FactorySettings, ProvisioningError, TlsIdentitySource,
    TlsSettings,
};
pub use hot_reload::{TlsContext, TlsContextSlot};
pub use rustls_engine::RustlsEngine;
