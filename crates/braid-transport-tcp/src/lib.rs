#![doc = r#"
# braid-transport-tcp

## 设计动机（Why）
- **定位**：该 crate 提供阻塞模型下的最小 TCP 通道实现，封装建连、监听、
  读写与半关闭等底层细节。
- **架构角色**：作为传输实现层的基础积木，对接 `braid-core` 的上下文与
  错误契约，同时充当 TLS 包装通道的底层原始传输。
- **设计理念**：所有网络操作均感知
  [`CallContext`](braid_core::contract::CallContext) 的取消与截止约束，
  并在失败时映射为结构化的 [`CoreError`](braid_core::error::CoreError)。

## 核心契约（What）
- **输出保障**：读取结果以
  [`ReadOutcome`](braid_core::transport::ReadOutcome) 区分“读到数据 /
  暂无数据 / 流结束”，写入返回实际接受的字节数；
- **错误语义**：出错时附带 `braid.transport.tcp.*` 稳定错误码及
  [`ErrorCategory`](braid_core::error::ErrorCategory)。

## 实现策略（How）
- **阻塞执行**：完全依赖标准库的 `TcpStream`/`TcpListener`，不引入运行时；
- **超时映射**：将 `Deadline` 换算为套接字读写超时，让阻塞调用在截止点
  附近自行返回；
- **选项治理**：keepalive 等高级套接字选项经由 `socket2` 配置。

## 风险与考量（Trade-offs）
- **超时精度**：依赖操作系统套接字超时，毫秒级以下的截止点不保证精确；
- **接受循环**：`accept` 阻塞期间不响应取消，需要可中断语义时由调用方
  关闭监听套接字。
"#]

mod channel;
mod error;
mod listener;

pub use channel::{ShutdownDirection, TcpChannel};
pub use error::codes;
pub use listener::TcpListener;
