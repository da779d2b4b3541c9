#![doc = r#"
# braid-core

## 设计动机（Why）
- **定位**：该 crate 定义 Braid 各传输实现共享的最小契约：结构化错误域、
  取消/截止上下文与阻塞式字节通道接口。
- **架构角色**：作为契约层，它不依赖任何具体传输或加密库；`braid-transport-tcp`
  与 `braid-transport-tls` 都以这里的类型作为公共边界。
- **设计理念**：强调“上下文传递”与“错误分类”——所有阻塞操作均感知
  [`CallContext`](contract::CallContext) 的取消与截止约束，并在失败时映射为
  携带稳定错误码的 [`CoreError`](error::CoreError)。

## 核心契约（What）
- [`error::CoreError`]：稳定错误码 + 分类 + 根因链路；
- [`contract::CallContext`]：取消与截止二元组的不可变载体；
- [`transport::ByteChannel`]：读/写/关闭/存活查询的字节通道契约，
  [`transport::ReadOutcome`] 区分“读到数据 / 暂无数据 / 流已结束”。

## 风险与考量（Trade-offs）
- **阻塞模型**：契约假定调用线程直接阻塞在传输 I/O 上，不引入任务调度；
  取消因此是协作式的，需要实现方在阻塞点设置检查与套接字超时。
- **演进空间**：错误分类与读取结果均标记 `#[non_exhaustive]` 或保持最小
  字段集，后续扩展不破坏既有匹配。
"#]

pub mod contract;
pub mod error;
pub mod transport;

pub mod prelude {
    //! 常用契约类型的统一出口，减少下游 use 列表的样板。
    pub use crate::contract::{CallContext, Cancellation, Deadline};
    pub use crate::error::{CoreError, ErrorCategory};
    pub use crate::transport::{ByteChannel, ReadOutcome};
}

pub use contract::{CallContext, Cancellation, Deadline};
pub use error::{CoreError, ErrorCategory};
pub use transport::{ByteChannel, ReadOutcome};
