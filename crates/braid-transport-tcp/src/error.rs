use std::io;

use braid_core::error::{CoreError, ErrorCategory};

/// TCP 传输层操作的语义标签，用于生成稳定错误码。
///
/// # 契约说明（What）
/// - 每个变体对应一个 `braid.transport.tcp.<操作>` 错误码；
/// - 映射函数据此附加操作语境，避免调用方从消息文本反推故障位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OperationKind {
    Connect,
    Bind,
    Accept,
    Read,
    Write,
    Shutdown,
}

impl OperationKind {
    pub(crate) fn code(self) -> &'static str {
        match self {
            OperationKind::Connect => codes::CONNECT,
            OperationKind::Bind => codes::BIND,
            OperationKind::Accept => codes::ACCEPT,
            OperationKind::Read => codes::READ,
            OperationKind::Write => codes::WRITE,
            OperationKind::Shutdown => codes::SHUTDOWN,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            OperationKind::Connect => "TCP 建连失败",
            OperationKind::Bind => "TCP 绑定失败",
            OperationKind::Accept => "TCP 接受连接失败",
            OperationKind::Read => "TCP 读取失败",
            OperationKind::Write => "TCP 写入失败",
            OperationKind::Shutdown => "TCP 关闭失败",
        }
    }
}

/// 稳定错误码清单。
pub mod codes {
    pub const CONNECT: &str = "braid.transport.tcp.connect";
    pub const BIND: &str = "braid.transport.tcp.bind";
    pub const ACCEPT: &str = "braid.transport.tcp.accept";
    pub const READ: &str = "braid.transport.tcp.read";
    pub const WRITE: &str = "braid.transport.tcp.write";
    pub const SHUTDOWN: &str = "braid.transport.tcp.shutdown";
    pub const TIMEOUT: &str = "braid.transport.tcp.timeout";
    pub const CANCELLED: &str = "braid.transport.tcp.cancelled";
    pub const CLOSED: &str = "braid.transport.tcp.closed";
}

pub(crate) const CONNECT: OperationKind = OperationKind::Connect;
pub(crate) const BIND: OperationKind = OperationKind::Bind;
pub(crate) const ACCEPT: OperationKind = OperationKind::Accept;
pub(crate) const READ: OperationKind = OperationKind::Read;
pub(crate) const WRITE: OperationKind = OperationKind::Write;
pub(crate) const SHUTDOWN: OperationKind = OperationKind::Shutdown;

/// 将底层 IO 错误映射为结构化 [`CoreError`]。
///
/// 分类规则：`WouldBlock`/`TimedOut` 属于可重试的瞬时故障；其余视为
/// 不可重试，交由上层决定是否关闭连接。
pub(crate) fn map_io_error(kind: OperationKind, err: io::Error) -> CoreError {
    let category = match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    };
    CoreError::new(kind.code(), kind.describe())
        .with_category(category)
        .with_cause(err)
}

/// 截止时间触发时的统一错误。
pub(crate) fn timeout_error(kind: OperationKind) -> CoreError {
    CoreError::new(codes::TIMEOUT, kind.describe()).with_category(ErrorCategory::Timeout)
}

/// 取消触发时的统一错误。
pub(crate) fn cancelled_error(kind: OperationKind) -> CoreError {
    CoreError::new(codes::CANCELLED, kind.describe()).with_category(ErrorCategory::Cancelled)
}

/// 通道已关闭时的统一错误。
pub(crate) fn closed_error() -> CoreError {
    CoreError::new(codes::CLOSED, "通道已关闭，拒绝继续读写")
        .with_category(ErrorCategory::NonRetryable)
}
