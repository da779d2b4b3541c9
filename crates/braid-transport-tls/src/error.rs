use braid_core::error::{CoreError, ErrorCategory};

use crate::engine::EngineStatus;

/// TLS 适配层操作的语义标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OperationKind {
    Handshake,
    Read,
    Write,
    Close,
}

impl OperationKind {
    fn describe(self) -> &'static str {
        match self {
            OperationKind::Handshake => "TLS 握手",
            OperationKind::Read => "TLS 读取",
            OperationKind::Write => "TLS 写入",
            OperationKind::Close => "TLS 关闭",
        }
    }
}

pub(crate) const HANDSHAKE: OperationKind = OperationKind::Handshake;
pub(crate) const READ: OperationKind = OperationKind::Read;
pub(crate) const WRITE: OperationKind = OperationKind::Write;
pub(crate) const CLOSE: OperationKind = OperationKind::Close;

/// 稳定错误码清单。
///
/// 分层语义：`handshake`/`protocol` 为致命故障，通道随后只能关闭；
/// `provisioning` 在工厂初始化阶段出现即视为启动失败；`wrap` 是单条连接
/// 的可恢复故障，不影响工厂继续服务其他连接。
pub mod codes {
    /// 握手期间引擎给出意外状态、传输中断或委托任务失败。
    pub const HANDSHAKE: &str = "braid.tls.handshake";
    /// 握手超出调用上下文的截止时间。
    pub const HANDSHAKE_TIMEOUT: &str = "braid.tls.handshake_timeout";
    /// 稳态读写超出调用上下文的截止时间。
    pub const TIMEOUT: &str = "braid.tls.timeout";
    /// 调用上下文被取消。
    pub const CANCELLED: &str = "braid.tls.cancelled";
    /// 稳态读写期间引擎给出意外状态。
    pub const PROTOCOL: &str = "braid.tls.protocol";
    /// 通道已进入关闭流程，拒绝继续写入。
    pub const CHANNEL_CLOSED: &str = "braid.tls.channel_closed";
    /// 读取目标缓冲区小于协商出的明文上限且本次没有任何产出。
    pub const UNDERSIZED_READ_BUFFER: &str = "braid.tls.undersized_read_buffer";
    /// 密钥/信任材料装载或上下文构建失败。
    pub const PROVISIONING: &str = "braid.tls.provisioning";
    /// 单条连接的 TLS 包装失败。
    pub const WRAP: &str = "braid.tls.wrap";
}

/// 握手阶段的致命错误。
pub(crate) fn handshake_error(message: &'static str) -> CoreError {
    CoreError::new(codes::HANDSHAKE, message).with_category(ErrorCategory::Security)
}

/// 握手阶段的致命错误，附带根因。
pub(crate) fn handshake_error_with_cause(
    message: &'static str,
    cause: impl std::error::Error + Send + Sync + 'static,
) -> CoreError {
    handshake_error(message).with_cause(cause)
}

/// 握手期间引擎返回了预期之外的状态。
pub(crate) fn handshake_status_error(action: &'static str, status: EngineStatus) -> CoreError {
    CoreError::new(
        codes::HANDSHAKE,
        format!("握手{action}返回意外状态 {status:?}"),
    )
    .with_category(ErrorCategory::Security)
}

/// 截止时间在握手或读写期间触发。
pub(crate) fn timeout_error(kind: OperationKind) -> CoreError {
    let code = match kind {
        OperationKind::Handshake => codes::HANDSHAKE_TIMEOUT,
        _ => codes::TIMEOUT,
    };
    CoreError::new(code, kind.describe()).with_category(ErrorCategory::Timeout)
}

/// 调用上下文被取消。
pub(crate) fn cancelled_error(kind: OperationKind) -> CoreError {
    CoreError::new(codes::CANCELLED, kind.describe()).with_category(ErrorCategory::Cancelled)
}

/// 稳态读写期间引擎返回了无法继续的状态。
pub(crate) fn protocol_error(kind: OperationKind, status: EngineStatus) -> CoreError {
    CoreError::new(
        codes::PROTOCOL,
        format!("{}期间引擎返回意外状态 {status:?}", kind.describe()),
    )
    .with_category(ErrorCategory::ProtocolViolation)
}

/// 通道已关闭，拒绝继续写入。
pub(crate) fn channel_closed_error() -> CoreError {
    CoreError::new(codes::CHANNEL_CLOSED, "通道已进入关闭流程，拒绝继续写入")
        .with_category(ErrorCategory::NonRetryable)
}

/// 读取目标缓冲区不足以容纳一条记录的明文。
pub(crate) fn undersized_read_buffer_error(application_buffer: usize) -> CoreError {
    CoreError::new(
        codes::UNDERSIZED_READ_BUFFER,
        format!("读取缓冲区小于协商明文上限 {application_buffer} 字节，无法交付整条记录"),
    )
    .with_category(ErrorCategory::ResourceExhausted)
}

/// 工厂初始化阶段的材料装载/上下文构建失败。
pub(crate) fn provisioning_error(
    cause: impl std::error::Error + Send + Sync + 'static,
) -> CoreError {
    CoreError::new(codes::PROVISIONING, "TLS 密钥/信任材料装载失败")
        .with_category(ErrorCategory::Security)
        .with_cause(cause)
}

/// 单条连接的 TLS 包装失败。
pub(crate) fn wrap_error(cause: CoreError) -> CoreError {
    CoreError::new(codes::WRAP, "为连接建立 TLS 包装失败")
        .with_category(ErrorCategory::Security)
        .with_cause(cause)
}
