use std::borrow::Cow;
use std::error::Error;
use std::fmt;

/// `CoreError` 表示跨 crate 共享的稳定错误域，是所有可观察错误的最终形态。
///
/// # 设计背景（Why）
/// - 传输实现层、TLS 适配层与上层调用方在不同层次产生的故障需要合流为统一的
///   错误码，以便日志与告警系统能够执行精确的自动化治理。
/// - 模块内部的叶子错误（IO、证书解析等）通过 `cause` 保留根因链路，避免在
///   封装过程中丢失排障信息。
///
/// # 契约说明（What）
/// - `code`：`'static` 字符串，遵循 `<域>.<语义>` 约定（如
///   `braid.tls.handshake`），承载稳定语义；
/// - `message`：面向排障人员的自然语言描述，避免包含敏感信息；
/// - `cause`：可选底层原因，经由 [`Error::source`] 暴露完整链路；
/// - `category`：结构化分类，驱动重试/关闭等自动化策略。
///
/// # 设计取舍（Trade-offs）
/// - 采用 `Cow<'static, str>` 保存消息，静态文案零分配，动态描述按需堆分配；
/// - 分类信息默认缺省为 [`ErrorCategory::NonRetryable`]，调用方需在构造处
///   显式标注可重试语义，避免误触发自动重试。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    category: Option<ErrorCategory>,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl CoreError {
    /// 构造核心错误。
    ///
    /// # 契约说明（What）
    /// - **输入**：`code` 必须为已备案的稳定错误码；`message` 可为静态或动态
    ///   字符串；
    /// - **后置条件**：返回值拥有独立所有权，可跨线程传递（`Send + Sync`），
    ///   分类与根因均未设置，按需通过 `with_*` 方法补充。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category: None,
            cause: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 为错误标记结构化分类信息。
    ///
    /// 分类应与错误码语义保持一致，不可将协议违规标记为 `Retryable`。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取结构化分类；未显式设置时回退为 [`ErrorCategory::NonRetryable`]。
    pub fn category(&self) -> ErrorCategory {
        self.category.unwrap_or(ErrorCategory::NonRetryable)
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

/// 错误分类枚举，驱动自动化容错策略。
///
/// # 设计背景（Why）
/// - 统一表达“可重试”“协议违规”“安全违规”等关键信号，避免上层解析字符串；
/// - 传输层在收到 `ProtocolViolation` 时应立即走关闭流程，收到 `Retryable`
///   时可在退避后重试。
///
/// # 契约说明（What）
/// - `Retryable`：瞬时故障，重试可能成功；
/// - `NonRetryable`：确定性失败，重试无意义；
/// - `Security`：证书、握手或身份校验违规；
/// - `ProtocolViolation`：对端行为违反协议，连接必须关闭；
/// - `ResourceExhausted`：缓冲区或配额耗尽；
/// - `Cancelled` / `Timeout`：上下文取消或截止触发。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable,
    NonRetryable,
    Security,
    ProtocolViolation,
    ResourceExhausted,
    Cancelled,
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct LeafError;

    impl fmt::Display for LeafError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "leaf")
        }
    }

    impl Error for LeafError {}

    #[test]
    fn display_carries_code_and_message() {
        let err = CoreError::new("braid.test.sample", "sample failure");
        assert_eq!(format!("{err}"), "[braid.test.sample] sample failure");
    }

    #[test]
    fn category_defaults_to_non_retryable() {
        let err = CoreError::new("braid.test.sample", "sample failure");
        assert_eq!(err.category(), ErrorCategory::NonRetryable);
        let err = err.with_category(ErrorCategory::Timeout);
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn cause_is_exposed_through_source() {
        let err = CoreError::new("braid.test.sample", "sample failure").with_cause(LeafError);
        assert!(err.source().is_some());
        assert_eq!(format!("{}", err.cause().expect("cause")), "leaf");
    }
}
