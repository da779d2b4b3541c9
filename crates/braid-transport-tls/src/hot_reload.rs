use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::{ClientConfig, ServerConfig};

/// 一份完整的 TLS 上下文快照：同一套密钥/信任材料派生出的客户端与
/// 服务端配置。
///
/// # 契约说明（What）
/// - 工厂按连接模式从快照中取用对应配置；
/// - 快照一经构建不可变，引用计数共享，旧连接持有旧快照继续有效。
pub struct TlsContext {
    /// 客户端模式使用的配置。
    pub client: Arc<ClientConfig>,
    /// 服务端模式使用的配置。
    pub server: Arc<ServerConfig>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

/// TLS 上下文的热更新容器。
///
/// # 设计动机（Why）
/// - **零中断目标**：证书轮换不应打断监听循环或既有连接，封装
///   `ArcSwap<TlsContext>` 以“读无锁、写常数时间”的方式广播新配置；
/// - **架构角色**：位于通道工厂与证书管理流程之间，向每次建连提供
///   “随取随用”的上下文快照。
///
/// # 核心契约（What）
/// - `snapshot`：获取当前快照，之后的热更不影响该快照；
/// - `replace`：原子替换快照并返回旧值，便于审计或回收；
/// - **后置条件**：`replace` 对后续 `snapshot` 调用立即可见，新旧连接
///   互不影响。
///
/// # 风险提示（Trade-offs & Gotchas）
/// - 高频更新会暂存多个快照副本，需结合建连并发度评估内存峰值；
/// - 容器只负责广播配置，不校验新材料的有效性，装载校验在工厂完成。
#[derive(Clone)]
pub struct TlsContextSlot {
    inner: Arc<ArcSwap<TlsContext>>,
}

impl TlsContextSlot {
    /// 基于已有的 `Arc<TlsContext>` 构造热更容器。
    pub fn new(initial: Arc<TlsContext>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(initial)),
        }
    }

    /// 以值语义构造热更容器。
    #[inline]
    pub fn from_context(initial: TlsContext) -> Self {
        Self::new(Arc::new(initial))
    }

    /// 获取当前上下文的共享快照。
    #[inline]
    pub fn snapshot(&self) -> Arc<TlsContext> {
        self.inner.load_full()
    }

    /// 用新的上下文替换当前快照，并返回旧值。
    #[inline]
    pub fn replace(&self, next: Arc<TlsContext>) -> Arc<TlsContext> {
        self.inner.swap(next)
    }
}

impl fmt::Debug for TlsContextSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContextSlot").finish_non_exhaustive()
    }
}
