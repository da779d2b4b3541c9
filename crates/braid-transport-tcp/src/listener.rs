use std::net::{SocketAddr, TcpListener as StdTcpListener};

use braid_core::contract::CallContext;
use braid_core::error::CoreError;
use tracing::debug;

use crate::TcpChannel;
use crate::error::{self, map_io_error};

/// 对标准库 `TcpListener` 的语义封装。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 提供“监听 → 接受连接”的最小能力，接受到的连接直接以 [`TcpChannel`]
///   的形式交付，携带完整的地址元数据；
/// - `accept` 在进入阻塞前检查 [`CallContext`] 的取消与截止标记。
///
/// ## 契约 (What)
/// - **前置条件**：`bind` 的地址需可用；
/// - **后置条件**：`accept` 成功返回的通道已准备好读写；
/// - **错误语义**：绑定/接受失败时返回携带稳定错误码的 [`CoreError`]。
///
/// ## 注意事项 (Trade-offs)
/// - `accept` 本身是阻塞调用，取消信号只在进入阻塞前检查；需要可中断的
///   接受循环时，可由调用方关闭监听套接字解除阻塞。
#[derive(Debug)]
pub struct TcpListener {
    inner: StdTcpListener,
    local_addr: SocketAddr,
}

impl TcpListener {
    /// 绑定到指定地址并返回监听器。
    pub fn bind(addr: SocketAddr) -> Result<Self, CoreError> {
        let listener = StdTcpListener::bind(addr).map_err(|err| map_io_error(error::BIND, err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        debug!(%local_addr, "TCP 监听器就绪");
        Ok(Self {
            inner: listener,
            local_addr,
        })
    }

    /// 返回监听器实际绑定的地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 接受一个入站连接。
    pub fn accept(&self, ctx: &CallContext) -> Result<(TcpChannel, SocketAddr), CoreError> {
        if ctx.deadline().is_expired() {
            return Err(error::timeout_error(error::ACCEPT));
        }
        if ctx.cancellation().is_cancelled() {
            return Err(error::cancelled_error(error::ACCEPT));
        }
        let (stream, peer_addr) = self
            .inner
            .accept()
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        let channel = TcpChannel::from_stream(stream)?;
        Ok((channel, peer_addr))
    }
}
