use std::io::{self, Read, Write};
use std::net::{Shutdown as StdShutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use braid_core::contract::{CallContext, Deadline};
use braid_core::error::CoreError;
use braid_core::transport::{ByteChannel, ReadOutcome};
use socket2::{SockRef, TcpKeepalive};
use tracing::trace;

use crate::error::{self, OperationKind, map_io_error};

#[derive(Debug)]
struct TcpChannelInner {
    stream: TcpStream,
    closed: AtomicBool,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

/// 阻塞式 TCP 通道，封装读写、半关闭与套接字选项。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为上层提供对单个 TCP 连接的直接控制，同时贯彻 [`CallContext`] 的
///   取消/截止语义；
/// - 作为字节通道契约的明文实现，与 TLS 包装通道在调用侧完全同形。
///
/// ## 逻辑 (How)
/// - `std::net::TcpStream` 的读写本身可通过共享引用并发执行，结构体只需
///   用原子位记录关闭状态；
/// - 读写操作前将截止时间换算为套接字超时，超时与 `WouldBlock` 统一映射为
///   “暂无数据”/“未接受字节”的流控信号而非错误；
/// - 关闭通过 `shutdown(Both)` 实现，同时会解除其他线程阻塞中的读写调用。
///
/// ## 契约 (What)
/// - `connect`：根据上下文建立到目标地址的连接；
/// - `read`：返回 [`ReadOutcome`]，明确区分“读到数据 / 暂无数据 / 流结束”；
/// - `write`：单次写入尝试，返回实际接受的字节数，`0` 表示当前不可写；
/// - `close`：幂等关闭，重复调用无害；
/// - `peer_addr`/`local_addr`：连接两端的地址元数据。
///
/// ## 注意事项 (Trade-offs)
/// - 超时粒度受操作系统套接字超时精度限制；未设置截止时间时不会修改
///   既有的套接字超时配置；
/// - `write` 只执行一次写入尝试，如需写满需上层循环调用。
#[derive(Clone, Debug)]
pub struct TcpChannel {
    inner: Arc<TcpChannelInner>,
}

impl TcpChannel {
    /// 根据上下文建立到目标地址的连接。
    pub fn connect(ctx: &CallContext, addr: SocketAddr) -> Result<Self, CoreError> {
        ensure_active(ctx, error::CONNECT)?;
        let stream = match ctx.deadline().remaining() {
            Some(remaining) if remaining.is_zero() => {
                return Err(error::timeout_error(error::CONNECT));
            }
            Some(remaining) => TcpStream::connect_timeout(&addr, remaining)
                .map_err(|err| map_io_error(error::CONNECT, err))?,
            None => {
                TcpStream::connect(addr).map_err(|err| map_io_error(error::CONNECT, err))?
            }
        };
        Self::from_stream(stream)
    }

    /// 将已建立的 `TcpStream` 包装为通道。
    pub fn from_stream(stream: TcpStream) -> Result<Self, CoreError> {
        let local_addr = stream
            .local_addr()
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        Ok(Self {
            inner: Arc::new(TcpChannelInner {
                stream,
                closed: AtomicBool::new(false),
                local_addr,
                peer_addr,
            }),
        })
    }

    /// 获取对端地址。
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// 获取本地地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// 设置读超时；`None` 表示恢复为无限阻塞。
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), CoreError> {
        self.inner
            .stream
            .set_read_timeout(timeout)
            .map_err(|err| map_io_error(error::READ, err))
    }

    /// 开关 Nagle 算法。
    pub fn set_nodelay(&self, nodelay: bool) -> Result<(), CoreError> {
        self.inner
            .stream
            .set_nodelay(nodelay)
            .map_err(|err| map_io_error(error::CONNECT, err))
    }

    /// 配置 TCP keepalive 探测间隔；`None` 表示关闭探测。
    pub fn set_keepalive(&self, interval: Option<Duration>) -> Result<(), CoreError> {
        let sock = SockRef::from(&self.inner.stream);
        match interval {
            Some(interval) => sock
                .set_tcp_keepalive(&TcpKeepalive::new().with_time(interval))
                .map_err(|err| map_io_error(error::CONNECT, err)),
            None => sock
                .set_keepalive(false)
                .map_err(|err| map_io_error(error::CONNECT, err)),
        }
    }

    /// 根据方向执行半关闭。
    pub fn shutdown(&self, direction: ShutdownDirection) -> Result<(), CoreError> {
        match self.inner.stream.shutdown(direction.into()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(map_io_error(error::SHUTDOWN, err)),
        }
    }

    fn apply_read_deadline(&self, ctx: &CallContext) -> Result<(), CoreError> {
        apply_socket_deadline(&self.inner.stream, ctx.deadline(), error::READ, true)
    }

    fn apply_write_deadline(&self, ctx: &CallContext) -> Result<(), CoreError> {
        apply_socket_deadline(&self.inner.stream, ctx.deadline(), error::WRITE, false)
    }
}

fn ensure_active(ctx: &CallContext, kind: OperationKind) -> Result<(), CoreError> {
    if ctx.deadline().is_expired() {
        return Err(error::timeout_error(kind));
    }
    if ctx.cancellation().is_cancelled() {
        return Err(error::cancelled_error(kind));
    }
    Ok(())
}

/// 将截止时间换算为一次性套接字超时。未设置截止时保持调用方既有配置。
fn apply_socket_deadline(
    stream: &TcpStream,
    deadline: Deadline,
    kind: OperationKind,
    read_side: bool,
) -> Result<(), CoreError> {
    let Some(remaining) = deadline.remaining() else {
        return Ok(());
    };
    if remaining.is_zero() {
        return Err(error::timeout_error(kind));
    }
    let result = if read_side {
        stream.set_read_timeout(Some(remaining))
    } else {
        stream.set_write_timeout(Some(remaining))
    };
    result.map_err(|err| map_io_error(kind, err))
}

impl ByteChannel for TcpChannel {
    fn read(&self, ctx: &CallContext, dst: &mut [u8]) -> Result<ReadOutcome, CoreError> {
        ensure_active(ctx, error::READ)?;
        if !self.is_open() {
            return Ok(ReadOutcome::EndOfStream);
        }
        if dst.is_empty() {
            return Ok(ReadOutcome::NoData);
        }
        self.apply_read_deadline(ctx)?;
        loop {
            match (&self.inner.stream).read(dst) {
                Ok(0) => return Ok(ReadOutcome::EndOfStream),
                Ok(n) => return Ok(ReadOutcome::Bytes(n)),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(ReadOutcome::NoData);
                }
                Err(err) => return Err(map_io_error(error::READ, err)),
            }
        }
    }

    fn write(&self, ctx: &CallContext, src: &[u8]) -> Result<usize, CoreError> {
        ensure_active(ctx, error::WRITE)?;
        if !self.is_open() {
            return Err(error::closed_error());
        }
        if src.is_empty() {
            return Ok(0);
        }
        self.apply_write_deadline(ctx)?;
        loop {
            match (&self.inner.stream).write(src) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(0);
                }
                Err(err) => return Err(map_io_error(error::WRITE, err)),
            }
        }
    }

    fn close(&self, _ctx: &CallContext) -> Result<(), CoreError> {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        trace!(peer = %self.inner.peer_addr, "关闭 TCP 通道");
        self.shutdown(ShutdownDirection::Both)
    }

    fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }
}

/// 表示半关闭的方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownDirection {
    /// 关闭写半部。
    Write,
    /// 关闭读半部。
    Read,
    /// 同时关闭读写半部。
    Both,
}

impl From<ShutdownDirection> for StdShutdown {
    fn from(value: ShutdownDirection) -> Self {
        match value {
            ShutdownDirection::Write => StdShutdown::Write,
            ShutdownDirection::Read => StdShutdown::Read,
            ShutdownDirection::Both => StdShutdown::Both,
        }
    }
}
