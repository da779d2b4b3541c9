use std::io::{self, Read, Write};
use std::sync::Arc;

use braid_core::error::{CoreError, ErrorCategory};
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;

use crate::engine::{
    DelegatedTask, EngineResult, EngineStatus, HandshakePhase, SessionLimits, TlsEngine,
};
use crate::error::{self, codes};

/// TLS 记录的最大明文载荷（RFC 8446 §5.1）。
const MAX_PLAINTEXT_LEN: usize = 16 * 1024;

/// 线路上单条记录的最大尺寸：5 字节头 + 明文上限 + 加密膨胀余量。
const MAX_RECORD_LEN: usize = 5 + MAX_PLAINTEXT_LEN + 2048;

/// 基于 `rustls` 的生产引擎实现。
///
/// # 设计动机（Why）
/// - `rustls` 的连接对象本身就是“无套接字”的记录变换器，与引擎契约的
///   职责边界吻合：喂入密文、取出明文，反向亦然；
/// - 证书链校验由 `rustls` 在记录处理过程中内联完成，因此本实现的委托
///   任务队列恒为空。
///
/// # 实现策略（How）
/// - `wrap`：把明文提交给连接的发送缓冲（单次至多一条记录的载荷），再把
///   已就绪的加密字节抽取到目标区间；
/// - `unwrap`：把密文喂入连接、处理新记录，再从连接的明文缓冲读出产物；
///   连接内部尚未交付的明文以 [`TlsEngine::buffered_plaintext`] 暴露，
///   保证适配层不会误判“无数据”；
/// - 握手阶段由 `is_handshaking`/`wants_write` 推导：需要发送时报
///   `NeedWrap`，否则报 `NeedUnwrap`；全新握手完成的那一次变换结果报
///   `Finished`，之后恒为 `NotHandshaking`。
///
/// # 风险提示（Trade-offs）
/// - 会话票据等握手后记录由 `rustls` 排队，在下一次 wrap 时随应用记录
///   一并抽出，不影响单槽出站缓冲的约束；
/// - `close_outbound` 之后连接只会再产出关闭记录，wrap 以
///   [`EngineStatus::Closed`] 标识。
pub struct RustlsEngine {
    conn: Connection,
    outbound_closed: bool,
    finished_reported: bool,
    pending_plaintext: usize,
}

impl RustlsEngine {
    /// 以客户端模式创建引擎。`server_name` 用于证书主机名校验与 SNI。
    pub fn client(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Result<Self, CoreError> {
        let conn = ClientConnection::new(config, server_name)
            .map_err(|err| error::provisioning_error(err))?;
        Ok(Self::from_connection(Connection::Client(conn)))
    }

    /// 以服务端模式创建引擎。
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, CoreError> {
        let conn =
            ServerConnection::new(config).map_err(|err| error::provisioning_error(err))?;
        Ok(Self::from_connection(Connection::Server(conn)))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            outbound_closed: false,
            finished_reported: false,
            pending_plaintext: 0,
        }
    }

    fn current_phase(&self) -> HandshakePhase {
        if self.outbound_closed {
            return HandshakePhase::Closed;
        }
        if self.conn.is_handshaking() {
            if self.conn.wants_write() {
                HandshakePhase::NeedWrap
            } else {
                HandshakePhase::NeedUnwrap
            }
        } else {
            HandshakePhase::NotHandshaking
        }
    }

    /// 推导一次变换之后的阶段；全新握手完成的瞬间报告一次 `Finished`。
    fn result_phase(&mut self, was_handshaking: bool) -> HandshakePhase {
        if was_handshaking && !self.conn.is_handshaking() && !self.finished_reported {
            self.finished_reported = true;
            return HandshakePhase::Finished;
        }
        self.current_phase()
    }

    /// 把连接中已就绪的加密字节抽取到 `dst`，返回抽取的字节数。
    fn drain_tls_into(&mut self, dst: &mut [u8]) -> Result<usize, CoreError> {
        let mut sink = SliceWriter { buf: dst, filled: 0 };
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut sink) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(record_error("抽取加密记录失败", err)),
            }
        }
        Ok(sink.filled)
    }
}

impl TlsEngine for RustlsEngine {
    fn begin_handshake(&mut self) -> Result<(), CoreError> {
        // 连接对象在构造时即进入握手状态，这里无需额外动作。
        Ok(())
    }

    fn handshake_phase(&self) -> HandshakePhase {
        self.current_phase()
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, CoreError> {
        let was_handshaking = self.conn.is_handshaking();
        let mut consumed = 0usize;
        if !src.is_empty() && !was_handshaking && !self.outbound_closed {
            // 单次至多提交一条记录的明文载荷，维持出站单槽约束。
            let take = src.len().min(MAX_PLAINTEXT_LEN);
            consumed = self
                .conn
                .writer()
                .write(&src[..take])
                .map_err(|err| record_error("提交明文失败", err))?;
        }
        let produced = self.drain_tls_into(dst)?;
        let status = if self.outbound_closed {
            EngineStatus::Closed
        } else {
            EngineStatus::Ok
        };
        let phase = self.result_phase(was_handshaking);
        Ok(EngineResult {
            status,
            phase,
            consumed,
            produced,
        })
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, CoreError> {
        let was_handshaking = self.conn.is_handshaking();
        let mut remainder: &[u8] = src;
        // 上一轮尚有未交付的明文时不再喂入密文，先排空内部缓冲，
        // 避免连接侧的明文缓冲被撑满。
        if self.pending_plaintext == 0 {
            while !remainder.is_empty() {
                match self.conn.read_tls(&mut remainder) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => return Err(record_error("喂入加密记录失败", err)),
                }
            }
        }
        let consumed = src.len() - remainder.len();

        let io_state = self.conn.process_new_packets().map_err(|err| {
            CoreError::new(codes::PROTOCOL, "TLS 记录处理失败")
                .with_category(ErrorCategory::ProtocolViolation)
                .with_cause(err)
        })?;
        let peer_closed = io_state.peer_has_closed();

        let mut produced = 0usize;
        while produced < dst.len() {
            match self.conn.reader().read(&mut dst[produced..]) {
                Ok(0) => break,
                Ok(n) => produced += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(record_error("读取解密明文失败", err)),
            }
        }
        self.pending_plaintext = io_state.plaintext_bytes_to_read().saturating_sub(produced);

        let status = if self.pending_plaintext > 0 {
            EngineStatus::BufferOverflow
        } else if peer_closed && produced == 0 {
            EngineStatus::Closed
        } else if produced == 0
            && !peer_closed
            && consumed == src.len()
            && !self.conn.wants_write()
        {
            EngineStatus::BufferUnderflow
        } else {
            EngineStatus::Ok
        };
        let phase = self.result_phase(was_handshaking);
        Ok(EngineResult {
            status,
            phase,
            consumed,
            produced,
        })
    }

    fn next_task(&mut self) -> Option<Box<dyn DelegatedTask>> {
        // 证书校验由 rustls 内联完成，没有需要外部执行的委托任务。
        None
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.conn.send_close_notify();
            self.outbound_closed = true;
        }
    }

    fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            application_buffer: MAX_PLAINTEXT_LEN,
            record_buffer: MAX_RECORD_LEN,
        }
    }

    fn buffered_plaintext(&self) -> usize {
        self.pending_plaintext
    }
}

fn record_error(message: &'static str, err: io::Error) -> CoreError {
    CoreError::new(codes::PROTOCOL, message)
        .with_category(ErrorCategory::ProtocolViolation)
        .with_cause(err)
}

/// 定长切片写出口：为连接的加密字节抽取提供 `io::Write` 视图。
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    filled: usize,
}

impl io::Write for SliceWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = data.len().min(self.buf.len() - self.filled);
        if n == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.buf[self.filled..self.filled + n].copy_from_slice(&data[..n]);
        self.filled += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
