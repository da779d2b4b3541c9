//! 通道适配层的确定性测试桩集合。
//!
//! # 设计定位（Why）
//! - 握手状态机、背压与缓冲生命周期的行为验证不应依赖真实密码学：
//!   脚本化引擎以明文分帧模拟“记录变换 + 握手阶段”，让状态机的每一步
//!   都可以被精确预期；
//! - 内存通道以可注入的读写上限模拟传输层的各种边界（部分写、无数据、
//!   流结束），这些边界在真实套接字上难以稳定复现。
//!
//! # 使用方式（How）
//! - 单向场景：独立的 [`MemoryChannel`] 预先 `push_inbound` 对端的飞行
//!   字节（可由 [`handshake_flights`] 生成），在单线程内驱动完整握手；
//! - 双向场景：[`MemoryChannel::pair`] 返回交叉连接的两端，配合两个线程
//!   驱动一对适配层互通；
//! - 所有桩对象仅用于测试与示例环境，不提供任何机密性保障。
//!
//! # 风险与权衡（Trade-offs）
//! - 脚本化引擎是记录原子的：目标空间装不下整条记录时直接报溢出而非
//!   部分交付，这恰好覆盖生产引擎不会触发的溢出分支；
//! - 内存通道的“无数据”是立即返回的，阻塞语义由调用方的重试循环模拟。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use braid_core::contract::CallContext;
use braid_core::error::{CoreError, ErrorCategory};
use braid_core::transport::{ByteChannel, ReadOutcome};
use parking_lot::Mutex;

use crate::engine::{
    DelegatedTask, EngineResult, EngineStatus, HandshakePhase, SessionLimits, TlsEngine,
};
use crate::error::codes;

/// 记录头长度：魔数 + 类型 + 两字节载荷长度。
pub const RECORD_HEADER_LEN: usize = 4;

const MAGIC: u8 = 0xB7;
const KIND_HANDSHAKE: u8 = 1;
const KIND_DATA: u8 = 2;
const KIND_CLOSE: u8 = 3;

/// 引擎扮演的握手角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineRole {
    Client,
    Server,
}

impl EngineRole {
    fn byte(self) -> u8 {
        match self {
            EngineRole::Client => b'C',
            EngineRole::Server => b'S',
        }
    }

    fn peer(self) -> EngineRole {
        match self {
            EngineRole::Client => EngineRole::Server,
            EngineRole::Server => EngineRole::Client,
        }
    }
}

/// 脚本化引擎的行为配置。
#[derive(Clone, Debug)]
pub struct ScriptedEngineConfig {
    /// 握手角色。
    pub role: EngineRole,
    /// 握手期间每一侧发送的飞行数。
    pub flights: u8,
    /// 收到对端第 n 条飞行后要求执行一次委托任务（1 起计）。
    pub task_after_flights: Vec<u8>,
    /// 委托任务是否以失败告终。
    pub fail_task: bool,
    /// 单条记录可承载的最大明文字节数。
    pub max_plaintext: usize,
    /// 模拟会话恢复：没有待执行的握手。
    pub resumed: bool,
}

impl ScriptedEngineConfig {
    /// 以默认参数构造指定角色的配置。
    pub fn new(role: EngineRole) -> Self {
        Self {
            role,
            flights: 2,
            task_after_flights: Vec::new(),
            fail_task: false,
            max_plaintext: 1024,
            resumed: false,
        }
    }
}

/// 脚本化记录引擎：以明文分帧模拟握手节奏与记录变换。
///
/// # 行为描述（How）
/// - 握手协议是确定性的乒乓：客户端与服务端交替发送 `flights` 条握手
///   记录，客户端先手；最后一条变换的结果报告 [`HandshakePhase::Finished`]；
/// - 稳态下 `wrap` 把明文原样装入带四字节头的记录（空载密码），`unwrap`
///   逆向解析；记录不完整时报欠载、目标空间不足时报溢出；
/// - `close_outbound` 之后的 `wrap` 产出一条关闭记录并以
///   [`EngineStatus::Closed`] 标识。
pub struct ScriptedEngine {
    config: ScriptedEngineConfig,
    phase: HandshakePhase,
    sent: u8,
    received: u8,
    after_task_phase: HandshakePhase,
    task_pending: bool,
    outbound_closed: bool,
    close_emitted: bool,
    tasks_run: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    /// 按配置构造引擎。
    pub fn with_config(config: ScriptedEngineConfig) -> Self {
        Self {
            config,
            phase: HandshakePhase::NotHandshaking,
            sent: 0,
            received: 0,
            after_task_phase: HandshakePhase::NotHandshaking,
            task_pending: false,
            outbound_closed: false,
            close_emitted: false,
            tasks_run: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 默认参数的客户端引擎。
    pub fn client() -> Self {
        Self::with_config(ScriptedEngineConfig::new(EngineRole::Client))
    }

    /// 默认参数的服务端引擎。
    pub fn server() -> Self {
        Self::with_config(ScriptedEngineConfig::new(EngineRole::Server))
    }

    /// 已执行的委托任务计数句柄，供测试在引擎移交后继续观测。
    pub fn task_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.tasks_run)
    }

    /// 收完对端一条飞行后的状态推进。
    fn advance_after_receive(&mut self) -> HandshakePhase {
        let next = match self.config.role {
            EngineRole::Client if self.received == self.config.flights => {
                HandshakePhase::Finished
            }
            EngineRole::Client | EngineRole::Server => HandshakePhase::NeedWrap,
        };
        if self.config.task_after_flights.contains(&self.received) {
            self.task_pending = true;
            self.after_task_phase = next;
            self.phase = HandshakePhase::NeedTask;
            return HandshakePhase::NeedTask;
        }
        if next == HandshakePhase::Finished {
            self.phase = HandshakePhase::NotHandshaking;
            return HandshakePhase::Finished;
        }
        self.phase = next;
        next
    }

    /// 发出一条飞行后的状态推进。
    fn advance_after_send(&mut self) -> HandshakePhase {
        match self.config.role {
            EngineRole::Client => {
                self.phase = HandshakePhase::NeedUnwrap;
                HandshakePhase::NeedUnwrap
            }
            EngineRole::Server => {
                if self.sent == self.config.flights {
                    self.phase = HandshakePhase::NotHandshaking;
                    return HandshakePhase::Finished;
                }
                self.phase = HandshakePhase::NeedUnwrap;
                HandshakePhase::NeedUnwrap
            }
        }
    }

    fn stub_error(message: &'static str) -> CoreError {
        CoreError::new(codes::PROTOCOL, message)
            .with_category(ErrorCategory::ProtocolViolation)
    }
}

impl TlsEngine for ScriptedEngine {
    fn begin_handshake(&mut self) -> Result<(), CoreError> {
        self.phase = if self.config.resumed {
            HandshakePhase::NotHandshaking
        } else {
            match self.config.role {
                EngineRole::Client => HandshakePhase::NeedWrap,
                EngineRole::Server => HandshakePhase::NeedUnwrap,
            }
        };
        Ok(())
    }

    fn handshake_phase(&self) -> HandshakePhase {
        self.phase
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, CoreError> {
        if self.outbound_closed {
            if self.close_emitted {
                return Ok(EngineResult {
                    status: EngineStatus::Closed,
                    phase: self.phase,
                    consumed: 0,
                    produced: 0,
                });
            }
            if dst.len() < RECORD_HEADER_LEN {
                return Ok(EngineResult {
                    status: EngineStatus::BufferOverflow,
                    phase: self.phase,
                    consumed: 0,
                    produced: 0,
                });
            }
            dst[..RECORD_HEADER_LEN].copy_from_slice(&[MAGIC, KIND_CLOSE, 0, 0]);
            self.close_emitted = true;
            self.phase = HandshakePhase::Closed;
            return Ok(EngineResult {
                status: EngineStatus::Closed,
                phase: HandshakePhase::Closed,
                consumed: 0,
                produced: RECORD_HEADER_LEN,
            });
        }

        if self.phase == HandshakePhase::NeedWrap {
            let payload = [self.config.role.byte(), self.sent];
            let need = RECORD_HEADER_LEN + payload.len();
            if dst.len() < need {
                return Ok(EngineResult {
                    status: EngineStatus::BufferOverflow,
                    phase: self.phase,
                    consumed: 0,
                    produced: 0,
                });
            }
            dst[..RECORD_HEADER_LEN]
                .copy_from_slice(&[MAGIC, KIND_HANDSHAKE, 0, payload.len() as u8]);
            dst[RECORD_HEADER_LEN..need].copy_from_slice(&payload);
            self.sent += 1;
            let phase = self.advance_after_send();
            return Ok(EngineResult {
                status: EngineStatus::Ok,
                phase,
                consumed: 0,
                produced: need,
            });
        }

        if self.phase != HandshakePhase::NotHandshaking {
            // 当前不期望封装：不产出也不消费。
            return Ok(EngineResult {
                status: EngineStatus::Ok,
                phase: self.phase,
                consumed: 0,
                produced: 0,
            });
        }

        let take = src.len().min(self.config.max_plaintext);
        let need = RECORD_HEADER_LEN + take;
        if dst.len() < need {
            return Ok(EngineResult {
                status: EngineStatus::BufferOverflow,
                phase: self.phase,
                consumed: 0,
                produced: 0,
            });
        }
        dst[..RECORD_HEADER_LEN].copy_from_slice(&[
            MAGIC,
            KIND_DATA,
            (take >> 8) as u8,
            (take & 0xff) as u8,
        ]);
        dst[RECORD_HEADER_LEN..need].copy_from_slice(&src[..take]);
        Ok(EngineResult {
            status: EngineStatus::Ok,
            phase: self.phase,
            consumed: take,
            produced: need,
        })
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, CoreError> {
        if src.len() < RECORD_HEADER_LEN {
            return Ok(EngineResult {
                status: EngineStatus::BufferUnderflow,
                phase: self.phase,
                consumed: 0,
                produced: 0,
            });
        }
        if src[0] != MAGIC {
            return Err(Self::stub_error("记录魔数不匹配"));
        }
        let len = ((src[2] as usize) << 8) | src[3] as usize;
        if src.len() < RECORD_HEADER_LEN + len {
            return Ok(EngineResult {
                status: EngineStatus::BufferUnderflow,
                phase: self.phase,
                consumed: 0,
                produced: 0,
            });
        }
        let consumed = RECORD_HEADER_LEN + len;
        let payload = &src[RECORD_HEADER_LEN..consumed];
        match src[1] {
            KIND_HANDSHAKE => {
                if self.phase != HandshakePhase::NeedUnwrap {
                    return Err(Self::stub_error("当前阶段不期望握手记录"));
                }
                if payload != [self.config.role.peer().byte(), self.received] {
                    return Err(Self::stub_error("握手记录序号或角色不符"));
                }
                self.received += 1;
                let phase = self.advance_after_receive();
                Ok(EngineResult {
                    status: EngineStatus::Ok,
                    phase,
                    consumed,
                    produced: 0,
                })
            }
            KIND_DATA => {
                if self.phase != HandshakePhase::NotHandshaking {
                    return Err(Self::stub_error("握手完成前收到数据记录"));
                }
                if dst.len() < len {
                    return Ok(EngineResult {
                        status: EngineStatus::BufferOverflow,
                        phase: self.phase,
                        consumed: 0,
                        produced: 0,
                    });
                }
                dst[..len].copy_from_slice(payload);
                Ok(EngineResult {
                    status: EngineStatus::Ok,
                    phase: self.phase,
                    consumed,
                    produced: len,
                })
            }
            KIND_CLOSE => Ok(EngineResult {
                status: EngineStatus::Closed,
                phase: self.phase,
                consumed,
                produced: 0,
            }),
            _ => Err(Self::stub_error("未知记录类型")),
        }
    }

    fn next_task(&mut self) -> Option<Box<dyn DelegatedTask>> {
        if !self.task_pending {
            return None;
        }
        self.task_pending = false;
        // 任务一旦移交即视为将被执行，阶段随之恢复；“刚完成”的一次性
        // 信号不在事后查询中重放。
        self.phase = if self.after_task_phase == HandshakePhase::Finished {
            HandshakePhase::NotHandshaking
        } else {
            self.after_task_phase
        };
        Some(Box::new(StubTask {
            counter: Arc::clone(&self.tasks_run),
            fail: self.config.fail_task,
        }))
    }

    fn close_outbound(&mut self) {
        self.outbound_closed = true;
    }

    fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            application_buffer: self.config.max_plaintext,
            record_buffer: self.config.max_plaintext + RECORD_HEADER_LEN,
        }
    }
}

struct StubTask {
    counter: Arc<AtomicUsize>,
    fail: bool,
}

impl DelegatedTask for StubTask {
    fn execute(&mut self) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::new(codes::PROTOCOL, "桩任务按配置失败"));
        }
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 生成指定角色在握手期间发出的全部线路字节，用于预置对端输入。
pub fn handshake_flights(role: EngineRole, flights: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    for index in 0..flights {
        bytes.extend_from_slice(&[MAGIC, KIND_HANDSHAKE, 0, 2, role.byte(), index]);
    }
    bytes
}

/// 以数据记录封装一段明文，用于合成入站线路字节。
pub fn frame_data(payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    bytes.extend_from_slice(&[
        MAGIC,
        KIND_DATA,
        (payload.len() >> 8) as u8,
        (payload.len() & 0xff) as u8,
    ]);
    bytes.extend_from_slice(payload);
    bytes
}

/// 一条关闭记录的线路字节。
pub fn close_record() -> Vec<u8> {
    vec![MAGIC, KIND_CLOSE, 0, 0]
}

#[derive(Default)]
struct Pipe {
    data: Mutex<VecDeque<u8>>,
    eof: AtomicBool,
}

/// 内存字节通道：读写上限与流结束均可注入的传输桩。
///
/// # 行为描述（How）
/// - 读取从入站管道弹出字节：管道为空时返回“无数据”，标记了流结束则
///   返回 `EndOfStream`（残余字节先于结束信号交付）；
/// - 写入把字节压入出站管道，`set_write_limit` 约束单次调用接受的上限，
///   `Some(0)` 模拟完全背压；
/// - `pair` 返回交叉连接的两端：一端的出站即另一端的入站，关闭一端会对
///   另一端呈现流结束。
#[derive(Clone)]
pub struct MemoryChannel {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    closed: Arc<AtomicBool>,
    read_limit: Arc<Mutex<Option<usize>>>,
    write_limit: Arc<Mutex<Option<usize>>>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl MemoryChannel {
    /// 独立通道：入站与出站互不相连，内容由测试显式注入与提取。
    pub fn new() -> Self {
        Self::with_pipes(Arc::new(Pipe::default()), Arc::new(Pipe::default()))
    }

    /// 交叉连接的一对通道。
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        (
            Self::with_pipes(Arc::clone(&b_to_a), Arc::clone(&a_to_b)),
            Self::with_pipes(a_to_b, b_to_a),
        )
    }

    fn with_pipes(incoming: Arc<Pipe>, outgoing: Arc<Pipe>) -> Self {
        Self {
            incoming,
            outgoing,
            closed: Arc::new(AtomicBool::new(false)),
            read_limit: Arc::new(Mutex::new(None)),
            write_limit: Arc::new(Mutex::new(None)),
            reads: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 注入入站字节。
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.incoming.data.lock().extend(bytes.iter().copied());
    }

    /// 标记入站流结束；残余字节仍会先被读出。
    pub fn mark_inbound_eof(&self) {
        self.incoming.eof.store(true, Ordering::Release);
    }

    /// 取出并清空出站字节。
    pub fn take_outbound(&self) -> Vec<u8> {
        self.outgoing.data.lock().drain(..).collect()
    }

    /// 当前出站字节数。
    pub fn outbound_len(&self) -> usize {
        self.outgoing.data.lock().len()
    }

    /// 约束单次读取返回的最大字节数；`None` 为不限。
    pub fn set_read_limit(&self, limit: Option<usize>) {
        *self.read_limit.lock() = limit;
    }

    /// 约束单次写入接受的最大字节数；`None` 为不限，`Some(0)` 为完全背压。
    pub fn set_write_limit(&self, limit: Option<usize>) {
        *self.write_limit.lock() = limit;
    }

    /// 已发生的传输读次数。
    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }

    /// 已发生的传输写次数。
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteChannel for MemoryChannel {
    fn read(&self, _ctx: &CallContext, dst: &mut [u8]) -> Result<ReadOutcome, CoreError> {
        self.reads.fetch_add(1, Ordering::AcqRel);
        if self.closed.load(Ordering::Acquire) {
            return Ok(ReadOutcome::EndOfStream);
        }
        let mut data = self.incoming.data.lock();
        if data.is_empty() {
            return if self.incoming.eof.load(Ordering::Acquire) {
                Ok(ReadOutcome::EndOfStream)
            } else {
                Ok(ReadOutcome::NoData)
            };
        }
        let limit = self.read_limit.lock().unwrap_or(usize::MAX);
        let n = dst.len().min(data.len()).min(limit);
        if n == 0 {
            return Ok(ReadOutcome::NoData);
        }
        for slot in dst.iter_mut().take(n) {
            *slot = data.pop_front().expect("长度已校验");
        }
        Ok(ReadOutcome::Bytes(n))
    }

    fn write(&self, _ctx: &CallContext, src: &[u8]) -> Result<usize, CoreError> {
        self.writes.fetch_add(1, Ordering::AcqRel);
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::new(codes::CHANNEL_CLOSED, "内存通道已关闭"));
        }
        let limit = self.write_limit.lock().unwrap_or(usize::MAX);
        let n = src.len().min(limit);
        self.outgoing.data.lock().extend(src[..n].iter().copied());
        Ok(n)
    }

    fn close(&self, _ctx: &CallContext) -> Result<(), CoreError> {
        self.closed.store(true, Ordering::Release);
        // 对端在读完残余字节后观察到流结束。
        self.outgoing.eof.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
