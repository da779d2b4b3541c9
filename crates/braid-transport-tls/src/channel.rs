use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use braid_core::contract::CallContext;
use braid_core::error::CoreError;
use braid_core::transport::{ByteChannel, ReadOutcome};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::SessionBuffer;
use crate::engine::{EngineStatus, HandshakePhase, SessionLimits, TlsEngine};
use crate::error::{self, OperationKind};

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// 关闭记录冲刷在持续背压下的最大重试轮数；超过则放弃重试，
/// 由传输层关闭兜底。
const CLOSE_FLUSH_RETRIES: usize = 64;

/// 通道适配层的生命周期状态，单调推进、不可回退。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterState {
    /// 握手已完成，可正常读写。
    Open,
    /// 关闭流程已发起，关闭记录尚在送出。
    Closing,
    /// 传输已释放，通道不可再用。
    Closed,
}

/// 读方向私有状态：密文入站缓冲与对端握手数据槽。
struct ReadHalf {
    net_in: SessionBuffer,
    /// 握手期间承接对端握手数据；稳态下闲置，保留给重新握手场景。
    #[allow(dead_code)]
    peer_sink: SessionBuffer,
}

/// 写方向私有状态：密文出站缓冲与握手期的空明文源。
struct WriteHalf {
    net_out: SessionBuffer,
    handshake_source: SessionBuffer,
}

/// TLS 通道适配层：在裸字节传输之上驱动记录式加密引擎，向调用方暴露
/// 与明文通道同形的读写接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方不应感知加密层的存在：读到的是明文、写入的是明文，加密记录的
///   封装、解析与握手节奏全部由本类型消化；
/// - 引擎本身不触碰传输，本类型承担两者之间的全部缓冲与状态管理。
///
/// ## 逻辑（How）
/// - 四个缓冲区域在构造时按引擎协商尺寸一次性分配：密文入站/出站各一，
///   对端握手槽与握手空明文源各一；
/// - 构造函数同步执行完整握手状态机（见 [`HandshakeDriver`]），失败即
///   返回错误，调用方拿到的实例必然处于可用状态；
/// - 出站方向是单槽设计：上一条加密记录未完全送出前不开始新的封装，
///   `write` 返回 `0` 即是显式的背压信号；
/// - 入站方向未解完的密文在每轮解码后压实保留，跨调用延续。
///
/// ## 并发（What）
/// - 读路径与写路径各由一把方向锁串行（`read_half`/`write_half`）；
/// - 握手阶段跃迁与委托任务执行会触碰引擎共享状态，由独立的引擎锁保护，
///   加锁顺序恒为“方向锁 → 引擎锁”，两方向互不阻塞传输 I/O；
/// - 生命周期状态以原子位单调推进：`Open → Closing → Closed`。
///
/// ## 风险与权衡（Trade-offs）
/// - 关闭是单向承诺：`close` 发出关闭记录后即释放传输，不等待对端回应；
/// - 阻塞在传输上的读写通过传输层关闭解除阻塞，而非强制线程中断。
pub struct TlsChannel<C: ByteChannel> {
    transport: C,
    engine: Mutex<Box<dyn TlsEngine>>,
    read_half: Mutex<ReadHalf>,
    write_half: Mutex<WriteHalf>,
    state: AtomicU8,
    limits: SessionLimits,
}

impl<C: ByteChannel> fmt::Debug for TlsChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsChannel").finish_non_exhaustive()
    }
}

impl<C: ByteChannel> TlsChannel<C> {
    /// 包装裸传输并同步完成握手。
    ///
    /// # 契约说明（What）
    /// - **输入**：`transport` 为已建立的裸字节通道；`engine` 为按客户端或
    ///   服务端模式配置好的全新引擎实例；
    /// - **前置条件**：`ctx` 的截止时间覆盖整个握手过程，未设置则握手
    ///   不受时限；
    /// - **后置条件**：返回的通道处于 [`AdapterState::Open`]，可立即读写；
    ///   任何失败（意外引擎状态、传输中断、任务失败、超时、取消）都返回
    ///   错误，此时传输的善后由调用方负责。
    pub fn wrap(
        ctx: &CallContext,
        transport: C,
        mut engine: Box<dyn TlsEngine>,
    ) -> Result<Self, CoreError> {
        let limits = engine.session_limits();
        let mut net_in = SessionBuffer::new(limits.record_buffer);
        let mut net_out = SessionBuffer::new(limits.record_buffer);
        let mut peer_sink = SessionBuffer::new(limits.application_buffer);
        let handshake_source = SessionBuffer::new(limits.application_buffer);

        engine.begin_handshake()?;
        {
            let mut driver = HandshakeDriver {
                ctx,
                transport: &transport,
                engine: engine.as_mut(),
                net_in: &mut net_in,
                net_out: &mut net_out,
                peer_sink: &mut peer_sink,
            };
            driver.run()?;
        }

        Ok(Self {
            transport,
            engine: Mutex::new(engine),
            read_half: Mutex::new(ReadHalf { net_in, peer_sink }),
            write_half: Mutex::new(WriteHalf {
                net_out,
                handshake_source,
            }),
            state: AtomicU8::new(STATE_OPEN),
            limits,
        })
    }

    /// 协商出的缓冲区尺寸。
    pub fn session_limits(&self) -> SessionLimits {
        self.limits
    }

    /// 当前生命周期状态。
    pub fn state(&self) -> AdapterState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => AdapterState::Open,
            STATE_CLOSING => AdapterState::Closing,
            _ => AdapterState::Closed,
        }
    }

    /// 底层传输的只读访问，供调用方查询地址等元数据。
    pub fn transport(&self) -> &C {
        &self.transport
    }

    /// 把出站缓冲中的密文送入传输。返回 `true` 表示已全部排空。
    fn flush_pending(&self, ctx: &CallContext, half: &mut WriteHalf) -> Result<bool, CoreError> {
        while !half.net_out.is_empty() {
            let written = self.transport.write(ctx, half.net_out.readable())?;
            if written == 0 {
                return Ok(false);
            }
            half.net_out.advance_read(written);
        }
        half.net_out.clear();
        Ok(true)
    }

    /// 解包循环：把入站缓冲中的密文持续交给引擎，明文累积进 `dst`。
    fn unwrap_into(
        &self,
        half: &mut ReadHalf,
        dst: &mut [u8],
    ) -> Result<usize, CoreError> {
        let mut produced_total = 0usize;
        let mut engine = self.engine.lock();
        loop {
            if half.net_in.is_empty() && engine.buffered_plaintext() == 0 {
                break;
            }
            let res = engine.unwrap(half.net_in.readable(), &mut dst[produced_total..])?;
            half.net_in.advance_read(res.consumed);
            // 未解完的记录残片压实保留，跨调用延续。
            half.net_in.compact();
            match res.status {
                EngineStatus::Ok | EngineStatus::BufferUnderflow => {
                    produced_total += res.produced;
                    if res.phase == HandshakePhase::NeedTask {
                        drain_tasks(engine.as_mut())?;
                    }
                    if res.status == EngineStatus::BufferUnderflow {
                        // 输入不足一条完整记录：残片已保留，等下一次传输读。
                        break;
                    }
                    if res.consumed == 0 && res.produced == 0 {
                        break;
                    }
                }
                EngineStatus::BufferOverflow => {
                    if produced_total > 0 {
                        // 本轮已有产出：先交付，剩余密文留在缓冲中。
                        break;
                    }
                    return Err(error::undersized_read_buffer_error(
                        self.limits.application_buffer,
                    ));
                }
                EngineStatus::Closed => {
                    return Err(error::protocol_error(error::READ, EngineStatus::Closed));
                }
            }
        }
        Ok(produced_total)
    }

    /// 封装关闭记录并尽力送出，随后的传输关闭由调用方执行。
    fn emit_close_record(
        &self,
        ctx: &CallContext,
        half: &mut WriteHalf,
        engine: &mut dyn TlsEngine,
    ) -> Result<(), CoreError> {
        // 先尽力排空残余的应用记录，再封装关闭记录。
        let _ = self.flush_pending(ctx, half)?;
        half.net_out.clear();
        let res = engine.wrap(half.handshake_source.readable(), half.net_out.writable())?;
        half.net_out.advance_write(res.produced);
        match res.status {
            EngineStatus::Ok | EngineStatus::Closed => {}
            status => return Err(error::protocol_error(error::CLOSE, status)),
        }

        let mut stalls = 0usize;
        while !half.net_out.is_empty() {
            if ctx.deadline().is_expired() || ctx.cancellation().is_cancelled() {
                break;
            }
            let written = self.transport.write(ctx, half.net_out.readable())?;
            if written == 0 {
                stalls += 1;
                if stalls > CLOSE_FLUSH_RETRIES {
                    break;
                }
                std::thread::yield_now();
                continue;
            }
            stalls = 0;
            half.net_out.advance_read(written);
        }
        half.net_out.clear();
        Ok(())
    }
}

impl<C: ByteChannel> ByteChannel for TlsChannel<C> {
    fn read(&self, ctx: &CallContext, dst: &mut [u8]) -> Result<ReadOutcome, CoreError> {
        ensure_active(ctx, error::READ)?;
        if self.state() != AdapterState::Open {
            return Ok(ReadOutcome::EndOfStream);
        }
        let mut half = self.read_half.lock();
        let staged =
            !half.net_in.is_empty() || self.engine.lock().buffered_plaintext() > 0;
        let raw = if half.net_in.writable_len() > 0 {
            self.transport.read(ctx, half.net_in.writable())?
        } else {
            ReadOutcome::NoData
        };
        match raw {
            ReadOutcome::Bytes(n) => half.net_in.advance_write(n),
            ReadOutcome::NoData | ReadOutcome::EndOfStream => {
                if !staged {
                    // 既无新密文也无历史残留：原样透传传输层信号。
                    return Ok(raw);
                }
            }
        }
        let produced = self.unwrap_into(&mut half, dst)?;
        if produced > 0 {
            Ok(ReadOutcome::Bytes(produced))
        } else if raw == ReadOutcome::EndOfStream {
            Ok(ReadOutcome::EndOfStream)
        } else {
            Ok(ReadOutcome::NoData)
        }
    }

    fn write(&self, ctx: &CallContext, src: &[u8]) -> Result<usize, CoreError> {
        ensure_active(ctx, error::WRITE)?;
        if self.state() != AdapterState::Open {
            return Err(error::channel_closed_error());
        }
        let mut half = self.write_half.lock();
        if !self.flush_pending(ctx, &mut half)? {
            // 上一条记录尚未排空：向调用方施加背压，缓冲状态保持不变。
            return Ok(0);
        }
        if src.is_empty() {
            return Ok(0);
        }
        let mut engine = self.engine.lock();
        half.net_out.clear();
        let res = engine.wrap(src, half.net_out.writable())?;
        half.net_out.advance_write(res.produced);
        match res.status {
            EngineStatus::Ok => {
                if res.phase == HandshakePhase::NeedTask {
                    drain_tasks(engine.as_mut())?;
                }
            }
            status => return Err(error::protocol_error(error::WRITE, status)),
        }
        drop(engine);
        // 单次冲刷尝试：未送完的部分留在出站缓冲，由后续调用先行排空。
        self.flush_pending(ctx, &mut half)?;
        trace!(consumed = res.consumed, wire = res.produced, "明文已封装");
        Ok(res.consumed)
    }

    fn close(&self, ctx: &CallContext) -> Result<(), CoreError> {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // 关闭流程已发起或已完成：保持无害。
            return Ok(());
        }
        debug!("发起 TLS 关闭握手");
        let close_result = {
            let mut half = self.write_half.lock();
            let mut engine = self.engine.lock();
            engine.close_outbound();
            self.emit_close_record(ctx, &mut half, engine.as_mut())
        };
        self.state.store(STATE_CLOSED, Ordering::Release);
        // 传输关闭同时解除其他线程阻塞中的读写调用。
        let transport_result = self.transport.close(ctx);
        close_result.and(transport_result)
    }

    fn is_open(&self) -> bool {
        self.state() == AdapterState::Open && self.transport.is_open()
    }
}

/// 握手状态机的执行载体，仅存活于构造期间。
///
/// # 设计动机（Why）
/// - 握手期间四个缓冲与引擎都以独占借用驱动，不需要任何锁；
/// - 把状态机从通道主体中拆出，使“构造即握手完成”的不变量在类型层面
///   可见：通道实例一旦存在，握手必已成功。
///
/// # 状态机（How）
/// - 循环直至阶段进入 `Finished` 或 `NotHandshaking`；
/// - `NeedWrap`：封装一条握手记录并完整冲刷（部分写必须重试而非放弃）；
///   冲刷完成且阶段转为 `NeedUnwrap` 时，直接衔接同一轮的解包步骤——
///   发出一轮飞行后对端的应答往往已经在途；
/// - `NeedUnwrap`：不足一条记录即回传输层取数据（欠载不是失败），一次
///   传输读可能携带多条握手记录，循环解到阶段离开 `NeedUnwrap` 为止；
/// - `NeedTask`：同步清空委托任务队列后重新查询阶段；
/// - 每轮动作前检查截止与取消标记。
struct HandshakeDriver<'a, C: ByteChannel> {
    ctx: &'a CallContext,
    transport: &'a C,
    engine: &'a mut dyn TlsEngine,
    net_in: &'a mut SessionBuffer,
    net_out: &'a mut SessionBuffer,
    peer_sink: &'a mut SessionBuffer,
}

impl<C: ByteChannel> HandshakeDriver<'_, C> {
    fn run(&mut self) -> Result<(), CoreError> {
        let mut phase = self.engine.handshake_phase();
        let mut rounds = 0u32;
        while !matches!(
            phase,
            HandshakePhase::Finished | HandshakePhase::NotHandshaking
        ) {
            self.ensure_active()?;
            rounds += 1;
            phase = match phase {
                HandshakePhase::NeedWrap => self.wrap_step()?,
                HandshakePhase::NeedUnwrap => self.unwrap_step()?,
                HandshakePhase::NeedTask => drain_tasks(self.engine)?,
                HandshakePhase::Closed => {
                    return Err(error::handshake_error("引擎在握手完成前关闭了会话"));
                }
                HandshakePhase::Finished | HandshakePhase::NotHandshaking => phase,
            };
        }
        debug!(rounds, ?phase, "TLS 握手完成");
        Ok(())
    }

    /// 封装并送出一条握手记录，随后视阶段直接衔接解包。
    fn wrap_step(&mut self) -> Result<HandshakePhase, CoreError> {
        self.net_out.clear();
        let res = self.engine.wrap(&[], self.net_out.writable())?;
        self.net_out.advance_write(res.produced);
        let mut phase = res.phase;
        match res.status {
            EngineStatus::Ok => {
                if phase == HandshakePhase::NeedTask {
                    phase = drain_tasks(self.engine)?;
                }
            }
            EngineStatus::Closed => {
                self.flush_fully()?;
                return Err(error::handshake_error("引擎在握手记录封装期间报告会话关闭"));
            }
            status => {
                return Err(error::handshake_status_error("封装", status));
            }
        }
        self.flush_fully()?;
        trace!(?phase, "握手记录已送出");
        if phase == HandshakePhase::NeedUnwrap {
            phase = self.unwrap_step()?;
        }
        Ok(phase)
    }

    /// 持续解包对端握手记录，直至阶段离开 `NeedUnwrap`。
    fn unwrap_step(&mut self) -> Result<HandshakePhase, CoreError> {
        loop {
            self.ensure_active()?;
            if self.net_in.is_empty() {
                self.fill_net_in()?;
            }
            // 对端握手数据不外泄给调用方，槽位每轮以全容量重新提供。
            self.peer_sink.clear();
            let res = self
                .engine
                .unwrap(self.net_in.readable(), self.peer_sink.writable())?;
            self.net_in.advance_read(res.consumed);
            self.net_in.compact();
            let mut phase = res.phase;
            match res.status {
                EngineStatus::Ok => {
                    if phase == HandshakePhase::NeedTask {
                        phase = drain_tasks(self.engine)?;
                    }
                    if phase == HandshakePhase::NeedUnwrap {
                        // 一次传输读可能带来多条记录，继续解。
                        continue;
                    }
                    return Ok(phase);
                }
                EngineStatus::BufferUnderflow => {
                    // 欠载表示“还需要输入”，回传输层取更多字节。
                    self.fill_net_in()?;
                }
                EngineStatus::BufferOverflow => {
                    // 槽位已在循环顶部清空为全容量；直接重试。
                    continue;
                }
                EngineStatus::Closed => {
                    return Err(error::handshake_error("对端在握手完成前关闭了会话"));
                }
            }
        }
    }

    /// 从传输层读取密文，直到至少取得一个字节。
    fn fill_net_in(&mut self) -> Result<(), CoreError> {
        loop {
            self.ensure_active()?;
            if self.net_in.writable_len() == 0 {
                // 缓冲已满仍解不出记录：交由下一轮引擎状态暴露协议违规。
                return Ok(());
            }
            match self.transport.read(self.ctx, self.net_in.writable())? {
                ReadOutcome::Bytes(n) => {
                    self.net_in.advance_write(n);
                    return Ok(());
                }
                ReadOutcome::NoData => {
                    std::thread::yield_now();
                }
                ReadOutcome::EndOfStream => {
                    return Err(error::handshake_error("传输在握手完成前到达流结尾"));
                }
            }
        }
    }

    /// 完整冲刷出站缓冲；部分写被接受时重试而非放弃握手。
    fn flush_fully(&mut self) -> Result<(), CoreError> {
        while !self.net_out.is_empty() {
            self.ensure_active()?;
            let written = self.transport.write(self.ctx, self.net_out.readable())?;
            if written == 0 {
                std::thread::yield_now();
                continue;
            }
            self.net_out.advance_read(written);
        }
        self.net_out.clear();
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), CoreError> {
        ensure_active(self.ctx, error::HANDSHAKE)
    }
}

/// 同步清空引擎的委托任务队列并返回之后的握手阶段。
///
/// 任务失败不会原样透传，而是封装为握手域错误，保证调用方能按统一的
/// 错误码做出关闭决策。
fn drain_tasks(engine: &mut dyn TlsEngine) -> Result<HandshakePhase, CoreError> {
    while let Some(mut task) = engine.next_task() {
        task.execute()
            .map_err(|err| error::handshake_error_with_cause("委托任务执行失败", err))?;
    }
    Ok(engine.handshake_phase())
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

#[allow(dead_code)]
fn _assert_channel_contract<C>()
where
    C: ByteChannel,
    TlsChannel<C>: ByteChannel,
{
}
