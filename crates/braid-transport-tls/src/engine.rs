use braid_core::error::CoreError;

/// 握手阶段，描述引擎下一步期望的驱动动作。
///
/// # 契约说明（What）
/// - `NeedWrap`：引擎有待发送的握手记录，调用方应执行 wrap 并发送产物；
/// - `NeedUnwrap`：引擎等待对端的握手记录，调用方应喂入密文并执行 unwrap；
/// - `NeedTask`：存在待执行的委托任务，调用方需同步清空任务队列后重新
///   查询阶段；
/// - `Finished`：一次全新握手刚刚完成，仅在完成动作的结果中出现一次；
/// - `NotHandshaking`：没有进行中的握手（例如会话恢复或握手已完成）；
/// - `Closed`：引擎会话已关闭，不再产生或接受记录。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakePhase {
    NeedWrap,
    NeedUnwrap,
    NeedTask,
    Finished,
    NotHandshaking,
    Closed,
}

/// 单次 wrap/unwrap 的状态结论。
///
/// # 契约说明（What）
/// - `Ok`：操作正常推进；
/// - `BufferUnderflow`：输入不足一条完整记录，需要更多密文；
/// - `BufferOverflow`：输出空间不足，调用方需提供更大的目标区间或先消费
///   已产出数据；
/// - `Closed`：会话已关闭（本端发出或对端送达关闭记录）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    BufferUnderflow,
    BufferOverflow,
    Closed,
}

/// wrap/unwrap 的完整结果：状态、后继阶段与两个方向的字节计数。
#[derive(Clone, Copy, Debug)]
pub struct EngineResult {
    /// 本次操作的状态结论。
    pub status: EngineStatus,
    /// 操作后的握手阶段。
    pub phase: HandshakePhase,
    /// 从输入区间消费的字节数。
    pub consumed: usize,
    /// 写入输出区间的字节数。
    pub produced: usize,
}

/// 会话协商出的缓冲区尺寸。
///
/// 通道适配层据此一次性分配四个缓冲区域，此后永不扩容。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    /// 单条记录可承载的最大明文字节数。
    pub application_buffer: usize,
    /// 单条记录在线路上的最大字节数（含头部与加密膨胀）。
    pub record_buffer: usize,
}

/// 引擎委托出的待执行工作项（如证书校验等昂贵同步操作）。
///
/// # 契约说明（What）
/// - `execute` 在调用线程上同步运行；失败必须以错误返回而非 panic；
/// - 任务执行完毕后，调用方需重新查询 [`TlsEngine::handshake_phase`]
///   获取后继阶段。
pub trait DelegatedTask: Send {
    /// 同步执行任务。
    fn execute(&mut self) -> Result<(), CoreError>;
}

/// 记录式加密引擎契约。
///
/// # 设计动机（Why）
/// - 把“密码学变换”与“传输驱动”彻底分离：引擎只负责明文与记录之间的
///   变换并维护握手阶段，不触碰任何套接字；
/// - 以对象安全的 trait 表达，生产实现与测试桩（脚本化引擎）可以互换，
///   通道适配层的状态机得以在无真实密码学的环境下被精确验证。
///
/// # 核心契约（What）
/// - `wrap`：把 `src` 中的明文封装为至多一条记录写入 `dst`；握手期间
///   `src` 为空，产物为握手记录；
/// - `unwrap`：从 `src` 中解析记录并把明文写入 `dst`；`consumed` 告知
///   调用方可以释放多少输入；
/// - 两个方法均为部分消费语义：调用方依据 [`EngineResult`] 的计数推进
///   自己的缓冲区游标，未消费的字节必须保留；
/// - `next_task`：取出一个待执行任务；队列为空返回 `None`；
/// - `close_outbound`：令会话失效并安排发出关闭记录，随后的 wrap 以
///   [`EngineStatus::Closed`] 返回关闭记录产物；
/// - `buffered_plaintext`：引擎内部尚未交付的已解密明文字节数；实现若
///   不在内部缓存明文可使用默认值 `0`。
///
/// # 风险提示（Trade-offs）
/// - 引擎实现不要求线程安全（`&mut self`），由持有方负责串行化；
/// - 错误一律以 [`CoreError`] 表达，致命错误之后引擎不保证可继续使用。
pub trait TlsEngine: Send {
    /// 启动握手。
    fn begin_handshake(&mut self) -> Result<(), CoreError>;

    /// 查询当前握手阶段。
    fn handshake_phase(&self) -> HandshakePhase;

    /// 把明文封装为记录。
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, CoreError>;

    /// 把记录还原为明文。
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, CoreError>;

    /// 取出一个待执行的委托任务。
    fn next_task(&mut self) -> Option<Box<dyn DelegatedTask>>;

    /// 令会话失效并安排发出关闭记录。
    fn close_outbound(&mut self);

    /// 协商出的缓冲区尺寸。
    fn session_limits(&self) -> SessionLimits;

    /// 引擎内部缓存的、尚未交付调用方的明文字节数。
    fn buffered_plaintext(&self) -> usize {
        0
    }
}
