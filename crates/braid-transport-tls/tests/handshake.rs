//! 握手状态机行为验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：以脚本化引擎精确驱动握手状态机的每一条路径：
//!   封装后紧接解包的衔接节奏、部分冲刷的重试、欠载时回传输层取数、
//!   委托任务的执行与失败传播、截止/取消与传输中断的失败语义。
//! - **设计手法 (How)**：对端的飞行字节是确定性的，测试将其预置进内存
//!   通道后即可在单线程内驱动完整握手；传输读写上限用于逼出部分写与
//!   欠载分支；双线程场景只用于验证一对适配层的真实互通。
//! - **契约边界 (What)**：所有断言只依赖公开接口（构造结果、错误码、
//!   传输读写计数与线路字节），不窥探适配层内部状态。

use std::thread;
use std::time::Duration;

use braid_core::contract::{CallContext, Cancellation, Deadline};
use braid_core::transport::{ByteChannel, ReadOutcome};
use braid_transport_tls::test_stubs::{
    self, EngineRole, MemoryChannel, ScriptedEngine, ScriptedEngineConfig,
};
use braid_transport_tls::{AdapterState, TlsChannel, codes};

fn ctx_with_deadline(ms: u64) -> CallContext {
    CallContext::builder()
        .with_deadline(Deadline::after(Duration::from_millis(ms)))
        .build()
}

#[test]
fn client_handshake_completes_with_preloaded_flights() {
    let transport = MemoryChannel::new();
    let probe = transport.clone();
    probe.push_inbound(&test_stubs::handshake_flights(EngineRole::Server, 2));

    let channel = TlsChannel::wrap(
        &ctx_with_deadline(2000),
        transport,
        Box::new(ScriptedEngine::client()),
    )
    .expect("预置对端飞行后握手应当完成");

    assert_eq!(channel.state(), AdapterState::Open);
    assert!(channel.is_open());
    assert_eq!(
        probe.take_outbound(),
        test_stubs::handshake_flights(EngineRole::Client, 2),
        "客户端应按序发出自己的全部飞行"
    );
}

#[test]
fn wrap_chains_directly_into_unwrap() {
    // 两条服务端飞行在第一次传输读中一并到达：第二轮解包必须复用缓冲
    // 中的残留记录，而不是再次回到传输层。
    let transport = MemoryChannel::new();
    let probe = transport.clone();
    probe.push_inbound(&test_stubs::handshake_flights(EngineRole::Server, 2));

    TlsChannel::wrap(
        &ctx_with_deadline(2000),
        transport,
        Box::new(ScriptedEngine::client()),
    )
    .expect("握手应当完成");

    assert_eq!(probe.read_calls(), 1, "全部对端飞行应在一次传输读中取回");
    assert_eq!(probe.write_calls(), 2, "两条本端飞行各对应一次传输写");
}

#[test]
fn partial_flush_is_retried_until_complete() {
    let transport = MemoryChannel::new();
    let probe = transport.clone();
    probe.push_inbound(&test_stubs::handshake_flights(EngineRole::Server, 2));
    // 传输每次只接受一个字节：冲刷必须重试而不是放弃握手。
    probe.set_write_limit(Some(1));

    TlsChannel::wrap(
        &ctx_with_deadline(2000),
        transport,
        Box::new(ScriptedEngine::client()),
    )
    .expect("部分写不应使握手失败");

    assert_eq!(
        probe.take_outbound(),
        test_stubs::handshake_flights(EngineRole::Client, 2),
        "重试冲刷后线路字节仍应完整有序"
    );
    assert!(probe.write_calls() >= 12, "逐字节冲刷应产生多次传输写");
}

#[test]
fn underflow_goes_back_to_transport_for_more_bytes() {
    let transport = MemoryChannel::new();
    let probe = transport.clone();
    probe.push_inbound(&test_stubs::handshake_flights(EngineRole::Server, 2));
    // 传输每次只交付一个字节，解包会反复欠载。
    probe.set_read_limit(Some(1));

    TlsChannel::wrap(
        &ctx_with_deadline(2000),
        transport,
        Box::new(ScriptedEngine::client()),
    )
    .expect("欠载应被视为“还需要输入”而不是失败");

    assert!(probe.read_calls() >= 12, "逐字节交付应产生多次传输读");
}

#[test]
fn delegated_tasks_run_during_handshake() {
    let transport = MemoryChannel::new();
    transport.push_inbound(&test_stubs::handshake_flights(EngineRole::Server, 2));

    let mut config = ScriptedEngineConfig::new(EngineRole::Client);
    config.task_after_flights = vec![1];
    let engine = ScriptedEngine::with_config(config);
    let tasks = engine.task_counter();

    TlsChannel::wrap(&ctx_with_deadline(2000), transport, Box::new(engine))
        .expect("携带委托任务的握手应当完成");

    assert_eq!(
        tasks.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "第一条对端飞行之后应执行一次委托任务"
    );
}

#[test]
fn failing_delegated_task_fails_handshake() {
    let transport = MemoryChannel::new();
    transport.push_inbound(&test_stubs::handshake_flights(EngineRole::Server, 2));

    let mut config = ScriptedEngineConfig::new(EngineRole::Client);
    config.task_after_flights = vec![1];
    config.fail_task = true;
    let engine = ScriptedEngine::with_config(config);

    let err = TlsChannel::wrap(&ctx_with_deadline(2000), transport, Box::new(engine))
        .expect_err("任务失败必须使握手失败");
    assert_eq!(err.code(), codes::HANDSHAKE);
    assert!(err.cause().is_some(), "任务失败的根因应被保留");
}

#[test]
fn transport_eof_mid_handshake_is_fatal() {
    let transport = MemoryChannel::new();
    transport.mark_inbound_eof();

    let err = TlsChannel::wrap(
        &ctx_with_deadline(2000),
        transport,
        Box::new(ScriptedEngine::client()),
    )
    .expect_err("对端中断必须使握手失败");
    assert_eq!(err.code(), codes::HANDSHAKE);
}

#[test]
fn silent_peer_trips_handshake_deadline() {
    // 对端永不应答：截止时间必须将握手从等待中解救出来。
    let transport = MemoryChannel::new();

    let err = TlsChannel::wrap(
        &ctx_with_deadline(50),
        transport,
        Box::new(ScriptedEngine::client()),
    )
    .expect_err("无应答的握手应在截止点失败");
    assert_eq!(err.code(), codes::HANDSHAKE_TIMEOUT);
}

#[test]
fn cancelled_context_fails_fast() {
    let cancellation = Cancellation::new();
    cancellation.cancel();
    let ctx = CallContext::builder()
        .with_cancellation(cancellation)
        .build();

    let err = TlsChannel::wrap(
        &ctx,
        MemoryChannel::new(),
        Box::new(ScriptedEngine::client()),
    )
    .expect_err("已取消的上下文不应进入握手");
    assert_eq!(err.code(), codes::CANCELLED);
}

#[test]
fn resumed_session_skips_handshake() {
    let transport = MemoryChannel::new();
    let probe = transport.clone();
    let mut config = ScriptedEngineConfig::new(EngineRole::Client);
    config.resumed = true;

    let channel = TlsChannel::wrap(
        &ctx_with_deadline(2000),
        transport,
        Box::new(ScriptedEngine::with_config(config)),
    )
    .expect("会话恢复不需要任何握手交换");

    assert_eq!(channel.state(), AdapterState::Open);
    assert_eq!(probe.read_calls(), 0);
    assert_eq!(probe.write_calls(), 0);
}

#[test]
fn server_handshake_finishes_on_final_wrap() {
    let transport = MemoryChannel::new();
    let probe = transport.clone();
    probe.push_inbound(&test_stubs::handshake_flights(EngineRole::Client, 2));

    TlsChannel::wrap(
        &ctx_with_deadline(2000),
        transport,
        Box::new(ScriptedEngine::server()),
    )
    .expect("服务端握手应当完成");

    assert_eq!(
        probe.take_outbound(),
        test_stubs::handshake_flights(EngineRole::Server, 2)
    );
}

/// 以退让重试把“暂无数据”轮询成一次成功读取。
fn read_blocking<C: ByteChannel>(
    channel: &TlsChannel<C>,
    ctx: &CallContext,
    dst: &mut [u8],
) -> usize {
    loop {
        match channel.read(ctx, dst).expect("读取不应出错") {
            ReadOutcome::Bytes(n) => return n,
            ReadOutcome::NoData => thread::yield_now(),
            ReadOutcome::EndOfStream => panic!("对端不应在此场景关闭"),
        }
    }
}

#[test]
fn paired_adapters_handshake_and_roundtrip() {
    let (client_end, server_end) = MemoryChannel::pair();

    let server = thread::spawn(move || {
        let ctx = ctx_with_deadline(5000);
        let channel = TlsChannel::wrap(&ctx, server_end, Box::new(ScriptedEngine::server()))
            .expect("服务端握手应当完成");
        let mut buf = [0u8; 1024];
        let n = read_blocking(&channel, &ctx, &mut buf);
        let mut written = 0;
        while written < n {
            written += channel.write(&ctx, &buf[written..n]).expect("回写不应出错");
        }
    });

    let ctx = ctx_with_deadline(5000);
    let channel = TlsChannel::wrap(&ctx, client_end, Box::new(ScriptedEngine::client()))
        .expect("客户端握手应当完成");

    let payload = b"braid paired roundtrip";
    let mut sent = 0;
    while sent < payload.len() {
        sent += channel.write(&ctx, &payload[sent..]).expect("写入不应出错");
    }
    let mut buf = [0u8; 1024];
    let mut got = 0;
    while got < payload.len() {
        got += read_blocking(&channel, &ctx, &mut buf[got..]);
    }
    assert_eq!(&buf[..got], payload, "往返后的明文必须逐字节一致");

    server.join().expect("服务端线程不应恐慌");
}
