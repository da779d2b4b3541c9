//! 稳态读写、背压与关闭语义验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：握手完成后的通道必须满足字节通道契约的全部
//!   细节：写入返回的是消费的明文字节数而非线路字节数；出站单槽在部分
//!   写之后以 `0` 施加背压；读取严格区分“暂无数据”“流结束”与“缓冲中
//!   残留的记录”；关闭恰好发出一条关闭记录且之后的调用行为可预期。
//! - **设计手法 (How)**：脚本化引擎是记录原子的空载密码，线路字节可以
//!   直接与 [`test_stubs::frame_data`] 的产物比对；内存通道的写上限用来
//!   制造部分写与完全背压。

use std::time::Duration;

use braid_core::contract::{CallContext, Deadline};
use braid_core::transport::{ByteChannel, ReadOutcome};
use braid_transport_tls::test_stubs::{
    self, EngineRole, MemoryChannel, ScriptedEngine, ScriptedEngineConfig,
};
use braid_transport_tls::{AdapterState, TlsChannel, codes};

fn ctx() -> CallContext {
    CallContext::builder()
        .with_deadline(Deadline::after(Duration::from_secs(2)))
        .build()
}

/// 构造一个握手已完成的适配层，返回通道与传输探针（握手字节已清空）。
fn established(
    role: EngineRole,
    tweak: impl FnOnce(&mut ScriptedEngineConfig),
) -> (TlsChannel<MemoryChannel>, MemoryChannel) {
    let transport = MemoryChannel::new();
    let probe = transport.clone();
    probe.push_inbound(&test_stubs::handshake_flights(
        match role {
            EngineRole::Client => EngineRole::Server,
            EngineRole::Server => EngineRole::Client,
        },
        2,
    ));
    let mut config = ScriptedEngineConfig::new(role);
    tweak(&mut config);
    let channel = TlsChannel::wrap(
        &ctx(),
        transport,
        Box::new(ScriptedEngine::with_config(config)),
    )
    .expect("握手应当完成");
    probe.take_outbound();
    (channel, probe)
}

#[test]
fn write_returns_plaintext_count_not_wire_count() {
    let (channel, probe) = established(EngineRole::Client, |_| {});

    let consumed = channel.write(&ctx(), b"hello").expect("写入不应出错");
    assert_eq!(consumed, 5, "返回值是消费的明文字节数");
    assert_eq!(
        probe.take_outbound(),
        test_stubs::frame_data(b"hello"),
        "线路上应是带头部的完整记录"
    );
}

#[test]
fn oversized_write_is_consumed_in_record_sized_chunks() {
    let (channel, probe) = established(EngineRole::Client, |config| {
        config.max_plaintext = 8;
    });

    let consumed = channel.write(&ctx(), b"0123456789").expect("写入不应出错");
    assert_eq!(consumed, 8, "单次封装至多一条记录的载荷");
    assert_eq!(probe.take_outbound(), test_stubs::frame_data(b"01234567"));
}

#[test]
fn single_write_yields_single_record_and_single_read() {
    // 5000 字节明文、16384 字节协商上限：恰好一次封装、一条记录、
    // 一次传输写；对端一次读取即可取回全部 5000 字节。
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let (sender, sender_probe) = established(EngineRole::Client, |config| {
        config.max_plaintext = 16 * 1024;
    });

    let writes_before = sender_probe.write_calls();
    let consumed = sender.write(&ctx(), &payload).expect("写入不应出错");
    assert_eq!(consumed, 5000);
    assert_eq!(
        sender_probe.write_calls() - writes_before,
        1,
        "一条记录对应一次传输写"
    );

    let wire = sender_probe.take_outbound();
    assert_eq!(wire.len(), 5000 + test_stubs::RECORD_HEADER_LEN);

    let (receiver, receiver_probe) = established(EngineRole::Server, |config| {
        config.max_plaintext = 16 * 1024;
    });
    receiver_probe.push_inbound(&wire);
    let mut buf = vec![0u8; 16 * 1024];
    match receiver.read(&ctx(), &mut buf).expect("读取不应出错") {
        ReadOutcome::Bytes(n) => {
            assert_eq!(n, 5000, "单次读取应交付整条记录的明文");
            assert_eq!(&buf[..n], &payload[..], "明文必须逐字节一致");
        }
        other => panic!("期望读到数据，实际为 {other:?}"),
    }
}

#[test]
fn backpressure_returns_zero_and_preserves_order() {
    let (channel, probe) = established(EngineRole::Client, |_| {});

    // 传输完全背压：记录被封装但一个字节都送不出去。
    probe.set_write_limit(Some(0));
    let first = channel.write(&ctx(), b"first").expect("写入不应出错");
    assert_eq!(first, 5, "明文已被消费，记录滞留在出站缓冲");
    assert_eq!(probe.outbound_len(), 0);

    // 出站槽被占用：后续写入必须返回 0 且不得改动缓冲状态。
    let second = channel.write(&ctx(), b"second").expect("写入不应出错");
    assert_eq!(second, 0, "背压信号");
    assert_eq!(probe.outbound_len(), 0);

    // 传输恢复：滞留记录先被排空，新明文随后被接受。
    probe.set_write_limit(None);
    let third = channel.write(&ctx(), b"second").expect("写入不应出错");
    assert_eq!(third, 6);
    let mut expected = test_stubs::frame_data(b"first");
    expected.extend_from_slice(&test_stubs::frame_data(b"second"));
    assert_eq!(probe.take_outbound(), expected, "记录顺序必须保持写入顺序");
}

#[test]
fn read_distinguishes_no_data_from_end_of_stream() {
    let (channel, probe) = established(EngineRole::Client, |_| {});
    let mut buf = [0u8; 64];

    assert_eq!(
        channel.read(&ctx(), &mut buf).expect("读取不应出错"),
        ReadOutcome::NoData,
        "传输暂无数据且缓冲无残留时透传 NoData"
    );

    probe.mark_inbound_eof();
    assert_eq!(
        channel.read(&ctx(), &mut buf).expect("读取不应出错"),
        ReadOutcome::EndOfStream,
        "对端结束且无残留时透传流结束"
    );
}

#[test]
fn staged_records_are_served_after_transport_drains() {
    let (channel, probe) = established(EngineRole::Client, |_| {});
    probe.push_inbound(&test_stubs::frame_data(b"alpha"));
    probe.push_inbound(&test_stubs::frame_data(b"beta"));

    // 目标缓冲恰好容纳第一条记录：第二条整记录滞留在入站缓冲。
    let mut small = [0u8; 5];
    assert_eq!(
        channel.read(&ctx(), &mut small).expect("读取不应出错"),
        ReadOutcome::Bytes(5)
    );
    assert_eq!(&small, b"alpha");

    // 传输已被取空，但滞留的记录仍必须交付而不是误报 NoData。
    let mut buf = [0u8; 64];
    assert_eq!(
        channel.read(&ctx(), &mut buf).expect("读取不应出错"),
        ReadOutcome::Bytes(4)
    );
    assert_eq!(&buf[..4], b"beta");

    assert_eq!(
        channel.read(&ctx(), &mut buf).expect("读取不应出错"),
        ReadOutcome::NoData
    );
}

#[test]
fn undersized_destination_with_no_progress_is_an_error() {
    let (channel, probe) = established(EngineRole::Client, |_| {});
    probe.push_inbound(&test_stubs::frame_data(b"abcdef"));

    let mut tiny = [0u8; 3];
    let err = channel
        .read(&ctx(), &mut tiny)
        .expect_err("零产出的溢出必须显式报错而不是静默丢数据");
    assert_eq!(err.code(), codes::UNDERSIZED_READ_BUFFER);
}

#[test]
fn partial_record_then_eof_reports_end_of_stream() {
    let (channel, probe) = established(EngineRole::Client, |_| {});
    let frame = test_stubs::frame_data(b"tail");
    probe.push_inbound(&frame[..2]);

    let mut buf = [0u8; 64];
    assert_eq!(
        channel.read(&ctx(), &mut buf).expect("读取不应出错"),
        ReadOutcome::NoData,
        "半条记录解不出明文，等待更多输入"
    );

    probe.mark_inbound_eof();
    assert_eq!(
        channel.read(&ctx(), &mut buf).expect("读取不应出错"),
        ReadOutcome::EndOfStream,
        "残片永远无法补全时透传流结束"
    );
}

#[test]
fn close_emits_close_record_and_seals_the_channel() {
    let (channel, probe) = established(EngineRole::Client, |_| {});

    channel.close(&ctx()).expect("关闭不应出错");
    assert_eq!(probe.take_outbound(), test_stubs::close_record());
    assert_eq!(channel.state(), AdapterState::Closed);
    assert!(!channel.is_open());

    let mut buf = [0u8; 16];
    assert_eq!(
        channel.read(&ctx(), &mut buf).expect("关闭后的读取返回流结束"),
        ReadOutcome::EndOfStream
    );
    let err = channel
        .write(&ctx(), b"late")
        .expect_err("关闭后的写入必须失败");
    assert_eq!(err.code(), codes::CHANNEL_CLOSED);
}

#[test]
fn double_close_is_a_guarded_noop() {
    let (channel, probe) = established(EngineRole::Client, |_| {});

    channel.close(&ctx()).expect("首次关闭不应出错");
    let wire_after_first = probe.take_outbound();
    assert_eq!(wire_after_first, test_stubs::close_record());

    channel.close(&ctx()).expect("重复关闭应保持无害");
    assert_eq!(probe.outbound_len(), 0, "重复关闭不得再产生线路字节");
}

#[test]
fn close_flushes_pending_record_before_close_notify() {
    let (channel, probe) = established(EngineRole::Client, |_| {});

    probe.set_write_limit(Some(0));
    assert_eq!(channel.write(&ctx(), b"data").expect("写入不应出错"), 4);
    probe.set_write_limit(None);

    channel.close(&ctx()).expect("关闭不应出错");
    let mut expected = test_stubs::frame_data(b"data");
    expected.extend_from_slice(&test_stubs::close_record());
    assert_eq!(
        probe.take_outbound(),
        expected,
        "滞留的应用记录先于关闭记录送出"
    );
}

#[test]
fn peer_close_record_surfaces_as_protocol_error() {
    let (channel, probe) = established(EngineRole::Client, |_| {});
    probe.push_inbound(&test_stubs::close_record());

    let mut buf = [0u8; 16];
    let err = channel
        .read(&ctx(), &mut buf)
        .expect_err("稳态中收到关闭记录按协议违规处理");
    assert_eq!(err.code(), codes::PROTOCOL);
}

#[test]
fn empty_write_is_a_cheap_noop() {
    let (channel, probe) = established(EngineRole::Client, |_| {});
    assert_eq!(channel.write(&ctx(), b"").expect("空写入不应出错"), 0);
    assert_eq!(probe.outbound_len(), 0);
}
