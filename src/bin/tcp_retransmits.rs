//! TCP 重传时序一致性测试
//!
//! 对仿真 DUT 运行重传测试：建连、一次数据往返后停止确认，检查同一段的
//! 重传间隔是否按指数退避增长。通过退出码 0，失败退出码 1 并在 stderr 给出原因。

use clap::Parser;
use packetbench_rs::config::BenchConfig;
use packetbench_rs::dut::simulated::SimTestbed;
use packetbench_rs::engine::Connection;
use packetbench_rs::error::Result;
use packetbench_rs::oracle::Tolerance;
use packetbench_rs::peer::{Endpoint, PeerState};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "tcp-retransmits", about = "检查 DUT 的重传是否按指数间隔到达")]
struct Args {
    /// 配置文件（JSON）；命令行参数覆盖其中的同名字段
    #[arg(long)]
    config: Option<PathBuf>,

    /// 单向链路时延（微秒）
    #[arg(long)]
    latency_us: Option<u64>,

    /// DUT 初始 RTO（毫秒）
    #[arg(long)]
    initial_rto_ms: Option<u64>,

    /// DUT 每次超时的 RTO 乘数；合规实现为 2
    #[arg(long)]
    backoff: Option<f64>,

    /// 等待的重传次数（第一次用于测量初始 RTO）
    #[arg(long)]
    retransmits: Option<usize>,

    /// 间隔下限策略：start-rto | add:<ms> | mul:<factor>
    #[arg(long)]
    tolerance: Option<Tolerance>,

    /// DUT 丢弃所有入站帧
    #[arg(long, default_value_t = false)]
    blackhole: bool,

    /// 输出测试过程 JSON；不填则不生成
    #[arg(long)]
    report_json: Option<PathBuf>,
}

fn resolve(args: &Args) -> Result<BenchConfig> {
    let mut cfg = match &args.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };
    if args.latency_us.is_some() {
        cfg.sim.latency_us = args.latency_us;
    }
    if args.initial_rto_ms.is_some() {
        cfg.sim.initial_rto_ms = args.initial_rto_ms;
    }
    if args.backoff.is_some() {
        cfg.sim.backoff = args.backoff;
    }
    if args.retransmits.is_some() {
        cfg.retransmit.retransmits = args.retransmits;
    }
    if args.tolerance.is_some() {
        cfg.retransmit.tolerance = args.tolerance;
    }
    if args.blackhole {
        cfg.sim.blackhole = Some(true);
    }
    Ok(cfg)
}

fn run(args: &Args) -> Result<()> {
    let cfg = resolve(args)?;
    let test = cfg.retransmit_test()?;
    let bed = SimTestbed::new(cfg.sim_dut()?);
    let mut dut = bed.dut();

    // 远端端口在监听建立后才确定，这里先占位
    let local = cfg.peer_endpoint();
    let peer = PeerState::initial(local, Endpoint::new(bed.dut_addr(), 0));
    let mut conn = Connection::new(peer, bed.wire(), bed.wire(), bed.clock());

    let result = test.run(&mut dut, &mut conn);

    if let Some(path) = &args.report_json {
        conn.report().write_json(path)?;
        eprintln!("wrote report to {}", path.display());
    }

    let outcome = result?;
    println!("PASS start_rto={} probes={}", outcome.start_rto, outcome.probes.len());
    for p in &outcome.probes {
        println!(
            "probe {} interval={} lower={} upper={}",
            p.probe, p.elapsed, p.window.lower, p.window.upper
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("FAIL: {e}");
            ExitCode::FAILURE
        }
    }
}
