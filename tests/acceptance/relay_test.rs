//! End-to-end relay processor tests.

use super::common::{
    collaborators, recv_datagrams, relay_table, wait_for, ForwardingEngine, NullNetIo, Pass,
    RecordingEngine, TimerDriver,
};
use relay_common::config::SchedulerConfig;
use relay_common::error::RelayError;
use relay_common::metrics::{PhaseSample, PhaseSink};
use relay_common::stats::CounterStore;
use relay_runtime::{RelayProcessor, SessionRegistry, UdpNetIo};
use std::io::Write;
use std::net::UdpSocket;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> SchedulerConfig {
    SchedulerConfig {
        nominal_cycle_rate: 1000,
        max_tick_rate: 100,
        thread_name: "relay-acceptance".into(),
        ..Default::default()
    }
}

#[test]
fn test_first_tick_is_baseline() {
    let (engine, calls) = RecordingEngine::new();
    let (ctx, _store, wakeups) = collaborators(0usize, Arc::new(SessionRegistry::new()));
    let processor = RelayProcessor::new(&config(), engine, ctx, || Ok(NullNetIo)).unwrap();

    processor.wakeup(1, 100);
    processor.wakeup(2, 107);
    assert!(wait_for(TIMEOUT, || processor.iterations() == 1));
    processor.shutdown();

    let calls = calls.lock().unwrap();
    let primaries: Vec<_> = calls
        .iter()
        .filter(|(pass, _)| *pass == Pass::Primary)
        .filter_map(|(_, tick)| *tick)
        .collect();
    assert_eq!(primaries.len(), 1);
    // 7 cycles is less than one packet tick: clamped to one
    assert_eq!(primaries[0].ndrain, 1);
    // 107 % 7 != 0 and no alarm: fast path
    assert!(!primaries[0].full_path);
    assert_eq!(calls[0].0, Pass::SecondaryOnly);
    assert_eq!(wakeups.load(Ordering::Relaxed), 1);
}

#[test]
fn test_no_engine_work_after_shutdown() {
    let (engine, calls) = RecordingEngine::new();
    let (ctx, _store, _wakeups) = collaborators(1usize, Arc::new(SessionRegistry::new()));
    let processor = RelayProcessor::new(&config(), engine, ctx, || Ok(NullNetIo)).unwrap();

    processor.wakeup(1, 0);
    for i in 2..50 {
        processor.wakeup(i, i64::from(i) * 10);
    }
    processor.shutdown();

    let seen = calls.lock().unwrap().len();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.lock().unwrap().len(), seen);
    // Every primary pass is followed by the outbound pass
    let outbound = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(pass, _)| *pass == Pass::Outbound)
        .count();
    let primary = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(pass, _)| *pass == Pass::Primary)
        .count();
    assert_eq!(outbound, primary);
}

#[test]
fn test_terminate_burst_shuts_down_promptly() {
    let (engine, _calls) = RecordingEngine::new();
    let (ctx, _store, _wakeups) = collaborators(0usize, Arc::new(SessionRegistry::new()));
    let processor = RelayProcessor::new(&config(), engine, ctx, || Ok(NullNetIo)).unwrap();

    for i in 0..5000 {
        processor.wakeup(i, i64::from(i));
    }
    let started = Instant::now();
    processor.shutdown();
    assert!(started.elapsed() < TIMEOUT);
}

#[test]
fn test_udp_relay_forwards_packets() {
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let registry = Arc::new(SessionRegistry::new());
    let table = relay_table(peer.local_addr().unwrap(), 2, &registry);
    let targets: Vec<_> = table.primary.iter().map(|leg| leg.local_addr()).collect();

    let (ctx, store, _wakeups) = collaborators(table, Arc::clone(&registry));
    let processor = Arc::new(
        RelayProcessor::new(&config(), ForwardingEngine::default(), ctx, || {
            UdpNetIo::bind("127.0.0.1:0")
        })
        .unwrap(),
    );
    let timer = TimerDriver::start(Arc::clone(&processor), Duration::from_millis(1), 10);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    for i in 0..20u8 {
        let target = targets[usize::from(i) % targets.len()];
        sender.send_to(&[0x80, i, 0, 0], target).unwrap();
    }

    let received = recv_datagrams(&peer, 20, TIMEOUT);
    assert!(timer.stop() > 0);
    assert_eq!(received.len(), 20);
    let mut seqs: Vec<u8> = received.iter().map(|p| p[1]).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..20).collect::<Vec<_>>());

    assert!(wait_for(TIMEOUT, || store.get("npkts_relayed") == Some(20)));
    assert_eq!(store.get("npkts_rcvd"), Some(20));
    assert_eq!(store.get("npkts_discard"), Some(0));

    let processor = Arc::try_unwrap(processor).unwrap();
    assert!(wait_for(TIMEOUT, || {
        processor.netio().map(UdpNetIo::packets_sent) == Some(20)
    }));
    processor.shutdown();
}

#[test]
fn test_secondary_legs_serviced_on_full_path() {
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let registry = Arc::new(SessionRegistry::new());
    let table = relay_table(peer.local_addr().unwrap(), 1, &registry);
    let control = table.secondary[0].local_addr();

    let engine = ForwardingEngine::default();
    let secondary_passes = Arc::clone(&engine.secondary_passes);
    let (ctx, store, _wakeups) = collaborators(table, registry);
    let processor = Arc::new(
        RelayProcessor::new(&config(), engine, ctx, || UdpNetIo::bind("127.0.0.1:0")).unwrap(),
    );
    // One packet tick per wakeup, so every 7th wakeup lands on a full path
    let timer = TimerDriver::start(Arc::clone(&processor), Duration::from_millis(1), 1);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"rtcp", control).unwrap();

    let received = recv_datagrams(&peer, 1, TIMEOUT);
    timer.stop();
    assert_eq!(received, vec![b"rtcp".to_vec()]);
    assert!(secondary_passes.load(Ordering::Relaxed) > 0);
    assert!(wait_for(TIMEOUT, || store.get("npkts_relayed") == Some(1)));
}

#[test]
fn test_unknown_counter_aborts_construction() {
    let (engine, calls) = RecordingEngine::new();
    let (mut ctx, _store, _wakeups) = collaborators(0usize, Arc::new(SessionRegistry::new()));
    ctx.store = Arc::new(CounterStore::with_names(vec![
        "npkts_rcvd",
        "npkts_played",
        "npkts_relayed",
    ]));

    let err = RelayProcessor::new(&config(), engine, ctx, || Ok(NullNetIo)).unwrap_err();
    assert_eq!(err, RelayError::UnknownCounter("npkts_resizer_in".into()));
    assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn test_netio_bind_failure_aborts_construction() {
    let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();
    let (engine, _calls) = RecordingEngine::new();
    let (ctx, _store, _wakeups) = collaborators(0usize, Arc::new(SessionRegistry::new()));

    let err = RelayProcessor::new(&config(), engine, ctx, || UdpNetIo::bind(addr)).unwrap_err();
    assert!(matches!(err, RelayError::NetIo(_)));
}

#[test]
fn test_config_file_drives_processor() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
nominal_cycle_rate = 2000
max_tick_rate = 100
alarm_interval = "250ms"
queue_capacity = 16
thread_name = "relay-from-file"

[observability]
enabled = true
report_every = 10
"#
    )
    .unwrap();

    let config = SchedulerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.cycles_per_tick(), 20);

    struct Collect(Mutex<Vec<PhaseSample>>);
    impl PhaseSink for Collect {
        fn record(&self, sample: &PhaseSample) {
            self.0.lock().unwrap().push(*sample);
        }
    }
    let sink = Arc::new(Collect(Mutex::new(Vec::new())));

    let (engine, _calls) = RecordingEngine::new();
    let (ctx, _store, _wakeups) = collaborators(0usize, Arc::new(SessionRegistry::new()));
    let ctx = ctx.with_phase_sink(Arc::clone(&sink) as Arc<dyn PhaseSink>);
    let processor = RelayProcessor::new(&config, engine, ctx, || Ok(NullNetIo)).unwrap();

    processor.wakeup(1, 0);
    processor.wakeup(2, 100);
    assert!(wait_for(TIMEOUT, || processor.iterations() == 1));
    processor.shutdown();

    let samples = sink.0.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].ndrain, 5);
    assert_eq!(samples[0].cycle_counter, 100);
    assert!(samples[0].timings.wait >= 0.0);
}
