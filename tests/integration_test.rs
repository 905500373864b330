use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskpipe::{Args, Config, LogSink, RecordingSink, Task, TaskManager, Value};

fn manager(threads: usize, capacity: usize) -> (Arc<TaskManager>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let config = Config {
        threads,
        queue_capacity: Some(capacity),
        data_path: None,
    };
    let manager = TaskManager::new(&config).unwrap().with_sink(sink.clone());
    (Arc::new(manager), sink)
}

/// Task that records every argument it receives
fn collector(manager: &Arc<TaskManager>, name: &str) -> (Task, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = seen.clone();
    let task = Task::new(manager, name, move |_, args| {
        store.lock().push(args.into_first().unwrap_or_default());
        Ok(Value::unit())
    });
    (task, seen)
}

fn sorted_i64(values: &[Value]) -> Vec<i64> {
    let mut out: Vec<i64> = values.iter().filter_map(Value::as_i64).collect();
    out.sort_unstable();
    out
}

#[test]
fn test_every_submission_executes_once() {
    let (m, _) = manager(4, 8);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let task = Task::new(&m, "count", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::unit())
    });

    for _ in 0..100 {
        task.queue(()).unwrap();
    }
    task.wait();

    assert_eq!(calls.load(Ordering::SeqCst), 100);
    assert_eq!(m.stats().submitted, 100);
    assert_eq!(m.stats().succeeded, 100);
    assert_eq!(m.unfinished(), 0);
}

#[test]
fn test_double_scenario() {
    let (m, _) = manager(3, 10);
    let outputs = Arc::new(Mutex::new(Vec::new()));
    let store = outputs.clone();
    let double = Task::new(&m, "double", move |_, args| {
        let x = args.require(0)?.try_i64()?;
        store.lock().push(x * 2);
        Ok(Value::from(x * 2))
    });

    for x in 1..=5 {
        double.queue(Args::one(x)).unwrap();
    }
    double.wait();

    let mut outputs = outputs.lock().clone();
    outputs.sort_unstable();
    assert_eq!(outputs, vec![2, 4, 6, 8, 10]);
}

#[test]
fn test_chain_forwards_each_success_once() {
    let (m, _) = manager(4, 16);
    let square = Task::new(&m, "square", |_, args| {
        let x = args.require(0)?.try_i64()?;
        if x == 3 {
            anyhow::bail!("three is unlucky");
        }
        Ok(Value::from(x * x))
    });
    let (sink, seen) = collector(&m, "sink");
    square.chain(&sink);

    for x in 1..=4 {
        square.queue(Args::one(x)).unwrap();
    }
    square.wait();

    assert_eq!(sorted_i64(&seen.lock()), vec![1, 4, 16]);
}

#[test]
fn test_direct_call_notifies_chain() {
    let (m, _) = manager(2, 4);
    let source = Task::new(&m, "source", |_, _| Ok(Value::from(7)));
    let (sink, seen) = collector(&m, "sink");
    source.chain(&sink);

    let value = source.call(());
    assert_eq!(value.and_then(|v| v.as_i64()), Some(7));

    m.wait();
    assert_eq!(sorted_i64(&seen.lock()), vec![7]);
}

#[test]
fn test_pipe_splits_list() {
    let (m, _) = manager(2, 8);
    let source = Task::new(&m, "source", |_, _| Ok(Value::list(vec![1, 2, 3])));
    let (sink, seen) = collector(&m, "sink");
    source.pipe(&sink);

    source.run(()).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|v| !v.is_iterable()));
    assert_eq!(sorted_i64(&seen), vec![1, 2, 3]);
}

#[test]
fn test_chain_forwards_list_whole() {
    let (m, _) = manager(2, 8);
    let source = Task::new(&m, "source", |_, _| Ok(Value::list(vec![1, 2, 3])));
    let (sink, seen) = collector(&m, "sink");
    source.chain(&sink);

    source.run(()).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].as_json(), Some(&serde_json::json!([1, 2, 3])));
}

#[test]
fn test_stream_pipeline_scenario() {
    let (m, _) = manager(4, 32);
    let source = Task::new(&m, "source", |_, _| Ok(Value::stream(0..10i64)));
    let modifier = Task::new(&m, "modifier", |_, args| {
        Ok(Value::from(args.require(0)?.try_f64()? + 0.1))
    });
    let (sink, seen) = collector(&m, "collector");

    source.pipe(&modifier).chain(&sink);
    source.run(()).unwrap();

    let mut values: Vec<f64> = seen.lock().iter().filter_map(Value::as_f64).collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(values.len(), 10);
    for (i, value) in values.iter().enumerate() {
        assert!((value - (i as f64 + 0.1)).abs() < 1e-9, "{} != {}.1", value, i);
    }
}

#[test]
fn test_run_from_any_node_starts_at_root() {
    let (m, _) = manager(3, 32);
    let source = Task::new(&m, "source", |_, args| {
        let n = args.require(0)?.try_i64()?;
        Ok(Value::stream((0..n).map(Value::from)))
    });
    let triple = Task::new(&m, "triple", |_, args| {
        Ok(Value::from(args.require(0)?.try_i64()? * 3))
    });
    let (sink, seen) = collector(&m, "sink");

    let last = source.pipe(&triple).chain(&sink);
    last.run(Args::one(4)).unwrap();
    let from_leaf = sorted_i64(&seen.lock());

    seen.lock().clear();
    source.run(Args::one(4)).unwrap();
    let from_root = sorted_i64(&seen.lock());

    assert_eq!(from_leaf, vec![0, 3, 6, 9]);
    assert_eq!(from_leaf, from_root);

    seen.lock().clear();
    triple.run(Args::one(4)).unwrap();
    assert_eq!(sorted_i64(&seen.lock()), from_root);
}

#[test]
fn test_second_pipe_sees_drained_stream() {
    let (m, _) = manager(1, 32);
    let source = Task::new(&m, "source", |_, _| Ok(Value::stream(0..5i64)));
    let (first, first_seen) = collector(&m, "first");
    let (second, second_seen) = collector(&m, "second");
    source.pipe(&first);
    source.pipe(&second);

    source.run(()).unwrap();

    assert_eq!(first_seen.lock().len(), 5);
    assert!(second_seen.lock().is_empty());
}

#[test]
fn test_failure_is_isolated() {
    let (m, sink) = manager(1, 8);
    let calls = Arc::new(AtomicUsize::new(0));
    let succeeded = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let ok = succeeded.clone();
    let flaky = Task::new(&m, "flaky", move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            anyhow::bail!("third call fails");
        }
        ok.fetch_add(1, Ordering::SeqCst);
        Ok(Value::unit())
    });

    for _ in 0..5 {
        flaky.queue(()).unwrap();
    }
    flaky.wait();

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(succeeded.load(Ordering::SeqCst), 4);
    assert_eq!(sink.failures().len(), 1);
    assert_eq!(m.stats().failed, 1);
    assert_eq!(m.stats().succeeded, 4);

    // the single worker is still alive
    flaky.queue(()).unwrap().wait();
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[test]
fn test_panicking_task_keeps_worker_alive() {
    let (m, sink) = manager(1, 4);
    let boom = Task::new(&m, "boom", |_, _| panic!("kaboom"));
    let (after, seen) = collector(&m, "after");

    boom.queue(()).unwrap();
    after.queue(Args::one(1)).unwrap();
    m.wait();

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(sink.failures().len(), 1);
}

#[test]
fn test_wait_without_submission_returns_immediately() {
    let (m, _) = manager(2, 2);
    let task = Task::new(&m, "idle", |_, _| Ok(Value::unit()));

    let start = Instant::now();
    task.wait();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!m.is_started());
}

#[test]
fn test_backpressure_blocks_producer() {
    let (m, _) = manager(1, 1);
    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    let slow = Task::new(&m, "slow", move |_, _| {
        flag.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(300));
        Ok(Value::unit())
    });

    // first item is taken by the worker, second fills the queue
    slow.queue(()).unwrap();
    while !started.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    slow.queue(()).unwrap();
    assert_eq!(m.pending(), 1);

    let third_queued = Arc::new(AtomicBool::new(false));
    let producer = {
        let slow = slow.clone();
        let done = third_queued.clone();
        thread::spawn(move || {
            slow.queue(()).unwrap();
            done.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!third_queued.load(Ordering::SeqCst), "producer should block on a full queue");

    producer.join().unwrap();
    assert!(third_queued.load(Ordering::SeqCst));
    m.wait();
    assert_eq!(m.stats().succeeded, 3);
}

#[test]
fn test_wait_from_many_threads() {
    let (m, _) = manager(2, 4);
    let task = Task::new(&m, "nap", |_, _| {
        thread::sleep(Duration::from_millis(20));
        Ok(Value::unit())
    });
    for _ in 0..6 {
        task.queue(()).unwrap();
    }

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let m = m.clone();
            thread::spawn(move || {
                m.wait();
                m.unfinished()
            })
        })
        .collect();
    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), 0);
    }
}

#[test]
fn test_contexts_do_not_leak_between_workers() {
    let (m, _) = manager(4, 32);
    let mismatches = Arc::new(AtomicUsize::new(0));
    let ids = Arc::new(Mutex::new(Vec::new()));

    let bad = mismatches.clone();
    let store = ids.clone();
    let task = Task::new(&m, "ctx", move |ctx, _| {
        let before = ctx.task_id().to_string();
        thread::sleep(Duration::from_millis(5));
        if ctx.task_id() != before || ctx.task_name() != "ctx" {
            bad.fetch_add(1, Ordering::SeqCst);
        }
        store.lock().push(before);
        Ok(Value::unit())
    });

    for _ in 0..20 {
        task.queue(()).unwrap();
    }
    task.wait();

    let mut ids = ids.lock().clone();
    ids.sort();
    ids.dedup();
    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    assert_eq!(ids.len(), 20);
}

#[test]
fn test_custom_failure_policy() {
    struct CountingSink {
        failures: AtomicUsize,
    }

    impl LogSink for CountingSink {
        fn log(&self, _: log::Level, _: &str, _: &taskpipe::Fields) {}

        fn task_failed(&self, _: &taskpipe::ExecutionContext, _: &taskpipe::TaskError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    let sink = Arc::new(CountingSink {
        failures: AtomicUsize::new(0),
    });
    let config = Config {
        threads: 2,
        queue_capacity: None,
        data_path: None,
    };
    let m = Arc::new(TaskManager::new(&config).unwrap().with_sink(sink.clone()));
    let task = Task::new(&m, "fails", |_, _| anyhow::bail!("always"));

    task.queue(()).unwrap().queue(()).unwrap().wait();
    assert_eq!(sink.failures.load(Ordering::SeqCst), 2);
}
