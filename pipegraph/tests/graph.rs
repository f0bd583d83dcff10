//! End-to-end behavior of the port/module/pipeline runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipegraph::{
    connect_dyn, ConnectError, ExitStatus, Input, Module, ModuleCore, Output, ParamKind,
    ParamValue, PipelineContext, SpinOpts,
};

struct Producer {
    core: Arc<ModuleCore>,
    numbers_out: Output<u64>,
    text_out: Output<String>,
}

impl Producer {
    fn new(ctx: &PipelineContext) -> Arc<Self> {
        let core = ctx.new_core("Producer");
        core.declare_param("cam_ids", ParamKind::IntList, None, false);
        let numbers_out = core.output("numbers_out", &["cam_ids"]);
        let text_out = core.output("text_out", &[]);
        Arc::new(Self {
            core,
            numbers_out,
            text_out,
        })
    }
}

impl Module for Producer {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }
}

struct Consumer {
    core: Arc<ModuleCore>,
    numbers_in: Input<u64>,
    numbers_out: Output<u64>,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl Consumer {
    fn new(ctx: &PipelineContext, name: &str, delay: Option<Duration>, fail_on: Option<u64>) -> Arc<Self> {
        let core = ctx.new_core(name);
        core.declare_param("cam_ids", ParamKind::IntList, None, false);
        let numbers_in = core.input_with_capacity("numbers_in", &["cam_ids"], 4);
        let numbers_out = core.output("numbers_out", &["cam_ids"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            numbers_in.set_handler(move |v: u64| {
                if let Some(bad) = fail_on {
                    if v == bad {
                        return Err(format!("poisoned value {v}").into());
                    }
                }
                if let Some(delay) = delay {
                    std::thread::sleep(delay);
                }
                seen.lock().unwrap().push(v);
                Ok(())
            });
        }
        Arc::new(Self {
            core,
            numbers_in,
            numbers_out,
            seen,
        })
    }
}

impl Module for Consumer {
    fn core(&self) -> &Arc<ModuleCore> {
        &self.core
    }
}

#[test]
fn connect_is_type_checked() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let consumer = Consumer::new(&ctx, "Consumer", None, None);

    // matching payload types connect
    producer.numbers_out.connect(&consumer.numbers_in).unwrap();

    // mismatched payload types do not
    let err = producer.text_out.connect(&consumer.numbers_in).unwrap_err();
    assert!(matches!(err, ConnectError::TypeMismatch { .. }));
}

#[test]
fn connect_rejects_self_loop() {
    let ctx = PipelineContext::new();
    let consumer = Consumer::new(&ctx, "Consumer", None, None);
    let err = consumer.numbers_out.connect(&consumer.numbers_in).unwrap_err();
    assert!(matches!(err, ConnectError::SelfLoop { .. }));
}

#[test]
fn connect_dyn_rejects_wrong_direction() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let consumer = Consumer::new(&ctx, "Consumer", None, None);

    let err = connect_dyn(&consumer.numbers_in.port_ref(), &producer.numbers_out.port_ref())
        .unwrap_err();
    assert!(matches!(err, ConnectError::WrongDirection { .. }));

    connect_dyn(&producer.numbers_out.port_ref(), &consumer.numbers_in.port_ref()).unwrap();
}

#[test]
fn configuration_propagates_to_fixed_point() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let first = Consumer::new(&ctx, "First", None, None);
    let second = Consumer::new(&ctx, "Second", None, None);

    producer.numbers_out.connect(&first.numbers_in).unwrap();
    first.numbers_out.connect(&second.numbers_in).unwrap();

    let cams = ParamValue::IntList(vec![0, 1]);
    producer.core().set_param("cam_ids", cams.clone());

    // the change traverses the whole chain
    assert_eq!(first.core().param("cam_ids"), Some(cams.clone()));
    assert_eq!(second.core().param("cam_ids"), Some(cams.clone()));
    assert!(first.numbers_in.is_configured());

    // re-applying the same value is a no-op, not an infinite recursion
    producer.core().set_param("cam_ids", cams.clone());
    assert_eq!(second.core().param("cam_ids"), Some(cams));
}

#[test]
fn connect_emits_configuration_immediately() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let consumer = Consumer::new(&ctx, "Consumer", None, None);

    let cams = ParamValue::IntList(vec![0, 1, 2]);
    producer.core().set_param("cam_ids", cams.clone());
    assert!(!consumer.numbers_in.is_configured());

    producer.numbers_out.connect(&consumer.numbers_in).unwrap();
    assert_eq!(consumer.core().param("cam_ids"), Some(cams));
    assert!(consumer.numbers_in.is_configured());
}

#[test]
fn input_relay_forwards_publishes() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let first = Consumer::new(&ctx, "First", None, None);
    let second = Consumer::new(&ctx, "Second", None, None);

    producer.numbers_out.connect(&first.numbers_in).unwrap();
    // everything published to First now also reaches Second
    first.numbers_in.relay(&second.numbers_in).unwrap();

    producer.numbers_out.publish(&42);
    assert_eq!(first.numbers_in.queue_len(), 1);
    assert_eq!(second.numbers_in.queue_len(), 1);
}

#[test]
fn output_relay_joins_future_connections() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let mirror = Producer::new(&ctx);
    let consumer = Consumer::new(&ctx, "Consumer", None, None);

    producer.numbers_out.relay(&mirror.numbers_out).unwrap();
    producer.numbers_out.connect(&consumer.numbers_in).unwrap();

    // the mirror output was connected alongside the primary
    mirror.numbers_out.publish(&7);
    assert_eq!(consumer.numbers_in.queue_len(), 1);
}

#[test]
fn per_connection_fifo_order() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let consumer = Consumer::new(&ctx, "Consumer", None, None);
    ctx.add_module(producer.clone());
    ctx.add_module(consumer.clone());

    let seen = consumer.seen.clone();
    let exit_seen = seen.clone();
    let status = ctx
        .start(
            || {},
            || {
                producer.numbers_out.connect(&consumer.numbers_in)?;
                producer.numbers_out.publish(&1);
                producer.numbers_out.publish(&2);
                producer.numbers_out.publish(&3);
                Ok(())
            },
            SpinOpts {
                timeout: Some(Duration::from_secs(2)),
                exit_condition: Some(Box::new(move || exit_seen.lock().unwrap().len() == 3)),
                sink: None,
            },
        )
        .unwrap();
    assert_eq!(status, ExitStatus::Clean);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn overflow_drops_oldest_without_blocking_sender() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    // queue capacity is 4 (see Consumer::new); a slow handler cannot make
    // the publisher block
    let consumer = Consumer::new(&ctx, "Consumer", Some(Duration::from_millis(5)), None);
    ctx.add_module(producer.clone());
    ctx.add_module(consumer.clone());

    let seen = consumer.seen.clone();
    let exit_seen = seen.clone();
    let status = ctx
        .start(
            || {},
            || {
                producer.numbers_out.connect(&consumer.numbers_in)?;
                // workers are not active yet, so all 50 land in the queue
                // and only the newest 4 survive
                for i in 0..50u64 {
                    producer.numbers_out.publish(&i);
                }
                assert!(consumer.numbers_in.queue_len() <= 4);
                Ok(())
            },
            SpinOpts {
                timeout: Some(Duration::from_secs(2)),
                exit_condition: Some(Box::new(move || exit_seen.lock().unwrap().len() == 4)),
                sink: None,
            },
        )
        .unwrap();
    assert_eq!(status, ExitStatus::Clean);
    assert_eq!(*seen.lock().unwrap(), vec![46, 47, 48, 49]);
}

#[test]
fn handler_error_cancels_whole_pipeline() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let consumer = Consumer::new(&ctx, "Consumer", None, Some(13));
    ctx.add_module(producer.clone());
    ctx.add_module(consumer.clone());

    let started = std::time::Instant::now();
    let status = ctx
        .start(
            || {},
            || {
                producer.numbers_out.connect(&consumer.numbers_in)?;
                producer.numbers_out.publish(&1);
                producer.numbers_out.publish(&13);
                Ok(())
            },
            SpinOpts {
                timeout: Some(Duration::from_secs(5)),
                exit_condition: None,
                sink: None,
            },
        )
        .unwrap();
    assert_eq!(status, ExitStatus::HandlerFault);
    assert_eq!(status.code(), 1);
    // shutdown happened because of the fault, well before the timeout
    assert!(started.elapsed() < Duration::from_millis(2500));
    assert_eq!(*consumer.seen.lock().unwrap(), vec![1]);
}

#[test]
fn timing_handlers_observe_each_item() {
    let ctx = PipelineContext::new();
    let producer = Producer::new(&ctx);
    let consumer = Consumer::new(&ctx, "Consumer", None, None);
    ctx.add_module(producer.clone());
    ctx.add_module(consumer.clone());

    let samples = Arc::new(Mutex::new(Vec::new()));
    {
        let samples = samples.clone();
        consumer.core().register_timing_handler(
            "numbers_in",
            Box::new(move |module, input, elapsed, queue_len| {
                samples
                    .lock()
                    .unwrap()
                    .push((module.to_string(), input.to_string(), elapsed, queue_len));
            }),
        );
    }

    let seen = consumer.seen.clone();
    let exit_seen = seen.clone();
    ctx.start(
        || {},
        || {
            producer.numbers_out.connect(&consumer.numbers_in)?;
            producer.numbers_out.publish(&7);
            Ok(())
        },
        SpinOpts {
            timeout: Some(Duration::from_secs(2)),
            exit_condition: Some(Box::new(move || !exit_seen.lock().unwrap().is_empty())),
            sink: None,
        },
    )
    .unwrap();

    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].0, "Consumer");
    assert_eq!(samples[0].1, "numbers_in");
}
