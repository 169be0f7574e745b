//! Test suite for delegate bindings

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::error::{BridgeError, InvalidHandleError, LifetimeError};
use crate::handles::{ClassHolderContext, DelegateHandle};
use crate::interop::{ArgPacker, TypeTag, Value};
use crate::registry::FnModule;
use crate::runtime::InProcessRuntime;

const CTX: ClassHolderContext = ClassHolderContext(0x7);
const ON_SCORE: DelegateHandle = DelegateHandle(0xE1);

#[derive(Default)]
struct Scoreboard {
    total: AtomicI32,
}

struct Unregistered;

fn setup() -> (Arc<InProcessRuntime>, Arc<Bridge>) {
    let runtime = Arc::new(InProcessRuntime::new());
    let bridge = Bridge::with_defaults(runtime.clone());
    bridge
        .register_module(
            CTX,
            FnModule::new("scores", |m| {
                m.class::<Scoreboard>("Scoreboard")
                    .method("OnScore", &[TypeTag::I32], TypeTag::Void, |args| {
                        let board = args.this::<Scoreboard>()?;
                        board.total.fetch_add(args.i32(0)?, Ordering::Relaxed);
                        Ok(Value::Void)
                    })
                    .build();
            }),
        )
        .unwrap();
    (runtime, bridge)
}

#[test]
fn test_bind_subscribes_target() {
    let (runtime, bridge) = setup();
    let board = Arc::new(Scoreboard::default());
    let binding = bridge.bind(ON_SCORE, Arc::clone(&board)).unwrap();

    let subscription = runtime.subscription(binding.handler()).unwrap();
    assert_eq!(subscription.delegate, ON_SCORE);
    assert_eq!(subscription.token, binding.token());
    assert_eq!(subscription.class, binding.class());
    assert_eq!(bridge.stats().bound_delegates, 1);

    // Native side raises the event against the subscribed receiver
    let method = bridge.find_method("Scoreboard", "OnScore").unwrap();
    let mut args = ArgPacker::new();
    args.push_this(subscription.token).push_i32(7);
    bridge.invoke(method, args.buffer()).unwrap();
    assert_eq!(board.total.load(Ordering::Relaxed), 7);
}

#[test]
fn test_binding_keeps_target_alive() {
    let (_runtime, bridge) = setup();
    let binding = bridge.bind(ON_SCORE, Arc::new(Scoreboard::default())).unwrap();

    let board = bridge.resolve_as::<Scoreboard>(binding.token()).unwrap();
    board.total.store(3, Ordering::Relaxed);
    drop(board);
    assert_eq!(
        bridge
            .resolve_as::<Scoreboard>(binding.token())
            .unwrap()
            .total
            .load(Ordering::Relaxed),
        3
    );
}

#[test]
fn test_dispose_is_idempotent() {
    let (runtime, bridge) = setup();
    let binding = bridge.bind(ON_SCORE, Arc::new(Scoreboard::default())).unwrap();
    let handler = binding.handler();

    assert!(binding.dispose());
    assert!(binding.is_disposed());
    assert!(!binding.dispose());
    drop(binding);

    assert_eq!(runtime.destroyed_handlers(), vec![handler]);
    assert!(runtime.subscription(handler).is_none());
    assert_eq!(bridge.stats().bound_delegates, 0);
}

#[test]
fn test_drop_disposes() {
    let (runtime, bridge) = setup();
    let board = Arc::new(Scoreboard::default());
    let token = {
        let binding = bridge.bind(ON_SCORE, Arc::clone(&board)).unwrap();
        binding.token()
    };

    assert_eq!(runtime.destroyed_handlers().len(), 1);
    assert!(runtime.subscribers(ON_SCORE).is_empty());
    assert_eq!(Arc::strong_count(&board), 1);
    assert!(bridge.cache().is_empty());
    assert!(!bridge.cache().is_valid(token));
}

#[test]
fn test_invoke_after_dispose_is_rejected() {
    let (_runtime, bridge) = setup();
    let board = Arc::new(Scoreboard::default());
    let binding = bridge.bind(ON_SCORE, Arc::clone(&board)).unwrap();
    let token = binding.token();
    binding.dispose();

    let method = bridge.find_method("Scoreboard", "OnScore").unwrap();
    let mut args = ArgPacker::new();
    args.push_this(token).push_i32(1);
    let err = bridge.invoke(method, args.buffer()).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Lifetime(LifetimeError::Invalidated(_) | LifetimeError::StaleToken(_))
    ));
    assert_eq!(board.total.load(Ordering::Relaxed), 0);
}

#[test]
fn test_null_delegate_is_rejected() {
    let (runtime, bridge) = setup();
    let err = bridge
        .bind(DelegateHandle::NULL, Arc::new(Scoreboard::default()))
        .unwrap_err();
    assert_eq!(err, BridgeError::InvalidHandle(InvalidHandleError::NullDelegate));
    assert!(runtime.subscribers(DelegateHandle::NULL).is_empty());
    assert!(bridge.cache().is_empty());
}

#[test]
fn test_unregistered_target_is_rejected() {
    let (_runtime, bridge) = setup();
    let err = bridge.bind(ON_SCORE, Arc::new(Unregistered)).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InvalidHandle(InvalidHandleError::UnregisteredClass(_))
    ));
}

#[test]
fn test_failed_native_bind_rolls_back() {
    let (runtime, bridge) = setup();
    runtime.fail_binds(true);
    let board = Arc::new(Scoreboard::default());

    let err = bridge.bind(ON_SCORE, Arc::clone(&board)).unwrap_err();
    assert_eq!(err, BridgeError::InvalidHandle(InvalidHandleError::NullHandler));
    assert!(bridge.cache().is_empty());
    assert_eq!(Arc::strong_count(&board), 1);
    assert_eq!(bridge.stats().bound_delegates, 0);

    runtime.fail_binds(false);
    assert!(bridge.bind(ON_SCORE, board).is_ok());
}

#[test]
fn test_concurrent_dispose_runs_once() {
    let (runtime, bridge) = setup();
    let binding = Arc::new(bridge.bind(ON_SCORE, Arc::new(Scoreboard::default())).unwrap());

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let binding = Arc::clone(&binding);
            std::thread::spawn(move || binding.dispose())
        })
        .collect();
    let winners = threads
        .into_iter()
        .map(|t| t.join().unwrap())
        .filter(|disposed| *disposed)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(runtime.destroyed_handlers().len(), 1);
}
