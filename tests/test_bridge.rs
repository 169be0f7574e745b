use hyperion_interop::interop::{BlittableValue, STATUS_INVALID_ARGUMENT};
use hyperion_interop::{
    ArgPacker, Bridge, BridgeError, CallError, ClassHolderContext, FnModule, InProcessRuntime, InvalidHandleError,
    LifetimeError, MarshalError, RegistrationError, StructLayout, StructValue, TypeHash, TypeTag, Value,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const CTX: ClassHolderContext = ClassHolderContext(0x10);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Vec2 {
    x: f32,
    y: f32,
}

unsafe impl BlittableValue for Vec2 {}

#[derive(Default)]
struct Player {
    score: AtomicI64,
}

fn game_module() -> FnModule<impl Fn(&mut hyperion_interop::ModuleBuilder) + Send + Sync> {
    FnModule::new("game", |m| {
        m.value_type::<Vec2>("Game.Vec2").build();
        let vec2 = TypeTag::Struct(StructLayout::of::<Vec2>("Game.Vec2"));

        m.opaque_class("Game.Math")
            .static_method("Add", &[TypeTag::I32, TypeTag::I32], TypeTag::I32, |args| {
                Ok(Value::I32(args.i32(0)?.wrapping_add(args.i32(1)?)))
            })
            .static_method("Greet", &[TypeTag::Str], TypeTag::Str, |args| {
                Ok(Value::from(format!("Hello, {}!", args.str(0)?)))
            })
            .static_method("IsNull", &[TypeTag::Str], TypeTag::Bool, |args| {
                Ok(Value::Bool(args.opt_str(0)?.is_none()))
            })
            .static_method("Scale", &[vec2, TypeTag::F32], vec2, |args| {
                let v: Vec2 = args.read(0)?;
                let k = args.f32(1)?;
                let out = Vec2 { x: v.x * k, y: v.y * k };
                Ok(Value::Struct(StructValue::from_value(
                    StructLayout::of::<Vec2>("Game.Vec2"),
                    &out,
                )))
            })
            .static_method("Explode", &[], TypeTag::Void, |_| panic!("boom"))
            .static_method("Fail", &[], TypeTag::Void, |_| Err(CallError::failed("refused")))
            .static_method("Lie", &[], TypeTag::I32, |_| Ok(Value::from("not an int")))
            .build();

        m.class::<Player>("Game.Player")
            .method("AddScore", &[TypeTag::I64], TypeTag::I64, |args| {
                let player = args.this::<Player>()?;
                let delta = args.i64(0)?;
                Ok(Value::I64(player.score.fetch_add(delta, Ordering::SeqCst) + delta))
            })
            .static_method("Score", &[TypeTag::Object], TypeTag::I64, |args| {
                Ok(Value::I64(args.object::<Player>(0)?.score.load(Ordering::SeqCst)))
            })
            .build();
    })
}

fn setup() -> (Arc<InProcessRuntime>, Arc<Bridge>) {
    let runtime = Arc::new(InProcessRuntime::new());
    let bridge = Bridge::with_defaults(runtime.clone());
    let report = bridge.register_module(CTX, game_module()).unwrap();
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    (runtime, bridge)
}

fn call(bridge: &Bridge, type_name: &str, method: &str, args: &ArgPacker) -> Result<Value, BridgeError> {
    let handle = bridge.find_method(type_name, method).unwrap();
    bridge.invoke(handle, args.buffer())
}

#[test]
fn test_registration_report() {
    let (runtime, bridge) = setup();

    let math = bridge.resolve_type("Game.Math").unwrap();
    let names: Vec<_> = math.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["Add", "Greet", "IsNull", "Scale", "Explode", "Fail", "Lie"]);

    let methods = bridge.methods_of(TypeHash::from_name("Game.Math")).unwrap();
    let mut handles: Vec<_> = methods.iter().map(|m| m.handle).collect();
    handles.sort();
    handles.dedup();
    assert_eq!(handles.len(), 7);

    assert_eq!(runtime.class_count(), 3);
    assert_eq!(runtime.install_count(), 1);
    assert!(runtime.has_invoker(CTX));
    assert!(bridge.methods_of(TypeHash::from_name("Game.Missing")).is_none());
    assert!(bridge.find_method("Game.Math", "Subtract").is_none());
}

#[test]
fn test_static_add() {
    let (_runtime, bridge) = setup();
    let mut args = ArgPacker::new();
    args.push_i32(2).push_i32(3);
    assert_eq!(call(&bridge, "Game.Math", "Add", &args).unwrap(), Value::I32(5));

    let mut args = ArgPacker::new();
    args.push_i32(-7).push_i32(i32::MAX);
    assert_eq!(
        call(&bridge, "Game.Math", "Add", &args).unwrap(),
        Value::I32(i32::MAX - 7)
    );
}

#[test]
fn test_strings() {
    let (_runtime, bridge) = setup();
    let mut args = ArgPacker::new();
    args.push_str("world").unwrap();
    assert_eq!(
        call(&bridge, "Game.Math", "Greet", &args).unwrap(),
        Value::from("Hello, world!")
    );

    let mut args = ArgPacker::new();
    args.push_str("").unwrap();
    assert_eq!(call(&bridge, "Game.Math", "IsNull", &args).unwrap(), Value::Bool(false));

    let mut args = ArgPacker::new();
    args.push_null_str();
    assert_eq!(call(&bridge, "Game.Math", "IsNull", &args).unwrap(), Value::Bool(true));
}

#[test]
fn test_struct_by_value() {
    let (_runtime, bridge) = setup();
    let mut args = ArgPacker::new();
    args.push_struct(&Vec2 { x: 1.5, y: -2.0 }).push_f32(2.0);

    let Value::Struct(out) = call(&bridge, "Game.Math", "Scale", &args).unwrap() else {
        panic!("expected a struct result");
    };
    assert_eq!(out.read::<Vec2>(), Some(Vec2 { x: 3.0, y: -4.0 }));
}

#[test]
fn test_missing_argument_is_a_marshal_error() {
    let (_runtime, bridge) = setup();
    let mut args = ArgPacker::new();
    args.push_i32(2);
    let err = call(&bridge, "Game.Math", "Add", &args).unwrap_err();
    assert_eq!(
        err,
        BridgeError::Marshal(MarshalError::MissingArgument {
            index: 1,
            tag: TypeTag::I32
        })
    );
    assert_eq!(err.status_code(), -2);
    assert_eq!(bridge.stats().marshal_errors, 1);
}

#[test]
fn test_cells_must_match_declared_tags() {
    let (runtime, bridge) = setup();

    // A plain word where a string pointer is declared
    let mut args = ArgPacker::new();
    args.push_u64(0x10);
    assert_eq!(
        call(&bridge, "Game.Math", "Greet", &args).unwrap_err(),
        BridgeError::Marshal(MarshalError::TagMismatch { index: 0, tag: TypeTag::Str })
    );
    let greet = bridge.find_method("Game.Math", "Greet").unwrap();
    assert_eq!(runtime.invoke(CTX, greet, args.buffer()).unwrap_err(), -2);

    // Struct bytes of the wrong size
    let mut args = ArgPacker::new();
    args.push_struct_bytes(&[0u8; 4]).push_f32(1.0);
    assert!(matches!(
        call(&bridge, "Game.Math", "Scale", &args),
        Err(BridgeError::Marshal(MarshalError::TagMismatch { index: 0, .. }))
    ));

    // A string where a number is declared
    let mut args = ArgPacker::new();
    args.push_i32(1);
    args.push_str("2").unwrap();
    assert_eq!(
        call(&bridge, "Game.Math", "Add", &args).unwrap_err(),
        BridgeError::Marshal(MarshalError::TagMismatch { index: 1, tag: TypeTag::I32 })
    );
    assert_eq!(bridge.stats().marshal_errors, 3);
}

#[test]
fn test_instance_method_and_object_argument() {
    let (_runtime, bridge) = setup();
    let player = Arc::new(Player::default());
    let (class, token) = bridge.add_object_to_cache(Arc::clone(&player), false).unwrap();
    assert_eq!(class, bridge.resolve_type("Game.Player").unwrap().class);

    let mut args = ArgPacker::new();
    args.push_this(token).push_i64(40);
    assert_eq!(call(&bridge, "Game.Player", "AddScore", &args).unwrap(), Value::I64(40));

    let mut args = ArgPacker::new();
    args.push_object(token);
    assert_eq!(call(&bridge, "Game.Player", "Score", &args).unwrap(), Value::I64(40));
    assert_eq!(player.score.load(Ordering::SeqCst), 40);

    assert!(bridge.release(token));
    let mut args = ArgPacker::new();
    args.push_this(token).push_i64(1);
    assert!(matches!(
        call(&bridge, "Game.Player", "AddScore", &args),
        Err(BridgeError::Lifetime(LifetimeError::StaleToken(_)))
    ));
}

#[test]
fn test_weak_object_dies_with_owner() {
    let (_runtime, bridge) = setup();
    let player = Arc::new(Player::default());
    let (_, token) = bridge.add_object_to_cache(Arc::clone(&player), true).unwrap();
    drop(player);

    let mut args = ArgPacker::new();
    args.push_this(token).push_i64(1);
    assert_eq!(
        call(&bridge, "Game.Player", "AddScore", &args).unwrap_err(),
        BridgeError::Lifetime(LifetimeError::Invalidated(token))
    );
}

#[test]
fn test_dead_weak_objects_leave_the_cache() {
    let (_runtime, bridge) = setup();
    let player = Arc::new(Player::default());
    let (_, token) = bridge.add_object_to_cache(Arc::clone(&player), true).unwrap();
    assert_eq!(bridge.stats().live_objects, 1);

    drop(player);
    assert_eq!(bridge.stats().live_objects, 0);
    assert_eq!(
        bridge.resolve(token).unwrap_err(),
        BridgeError::Lifetime(LifetimeError::StaleToken(token))
    );
}

#[test]
fn test_unregistered_object_type() {
    let (_runtime, bridge) = setup();
    let err = bridge.add_object_to_cache(Arc::new(5u32), false).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InvalidHandle(InvalidHandleError::UnregisteredClass(_))
    ));
}

#[test]
fn test_target_failures_are_contained() {
    let (_runtime, bridge) = setup();
    let none = ArgPacker::new();

    let err = call(&bridge, "Game.Math", "Explode", &none).unwrap_err();
    assert_eq!(err, BridgeError::Panicked("boom".into()));

    let err = call(&bridge, "Game.Math", "Fail", &none).unwrap_err();
    assert!(matches!(err, BridgeError::Target(_)));
    assert_eq!(err.status_code(), -5);

    let err = call(&bridge, "Game.Math", "Lie", &none).unwrap_err();
    assert_eq!(
        err,
        BridgeError::Marshal(MarshalError::ReturnMismatch {
            expected: TypeTag::I32,
            found: TypeTag::Str
        })
    );

    // The bridge stays usable afterwards
    let mut args = ArgPacker::new();
    args.push_i32(1).push_i32(1);
    assert_eq!(call(&bridge, "Game.Math", "Add", &args).unwrap(), Value::I32(2));
}

#[test]
fn test_unknown_method_handles() {
    let (_runtime, bridge) = setup();
    let none = ArgPacker::new();
    assert_eq!(
        bridge
            .invoke(hyperion_interop::MethodHandle::NULL, none.buffer())
            .unwrap_err(),
        BridgeError::InvalidHandle(InvalidHandleError::NullMethod)
    );
    let bogus = hyperion_interop::MethodHandle(0xDEAD0);
    assert_eq!(
        bridge.invoke(bogus, none.buffer()).unwrap_err(),
        BridgeError::InvalidHandle(InvalidHandleError::UnknownMethod(bogus))
    );
}

#[test]
fn test_duplicate_type_across_modules() {
    let (_runtime, bridge) = setup();
    let report = bridge
        .register_module(
            CTX,
            FnModule::new("again", |m| {
                m.opaque_class("Game.Math").build();
                m.opaque_class("Game.Extra").build();
            }),
        )
        .unwrap();

    assert_eq!(report.types.len(), 1);
    assert_eq!(report.types[0].descriptor.name, "Game.Extra");
    assert!(matches!(
        report.skipped.as_slice(),
        [RegistrationError::DuplicateType { name }] if name == "Game.Math"
    ));
}

#[test]
fn test_rejected_class_is_skipped() {
    let runtime = Arc::new(InProcessRuntime::new());
    runtime.reject_class("Game.Player");
    let bridge = Bridge::with_defaults(runtime.clone());
    let report = bridge.register_module(CTX, game_module()).unwrap();

    assert!(bridge.resolve_type("Game.Player").is_none());
    assert!(bridge.resolve_type("Game.Math").is_some());
    assert!(matches!(
        report.skipped.as_slice(),
        [RegistrationError::NullNativeHandle { kind: "class", .. }]
    ));
}

#[test]
fn test_unload_module() {
    let (_runtime, bridge) = setup();
    let add = bridge.find_method("Game.Math", "Add").unwrap();
    let in_flight = bridge.method_entry(add).unwrap();
    let module = bridge.module_ids()[0];

    bridge.unload_assembly(module).unwrap();
    assert!(bridge.resolve_type("Game.Math").is_none());
    assert!(bridge.method_entry(add).is_none());
    assert_eq!(bridge.stats().methods_registered, 0);
    assert_eq!(in_flight.name, "Add");

    assert_eq!(
        bridge.unload_assembly(module).unwrap_err(),
        BridgeError::InvalidHandle(InvalidHandleError::UnknownModule(module))
    );

    // The same names can be registered again
    bridge.register_module(CTX, game_module()).unwrap();
    assert!(bridge.find_method("Game.Math", "Add").is_some());
}

#[test]
fn test_unload_releases_cached_objects() {
    let (_runtime, bridge) = setup();
    let player = Arc::new(Player::default());
    let (_, strong) = bridge.add_object_to_cache(Arc::clone(&player), false).unwrap();
    let (_, weak) = bridge.add_object_to_cache(Arc::clone(&player), true).unwrap();
    assert_eq!(Arc::strong_count(&player), 2);

    let module = bridge.module_ids()[0];
    bridge.unload_assembly(module).unwrap();

    assert_eq!(Arc::strong_count(&player), 1);
    assert_eq!(bridge.stats().live_objects, 0);
    for token in [strong, weak] {
        assert_eq!(
            bridge.resolve(token).unwrap_err(),
            BridgeError::Lifetime(LifetimeError::StaleToken(token))
        );
    }
}

#[test]
fn test_dropping_bridge_withdraws_invoke_callback() {
    let (runtime, bridge) = setup();
    let greet = bridge.find_method("Game.Math", "Greet").unwrap();
    let weak = Arc::downgrade(&bridge);
    assert!(runtime.has_invoker(CTX));

    drop(bridge);
    assert!(weak.upgrade().is_none());
    assert!(!runtime.has_invoker(CTX));

    let mut args = ArgPacker::new();
    args.push_str("anyone").unwrap();
    assert_eq!(
        runtime.invoke(CTX, greet, args.buffer()).unwrap_err(),
        STATUS_INVALID_ARGUMENT
    );
}

#[test]
fn test_dropping_one_bridge_keeps_the_other_installed() {
    let runtime = Arc::new(InProcessRuntime::new());
    let first = Bridge::with_defaults(runtime.clone());
    first.register_module(CTX, game_module()).unwrap();
    let second = Bridge::with_defaults(runtime.clone());
    second.register_module(CTX, game_module()).unwrap();
    let add = second.find_method("Game.Math", "Add").unwrap();

    drop(first);
    assert!(runtime.has_invoker(CTX));
    let mut args = ArgPacker::new();
    args.push_i32(4).push_i32(5);
    assert_eq!(runtime.invoke(CTX, add, args.buffer()).unwrap(), Value::I32(9));
}

#[test]
fn test_module_load_failure_is_fatal() {
    let (_runtime, bridge) = setup();
    let source = hyperion_interop::ModuleSource::Path("/nonexistent/libgame.so".into());
    let err = bridge.register_assembly(CTX, &source).unwrap_err();
    assert!(matches!(err, RegistrationError::ModuleLoad { .. }));
    assert!(err.is_fatal());
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn test_library_without_entry_point_is_fatal() {
    let (_runtime, bridge) = setup();
    let source = hyperion_interop::ModuleSource::Path("libc.so.6".into());
    let err = bridge.register_assembly(CTX, &source).unwrap_err();

    assert_eq!(
        err,
        RegistrationError::EntryPointMissing {
            path: "libc.so.6".into(),
            symbol: hyperion_interop::interop::MODULE_ENTRY_SYMBOL,
        }
    );
    assert!(err.is_fatal());
    assert_eq!(bridge.module_ids().len(), 1);
    assert_eq!(bridge.stats().types_registered, 3);
}

#[test]
fn test_stats_and_snapshot() {
    let (_runtime, bridge) = setup();
    let mut args = ArgPacker::new();
    args.push_i32(1).push_i32(2);
    call(&bridge, "Game.Math", "Add", &args).unwrap();
    let (_, _token) = bridge.add_object_to_cache(Arc::new(Player::default()), false).unwrap();

    let stats = bridge.stats();
    assert_eq!(stats.types_registered, 3);
    assert_eq!(stats.methods_registered, 9);
    assert_eq!(stats.invocations, 1);
    assert_eq!(stats.live_objects, 1);
    assert_eq!(stats.modules_loaded, 1);

    let snapshot = bridge.snapshot();
    assert_eq!(snapshot.method_count(), 9);
    let names: Vec<_> = snapshot.types.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["Game.Math", "Game.Player", "Game.Vec2"]);
    assert_eq!(snapshot.types[2].size, Some(8));
}
