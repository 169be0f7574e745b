use core::ffi::{c_char, c_void, CStr};
use hyperion_interop::ffi::{
    hyperion_bridge_free, hyperion_bridge_new, hyperion_initialize_assembly, hyperion_invoke_method,
    hyperion_last_error_message, hyperion_value_free, last_error_message, BridgeHandle,
};
use hyperion_interop::interop::{
    InvokeMethodFn, RawMethodMetadata, RawValue, MODULE_ENTRY_SYMBOL, STATUS_INVALID_ARGUMENT, STATUS_OK,
};
use hyperion_interop::{
    ArgPacker, Bridge, ClassHolderContext, FnModule, InProcessRuntime, ManagedHandle, NativeCallbacks, TypeTag, Value,
};
use parking_lot::Mutex;
use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CTX: ClassHolderContext = ClassHolderContext(0x20);

fn calc_module() -> FnModule<impl Fn(&mut hyperion_interop::ModuleBuilder) + Send + Sync> {
    FnModule::new("calc", |m| {
        m.opaque_class("Calc")
            .static_method("Add", &[TypeTag::I32, TypeTag::I32], TypeTag::I32, |args| {
                Ok(Value::I32(args.i32(0)? + args.i32(1)?))
            })
            .static_method("Greet", &[TypeTag::Str], TypeTag::Str, |args| {
                Ok(Value::from(format!("Hello, {}!", args.str(0)?)))
            })
            .build();
    })
}

// ----------------------------------------------------------------------
// Native engine stand-in built from C callbacks
// ----------------------------------------------------------------------

static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(0x100);
static CLASSES: Mutex<Vec<(usize, u64, String)>> = Mutex::new(Vec::new());
static METHODS: Mutex<Vec<(String, u32, u8, u8)>> = Mutex::new(Vec::new());
static INVOKER: Mutex<Option<(InvokeMethodFn, usize)>> = Mutex::new(None);

unsafe extern "C" fn native_register_class(ctx: usize, type_hash: u64, name: *const c_char) -> usize {
    let name = CStr::from_ptr(name).to_string_lossy().into_owned();
    CLASSES.lock().push((ctx, type_hash, name));
    NEXT_HANDLE.fetch_add(1, Ordering::SeqCst)
}

unsafe extern "C" fn native_register_method(
    _class: usize,
    name: *const c_char,
    metadata: *const RawMethodMetadata,
) -> usize {
    let name = CStr::from_ptr(name).to_string_lossy().into_owned();
    let metadata = &*metadata;
    METHODS
        .lock()
        .push((name, metadata.param_count, metadata.return_tag, metadata.is_static));
    NEXT_HANDLE.fetch_add(1, Ordering::SeqCst)
}

unsafe extern "C" fn native_set_invoke(_ctx: usize, function: InvokeMethodFn, user_data: *const c_void) {
    *INVOKER.lock() = Some((function, user_data as usize));
}

unsafe extern "C" fn native_bind_delegate(_delegate: usize, _class: usize, _token: usize) -> usize {
    NEXT_HANDLE.fetch_add(1, Ordering::SeqCst)
}

unsafe extern "C" fn native_destroy_handler(_handler: usize) {}

unsafe extern "C" fn native_release_handle(_handle: ManagedHandle) {}

fn callback_table() -> NativeCallbacks {
    NativeCallbacks {
        register_class: native_register_class,
        register_method: native_register_method,
        set_invoke_method_function: native_set_invoke,
        bind_delegate: native_bind_delegate,
        destroy_handler: native_destroy_handler,
        release_managed_handle: native_release_handle,
    }
}

#[test]
fn test_callback_runtime_round_trip() {
    let table = callback_table();
    let handle = unsafe { hyperion_bridge_new(&table) };
    assert!(!handle.is_null());
    let bridge = unsafe { Arc::clone(&(*handle).bridge) };
    bridge.register_module(CTX, calc_module()).unwrap();

    {
        let classes = CLASSES.lock();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].0, CTX.0);
        assert_eq!(classes[0].2, "Calc");
        let methods = METHODS.lock();
        assert_eq!(methods[0], ("Add".to_owned(), 2, TypeTag::I32.code(), 1));
        assert_eq!(methods[1], ("Greet".to_owned(), 1, TypeTag::Str.code(), 1));
    }

    let (invoke, user_data) = (*INVOKER.lock()).expect("invoke callback installed");
    assert_eq!(user_data, Arc::as_ptr(&bridge) as usize);
    let add = bridge.find_method("Calc", "Add").unwrap();

    let mut args = ArgPacker::new();
    args.push_i32(20).push_i32(22);
    let mut out = RawValue::default();
    let status = unsafe {
        invoke(
            user_data as *const c_void,
            add.as_raw(),
            args.cells().as_ptr(),
            args.len(),
            &mut out,
        )
    };
    assert_eq!(status, STATUS_OK);
    assert_eq!(out.tag, TypeTag::I32.code());
    assert_eq!(out.word as i32, 42);
    unsafe { hyperion_value_free(&mut out) };

    let mut args = ArgPacker::new();
    args.push_i32(20);
    let status = unsafe {
        invoke(
            user_data as *const c_void,
            add.as_raw(),
            args.cells().as_ptr(),
            args.len(),
            &mut out,
        )
    };
    assert_eq!(status, -2);
    let message = unsafe { CStr::from_ptr(hyperion_last_error_message()) };
    assert!(message.to_string_lossy().contains("Argument 1"));

    drop(bridge);
    unsafe { hyperion_bridge_free(handle) };

    // The freed bridge reinstalls the callback without user data
    let (invoke, user_data) = (*INVOKER.lock()).expect("invoke callback reinstalled");
    assert_eq!(user_data, 0);
    let mut args = ArgPacker::new();
    args.push_i32(1).push_i32(2);
    let status = unsafe {
        invoke(
            user_data as *const c_void,
            add.as_raw(),
            args.cells().as_ptr(),
            args.len(),
            &mut out,
        )
    };
    assert_eq!(status, -3);
}

#[test]
fn test_bridge_new_rejects_null_table() {
    let handle = unsafe { hyperion_bridge_new(core::ptr::null()) };
    assert!(handle.is_null());
    assert_eq!(last_error_message().as_deref(), Some("null callback table"));
}

// ----------------------------------------------------------------------
// Invoke callback driven by the in-process runtime
// ----------------------------------------------------------------------

fn in_process() -> (Arc<InProcessRuntime>, Arc<Bridge>) {
    let runtime = Arc::new(InProcessRuntime::new());
    let bridge = Bridge::with_defaults(runtime.clone());
    bridge.register_module(CTX, calc_module()).unwrap();
    (runtime, bridge)
}

#[test]
fn test_string_result_crosses_boundary() {
    let (runtime, bridge) = in_process();
    let greet = bridge.find_method("Calc", "Greet").unwrap();

    let mut args = ArgPacker::new();
    args.push_str("native").unwrap();
    let value = runtime.invoke(CTX, greet, args.buffer()).unwrap();
    assert_eq!(value, Value::from("Hello, native!"));
    assert_eq!(last_error_message(), None);
}

#[test]
fn test_failure_sets_status_and_message() {
    let (runtime, bridge) = in_process();
    let add = bridge.find_method("Calc", "Add").unwrap();

    let status = runtime.invoke(CTX, add, ArgPacker::new().buffer()).unwrap_err();
    assert_eq!(status, -2);
    let message = last_error_message().unwrap();
    assert!(message.contains("Argument 0 (i32) is missing"), "{}", message);

    // A later success clears the message
    let mut args = ArgPacker::new();
    args.push_i32(1).push_i32(2);
    assert_eq!(runtime.invoke(CTX, add, args.buffer()).unwrap(), Value::I32(3));
    assert_eq!(last_error_message(), None);
}

#[test]
fn test_invoke_with_null_bridge() {
    let mut out = RawValue::default();
    let status = unsafe { hyperion_invoke_method(core::ptr::null(), 0x10, core::ptr::null(), 0, &mut out) };
    assert_eq!(status, -3);
    assert_eq!(out.tag, TypeTag::Void.code());
}

#[test]
fn test_invoke_without_out_slot() {
    let (_runtime, bridge) = in_process();
    let greet = bridge.find_method("Calc", "Greet").unwrap();
    let mut args = ArgPacker::new();
    args.push_str("ignored").unwrap();

    let status = unsafe {
        hyperion_invoke_method(
            Arc::as_ptr(&bridge) as *const c_void,
            greet.as_raw(),
            args.cells().as_ptr(),
            args.len(),
            core::ptr::null_mut(),
        )
    };
    assert_eq!(status, STATUS_OK);
}

// ----------------------------------------------------------------------
// Module loading over the C ABI
// ----------------------------------------------------------------------

#[test]
fn test_initialize_assembly_errors() {
    let (_runtime, bridge) = in_process();
    let handle = BridgeHandle { bridge };
    let path = CString::new("/nonexistent/libmissing.so").unwrap();

    let status = unsafe { hyperion_initialize_assembly(core::ptr::null(), CTX.0, path.as_ptr()) };
    assert_eq!(status, -3);

    let status = unsafe { hyperion_initialize_assembly(&handle, CTX.0, core::ptr::null()) };
    assert_eq!(status, STATUS_INVALID_ARGUMENT);

    let status = unsafe { hyperion_initialize_assembly(&handle, CTX.0, path.as_ptr()) };
    assert_eq!(status, -1);
    assert!(last_error_message().unwrap().contains("libmissing.so"));
    assert_eq!(handle.bridge.stats().modules_loaded, 1);
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn test_initialize_assembly_without_entry_point() {
    let (_runtime, bridge) = in_process();
    let handle = BridgeHandle { bridge };
    let path = CString::new("libc.so.6").unwrap();

    let status = unsafe { hyperion_initialize_assembly(&handle, CTX.0, path.as_ptr()) };
    assert_eq!(status, -1);
    let message = last_error_message().unwrap();
    assert!(message.contains(MODULE_ENTRY_SYMBOL), "{message}");
    assert_eq!(handle.bridge.stats().modules_loaded, 1);
}
