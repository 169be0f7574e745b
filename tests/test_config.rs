use hyperion_interop::logging::LogConfig;
use hyperion_interop::{
    Bridge, BridgeConfig, ClassHolderContext, ConfigError, FnModule, InProcessRuntime, RegistrationError, TypeTag,
    Value,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

const CTX: ClassHolderContext = ClassHolderContext(0x50);

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
[registry]
max_struct_size = 32
max_parameters = 2

[cache]
initial_capacity = 8

[logging]
level = "warn"
json = true
"#,
    );

    let config = BridgeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.registry.max_struct_size, 32);
    assert_eq!(config.registry.max_parameters, 2);
    assert_eq!(config.cache.initial_capacity, 8);
    assert!(config.logging.json);

    let log = LogConfig::from_settings(&config.logging);
    assert!(log.json_format);
}

#[test]
fn test_load_from_environment() {
    assert_eq!(hyperion_interop::config::CONFIG_ENV, "HYPERION_BRIDGE_CONFIG");
    let file = write_config("[cache]\ninitial_capacity = 3\n");

    std::env::set_var("HYPERION_BRIDGE_CONFIG", file.path());
    let loaded = BridgeConfig::from_env();
    std::env::remove_var("HYPERION_BRIDGE_CONFIG");
    assert_eq!(loaded.unwrap().cache.initial_capacity, 3);

    let defaults = BridgeConfig::from_env().unwrap();
    assert_eq!(defaults.cache.initial_capacity, BridgeConfig::default().cache.initial_capacity);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = BridgeConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn test_limits_apply_to_registration() {
    let file = write_config("[registry]\nmax_parameters = 1\nmax_struct_size = 8\n");
    let config = BridgeConfig::from_file(file.path()).unwrap();
    let bridge = Bridge::new(Arc::new(InProcessRuntime::new()), config);

    let report = bridge
        .register_module(
            CTX,
            FnModule::new("limited", |m| {
                m.struct_type("Limited.Big", 64, 8).build();
                m.opaque_class("Limited")
                    .static_method("One", &[TypeTag::I32], TypeTag::I32, |args| Ok(Value::I32(args.i32(0)?)))
                    .static_method("Two", &[TypeTag::I32, TypeTag::I32], TypeTag::I32, |_| Ok(Value::I32(0)))
                    .build();
            }),
        )
        .unwrap();

    assert_eq!(report.types.len(), 1);
    assert_eq!(report.method_count(), 1);
    assert!(matches!(
        report.skipped.as_slice(),
        [
            RegistrationError::InvalidType { .. },
            RegistrationError::TooManyParameters { count: 2, max: 1, .. }
        ]
    ));
}
