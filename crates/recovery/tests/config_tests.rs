//! Integration tests for configuration parsing
//!
//! Checks the shape of recovery.toml files as shipped on devices:
//! - Minimal config relying on defaults
//! - Full config for a configfs gadget under systemd
//! - Malformed files

mod recovery_config {
    const MINIMAL_CONFIG: &str = r#"
[recovery]
log_level = "info"
"#;

    const FULL_CONFIG: &str = r#"
[recovery]
log_level = "debug"

[usb]
legacy_node = "/sys/class/android_usb/android0/enable"
configfs_node = "/config/usb_gadget/g1/UDC"
controller_property = "sys.usb.controller"

[daemon]
name = "adbd"
debuggable_property = "ro.debuggable"
control = "systemd"

[sideload]
helper = "/sbin/recovery"
helper_arg0 = "recovery"
mode_flag = "--adbd"
arrival_path = "/sideload/package.zip"
exit_path = "/sideload/exit"
timeout_secs = 120
poll_interval_ms = 500

[install]
command = "/sbin/install-package"
"#;

    #[test]
    fn test_parse_minimal_config() {
        let config: toml::Value = toml::from_str(MINIMAL_CONFIG).unwrap();

        let recovery = config.get("recovery").unwrap();
        assert_eq!(recovery.get("log_level").unwrap().as_str().unwrap(), "info");
        assert!(config.get("usb").is_none());
        assert!(config.get("install").is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config: toml::Value = toml::from_str(FULL_CONFIG).unwrap();

        let usb = config.get("usb").unwrap();
        assert_eq!(
            usb.get("configfs_node").unwrap().as_str().unwrap(),
            "/config/usb_gadget/g1/UDC"
        );

        let daemon = config.get("daemon").unwrap();
        assert_eq!(daemon.get("name").unwrap().as_str().unwrap(), "adbd");
        assert_eq!(daemon.get("control").unwrap().as_str().unwrap(), "systemd");

        let sideload = config.get("sideload").unwrap();
        assert_eq!(sideload.get("mode_flag").unwrap().as_str().unwrap(), "--adbd");
        assert_eq!(sideload.get("timeout_secs").unwrap().as_integer().unwrap(), 120);
        assert_eq!(
            sideload.get("poll_interval_ms").unwrap().as_integer().unwrap(),
            500
        );
        assert_ne!(
            sideload.get("arrival_path").unwrap().as_str().unwrap(),
            sideload.get("exit_path").unwrap().as_str().unwrap()
        );

        let install = config.get("install").unwrap();
        assert_eq!(
            install.get("command").unwrap().as_str().unwrap(),
            "/sbin/install-package"
        );
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result: Result<toml::Value, _> = toml::from_str("[sideload\ntimeout_secs = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_type_is_visible() {
        let config: toml::Value = toml::from_str("[sideload]\ntimeout_secs = \"five\"").unwrap();
        let sideload = config.get("sideload").unwrap();
        assert!(sideload.get("timeout_secs").unwrap().as_integer().is_none());
    }
}
