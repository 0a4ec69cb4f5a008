//! Kdump variant selection, installation and the configure/verify flow

mod common;

use std::rc::Rc;

use common::{debian, fail, fast_config, mock_node, ok, registry, rhel, sles, ubuntu, MockTransport};
use vmcheck_core::Error;
use vmcheck_tools::node::RawOutput;
use vmcheck_tools::tools::kdump::{Kdump, KdumpSession, KdumpState, Kexec};
use vmcheck_tools::{OsClassification, Tool, ToolRegistry};

const KERNEL_RELEASE: &str = "5.15.0-1051-azure";

#[test]
fn test_debian_uses_kdump_tools_service() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, ubuntu());

    let kdump = registry().resolve::<Kdump>(&node).unwrap();

    assert_eq!(kdump.service_name(), "kdump-tools");
    assert_eq!(kdump.command(), "kdump-config");
    assert_eq!(kdump.variant().name, "KdumpDebian");
    transport.log().assert_called("command -v kdump-config");
}

#[test]
fn test_second_resolve_returns_cached_instance() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let first = registry.resolve::<Kdump>(&node).unwrap();
    let second = registry.resolve::<Kdump>(&node).unwrap();

    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(transport.log().call_count("command -v kdump-config"), 1);
}

#[test]
fn test_same_family_same_variant() {
    let transport = MockTransport::new();
    let registry = registry();

    let on_ubuntu = registry.resolve::<Kdump>(&mock_node(&transport, ubuntu())).unwrap();
    let on_debian = registry.resolve::<Kdump>(&mock_node(&transport, debian())).unwrap();
    let on_rhel = registry.resolve::<Kdump>(&mock_node(&transport, rhel(8, 6))).unwrap();

    assert!(std::ptr::eq(on_ubuntu.variant(), on_debian.variant()));
    assert!(!std::ptr::eq(on_ubuntu.variant(), on_rhel.variant()));
    assert_eq!(on_rhel.command(), "kdumpctl");
}

#[test]
fn test_unknown_distro_unsupported() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, OsClassification::unknown());

    let err = registry().resolve::<Kdump>(&node).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDistro { .. }), "{err}");
    assert!(!node.tool_cache().contains("kdump"));
}

#[test]
fn test_install_when_missing() {
    let transport = MockTransport::new();
    transport.on_sequence(
        "command -v kdump-config",
        vec![fail(1, ""), ok("/usr/sbin/kdump-config")],
    );
    transport.on_sequence(
        "command -v makedumpfile",
        vec![fail(1, ""), ok("/usr/bin/makedumpfile")],
    );
    let node = mock_node(&transport, ubuntu());

    registry().resolve::<Kdump>(&node).unwrap();

    let log = transport.log();
    log.assert_called("apt-get -y install makedumpfile");
    log.assert_called("apt-get -y install kdump-tools");
    assert_eq!(log.call_count("apt-get update"), 1);
    assert_eq!(log.call_count("command -v kdump-config"), 2);
}

#[test]
fn test_missing_packages_reported() {
    let transport = MockTransport::new();
    transport.on("command -v kdump-config", fail(1, ""));
    transport.on(
        "apt-get -y install kdump-tools",
        RawOutput::new(100, "Reading package lists...", "E: Unable to locate package kdump-tools"),
    );
    let node = mock_node(&transport, ubuntu());

    let err = registry().resolve::<Kdump>(&node).unwrap_err();
    match err {
        Error::MissingPackages { packages } => assert_eq!(packages, vec!["kdump-tools"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_still_missing_after_install() {
    let transport = MockTransport::new();
    transport.on("command -v kdumptool", fail(1, ""));
    let node = mock_node(&transport, sles());

    let err = registry().resolve::<Kdump>(&node).unwrap_err();
    assert!(matches!(err, Error::MissingCapability { .. }), "{err}");
    let log = transport.log();
    log.assert_called("zypper --non-interactive --gpg-auto-import-keys refresh");
    log.assert_called("zypper --non-interactive install kdump");
}

#[test]
fn test_old_debian_kexec_built_from_source() {
    let transport = MockTransport::new();
    transport.on_sequence("command -v kexec", vec![fail(1, ""), ok("/sbin/kexec")]);
    transport.on("kexec -v", ok("kexec-tools 2.0.14"));
    transport.on("test -e /var/tmp/vmcheck/kexec/", fail(1, ""));
    transport.on("tar tf", ok("kexec-tools-2.0.18"));
    let node = mock_node(&transport, ubuntu());

    registry().resolve::<Kexec>(&node).unwrap();

    let log = transport.log();
    log.assert_called("apt-get -y install kexec-tools");
    log.assert_called_with(&["wget", "kexec-tools-2.0.18.tar.gz"]);
    log.assert_called("tar -xzf");
    log.assert_called("./configure");
    log.assert_called("make install");
    log.assert_called("yes | cp -f /usr/local/sbin/kexec /sbin/");
}

#[test]
fn test_recent_debian_kexec_uses_package() {
    let transport = MockTransport::new();
    transport.on_sequence("command -v kexec", vec![fail(1, ""), ok("/sbin/kexec")]);
    transport.on("kexec -v", ok("kexec-tools 2.0.16"));
    let node = mock_node(&transport, ubuntu());

    let kexec = registry().resolve::<Kexec>(&node).unwrap();

    assert_eq!(kexec.version(&node).unwrap().to_string(), "2.0.16");
    transport.log().assert_not_called("./configure");
}

// ─── Session ────────────────────────────────────────────────────────────────

#[test]
fn test_configure_debian() {
    let transport = MockTransport::new();
    transport.on("uname -r", ok(KERNEL_RELEASE));
    transport.on_sequence(
        "cat /etc/default/grub.d/kdump-tools.cfg",
        vec![
            ok("GRUB_CMDLINE_LINUX_DEFAULT=\"$GRUB_CMDLINE_LINUX_DEFAULT\""),
            ok("GRUB_CMDLINE_LINUX_DEFAULT=\"$GRUB_CMDLINE_LINUX_DEFAULT crashkernel=512M\""),
        ],
    );
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    assert_eq!(session.state(), KdumpState::NotConfigured);
    session.configure().unwrap();
    assert_eq!(session.state(), KdumpState::PendingReboot);

    let log = transport.log();
    for option in ["CONFIG_KEXEC=y", "CONFIG_CRASH_DUMP=y", "CONFIG_PROC_VMCORE=y"] {
        log.assert_called_with(&["grep", option, KERNEL_RELEASE]);
    }
    log.assert_called_with(&[
        "sed -i.bak",
        "^GRUB_CMDLINE_LINUX",
        "crashkernel=512M",
        "kdump-tools.cfg",
    ]);
    log.assert_called("update-grub");
    log.assert_called("systemctl enable kdump-tools");
    log.assert_called_with(&["sysctl -w", "kernel.unknown_nmi_panic=1"]);
    log.assert_not_called("free -h");
    assert_eq!(session.kdump().dump_path(), "/var/crash");
}

#[test]
fn test_configure_replaces_existing_crashkernel() {
    let transport = MockTransport::new();
    transport.on(
        "cat /etc/default/grub.d/kdump-tools.cfg",
        ok("GRUB_CMDLINE_LINUX_DEFAULT=\"quiet crashkernel=384M-:512M\""),
    );
    transport.on("/proc/sys/kernel/unknown_nmi_panic", fail(1, ""));
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node))
        .unwrap()
        .with_crashkernel("384M-:512M");
    session.configure().unwrap();

    let log = transport.log();
    log.assert_called_with(&["sed -i.bak", "crashkernel=[^[:space:]", "crashkernel=384M-:512M"]);
    log.assert_not_called("sysctl -w");
}

#[test]
fn test_configure_missing_kernel_option() {
    let transport = MockTransport::new();
    transport.on("grep CONFIG_CRASH_DUMP=y", fail(1, ""));
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    let err = session.configure().unwrap_err();

    assert!(err.is_execution());
    assert!(err.to_string().contains("CONFIG_CRASH_DUMP"));
    assert_eq!(session.state(), KdumpState::NotConfigured);
    transport.log().assert_not_called("update-grub");
}

#[test]
fn test_configure_missing_grub_file() {
    let transport = MockTransport::new();
    transport.on("test -e /etc/default/grub.d/kdump-tools.cfg", fail(1, ""));
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    let err = session.configure().unwrap_err();

    assert!(err.is_condition_not_met(), "{err}");
    assert_eq!(session.state(), KdumpState::NotConfigured);
}

#[test]
fn test_configure_redhat_large_memory_relocates_dump() {
    let transport = MockTransport::new();
    transport.on_sequence(
        "cat /etc/default/grub",
        vec![
            ok("GRUB_CMDLINE_LINUX=\"console=ttyS0\""),
            ok("GRUB_CMDLINE_LINUX=\"console=ttyS0 crashkernel=512M\""),
        ],
    );
    transport.on("test -e /sys/firmware/efi", fail(1, ""));
    transport.on("free -h", ok("2.0Ti"));
    transport.on("find", ok("/mnt/crash/127.0.0.1-2024-01-01/vmcore"));
    let node = mock_node(&transport, rhel(7, 9));
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    session.configure().unwrap();

    let log = transport.log();
    log.assert_called("grub2-mkconfig -o /boot/grub2/grub.cfg");
    log.assert_called("mkdir -p /mnt/crash");
    log.assert_called_with(&["sed -i.bak", "^path", "#path", "/etc/kdump.conf"]);
    log.assert_called_with(&["sed -i.bak", "$a path /mnt/crash", "/etc/kdump.conf"]);
    log.assert_called("systemctl enable kdump");
    assert_eq!(session.kdump().dump_path(), "/mnt/crash");

    session.verify_dump().unwrap();
    log.assert_called_with(&["find", "/mnt/crash", "-size +10M"]);
}

#[test]
fn test_configure_redhat8_uses_grubby() {
    let transport = MockTransport::new();
    transport.on("free -h", ok("503Gi"));
    let node = mock_node(&transport, rhel(8, 6));
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    session.configure().unwrap();

    let log = transport.log();
    log.assert_called_with(&["grubby --update-kernel=ALL", "crashkernel=512M"]);
    log.assert_not_called("sed -i.bak");
    log.assert_not_called("grub2-mkconfig");
    assert_eq!(session.kdump().dump_path(), "/var/crash");
}

#[test]
fn test_verify_loaded_retries_until_loaded() {
    let transport = MockTransport::new();
    transport.on("cat /proc/cmdline", ok("BOOT_IMAGE=/vmlinuz root=/dev/sda1 crashkernel=512M"));
    transport.on_sequence("cat /sys/kernel/kexec_crash_loaded", vec![ok("0"), ok("1")]);
    transport.on("cat /proc/iomem", ok("  2d000000-34ffffff : Crash kernel"));
    let node = mock_node(&transport, ubuntu());
    let registry = ToolRegistry::builtin(fast_config());

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    session.verify_loaded().unwrap();

    assert_eq!(session.state(), KdumpState::Loaded);
    assert_eq!(transport.log().call_count("cat /sys/kernel/kexec_crash_loaded"), 2);
}

#[test]
fn test_verify_loaded_gives_up() {
    let transport = MockTransport::new();
    transport.on("cat /proc/cmdline", ok("crashkernel=512M"));
    transport.on("cat /sys/kernel/kexec_crash_loaded", ok("0"));
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    let err = session.verify_loaded().unwrap_err();

    assert!(err.is_condition_not_met());
    assert_eq!(transport.log().call_count("cat /sys/kernel/kexec_crash_loaded"), 3);
    transport.log().assert_not_called("/proc/iomem");
}

#[test]
fn test_verify_loaded_without_crashkernel_parameter() {
    let transport = MockTransport::new();
    transport.on("cat /proc/cmdline", ok("BOOT_IMAGE=/vmlinuz root=/dev/sda1"));
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    let err = session.verify_loaded().unwrap_err();

    assert!(err.to_string().contains("crashkernel=512M"));
    assert_eq!(session.state(), KdumpState::NotConfigured);
    transport.log().assert_not_called("kexec_crash_loaded");
}

#[test]
fn test_verify_dump_requires_vmcore() {
    let transport = MockTransport::new();
    transport.on_sequence(
        "-size +10M",
        vec![ok(""), ok("/var/crash/202401011200/dump.202401011200")],
    );
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let mut session = KdumpSession::new(registry.context(&node)).unwrap();
    assert!(session.verify_dump().unwrap_err().is_condition_not_met());
    assert_eq!(session.state(), KdumpState::NotConfigured);

    session.verify_dump().unwrap();
    assert_eq!(session.state(), KdumpState::DumpVerified);
    assert_eq!(transport.log().call_count("-size +10M"), 2);
}

#[test]
fn test_session_on_unknown_distro() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, OsClassification::unknown());
    let registry = registry();

    let err = KdumpSession::new(registry.context(&node)).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDistro { .. }));
}
