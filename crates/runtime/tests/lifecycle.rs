// SPDX-License-Identifier: Apache-2.0
#![cfg(target_os = "linux")]

use std::fs;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;

use libc::{
    EAGAIN, EBADF, ENOSYS, EPERM, FUTEX_PRIVATE_FLAG, FUTEX_WAIT, FUTEX_WAKE, NI_NAMEREQD,
    O_CREAT, O_RDONLY, O_RDWR, O_WRONLY,
};
use portcullis::host::Loopback;
use portcullis_runtime::{Config, Runtime};
use serial_test::serial;

const KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

fn read_to_end(runtime: &Runtime, fd: i32) -> Vec<u8> {
    let mut contents = Vec::new();
    let mut buf = [0u8; 32];
    loop {
        match runtime.read(fd, &mut buf).unwrap() {
            0 => return contents,
            n => contents.extend_from_slice(&buf[..n]),
        }
    }
}

#[test]
#[serial]
fn configured_mounts() {
    let host = tempfile::tempdir().unwrap();
    let sealed = tempfile::tempdir().unwrap();
    let config: Config = format!(
        r#"
        host_resolver = false
        max_fds = 8

        [[mounts]]
        prefix = "/"
        device = "host"
        path = "{}"

        [[mounts]]
        prefix = "/secure"
        device = "secure"
        path = "{}"
        key = "{KEY}"

        [[mounts]]
        prefix = "/tmp"
        device = "virtual"

        [[hosts]]
        name = "vault"
        addr = "10.0.0.9"
        "#,
        host.path().display(),
        sealed.path().display(),
    )
    .parse()
    .unwrap();

    let runtime = Runtime::from_config(&config).unwrap();
    let mut mounts = runtime.mounts();
    mounts.sort();
    assert_eq!(mounts, ["/", "/secure", "/tmp"]);

    for path in ["/plain", "/secure/sealed", "/tmp/scratch"] {
        let fd = runtime.open(path, O_CREAT | O_WRONLY, 0o600).unwrap();
        assert_eq!(runtime.write(fd, path.as_bytes()), Ok(path.len()));
        runtime.close(fd).unwrap();
    }
    assert_eq!(fs::read(host.path().join("plain")).unwrap(), b"/plain");
    assert_ne!(fs::read(sealed.path().join("sealed")).unwrap(), b"/secure/sealed");
    assert!(!host.path().join("tmp").exists());

    let fd = runtime.open("/secure/sealed", O_RDONLY, 0).unwrap();
    assert_eq!(read_to_end(&runtime, fd), b"/secure/sealed");
    runtime.close(fd).unwrap();

    // Only the static resolver is registered.
    let list = runtime.getaddrinfo(Some("vault"), Some("8200"), None).unwrap();
    assert_eq!(list.slot(), 0);
    assert_eq!(list.entries()[0].addr, "10.0.0.9:8200".parse().unwrap());
    let unknown: SocketAddr = "127.0.0.1:80".parse().unwrap();
    assert!(runtime.getnameinfo(&unknown, NI_NAMEREQD).is_err());

    // The descriptor table holds `max_fds` entries.
    while runtime.open("/tmp/scratch", O_RDONLY, 0).is_ok() {}
    assert_eq!(runtime.open_fds(), 8);
}

#[test]
fn configuration_errors() {
    let config: Config = r#"
        [[mounts]]
        prefix = "tmp"
        device = "virtual"
    "#
    .parse()
    .unwrap();
    let err = Runtime::from_config(&config).map(|_| ()).unwrap_err();
    assert_eq!(err.to_string(), "failed to mount `tmp`");

    let config: Config = r#"
        [[mounts]]
        prefix = "/data"
        device = "virtual"

        [[mounts]]
        prefix = "/data/"
        device = "virtual"
    "#
    .parse()
    .unwrap();
    let err = Runtime::from_config(&config).map(|_| ()).unwrap_err();
    assert_eq!(err.to_string(), "failed to mount `/data/`");
    assert_eq!(
        err.root_cause().to_string(),
        std::io::Error::from_raw_os_error(libc::EEXIST).to_string()
    );
}

#[test]
#[serial]
fn switchless_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let config: Config = format!(
        r#"
        switchless_workers = 2

        [[mounts]]
        prefix = "/"
        device = "host"
        path = "{}"
        "#,
        dir.path().display(),
    )
    .parse()
    .unwrap();
    let runtime = Runtime::from_config(&config).unwrap();

    std::thread::scope(|scope| {
        for i in 0..4 {
            let runtime = &runtime;
            scope.spawn(move || {
                let path = format!("/worker-{i}");
                let fd = runtime.open(&path, O_CREAT | O_RDWR, 0o600).unwrap();
                for _ in 0..16 {
                    runtime.write(fd, path.as_bytes()).unwrap();
                }
                runtime.close(fd).unwrap();
            });
        }
    });
    for i in 0..4 {
        let contents = fs::read(dir.path().join(format!("worker-{i}"))).unwrap();
        assert_eq!(contents, format!("/worker-{i}").repeat(16).as_bytes());
    }

    let fd = runtime.open("/worker-0", O_RDONLY, 0).unwrap();
    runtime.shutdown().unwrap();
    assert!(runtime.is_shutdown());
    assert_eq!(runtime.open_fds(), 0);
    assert_eq!(runtime.read(fd, &mut [0; 4]), Err(EBADF));
    // A second shutdown is a no-op.
    runtime.shutdown().unwrap();
}

#[test]
fn ecalls() {
    let loopback = Loopback::host();
    let ecalls = loopback.ecalls().clone();
    let runtime = Runtime::switchless(loopback, 1, 16).unwrap();

    runtime
        .register_ecall(7, |argv, data| {
            let len = argv[0];
            data[..len].reverse();
            Ok(len)
        })
        .unwrap();
    ecalls
        .register_fn(portcullis::item::Kind::Ecall, 8, |_, _| Err(EPERM))
        .unwrap();

    let mut data = *b"stressed";
    assert_eq!(runtime.ecall(7, [8, 0, 0, 0, 0, 0], &mut data), Ok(8));
    assert_eq!(&data, b"desserts");
    assert_eq!(runtime.ecall(8, [0; 6], &mut []), Err(EPERM));
    assert_eq!(runtime.ecall(9, [0; 6], &mut []), Err(ENOSYS));
}

#[test]
fn futex() {
    let runtime = Runtime::loopback().unwrap();
    let word = AtomicU32::new(1);

    let wait = FUTEX_WAIT | FUTEX_PRIVATE_FLAG;
    assert_eq!(runtime.futex(&word, wait, 0, None, None, 0), Err(EAGAIN));
    let wake = FUTEX_WAKE | FUTEX_PRIVATE_FLAG;
    assert_eq!(runtime.futex(&word, wake, 1, None, None, 0), Ok(0));

    let timeout = libc::timespec {
        tv_sec: 0,
        tv_nsec: 10_000_000,
    };
    assert_eq!(
        runtime.futex(&word, wait, 1, Some(&timeout), None, 0),
        Err(libc::ETIMEDOUT)
    );
}
