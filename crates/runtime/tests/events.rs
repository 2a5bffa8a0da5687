// SPDX-License-Identifier: Apache-2.0
#![cfg(target_os = "linux")]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libc::{
    AF_UNIX, EAGAIN, EBADF, EEXIST, EFD_NONBLOCK, EFD_SEMAPHORE, EINVAL, ENOENT, ENOTSUP,
    EPIPE, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPERM, FIONBIO, FIONREAD, MSG_DONTWAIT,
    SHUT_WR, SOCK_DGRAM, SOCK_NONBLOCK, SOCK_STREAM,
};
use portcullis::host::Loopback;
use portcullis_runtime::backend::VirtualFs;
use portcullis_runtime::{EpollEvent, Events, Runtime};

fn runtime() -> Runtime {
    let loopback = Loopback::host();
    let ecalls = loopback.ecalls().clone();
    Runtime::new(Arc::new(loopback), ecalls, 32).unwrap()
}

fn put(runtime: &Runtime, fd: i32, value: u64) -> Result<usize, i32> {
    runtime.write(fd, &value.to_ne_bytes())
}

fn take(runtime: &Runtime, fd: i32) -> Result<u64, i32> {
    let mut buf = [0u8; 8];
    runtime.read(fd, &mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}

fn watch(events: Events, data: u64) -> Option<EpollEvent> {
    Some(EpollEvent { events, data })
}

#[test]
fn eventfd() {
    let rt = runtime();
    assert_eq!(rt.eventfd(0, 0x2), Err(EINVAL));

    let counter = rt.eventfd(5, EFD_NONBLOCK).unwrap();
    assert_eq!(put(&rt, counter, 3), Ok(8));
    assert_eq!(take(&rt, counter), Ok(8));
    assert_eq!(take(&rt, counter), Err(EAGAIN));
    assert_eq!(rt.write(counter, &[1, 2, 3]), Err(EINVAL));
    assert_eq!(put(&rt, counter, u64::MAX), Err(EINVAL));

    let semaphore = rt.eventfd(2, EFD_SEMAPHORE | EFD_NONBLOCK).unwrap();
    assert_eq!(take(&rt, semaphore), Ok(1));
    assert_eq!(take(&rt, semaphore), Ok(1));
    assert_eq!(take(&rt, semaphore), Err(EAGAIN));

    // A blocking counter waits for a writer.
    let rt = Arc::new(rt);
    let blocking = rt.eventfd(0, 0).unwrap();
    let reader = {
        let rt = rt.clone();
        thread::spawn(move || take(&rt, blocking))
    };
    thread::sleep(Duration::from_millis(20));
    put(&rt, blocking, 42).unwrap();
    assert_eq!(reader.join().unwrap(), Ok(42));

    let mut on = 1;
    assert_eq!(rt.ioctl(blocking, FIONBIO as _, Some(&mut on)), Ok(0));
    assert_eq!(take(&rt, blocking), Err(EAGAIN));
}

#[test]
fn socketpair() {
    let rt = runtime();
    assert_eq!(rt.socketpair(AF_UNIX, SOCK_DGRAM, 0).map(|_| ()), Err(libc::EOPNOTSUPP));

    let [a, b] = rt.socketpair(AF_UNIX, SOCK_STREAM | SOCK_NONBLOCK, 0).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(rt.recv(b, &mut buf, 0), Err(EAGAIN));

    assert_eq!(rt.send(a, b"ping", 0), Ok(4));
    let mut pending = 0;
    assert_eq!(rt.ioctl(b, FIONREAD as _, Some(&mut pending)), Ok(0));
    assert_eq!(pending, 4);
    assert_eq!(rt.read(b, &mut buf), Ok(4));
    assert_eq!(&buf[..4], b"ping");

    assert_eq!(rt.write(b, b"pong"), Ok(4));
    assert_eq!(rt.recv(a, &mut buf, MSG_DONTWAIT), Ok(4));

    // A duplicate keeps the pair connected.
    let dup = rt.dup(a).unwrap();
    rt.close(a).unwrap();
    assert_eq!(rt.send(dup, b"still here", 0), Ok(10));
    assert_eq!(rt.recv(b, &mut buf, 0), Ok(10));

    rt.shutdown_socket(dup, SHUT_WR).unwrap();
    assert_eq!(rt.send(dup, b"x", 0), Err(EPIPE));
    assert_eq!(rt.recv(b, &mut buf, 0), Ok(0));

    rt.close(dup).unwrap();
    assert_eq!(rt.send(b, b"x", 0), Err(EPIPE));
    assert_eq!(rt.send(dup, b"x", 0), Err(EBADF));

    // Sockets operations need a socket.
    rt.mount("/", VirtualFs::device().unwrap()).unwrap();
    let file = rt.open("/file", libc::O_CREAT | libc::O_RDWR, 0).unwrap();
    assert_eq!(rt.send(file, b"x", 0), Err(libc::ENOTSOCK));
    assert_eq!(rt.lseek(b, 0, libc::SEEK_SET), Err(ENOTSUP));
}

#[test]
fn epoll() {
    let rt = runtime();
    assert_eq!(rt.epoll_create(0), Err(EINVAL));
    assert_eq!(rt.epoll_create1(0x1), Err(EINVAL));

    let ep = rt.epoll_create(1).unwrap();
    let [a, b] = rt.socketpair(AF_UNIX, SOCK_STREAM, 0).unwrap();
    let counter = rt.eventfd(0, EFD_NONBLOCK).unwrap();

    rt.epoll_ctl(ep, EPOLL_CTL_ADD, b, watch(Events::IN, 1)).unwrap();
    rt.epoll_ctl(ep, EPOLL_CTL_ADD, counter, watch(Events::IN, 2)).unwrap();
    assert_eq!(
        rt.epoll_ctl(ep, EPOLL_CTL_ADD, b, watch(Events::IN, 1)),
        Err(EEXIST)
    );
    assert_eq!(
        rt.epoll_ctl(ep, EPOLL_CTL_MOD, a, watch(Events::IN, 3)),
        Err(ENOENT)
    );
    assert_eq!(
        rt.epoll_ctl(ep, EPOLL_CTL_ADD, ep, watch(Events::IN, 0)),
        Err(EINVAL)
    );
    assert_eq!(rt.epoll_ctl(ep, EPOLL_CTL_ADD, 30, watch(Events::IN, 0)), Err(EBADF));
    assert_eq!(rt.epoll_ctl(a, EPOLL_CTL_ADD, b, watch(Events::IN, 0)), Err(ENOTSUP));

    rt.mount("/", VirtualFs::device().unwrap()).unwrap();
    let file = rt.open("/file", libc::O_CREAT | libc::O_RDWR, 0).unwrap();
    assert_eq!(rt.epoll_ctl(ep, EPOLL_CTL_ADD, file, watch(Events::IN, 0)), Err(EPERM));

    let mut events = [EpollEvent::default(); 4];
    assert_eq!(rt.epoll_wait(ep, &mut events, 0), Ok(0));
    let start = Instant::now();
    assert_eq!(rt.epoll_wait(ep, &mut events, 20), Ok(0));
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(rt.epoll_wait(ep, &mut [], 0), Err(EINVAL));

    rt.write(a, b"x").unwrap();
    put(&rt, counter, 1).unwrap();
    assert_eq!(rt.epoll_wait(ep, &mut events, -1), Ok(2));
    let mut ready: Vec<_> = events[..2].iter().map(|e| (e.data, e.events)).collect();
    ready.sort_by_key(|(data, _)| *data);
    assert_eq!(ready, [(1, Events::IN), (2, Events::IN)]);

    // Level triggered: readiness persists until it is consumed.
    assert_eq!(rt.epoll_wait(ep, &mut events[..1], 0), Ok(1));
    take(&rt, counter).unwrap();
    assert_eq!(rt.epoll_wait(ep, &mut events, 0), Ok(1));
    assert_eq!(events[0].data, 1);

    rt.epoll_ctl(ep, EPOLL_CTL_DEL, b, None).unwrap();
    assert_eq!(rt.epoll_wait(ep, &mut events, 0), Ok(0));
    assert_eq!(rt.epoll_ctl(ep, EPOLL_CTL_DEL, b, None), Err(ENOENT));

    // Closing a watched descriptor drops it from the interest list.
    rt.epoll_ctl(ep, EPOLL_CTL_ADD, b, watch(Events::IN, 1)).unwrap();
    rt.close(b).unwrap();
    assert_eq!(rt.epoll_wait(ep, &mut events, 0), Ok(0));
}

#[test]
fn epoll_wakes_up() {
    let rt = Arc::new(runtime());
    let ep = rt.epoll_create1(libc::EPOLL_CLOEXEC).unwrap();
    let counter = rt.eventfd(0, 0).unwrap();
    rt.epoll_ctl(ep, EPOLL_CTL_ADD, counter, watch(Events::IN | Events::OUT, 9))
        .unwrap();
    rt.epoll_ctl(ep, EPOLL_CTL_MOD, counter, watch(Events::IN, 9)).unwrap();

    let waiter = {
        let rt = rt.clone();
        thread::spawn(move || {
            let mut events = [EpollEvent::default(); 2];
            let n = rt.epoll_wait(ep, &mut events, -1).unwrap();
            events[..n].to_vec()
        })
    };
    thread::sleep(Duration::from_millis(20));
    put(&rt, counter, 1).unwrap();
    assert_eq!(waiter.join().unwrap(), [EpollEvent { events: Events::IN, data: 9 }]);
}

#[test]
fn close_while_in_use() {
    let rt = Arc::new(runtime());
    let [a, b] = rt.socketpair(AF_UNIX, SOCK_STREAM, 0).unwrap();

    // The reader holds the device of `a` for as long as it blocks.
    let reader = {
        let rt = rt.clone();
        thread::spawn(move || rt.recv(a, &mut [0u8; 4], 0))
    };
    thread::sleep(Duration::from_millis(20));

    rt.close(a).unwrap();
    assert_eq!(rt.send(b, b"x", 0), Err(EPIPE));
    assert_eq!(rt.recv(a, &mut [0u8; 4], 0), Err(EBADF));

    rt.close(b).unwrap();
    let read = reader.join().unwrap();
    assert!(matches!(read, Ok(0) | Err(EBADF)), "{read:?}");
}
