// SPDX-License-Identifier: Apache-2.0
#![cfg(target_os = "linux")]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use libc::{
    AF_INET, AI_NUMERICHOST, AI_NUMERICSERV, EAI_AGAIN, EAI_FAIL, EAI_NONAME, EEXIST, EINVAL,
    NI_NAMEREQD, NI_NUMERICHOST, NI_NUMERICSERV, SOCK_STREAM,
};
use portcullis::host::Loopback;
use portcullis::item::resolve::Hints;
use portcullis::Result;
use portcullis_runtime::resolver::{AddrInfo, Resolver, StaticResolver, MAX_RESOLVERS};
use portcullis_runtime::Runtime;

type Log = Arc<Mutex<Vec<String>>>;

/// Resolver answering with a fixed result and logging every call.
struct Fixed {
    name: &'static str,
    answer: Result<IpAddr>,
    log: Log,
}

impl Fixed {
    fn new(name: &'static str, answer: Result<IpAddr>, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name,
            answer,
            log: log.clone(),
        })
    }
}

impl Resolver for Fixed {
    fn name(&self) -> &str {
        self.name
    }

    fn getaddrinfo(
        &self,
        _node: Option<&str>,
        _service: Option<&str>,
        _hints: &Hints,
    ) -> Result<Vec<AddrInfo>> {
        self.log.lock().unwrap().push(format!("{}: getaddrinfo", self.name));
        let ip = self.answer?;
        Ok(vec![AddrInfo {
            family: AF_INET,
            socktype: SOCK_STREAM,
            protocol: 0,
            addr: SocketAddr::new(ip, 0),
        }])
    }

    fn getnameinfo(&self, _addr: &SocketAddr, _flags: i32) -> Result<(String, String)> {
        self.log.lock().unwrap().push(format!("{}: getnameinfo", self.name));
        self.answer.map(|_| (self.name.into(), "0".into()))
    }

    fn freeaddrinfo(&self, entries: Vec<AddrInfo>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}: freeaddrinfo {}", self.name, entries.len()));
    }
}

fn runtime() -> Runtime {
    let loopback = Loopback::host();
    let ecalls = loopback.ecalls().clone();
    Runtime::new(Arc::new(loopback), ecalls, 16).unwrap()
}

fn drain(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

#[test]
fn call_order() {
    let rt = runtime();
    let log = Log::default();
    assert_eq!(rt.getaddrinfo(Some("db"), None, None), Err(EAI_NONAME));

    // Slots are consulted in ascending order, whatever the registration order.
    let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
    rt.register_resolver(2, Fixed::new("third", Ok(ip), &log)).unwrap();
    rt.register_resolver(0, Fixed::new("first", Err(EAI_AGAIN), &log)).unwrap();
    rt.register_resolver(1, Fixed::new("second", Err(EAI_FAIL), &log)).unwrap();
    assert_eq!(
        rt.register_resolver(0, Fixed::new("again", Err(EAI_FAIL), &log)),
        Err(EEXIST)
    );
    assert_eq!(
        rt.register_resolver(MAX_RESOLVERS, Fixed::new("past", Err(EAI_FAIL), &log)),
        Err(EINVAL)
    );

    let list = rt.getaddrinfo(Some("db"), Some("5432"), None).unwrap();
    assert_eq!(list.slot(), 2);
    assert_eq!(list.entries()[0].addr.ip(), ip);
    assert_eq!(
        drain(&log),
        ["first: getaddrinfo", "second: getaddrinfo", "third: getaddrinfo"]
    );

    // The list goes back to the resolver that produced it.
    rt.freeaddrinfo(list);
    assert_eq!(drain(&log), ["third: freeaddrinfo 1"]);

    assert_eq!(
        rt.getnameinfo(&SocketAddr::new(ip, 0), 0),
        Ok(("third".into(), "0".into()))
    );
    assert_eq!(
        drain(&log),
        ["first: getnameinfo", "second: getnameinfo", "third: getnameinfo"]
    );

    assert_eq!(
        rt.push_resolver(Fixed::new("full", Err(EAI_FAIL), &log)),
        Err(EINVAL)
    );
}

#[test]
fn first_success_wins() {
    let rt = runtime();
    let log = Log::default();
    let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3));
    assert_eq!(rt.push_resolver(Fixed::new("first", Err(EAI_AGAIN), &log)), Ok(0));
    assert_eq!(rt.push_resolver(Fixed::new("second", Ok(ip), &log)), Ok(1));
    assert_eq!(rt.push_resolver(Fixed::new("third", Ok(ip), &log)), Ok(2));

    assert_eq!(rt.getaddrinfo(Some("db"), None, None).unwrap().slot(), 1);
    assert_eq!(drain(&log), ["first: getaddrinfo", "second: getaddrinfo"]);
    assert_eq!(
        rt.getnameinfo(&SocketAddr::new(ip, 0), 0),
        Ok(("second".into(), "0".into()))
    );
    assert_eq!(drain(&log), ["first: getnameinfo", "second: getnameinfo"]);
}

#[test]
fn last_failure_wins() {
    let rt = runtime();
    let log = Log::default();
    rt.push_resolver(Fixed::new("first", Err(EAI_AGAIN), &log)).unwrap();
    rt.push_resolver(Fixed::new("second", Err(EAI_FAIL), &log)).unwrap();

    assert_eq!(rt.getaddrinfo(Some("db"), None, None), Err(EAI_FAIL));
    assert_eq!(
        rt.getnameinfo(&"10.0.0.1:0".parse().unwrap(), 0),
        Err(EAI_FAIL)
    );
    assert_eq!(drain(&log).len(), 4);
}

#[test]
fn host_answers_first() {
    let rt = Runtime::loopback().unwrap();
    let hosts = StaticResolver::new();
    hosts.insert("localhost", IpAddr::V4(Ipv4Addr::new(10, 9, 8, 7)));
    // The host resolver holds slot 0.
    assert_eq!(
        rt.register_resolver(0, Arc::new(StaticResolver::new())),
        Err(EEXIST)
    );
    assert_eq!(rt.push_resolver(Arc::new(hosts)), Ok(1));

    // Numeric lookups are answered by the host.
    let hints = Hints {
        flags: AI_NUMERICHOST | AI_NUMERICSERV,
        family: AF_INET,
        socktype: SOCK_STREAM,
        ..Default::default()
    };
    let list = rt
        .getaddrinfo(Some("127.0.0.1"), Some("8080"), Some(&hints))
        .unwrap();
    assert_eq!(list.slot(), 0);
    assert_eq!(
        list.entries()[0].addr,
        "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
    );
    rt.freeaddrinfo(list);

    let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
    assert_eq!(
        rt.getnameinfo(&addr, NI_NUMERICHOST | NI_NUMERICSERV),
        Ok(("127.0.0.1".into(), "8080".into()))
    );
}

#[test]
fn static_names() {
    let rt = runtime();
    let hosts = StaticResolver::new();
    hosts.insert("Vault.Internal", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)));
    rt.push_resolver(Arc::new(hosts)).unwrap();

    let hints = Hints {
        socktype: SOCK_STREAM,
        ..Default::default()
    };
    let list = rt
        .getaddrinfo(Some("vault.internal"), Some("8200"), Some(&hints))
        .unwrap();
    assert_eq!(list.entries().len(), 1);
    assert_eq!(list.entries()[0].addr, "10.0.0.9:8200".parse().unwrap());

    let addr = list.entries()[0].addr;
    assert_eq!(
        rt.getnameinfo(&addr, 0),
        Ok(("vault.internal".into(), "8200".into()))
    );
    assert_eq!(
        rt.getnameinfo(&"10.0.0.10:1".parse().unwrap(), NI_NAMEREQD),
        Err(EAI_NONAME)
    );
    assert_eq!(rt.getaddrinfo(Some("nowhere"), None, None), Err(EAI_NONAME));
}
