//! Test doubles shared by the unit tests

use crate::domain::ports::Prober;
use crate::probe::{ChildDescriptor, ProbeFailure, ProbeResult, ProbeTarget, ServerIdentity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted behaviour for one address
#[derive(Debug, Clone)]
pub enum Script {
    Reply {
        server: &'static str,
        children: Vec<(&'static str, &'static str, u16)>,
        delay: Duration,
    },
    Fail(ProbeFailure),
    Hang,
    Panic,
}

/// Prober that answers from a fixed table, unknown addresses are refused
#[derive(Debug, Default)]
pub struct ScriptedProber {
    scripts: HashMap<String, Script>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(
        mut self,
        address: &str,
        server: &'static str,
        children: Vec<(&'static str, &'static str, u16)>,
    ) -> Self {
        self.scripts.insert(
            address.to_string(),
            Script::Reply {
                server,
                children,
                delay: Duration::ZERO,
            },
        );
        self
    }

    pub fn script(mut self, address: &str, script: Script) -> Self {
        self.scripts.insert(address.to_string(), script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(&target.address) {
            Some(Script::Reply {
                server,
                children,
                delay,
            }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                ProbeResult::Success {
                    target: target.clone(),
                    server: ServerIdentity {
                        name: server.to_string(),
                        id: format!("ID-{}", server),
                    },
                    children: children
                        .iter()
                        .map(|(name, ip, port)| ChildDescriptor {
                            name: name.to_string(),
                            account: None,
                            address: ip.to_string(),
                            port: *port,
                            rtt: None,
                            subscription_count: None,
                        })
                        .collect(),
                }
            }
            Some(Script::Fail(cause)) => ProbeResult::failure(target.clone(), cause.clone()),
            Some(Script::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Script::Panic) => panic!("scripted probe panic for {}", target.address),
            None => ProbeResult::failure(
                target.clone(),
                ProbeFailure::Connect("connection refused".into()),
            ),
        }
    }

    fn transport(&self) -> &'static str {
        "scripted"
    }
}
