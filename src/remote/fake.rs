//! Recording in-memory executor for tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ConnectTarget, RemoteCommand, RemoteExecutor, Session};
use crate::{Error, Result};

#[derive(Default)]
struct State {
    connects: Vec<String>,
    closes: Vec<String>,
    commands: Vec<(String, String)>,
    open: usize,
    max_open: usize,
    connect_failures: HashMap<String, u32>,
    command_failures: Vec<(String, String)>,
    outputs: Vec<(String, String, String)>,
}

/// Executor whose sessions record every command instead of running it
#[derive(Clone, Default)]
pub(crate) struct FakeExecutor {
    state: Arc<Mutex<State>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` connects to `host`
    pub fn fail_connect(&self, host: &str, times: u32) -> &Self {
        self.state
            .lock()
            .unwrap()
            .connect_failures
            .insert(host.to_string(), times);
        self
    }

    /// Fail any command on `host` whose line contains `needle`
    pub fn fail_command(&self, host: &str, needle: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .command_failures
            .push((host.to_string(), needle.to_string()));
        self
    }

    /// Output returned by `capture` on `host` for lines containing `needle`
    pub fn output(&self, host: &str, needle: &str, stdout: &str) -> &Self {
        self.state.lock().unwrap().outputs.push((
            host.to_string(),
            needle.to_string(),
            stdout.to_string(),
        ));
        self
    }

    pub fn connects(&self) -> Vec<String> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn closes(&self) -> Vec<String> {
        self.state.lock().unwrap().closes.clone()
    }

    /// Every command line run on `host`, in order
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Hosts in the order they received their first command containing `needle`
    pub fn hosts_running(&self, needle: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut hosts = Vec::new();
        for (host, line) in &state.commands {
            if line.contains(needle) && !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }
        hosts
    }

    pub fn all_commands(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Highest number of sessions open at the same time
    pub fn max_open(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    pub fn open(&self) -> usize {
        self.state.lock().unwrap().open
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>> {
        tokio::task::yield_now().await;
        {
            let mut state = self.state.lock().unwrap();
            state.connects.push(target.host.clone());
            if let Some(remaining) = state.connect_failures.get_mut(&target.host) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::connection(
                        &target.host,
                        &target.address,
                        "connection refused",
                    ));
                }
            }
            state.open += 1;
            state.max_open = state.max_open.max(state.open);
        }
        Ok(Box::new(FakeSession {
            host: target.host.clone(),
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct FakeSession {
    host: String,
    state: Arc<Mutex<State>>,
    closed: bool,
}

impl FakeSession {
    async fn record(&self, command: &RemoteCommand) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state
            .commands
            .push((self.host.clone(), command.line().to_string()));
        let failed = state
            .command_failures
            .iter()
            .any(|(h, needle)| *h == self.host && command.line().contains(needle.as_str()));
        if failed {
            return Err(Error::command(
                &self.host,
                command.to_string(),
                "exit status 1",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn run(&mut self, command: &RemoteCommand) -> Result<()> {
        self.record(command).await
    }

    async fn capture(&mut self, command: &RemoteCommand) -> Result<String> {
        self.record(command).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .outputs
            .iter()
            .find(|(h, needle, _)| *h == self.host && command.line().contains(needle.as_str()))
            .map(|(_, _, out)| out.clone())
            .unwrap_or_default())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock().unwrap();
        state.open -= 1;
        state.closes.push(self.host.clone());
    }
}
