//! 记录调用的编排客户端替身，可以按服务注入失败

use async_trait::async_trait;
use stack_core::container::{CommandOutput, ContainerState, Orchestrator, ResourceUsage};
use stack_core::{Result, StackError};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Start,
    Stop,
    Restart,
    Remove,
    Scale,
    Exec,
    Logs,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub service: String,
}

#[derive(Default)]
pub struct MockOrchestrator {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<(Verb, String), String>>,
    running: Mutex<BTreeSet<String>>,
    known: Mutex<BTreeSet<String>>,
    /// start 成功但容器随即退出的服务
    crash_on_start: Mutex<HashSet<String>>,
    exec_failures: Mutex<HashMap<String, String>>,
    logs: Mutex<HashMap<String, String>>,
    cancel_on_stop: Mutex<Option<CancellationToken>>,
    delays: Mutex<HashMap<(Verb, String), Duration>>,
    /// list_containers 返回的错误
    list_failure: Mutex<Option<String>>,
    on_list: Mutex<Option<ListHook>>,
}

type ListHook = Box<dyn Fn() + Send + Sync>;

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 初始处于运行状态的服务
    pub fn with_running<I, S>(self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut running = self.running.lock().unwrap();
            let mut known = self.known.lock().unwrap();
            for service in services {
                let service = service.into();
                known.insert(service.clone());
                running.insert(service);
            }
        }
        self
    }

    /// 已存在但处于停止状态的服务
    pub fn with_stopped<I, S>(self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known
            .lock()
            .unwrap()
            .extend(services.into_iter().map(Into::into));
        self
    }

    pub fn fail_on(&self, verb: Verb, service: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert((verb, service.to_string()), format!("{verb:?} {service}: exit status 1"));
    }

    pub fn crash_on_start(&self, service: &str) {
        self.crash_on_start
            .lock()
            .unwrap()
            .insert(service.to_string());
    }

    pub fn fail_exec_in(&self, service: &str, stderr: &str) {
        self.exec_failures
            .lock()
            .unwrap()
            .insert(service.to_string(), stderr.to_string());
    }

    pub fn set_logs(&self, service: &str, logs: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert(service.to_string(), logs.to_string());
    }

    /// 第一次 stop 调用时触发取消
    pub fn cancel_on_stop(&self, token: CancellationToken) {
        *self.cancel_on_stop.lock().unwrap() = Some(token);
    }

    /// 让某个动作在返回前挂起一段时间
    pub fn delay_on(&self, verb: Verb, service: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert((verb, service.to_string()), delay);
    }

    /// 模拟运行时不可达
    pub fn fail_list(&self, reason: &str) {
        *self.list_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// 每次 list_containers 时回调
    pub fn on_list(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_list.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, verb: Verb) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.verb == verb)
            .count()
    }

    /// 按调用顺序列出某个动作涉及的服务
    pub fn services_for(&self, verb: Verb) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.verb == verb)
            .map(|c| c.service.clone())
            .collect()
    }

    pub fn is_running(&self, service: &str) -> bool {
        self.running.lock().unwrap().contains(service)
    }

    async fn pause(&self, verb: Verb, service: &str) {
        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&(verb, service.to_string()))
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, verb: Verb, service: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call {
            verb,
            service: service.to_string(),
        });
        self.known.lock().unwrap().insert(service.to_string());

        match self
            .failures
            .lock()
            .unwrap()
            .get(&(verb, service.to_string()))
        {
            Some(reason) => Err(StackError::docker(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn start(&self, service: &str) -> Result<()> {
        self.record(Verb::Start, service)?;
        self.pause(Verb::Start, service).await;
        if !self.crash_on_start.lock().unwrap().contains(service) {
            self.running.lock().unwrap().insert(service.to_string());
        }
        Ok(())
    }

    async fn stop(&self, service: &str, _grace: Duration) -> Result<()> {
        if let Some(token) = self.cancel_on_stop.lock().unwrap().as_ref() {
            token.cancel();
        }
        self.record(Verb::Stop, service)?;
        self.pause(Verb::Stop, service).await;
        self.running.lock().unwrap().remove(service);
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<()> {
        self.record(Verb::Restart, service)?;
        self.running.lock().unwrap().insert(service.to_string());
        Ok(())
    }

    async fn remove(&self, service: &str) -> Result<()> {
        self.record(Verb::Remove, service)?;
        self.running.lock().unwrap().remove(service);
        self.known.lock().unwrap().remove(service);
        Ok(())
    }

    async fn scale(&self, service: &str, _replicas: u32) -> Result<()> {
        self.record(Verb::Scale, service)
    }

    async fn exec(&self, service: &str, _command: &[String]) -> Result<CommandOutput> {
        self.record(Verb::Exec, service)?;
        Ok(match self.exec_failures.lock().unwrap().get(service) {
            Some(stderr) => CommandOutput {
                exit_code: Some(7),
                stdout: String::new(),
                stderr: stderr.clone(),
            },
            None => CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            },
        })
    }

    async fn logs(
        &self,
        service: Option<&str>,
        _tail: Option<u32>,
        _since: Option<Duration>,
    ) -> Result<String> {
        let service = service.unwrap_or_default();
        self.record(Verb::Logs, service)?;
        Ok(self
            .logs
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerState>> {
        self.calls.lock().unwrap().push(Call {
            verb: Verb::List,
            service: String::new(),
        });
        if let Some(hook) = self.on_list.lock().unwrap().as_ref() {
            hook();
        }
        if let Some(reason) = self.list_failure.lock().unwrap().clone() {
            return Err(StackError::docker(reason));
        }
        let running = self.running.lock().unwrap();
        Ok(self
            .known
            .lock()
            .unwrap()
            .iter()
            .map(|service| ContainerState {
                name: format!("stack-{service}-1"),
                service: service.clone(),
                state: if running.contains(service) {
                    "running".to_string()
                } else {
                    "exited".to_string()
                },
                ..Default::default()
            })
            .collect())
    }

    async fn resource_usage(&self) -> Result<Vec<ResourceUsage>> {
        Ok(Vec::new())
    }
}
