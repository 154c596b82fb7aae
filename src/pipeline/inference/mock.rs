//! Scripted inference client for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{GenerateRequest, InferenceClient, InferenceError};

type ErrorFactory = Box<dyn Fn() -> InferenceError + Send + Sync>;

enum Reply {
    Text(String),
    Error(ErrorFactory),
}

/// Answers prompts by prefix match; the first matching rule wins.
pub struct ScriptedInferenceClient {
    rules: Vec<(String, Reply)>,
    default_reply: Option<String>,
    failing_models: Vec<String>,
    probe_ok: bool,
    /// Probe succeeds this many times, then fails.
    probe_budget: Option<usize>,
    delay: Option<Duration>,
    probes: AtomicUsize,
    generates: AtomicUsize,
    calls: Mutex<Vec<(String, String)>>,
    /// Named prompt groups whose concurrent generations are counted.
    groups: Vec<(String, Vec<String>)>,
    /// group -> (in flight, peak)
    in_flight: Mutex<HashMap<String, (usize, usize)>>,
}

impl ScriptedInferenceClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: None,
            failing_models: Vec::new(),
            probe_ok: true,
            probe_budget: None,
            delay: None,
            probes: AtomicUsize::new(0),
            generates: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            groups: Vec::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reply(mut self, prompt_prefix: &str, reply: &str) -> Self {
        self.rules
            .push((prompt_prefix.to_string(), Reply::Text(reply.to_string())));
        self
    }

    pub fn with_error(
        mut self,
        prompt_prefix: &str,
        error: impl Fn() -> InferenceError + Send + Sync + 'static,
    ) -> Self {
        self.rules
            .push((prompt_prefix.to_string(), Reply::Error(Box::new(error))));
        self
    }

    pub fn with_default(mut self, reply: &str) -> Self {
        self.default_reply = Some(reply.to_string());
        self
    }

    /// Every generation for `model` fails at the transport level.
    pub fn with_failing_model(mut self, model: &str) -> Self {
        self.failing_models.push(model.to_string());
        self
    }

    pub fn with_probe_failure(mut self) -> Self {
        self.probe_ok = false;
        self
    }

    pub fn with_probe_budget(mut self, successes: usize) -> Self {
        self.probe_budget = Some(successes);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Count concurrent generations whose prompt starts with any of
    /// `prefixes` under `group`. Pair with `with_delay` so calls overlap.
    pub fn with_tracked_group(mut self, group: &str, prefixes: &[&str]) -> Self {
        self.groups.push((
            group.to_string(),
            prefixes.iter().map(|p| p.to_string()).collect(),
        ));
        self
    }

    /// Highest number of generations from `group` seen running at once.
    pub fn peak_in_flight(&self, group: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .get(group)
            .map_or(0, |(_, peak)| *peak)
    }

    fn matching_groups(&self, prompt: &str) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, prefixes)| prefixes.iter().any(|p| prompt.starts_with(p.as_str())))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn generate_calls(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }

    /// (model, prompt) pairs in dispatch order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInferenceClient {
    async fn probe(&self) -> Result<(), InferenceError> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst);
        let within_budget = self.probe_budget.map_or(true, |budget| n < budget);
        if self.probe_ok && within_budget {
            Ok(())
        } else {
            Err(InferenceError::Unreachable("scripted".into()))
        }
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, InferenceError> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((request.model.to_string(), request.prompt.to_string()));
        let tracked = self.matching_groups(request.prompt);
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            for group in &tracked {
                let entry = in_flight.entry(group.to_string()).or_insert((0, 0));
                entry.0 += 1;
                entry.1 = entry.1.max(entry.0);
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            for group in &tracked {
                if let Some(entry) = in_flight.get_mut(*group) {
                    entry.0 -= 1;
                }
            }
        }
        if self.failing_models.iter().any(|m| m == request.model) {
            return Err(InferenceError::Transport("scripted connection reset".into()));
        }
        for (prefix, reply) in &self.rules {
            if request.prompt.starts_with(prefix.as_str()) {
                return match reply {
                    Reply::Text(text) => Ok(text.clone()),
                    Reply::Error(make) => Err(make()),
                };
            }
        }
        self.default_reply
            .clone()
            .ok_or_else(|| InferenceError::MalformedResponse(format!("no script for prompt {:?}", request.prompt)))
    }
}
