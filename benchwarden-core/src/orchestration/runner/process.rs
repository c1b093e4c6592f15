use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::orchestration::job::{JobHandle, JobObservation, JobSpec, JobTransition};
use crate::types::{JobId, ScanTarget};

use super::{JobRunner, RunnerError, RunnerResult};

/// Longest stderr tail kept in a failure message.
const STDERR_TAIL_BYTES: usize = 2_048;

/// How the benchmark worker process is launched.
///
/// Arguments are templates: `{benchmark}`, `{profile}`, `{skip}`, `{scan}`,
/// `{run}` and `{targets}` are substituted per job. An argument whose
/// placeholders all expand to nothing is dropped.
///
/// A finished job is forgotten once its report is fetched or it was
/// cancelled; anything else is kept for `finished_retention_secs` after it
/// ends and then reported as missing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessRunnerSettings {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub transition_capacity: usize,
    pub finished_retention_secs: u64,
}

impl Default for ProcessRunnerSettings {
    fn default() -> Self {
        Self {
            program: "kube-bench".to_string(),
            args: vec![
                "run".to_string(),
                "--json".to_string(),
                "--benchmark".to_string(),
                "{benchmark}".to_string(),
                "--skip={skip}".to_string(),
            ],
            working_dir: None,
            env: BTreeMap::new(),
            transition_capacity: 256,
            finished_retention_secs: 600,
        }
    }
}

impl ProcessRunnerSettings {
    pub fn finished_retention(&self) -> Duration {
        Duration::from_secs(self.finished_retention_secs)
    }

    pub fn render_args(&self, spec: &JobSpec) -> Vec<String> {
        let targets = match &spec.target {
            ScanTarget::Cluster => String::new(),
            ScanTarget::Nodes { nodes } => nodes.join(","),
        };
        let run = spec.run.to_string();
        let skip = spec.profile.skip_checks.join(",");
        let substitutions = [
            ("{benchmark}", spec.profile.benchmark_version.as_str()),
            ("{profile}", spec.profile.name.as_str()),
            ("{skip}", skip.as_str()),
            ("{scan}", spec.owner.name.as_str()),
            ("{run}", run.as_str()),
            ("{targets}", targets.as_str()),
        ];

        self.args
            .iter()
            .filter_map(|template| {
                let mut rendered = template.clone();
                let mut placeholders = 0;
                let mut filled = 0;
                for (placeholder, value) in substitutions {
                    if rendered.contains(placeholder) {
                        placeholders += 1;
                        if !value.is_empty() {
                            filled += 1;
                        }
                        rendered = rendered.replace(placeholder, value);
                    }
                }
                (placeholders == 0 || filled > 0).then_some(rendered)
            })
            .collect()
    }
}

#[derive(Debug)]
struct ProcessJob {
    state: JobObservation,
    output: Option<Vec<u8>>,
    cancel: CancellationToken,
    cancel_requested: bool,
    finished_at: Option<Instant>,
}

/// Runs one child process per job and captures its stdout as the report.
#[derive(Clone)]
pub struct ProcessJobRunner {
    settings: Arc<ProcessRunnerSettings>,
    jobs: Arc<Mutex<HashMap<JobId, ProcessJob>>>,
    transitions: broadcast::Sender<JobTransition>,
}

impl fmt::Debug for ProcessJobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessJobRunner")
            .field("program", &self.settings.program)
            .field("jobs", &self.jobs.lock().len())
            .field("transition_subscribers", &self.transitions.receiver_count())
            .finish()
    }
}

impl ProcessJobRunner {
    pub fn new(settings: ProcessRunnerSettings) -> Self {
        let (transitions, _) =
            broadcast::channel(settings.transition_capacity.max(1));
        Self {
            settings: Arc::new(settings),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            transitions,
        }
    }

    fn command(&self, spec: &JobSpec) -> Command {
        let mut command = Command::new(&self.settings.program);
        command
            .args(self.settings.render_args(spec))
            .envs(&self.settings.env)
            .env("BENCHWARDEN_SCAN", spec.owner.to_string())
            .env("BENCHWARDEN_RUN_ID", spec.run.to_string())
            .env("BENCHWARDEN_PROFILE", &spec.profile.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.settings.working_dir {
            command.current_dir(dir);
        }
        command
    }

    fn finish(&self, handle: &JobHandle, state: JobObservation, output: Option<Vec<u8>>) {
        {
            let mut jobs = self.jobs.lock();
            if jobs.get(&handle.job_id).is_some_and(|job| job.cancel_requested) {
                jobs.remove(&handle.job_id);
            } else if let Some(job) = jobs.get_mut(&handle.job_id) {
                job.state = state.clone();
                job.output = output;
                job.finished_at = Some(Instant::now());
            }
        }
        tracing::debug!(
            target: "scan::runner",
            job = %handle,
            state = ?state,
            "job finished"
        );
        let _ = self.transitions.send(JobTransition {
            handle: handle.clone(),
            state,
            at: Utc::now(),
        });
    }

    /// Drops finished jobs nobody collected within the retention window.
    fn evict_expired(&self) {
        let retention = self.settings.finished_retention();
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| {
            job.finished_at
                .is_none_or(|finished| finished.elapsed() < retention)
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            tracing::debug!(target: "scan::runner", evicted, "uncollected jobs evicted");
        }
    }

    pub fn tracked_jobs(&self) -> usize {
        self.jobs.lock().len()
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[async_trait]
impl JobRunner for ProcessJobRunner {
    async fn submit(&self, spec: JobSpec) -> RunnerResult<JobHandle> {
        let child = self.command(&spec).spawn().map_err(|err| {
            RunnerError::Unavailable(format!(
                "failed to launch '{}': {err}",
                self.settings.program
            ))
        })?;

        self.evict_expired();
        let handle = JobHandle::for_spec(JobId::new(), &spec, Utc::now());
        let cancel = CancellationToken::new();
        self.jobs.lock().insert(
            handle.job_id,
            ProcessJob {
                state: JobObservation::Running,
                output: None,
                cancel: cancel.clone(),
                cancel_requested: false,
                finished_at: None,
            },
        );
        tracing::info!(
            target: "scan::runner",
            job = %handle,
            name = %spec.job_name(),
            benchmark = %spec.profile.benchmark_version,
            "scan job started"
        );
        let _ = self.transitions.send(JobTransition {
            handle: handle.clone(),
            state: JobObservation::Running,
            at: Utc::now(),
        });

        let runner = self.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            // Dropping the child on cancellation kills it (kill_on_drop).
            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                output = child.wait_with_output() => Some(output),
            };
            let (state, output) = match outcome {
                None => (
                    JobObservation::Failed {
                        message: "cancelled".to_string(),
                    },
                    None,
                ),
                Some(Err(err)) => (
                    JobObservation::Failed {
                        message: format!("failed to collect output: {err}"),
                    },
                    None,
                ),
                Some(Ok(output)) if output.status.success() => {
                    (JobObservation::Succeeded, Some(output.stdout))
                }
                Some(Ok(output)) => {
                    let tail = stderr_tail(&output.stderr);
                    let message = if tail.is_empty() {
                        format!("worker exited with {}", output.status)
                    } else {
                        format!("worker exited with {}: {tail}", output.status)
                    };
                    (JobObservation::Failed { message }, None)
                }
            };
            runner.finish(&task_handle, state, output);
        });

        Ok(handle)
    }

    async fn observe(&self, handle: &JobHandle) -> RunnerResult<JobObservation> {
        Ok(self
            .jobs
            .lock()
            .get(&handle.job_id)
            .map(|job| job.state.clone())
            .unwrap_or(JobObservation::Missing))
    }

    /// Hands over the captured report and forgets the job.
    async fn fetch_output(&self, handle: &JobHandle) -> RunnerResult<Vec<u8>> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get(&handle.job_id)
            .ok_or(RunnerError::NotFound(handle.job_id))?;
        if !matches!((&job.state, &job.output), (JobObservation::Succeeded, Some(_))) {
            return Err(RunnerError::Output(format!(
                "job {} has no output in state {:?}",
                handle.job_id, job.state
            )));
        }
        jobs.remove(&handle.job_id)
            .and_then(|job| job.output)
            .ok_or(RunnerError::NotFound(handle.job_id))
    }

    async fn cancel(&self, handle: &JobHandle) -> RunnerResult<()> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&handle.job_id) else {
            return Ok(());
        };
        job.cancel.cancel();
        tracing::info!(target: "scan::runner", job = %handle, "scan job cancel requested");
        if job.finished_at.is_some() {
            jobs.remove(&handle.job_id);
        } else {
            job.cancel_requested = true;
        }
        Ok(())
    }

    fn transitions(&self) -> Option<broadcast::Receiver<JobTransition>> {
        Some(self.transitions.subscribe())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::{ResourceKey, RunId, ScanProfile};
    use std::time::Duration;

    fn spec() -> JobSpec {
        JobSpec {
            owner: ResourceKey::new("default", "adhoc"),
            run: RunId::new(),
            attempt: 1,
            profile: ScanProfile::new("cis-1.6-profile", "cis-1.6"),
            target: ScanTarget::Cluster,
        }
    }

    fn shell(script: &str) -> ProcessRunnerSettings {
        ProcessRunnerSettings {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        }
    }

    async fn wait_finished(runner: &ProcessJobRunner, handle: &JobHandle) -> JobObservation {
        for _ in 0..200 {
            let state = runner.observe(handle).await.unwrap();
            if state.is_finished() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job never finished");
    }

    #[test]
    fn empty_placeholders_drop_their_argument() {
        let settings = ProcessRunnerSettings::default();
        let mut spec = spec();
        assert_eq!(
            settings.render_args(&spec),
            ["run", "--json", "--benchmark", "cis-1.6"]
        );

        spec.profile = spec.profile.with_skip_checks(["1.1.1", "4.2.6"]);
        assert_eq!(
            settings.render_args(&spec).last().map(String::as_str),
            Some("--skip=1.1.1,4.2.6")
        );
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_jobs() {
        let runner = ProcessJobRunner::new(shell("printf '%s' {benchmark}"));
        let mut transitions = runner.transitions().unwrap();
        let handle = runner.submit(spec()).await.unwrap();

        assert_eq!(wait_finished(&runner, &handle).await, JobObservation::Succeeded);
        assert_eq!(runner.fetch_output(&handle).await.unwrap(), b"cis-1.6");

        let first = transitions.recv().await.unwrap();
        assert_eq!(first.state, JobObservation::Running);
        let second = transitions.recv().await.unwrap();
        assert_eq!(second.handle, handle);
        assert_eq!(second.state, JobObservation::Succeeded);
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure_with_stderr() {
        let runner = ProcessJobRunner::new(shell("echo boom >&2; exit 3"));
        let handle = runner.submit(spec()).await.unwrap();

        let state = wait_finished(&runner, &handle).await;
        assert!(matches!(&state, JobObservation::Failed { message } if message.contains("boom")));
        assert!(matches!(
            runner.fetch_output(&handle).await,
            Err(RunnerError::Output(_))
        ));
    }

    #[tokio::test]
    async fn cancel_kills_the_worker_and_forgets_it() {
        let runner = ProcessJobRunner::new(shell("sleep 30"));
        let mut transitions = runner.transitions().unwrap();
        let handle = runner.submit(spec()).await.unwrap();
        runner.cancel(&handle).await.unwrap();

        assert_eq!(transitions.recv().await.unwrap().state, JobObservation::Running);
        let ended = tokio::time::timeout(Duration::from_secs(5), transitions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ended.state,
            JobObservation::Failed {
                message: "cancelled".to_string()
            }
        );
        assert_eq!(runner.observe(&handle).await.unwrap(), JobObservation::Missing);
        assert_eq!(runner.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn fetched_jobs_are_forgotten() {
        let runner = ProcessJobRunner::new(shell("printf ok"));
        let mut handles = Vec::new();
        for _ in 0..20 {
            handles.push(runner.submit(spec()).await.unwrap());
        }
        for handle in &handles {
            assert_eq!(wait_finished(&runner, handle).await, JobObservation::Succeeded);
            assert_eq!(runner.fetch_output(handle).await.unwrap(), b"ok");
        }

        assert_eq!(runner.tracked_jobs(), 0);
        assert_eq!(runner.observe(&handles[0]).await.unwrap(), JobObservation::Missing);
        assert!(matches!(
            runner.fetch_output(&handles[0]).await,
            Err(RunnerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn uncollected_jobs_expire_after_retention() {
        let runner = ProcessJobRunner::new(ProcessRunnerSettings {
            finished_retention_secs: 0,
            ..shell("exit 1")
        });
        let failed = runner.submit(spec()).await.unwrap();
        assert!(matches!(
            wait_finished(&runner, &failed).await,
            JobObservation::Failed { .. }
        ));
        // Still observable until the next submission sweeps it.
        assert_eq!(runner.tracked_jobs(), 1);

        let next = runner.submit(spec()).await.unwrap();
        assert_eq!(runner.observe(&failed).await.unwrap(), JobObservation::Missing);
        assert_ne!(runner.observe(&next).await.unwrap(), JobObservation::Missing);
    }

    #[tokio::test]
    async fn unknown_handles_are_missing() {
        let runner = ProcessJobRunner::new(shell("true"));
        let handle = JobHandle::for_spec(JobId::new(), &spec(), Utc::now());
        assert_eq!(runner.observe(&handle).await.unwrap(), JobObservation::Missing);
        assert!(matches!(
            runner.fetch_output(&handle).await,
            Err(RunnerError::NotFound(_))
        ));
        runner.cancel(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn launch_failure_is_unavailable() {
        let runner = ProcessJobRunner::new(ProcessRunnerSettings {
            program: "/nonexistent/benchwarden-worker".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            runner.submit(spec()).await,
            Err(RunnerError::Unavailable(_))
        ));
    }
}
