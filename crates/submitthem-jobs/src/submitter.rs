//! The submitter: stages payloads, writes scripts and calls the scheduler.

use crate::batch::ArrayBatch;
use crate::error::SubmissionError;
use crate::handle::JobHandle;
use crate::packager::{JsonPackager, Packager};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use submitthem_core::{
    ConfigurationError, JobIdentifier, Scheduler, ScriptRequest, SubmissionConfig, expand_array,
};
use submitthem_parsers::{ProcessRunner, TokioRunner};
use submitthem_pbs::Pbs;
use submitthem_state::{InfoWatcher, WatcherConfig};

/// Name given to jobs whose configuration has none.
const DEFAULT_JOB_NAME: &str = "submitthem";

/// Collaborators shared by a submitter and all of its handles.
pub(crate) struct Context {
    pub(crate) folder: Utf8PathBuf,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) packager: Arc<dyn Packager>,
    pub(crate) watcher: Arc<InfoWatcher>,
}

/// Submits payloads as scheduler jobs.
pub struct Submitter {
    config: SubmissionConfig,
    ctx: Arc<Context>,
}

impl Submitter {
    /// A submitter writing its files under `folder`.
    pub fn new(
        folder: impl Into<Utf8PathBuf>,
        scheduler: Arc<dyn Scheduler>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let watcher = Arc::new(InfoWatcher::new(
            scheduler.clone(),
            runner.clone(),
            WatcherConfig::default(),
        ));
        Self {
            config: SubmissionConfig::default(),
            ctx: Arc::new(Context {
                folder: folder.into(),
                scheduler,
                runner,
                packager: Arc::new(JsonPackager::default()),
                watcher,
            }),
        }
    }

    /// A PBS submitter running the real `qsub`/`qstat`/`qdel`.
    pub fn pbs(folder: impl Into<Utf8PathBuf>) -> Self {
        Self::new(folder, Arc::new(Pbs::new()), Arc::new(TokioRunner))
    }

    fn rebuild(self, f: impl FnOnce(&mut Context)) -> Self {
        let mut ctx = Arc::try_unwrap(self.ctx).unwrap_or_else(|shared| Context {
            folder: shared.folder.clone(),
            scheduler: shared.scheduler.clone(),
            runner: shared.runner.clone(),
            packager: shared.packager.clone(),
            watcher: shared.watcher.clone(),
        });
        f(&mut ctx);
        Self {
            config: self.config,
            ctx: Arc::new(ctx),
        }
    }

    pub fn with_packager(self, packager: Arc<dyn Packager>) -> Self {
        self.rebuild(|ctx| ctx.packager = packager)
    }

    /// Use a fresh watcher with the given configuration.
    pub fn with_watcher_config(self, config: WatcherConfig) -> Self {
        self.rebuild(|ctx| {
            ctx.watcher = Arc::new(InfoWatcher::new(
                ctx.scheduler.clone(),
                ctx.runner.clone(),
                config,
            ))
        })
    }

    /// Share an existing watcher.
    pub fn with_watcher(self, watcher: Arc<InfoWatcher>) -> Self {
        self.rebuild(|ctx| ctx.watcher = watcher)
    }

    pub fn with_config(mut self, config: SubmissionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn folder(&self) -> &Utf8Path {
        &self.ctx.folder
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    pub fn watcher(&self) -> &Arc<InfoWatcher> {
        &self.ctx.watcher
    }

    /// Update the configuration used by later submissions.
    pub fn update_parameters(&mut self, params: &Map<String, Value>) -> Result<(), ConfigurationError> {
        self.config.update_parameters(params)
    }

    /// Submit one payload with the current configuration.
    pub async fn submit<P: Serialize>(&self, payload: &P) -> Result<JobHandle, SubmissionError> {
        self.submit_with_config(payload, self.config.clone()).await
    }

    /// Submit one payload with an explicit configuration.
    pub async fn submit_with_config<P: Serialize>(
        &self,
        payload: &P,
        config: SubmissionConfig,
    ) -> Result<JobHandle, SubmissionError> {
        let payload = to_value(payload)?;
        let mut handles = self.dispatch(vec![(Arc::new(config), payload)]).await?;
        handles.pop().ok_or(SubmissionError::TaskCountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    /// Start capturing submissions into one array job.
    pub fn batch(&self) -> ArrayBatch<'_> {
        ArrayBatch::new(self)
    }

    /// Run `f` over a batch, then submit it. If `f` fails nothing is submitted.
    pub async fn batch_scope<F, E>(&self, f: F) -> Result<Vec<JobHandle>, E>
    where
        F: FnOnce(&mut ArrayBatch<'_>) -> Result<(), E>,
        E: From<SubmissionError>,
    {
        let mut batch = self.batch();
        f(&mut batch)?;
        Ok(batch.close().await?)
    }

    /// Submit `entries` as one job (single entry) or one array.
    ///
    /// Returns one handle per entry, in order. On error every staged file is
    /// removed and no handle is returned.
    pub(crate) async fn dispatch(
        &self,
        entries: Vec<(Arc<SubmissionConfig>, Value)>,
    ) -> Result<Vec<JobHandle>, SubmissionError> {
        let Some((config, _)) = entries.first() else {
            return Ok(Vec::new());
        };
        let config = config.clone();
        if entries.iter().any(|(c, _)| **c != *config) {
            return Err(SubmissionError::MixedConfigurations);
        }

        fs::create_dir_all(&self.ctx.folder)?;
        let uid = unique_id();
        let staged: Vec<Utf8PathBuf> = (0..entries.len())
            .map(|i| self.ctx.folder.join(format!("{}_{}_submitted.json", uid, i)))
            .collect();
        let script = self.ctx.folder.join(format!(".submission_file_{}.sh", uid));

        let ids = match self.submit_staged(&config, &entries, &staged, &script).await {
            Ok(ids) => ids,
            Err(e) => {
                for path in staged.iter().chain(std::iter::once(&script)) {
                    let _ = fs::remove_file(path);
                }
                return Err(e);
            }
        };
        Ok(self.adopt(ids, &entries, &staged, &script).await)
    }

    /// Create handles for submitted ids and move staged files to their
    /// job-id names. The jobs already exist, so a failed rename is logged
    /// and the staged file is left in place.
    async fn adopt(
        &self,
        ids: Vec<JobIdentifier>,
        entries: &[(Arc<SubmissionConfig>, Value)],
        staged: &[Utf8PathBuf],
        script: &Utf8Path,
    ) -> Vec<JobHandle> {
        let mut handles = Vec::with_capacity(ids.len());
        for ((id, (config, _)), path) in ids.into_iter().zip(entries).zip(staged) {
            let handle = JobHandle::new(id, config.clone(), self.ctx.clone());
            rename_or_warn(path, &handle.paths().submitted_payload);
            self.ctx.watcher.register_job(handle.job_id()).await;
            handles.push(handle);
        }
        if let Some(first) = handles.first() {
            rename_or_warn(script, &first.paths().submission_file);
        }
        handles
    }

    async fn submit_staged(
        &self,
        config: &Arc<SubmissionConfig>,
        entries: &[(Arc<SubmissionConfig>, Value)],
        staged: &[Utf8PathBuf],
        script: &Utf8Path,
    ) -> Result<Vec<JobIdentifier>, SubmissionError> {
        for ((_, payload), path) in entries.iter().zip(staged) {
            self.ctx.packager.stage(payload, path)?;
        }

        let map_count = match entries.len() {
            1 => None,
            n => Some(u32::try_from(n).map_err(|_| ConfigurationError::InvalidValue {
                name: "map_count".to_string(),
                reason: format!("{} tasks do not fit one array", n),
            })?),
        };
        let command = self.ctx.packager.command(&self.ctx.folder);
        let text = self.ctx.scheduler.build_script(&ScriptRequest {
            command: &command,
            job_name: DEFAULT_JOB_NAME,
            config,
            folder: &self.ctx.folder,
            map_count,
            array_parallelism: None,
        })?;
        fs::write(script, text)?;

        let submit = self.ctx.scheduler.submit_command(script);
        let output = self.ctx.runner.run(&submit.program, &submit.args).await?;
        if !output.is_success() {
            return Err(SubmissionError::Rejected {
                command: submit.to_string(),
                stderr: output.stderr_lossy().trim().to_string(),
            });
        }

        let stdout = output.stdout_lossy();
        let unparseable = |source| SubmissionError::Unparseable {
            output: stdout.trim().to_string(),
            source,
        };
        let id = self
            .ctx
            .scheduler
            .parse_submit_output(&stdout)
            .map_err(unparseable)?;
        let ids = expand_array(&id.to_string(), map_count).map_err(unparseable)?;
        if ids.len() != entries.len() {
            return Err(SubmissionError::TaskCountMismatch {
                expected: entries.len(),
                actual: ids.len(),
            });
        }

        tracing::info!(
            "Submitted {} ({} task{}) with {}",
            id,
            ids.len(),
            if ids.len() == 1 { "" } else { "s" },
            self.ctx.scheduler.name()
        );
        Ok(ids)
    }
}

fn rename_or_warn(from: &Utf8Path, to: &Utf8Path) {
    if let Err(e) = fs::rename(from, to) {
        tracing::warn!("Failed to rename {} to {}: {}", from, to, e);
    }
}

pub(crate) fn to_value<P: Serialize>(payload: &P) -> Result<Value, SubmissionError> {
    serde_json::to_value(payload).map_err(|e| SubmissionError::Packaging(e.into()))
}

fn unique_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{:x}{:x}{:x}",
        chrono::Utc::now().timestamp_micros(),
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::packager::{PackagingError, RemoteOutcome};
    use crate::wait::{Backoff, WaitOptions};
    use serde_json::json;
    use std::time::Duration;
    use submitthem_core::JobState;
    use submitthem_parsers::{CommandOutput, ScriptedRunner};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        _temp: TempDir,
        folder: Utf8PathBuf,
        runner: Arc<ScriptedRunner>,
        submitter: Submitter,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let folder = Utf8Path::from_path(temp.path()).unwrap().join("jobs");
        let runner = Arc::new(ScriptedRunner::new());
        let submitter = Submitter::new(folder.clone(), Arc::new(Pbs::new()), runner.clone())
            .with_watcher_config(WatcherConfig::immediate());
        Fixture {
            _temp: temp,
            folder,
            runner,
            submitter,
        }
    }

    fn qstat(id: &str, state: &str) -> CommandOutput {
        CommandOutput::success(format!("Job ID           S\n{:<16} {}\n", id, state))
    }

    fn fast() -> WaitOptions {
        WaitOptions::default()
            .with_backoff(Backoff::fixed(Duration::from_millis(1)))
            .with_result_grace(Duration::from_millis(20))
    }

    fn write_result(handle: &JobHandle, body: Value) {
        fs::write(&handle.paths().result, body.to_string()).unwrap();
    }

    fn scripts(folder: &Utf8Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(folder)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".sh"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_single_submission() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("4242.pbs01\n"));

        let handle = f.submitter.submit(&json!({"x": 1})).await.unwrap();

        assert_eq!(handle.job_id().to_string(), "4242.pbs01");
        assert_eq!(f.runner.count("qsub"), 1);
        assert!(handle.paths().submitted_payload.exists());
        let script = fs::read_to_string(&handle.paths().submission_file).unwrap();
        assert!(!script.contains("-J"));
        assert_eq!(scripts(&f.folder), vec!["4242_submission.sh"]);
        assert_eq!(f.submitter.watcher().tracked().await, vec!["4242"]);
    }

    #[tokio::test]
    async fn test_batch_produces_one_array_submission() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("4300[].pbs01\n"));

        let mut batch = f.submitter.batch();
        batch.submit(&1).unwrap();
        batch.submit(&2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(f.runner.count("qsub"), 0);
        let handles = batch.close().await.unwrap();

        assert_eq!(f.runner.count("qsub"), 1);
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].job_id().key(), "4300_0");
        assert_eq!(handles[1].job_id().key(), "4300_1");
        assert!(handles[0].job_id().same_array(handles[1].job_id()));
        assert_eq!(handles[1].job_id().domain.as_deref(), Some("pbs01"));

        let script = fs::read_to_string(&handles[0].paths().submission_file).unwrap();
        assert_eq!(script.lines().filter(|l| l.starts_with("#PBS -J")).count(), 1);
        assert!(script.contains("#PBS -J 0-1"));

        let staged: Value =
            serde_json::from_str(&fs::read_to_string(&handles[1].paths().submitted_payload).unwrap())
                .unwrap();
        assert_eq!(staged, json!(2));
    }

    #[tokio::test]
    async fn test_single_entry_batch_is_plain_submission() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("4301.pbs01\n"));

        let handles = f
            .submitter
            .batch_scope(|batch| batch.submit(&"only"))
            .await
            .unwrap();

        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].job_id().array, None);
        let script = fs::read_to_string(&handles[0].paths().submission_file).unwrap();
        assert!(!script.contains("-J"));
    }

    #[tokio::test]
    async fn test_empty_and_dropped_batches_submit_nothing() {
        let f = fixture();
        let handles = f.submitter.batch().close().await.unwrap();
        assert!(handles.is_empty());

        {
            let mut batch = f.submitter.batch();
            batch.submit(&1).unwrap();
            batch.submit(&2).unwrap();
        }

        let result: Result<Vec<JobHandle>, SubmissionError> = f
            .submitter
            .batch_scope(|batch| {
                batch.submit(&1)?;
                Err(SubmissionError::MixedConfigurations)
            })
            .await;
        assert!(result.is_err());
        assert_eq!(f.runner.count("qsub"), 0);
    }

    #[tokio::test]
    async fn test_rejected_batch_yields_no_handles() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::failure(38, "qsub: Unknown queue\n"));

        let mut batch = f.submitter.batch();
        batch.submit(&1).unwrap();
        batch.submit(&2).unwrap();
        let err = batch.close().await.unwrap_err();

        match err {
            SubmissionError::Rejected { stderr, .. } => assert_eq!(stderr, "qsub: Unknown queue"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(scripts(&f.folder).is_empty());
        assert!(f.submitter.watcher().tracked().await.is_empty());
    }

    /// Stages nothing, so the post-submission renames have no source file.
    struct NoStaging;

    impl Packager for NoStaging {
        fn command(&self, folder: &Utf8Path) -> String {
            JsonPackager::default().command(folder)
        }

        fn stage(&self, _payload: &Value, _path: &Utf8Path) -> Result<(), PackagingError> {
            Ok(())
        }

        fn load(&self, path: &Utf8Path) -> Result<Option<RemoteOutcome>, PackagingError> {
            JsonPackager::default().load(path)
        }
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_submitted_job() {
        let f = fixture();
        let submitter = f.submitter.with_packager(Arc::new(NoStaging));
        f.runner.push("qsub", CommandOutput::success("4400[].pbs01\n"));

        let mut batch = submitter.batch();
        batch.submit(&1).unwrap();
        batch.submit(&2).unwrap();
        let handles = batch.close().await.unwrap();

        assert_eq!(handles.len(), 2);
        assert!(!handles[0].paths().submitted_payload.exists());
        assert!(handles[0].paths().submission_file.exists());
        assert_eq!(submitter.watcher().tracked().await, vec!["4400_0", "4400_1"]);
    }

    #[tokio::test]
    async fn test_unparseable_submit_output() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("\n"));
        let err = f.submitter.submit(&1).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Unparseable { .. }));
    }

    #[tokio::test]
    async fn test_mixed_configurations_are_rejected() {
        let mut f = fixture();
        let mut batch = f.submitter.batch();
        batch.submit(&1).unwrap();
        batch
            .submit_with_config(&2, SubmissionConfig::new().with_cpus(4))
            .unwrap();
        assert!(matches!(
            batch.close().await,
            Err(SubmissionError::MixedConfigurations)
        ));

        f.submitter
            .update_parameters(json!({"cpus_per_task": 2}).as_object().unwrap())
            .unwrap();
        assert_eq!(f.submitter.config().cpus_per_task, Some(2));
    }

    #[tokio::test]
    async fn test_result_after_completion() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("77.pbs01\n"));
        f.runner.push("qstat", qstat("77.pbs01", "Q"));
        f.runner.push("qstat", qstat("77.pbs01", "R"));
        f.runner.push("qstat", qstat("77.pbs01", "F"));

        let handle = f.submitter.submit(&json!({"n": 6})).await.unwrap();
        write_result(&handle, json!({"status": "success", "value": 42}));

        let value: i32 = handle.result_with(&fast()).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(f.runner.count("qstat"), 3);
    }

    #[tokio::test]
    async fn test_result_waits_through_requeue() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("78\n"));
        for state in ["R", "Q", "R", "F"] {
            f.runner.push("qstat", qstat("78", state));
        }

        let handle = f.submitter.submit(&0).await.unwrap();
        write_result(&handle, json!({"status": "success", "value": "done"}));

        let value: String = handle.result_with(&fast()).await.unwrap();
        assert_eq!(value, "done");
        assert_eq!(handle.preemptions().await, 1);
    }

    #[tokio::test]
    async fn test_failed_job_reports_stderr() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("79\n"));
        f.runner.push(
            "qstat",
            CommandOutput::success(
                r#"{"pbs_server":"pbs01","Jobs":{"79.pbs01":{"job_state":"F","queue":"workq","Exit_status":1}}}"#,
            ),
        );

        let handle = f.submitter.submit(&0).await.unwrap();
        fs::write(&handle.paths().stderr, "Traceback: out of memory\n").unwrap();

        let err = handle.result_with::<i32>(&fast()).await.unwrap_err();
        match err {
            JobError::RemoteFailure { state, stderr, .. } => {
                assert_eq!(state, JobState::Failed);
                assert!(stderr.unwrap().contains("out of memory"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_remote_error_in_result() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("80\n"));
        f.runner.push("qstat", qstat("80", "F"));

        let handle = f.submitter.submit(&0).await.unwrap();
        write_result(&handle, json!({"status": "error", "message": "ValueError: bad input"}));

        let err = handle.result_with::<i32>(&fast()).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::RemoteFailure { ref message, .. } if message == "ValueError: bad input"
        ));
    }

    #[tokio::test]
    async fn test_missing_result_after_grace() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("81\n"));
        f.runner.push("qstat", qstat("81", "C"));

        let handle = f.submitter.submit(&0).await.unwrap();
        let err = handle.result_with::<i32>(&fast()).await.unwrap_err();
        assert!(matches!(err, JobError::MissingOutput { stderr: None, .. }));
    }

    #[tokio::test]
    async fn test_missing_result_carries_stderr() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("91.pbs01\n"));
        f.runner.push(
            "qstat",
            CommandOutput::success(
                "Job id            Name             User              Time Use S Queue\n\
----------------  ---------------- ----------------  -------- - -----\n\
91.pbs01          crash            alice             00:00:03 F workq\n",
            ),
        );

        let handle = f.submitter.submit(&0).await.unwrap();
        fs::write(&handle.paths().stderr, "MemoryError: out of memory\n").unwrap();

        let err = handle.result_with::<i32>(&fast()).await.unwrap_err();
        match err {
            JobError::MissingOutput { stderr, .. } => {
                assert!(stderr.unwrap().contains("out of memory"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_result_of_job_dropped_from_history() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("90.pbs01\n"));
        f.runner.push("qstat", qstat("90.pbs01", "R"));
        f.runner
            .repeat("qstat", CommandOutput::failure(35, "qstat: Unknown Job Id 90.pbs01\n"));

        let handle = f.submitter.submit(&0).await.unwrap();
        write_result(&handle, json!({"status": "success", "value": 7}));

        let value: i32 = handle
            .result_with(&fast().with_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(f.runner.count("qstat"), 2);
    }

    #[tokio::test]
    async fn test_wait_timeout_and_cancel() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("82\n"));
        f.runner.repeat("qstat", qstat("82", "R"));
        let handle = f.submitter.submit(&0).await.unwrap();

        let err = handle
            .result_with::<i32>(&fast().with_timeout(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::TimedOut { .. }));

        let token = CancellationToken::new();
        token.cancel();
        let err = handle
            .result_with::<i32>(&fast().with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_logs_are_none_until_written() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("83\n"));
        let handle = f.submitter.submit(&0).await.unwrap();

        assert_eq!(handle.stdout(), None);
        assert_eq!(handle.stderr(), None);
        fs::write(&handle.paths().stdout, "hello\n").unwrap();
        assert_eq!(handle.stdout().as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn test_wait_until_running_and_cancel() {
        let f = fixture();
        f.runner.push("qsub", CommandOutput::success("84.pbs01\n"));
        f.runner.push("qstat", qstat("84.pbs01", "Q"));
        f.runner.push("qstat", qstat("84.pbs01", "R"));
        f.runner.push("qdel", CommandOutput::success(""));
        let handle = f.submitter.submit(&0).await.unwrap();

        let state = handle.wait_until_running(&fast()).await.unwrap();
        assert_eq!(state, JobState::Running);

        handle.cancel().await.unwrap();
        let qdel = f
            .runner
            .invocations()
            .into_iter()
            .find(|i| i.program == "qdel")
            .unwrap();
        assert_eq!(qdel.args, vec!["84.pbs01"]);
    }
}
