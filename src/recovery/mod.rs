//! Sandbox failure recovery.
//!
//! The coordinator maps a classified sandbox failure to a plan, carries it
//! out, and retries the step's code at most once. It is the only component
//! that moves a handle out of `Active`/`Degraded`.

use crate::models::{DatasetRef, ErrorKind, ExecutionOutcome, RecoveryAction, RecoveryKind};
use crate::sandbox::{
    Artifact, ExecutionOutput, Lifecycle, SandboxClient, SandboxError, SandboxHandle,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// What to do about a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPlan {
    /// Discard the environment, create a new one, re-upload, retry once
    Reinitialize,
    /// Re-upload the dataset into the same environment, retry once
    Reupload,
    /// Record the failure and let the next prompt deal with it
    Surface,
}

impl RecoveryPlan {
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound | ErrorKind::Timeout => RecoveryPlan::Reinitialize,
            ErrorKind::DataAccess => RecoveryPlan::Reupload,
            ErrorKind::Import | ErrorKind::Other | ErrorKind::AssistantUnavailable => {
                RecoveryPlan::Surface
            }
        }
    }
}

/// Recovery settings.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Create+upload attempts before reinitialization is declared fatal
    pub reinit_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { reinit_attempts: 2 }
    }
}

/// The sandbox could not be (re)created. Ends the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sandbox reinitialization failed after {attempts} attempt(s): {last_error}")]
pub struct FatalError {
    pub attempts: u32,
    pub last_error: String,
}

/// Everything that happened while executing one step's code.
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub outcome: ExecutionOutcome,
    pub attempts: u8,
    pub recoveries: Vec<RecoveryAction>,
    pub artifacts: Vec<Artifact>,
    /// Set when recovery itself failed; the session must abort.
    pub fatal: Option<FatalError>,
}

impl StepExecution {
    fn finished(
        attempts: u8,
        recoveries: Vec<RecoveryAction>,
        result: Result<ExecutionOutput, SandboxError>,
    ) -> Self {
        match result {
            Ok(output) => Self {
                outcome: ExecutionOutcome::Success {
                    output: output.combined_text(),
                },
                attempts,
                recoveries,
                artifacts: output.artifacts,
                fatal: None,
            },
            Err(e) => Self {
                outcome: failure(&e),
                attempts,
                recoveries,
                artifacts: Vec::new(),
                fatal: None,
            },
        }
    }
}

fn failure(error: &SandboxError) -> ExecutionOutcome {
    ExecutionOutcome::Failure {
        kind: error.kind(),
        message: error.message().to_string(),
    }
}

/// Carries out recovery plans against a sandbox client.
pub struct RecoveryCoordinator<'a> {
    client: &'a dyn SandboxClient,
    config: RecoveryConfig,
}

impl<'a> RecoveryCoordinator<'a> {
    pub fn new(client: &'a dyn SandboxClient, config: RecoveryConfig) -> Self {
        Self { client, config }
    }

    /// Create the first environment for a session and upload the dataset.
    pub async fn provision(&self, handle: &mut SandboxHandle, dataset: &DatasetRef) -> Result<(), FatalError> {
        match self.establish(dataset).await {
            Ok(fresh) => {
                handle.adopt(fresh);
                Ok(())
            }
            Err(e) => {
                handle.mark_failed();
                Err(e)
            }
        }
    }

    /// Replace the environment behind `handle` with a new one.
    ///
    /// Destroying the old environment is best effort, so recovering from an
    /// environment that is already gone works the same way.
    pub async fn recover(
        &self,
        handle: &mut SandboxHandle,
        dataset: &DatasetRef,
        trigger: ErrorKind,
    ) -> Result<RecoveryAction, FatalError> {
        match handle.lifecycle() {
            Lifecycle::Failed => {
                return Err(FatalError {
                    attempts: 0,
                    last_error: "sandbox already failed".to_string(),
                })
            }
            Lifecycle::Active => {
                handle.mark_degraded();
                handle.begin_reinitialize();
            }
            Lifecycle::Degraded => {
                handle.begin_reinitialize();
            }
            Lifecycle::Uninitialized | Lifecycle::Reinitializing => {}
        }

        info!(
            "Reinitializing sandbox after {} (generation {})",
            trigger,
            handle.generation()
        );

        if handle.id().is_some() {
            if let Err(e) = self.client.destroy(handle).await {
                debug!("Ignoring destroy failure during recovery: {}", e);
            }
        }

        match self.establish(dataset).await {
            Ok(fresh) => {
                handle.adopt(fresh);
                info!(
                    "Sandbox {} ready (generation {})",
                    handle.id().unwrap_or("-"),
                    handle.generation()
                );
                Ok(RecoveryAction {
                    kind: RecoveryKind::Reinitialized,
                    trigger,
                    generation: handle.generation(),
                })
            }
            Err(e) => {
                handle.mark_failed();
                Err(e)
            }
        }
    }

    /// Put the dataset back into the current environment.
    pub async fn reupload(&self, handle: &SandboxHandle, dataset: &DatasetRef) -> Result<RecoveryAction, SandboxError> {
        info!("Re-uploading {} to sandbox", dataset.name);
        self.client.upload(handle, dataset).await?;
        Ok(RecoveryAction {
            kind: RecoveryKind::Reuploaded,
            trigger: ErrorKind::DataAccess,
            generation: handle.generation(),
        })
    }

    /// Run code, applying the recovery plan for its failure and retrying at
    /// most once.
    pub async fn execute(&self, handle: &mut SandboxHandle, dataset: &DatasetRef, code: &str) -> StepExecution {
        let error = match self.client.execute(handle, code).await {
            Ok(output) => return StepExecution::finished(1, Vec::new(), Ok(output)),
            Err(e) => e,
        };

        let mut recoveries = Vec::new();
        let plan = RecoveryPlan::for_kind(error.kind());
        debug!("Execution failed ({}), plan {:?}", error.kind(), plan);

        match plan {
            RecoveryPlan::Surface => {
                return StepExecution::finished(1, recoveries, Err(error));
            }
            RecoveryPlan::Reinitialize => match self.recover(handle, dataset, error.kind()).await {
                Ok(action) => recoveries.push(action),
                Err(fatal) => return self.fatal(error, recoveries, fatal),
            },
            RecoveryPlan::Reupload => match self.reupload(handle, dataset).await {
                Ok(action) => recoveries.push(action),
                Err(upload_error)
                    if matches!(upload_error.kind(), ErrorKind::NotFound | ErrorKind::Timeout) =>
                {
                    warn!("Re-upload failed ({}), reinitializing", upload_error);
                    match self.recover(handle, dataset, upload_error.kind()).await {
                        Ok(action) => recoveries.push(action),
                        Err(fatal) => return self.fatal(error, recoveries, fatal),
                    }
                }
                Err(upload_error) => {
                    warn!("Re-upload failed: {}", upload_error);
                    return StepExecution::finished(1, recoveries, Err(error));
                }
            },
        }

        debug!("Retrying step code once");
        let retry = self.client.execute(handle, code).await;
        if let Err(e) = &retry {
            warn!("Retry failed ({}), recording as-is", e.kind());
        }
        StepExecution::finished(2, recoveries, retry)
    }

    async fn establish(&self, dataset: &DatasetRef) -> Result<SandboxHandle, FatalError> {
        let attempts = self.config.reinit_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let fresh = match self.client.create(dataset).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("Sandbox creation attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    continue;
                }
            };

            match self.client.upload(&fresh, dataset).await {
                Ok(()) => return Ok(fresh),
                Err(e) => {
                    warn!("Dataset upload attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    if let Err(e) = self.client.destroy(&fresh).await {
                        debug!("Ignoring destroy failure: {}", e);
                    }
                }
            }
        }

        Err(FatalError {
            attempts,
            last_error,
        })
    }

    fn fatal(&self, error: SandboxError, recoveries: Vec<RecoveryAction>, fatal: FatalError) -> StepExecution {
        StepExecution {
            outcome: failure(&error),
            attempts: 1,
            recoveries,
            artifacts: Vec::new(),
            fatal: Some(fatal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::ScriptedSandbox;
    use tokio_test::assert_ok;

    fn dataset() -> DatasetRef {
        DatasetRef::new("titanic.csv", b"a,b\n1,2\n".to_vec())
    }

    async fn provisioned(sandbox: &ScriptedSandbox) -> SandboxHandle {
        let coordinator = RecoveryCoordinator::new(sandbox, RecoveryConfig::default());
        let mut handle = SandboxHandle::uninitialized();
        assert_ok!(coordinator.provision(&mut handle, &dataset()).await);
        handle
    }

    #[test]
    fn test_plan_for_kind() {
        assert_eq!(RecoveryPlan::for_kind(ErrorKind::NotFound), RecoveryPlan::Reinitialize);
        assert_eq!(RecoveryPlan::for_kind(ErrorKind::Timeout), RecoveryPlan::Reinitialize);
        assert_eq!(RecoveryPlan::for_kind(ErrorKind::DataAccess), RecoveryPlan::Reupload);
        assert_eq!(RecoveryPlan::for_kind(ErrorKind::Import), RecoveryPlan::Surface);
        assert_eq!(RecoveryPlan::for_kind(ErrorKind::Other), RecoveryPlan::Surface);
    }

    #[tokio::test]
    async fn test_provision_creates_and_uploads() {
        let sandbox = ScriptedSandbox::new();
        let handle = provisioned(&sandbox).await;
        assert_eq!(handle.lifecycle(), Lifecycle::Active);
        assert_eq!(handle.generation(), 0);
        assert_eq!(sandbox.calls(), vec!["create", "upload:sbx-1"]);
    }

    #[tokio::test]
    async fn test_provision_gives_up_after_configured_attempts() {
        let sandbox = ScriptedSandbox::new();
        sandbox
            .push_create(Err(SandboxError::Timeout("slow".into())))
            .push_create(Err(SandboxError::Other("quota exceeded".into())));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let mut handle = SandboxHandle::uninitialized();
        let err = coordinator.provision(&mut handle, &dataset()).await.unwrap_err();

        assert_eq!(err.attempts, 2);
        assert!(err.last_error.contains("quota exceeded"));
        assert_eq!(handle.lifecycle(), Lifecycle::Failed);
    }

    #[tokio::test]
    async fn test_success_needs_no_recovery() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        sandbox.push_execute(Ok(ExecutionOutput::from_stdout("(891, 12)")));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let result = coordinator.execute(&mut handle, &dataset(), "print(df.shape)").await;

        assert!(result.outcome.is_success());
        assert_eq!(result.attempts, 1);
        assert!(result.recoveries.is_empty());
        assert!(result.fatal.is_none());
    }

    #[tokio::test]
    async fn test_not_found_reinitializes_and_retries() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        sandbox
            .push_execute(Err(SandboxError::NotFound("The sandbox was not found".into())))
            .push_execute(Ok(ExecutionOutput::from_stdout("done")));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let result = coordinator.execute(&mut handle, &dataset(), "df.describe()").await;

        assert_eq!(
            result.outcome,
            ExecutionOutcome::Success {
                output: "done".to_string()
            }
        );
        assert_eq!(result.attempts, 2);
        assert_eq!(
            result.recoveries,
            vec![RecoveryAction {
                kind: RecoveryKind::Reinitialized,
                trigger: ErrorKind::NotFound,
                generation: 1,
            }]
        );
        assert_eq!(handle.id(), Some("sbx-2"));
        assert_eq!(
            sandbox.calls(),
            vec![
                "create",
                "upload:sbx-1",
                "execute:sbx-1",
                "destroy:sbx-1",
                "create",
                "upload:sbx-2",
                "execute:sbx-2",
            ]
        );
    }

    #[tokio::test]
    async fn test_import_error_is_not_retried() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        sandbox.push_execute(Err(SandboxError::from_message(
            "ModuleNotFoundError: No module named 'seaborn'",
        )));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let result = coordinator.execute(&mut handle, &dataset(), "import seaborn").await;

        assert_eq!(result.outcome.error_kind(), Some(ErrorKind::Import));
        assert_eq!(result.attempts, 1);
        assert_eq!(sandbox.count("execute"), 1);
        assert_eq!(sandbox.count("create"), 1);
    }

    #[tokio::test]
    async fn test_other_error_is_not_retried() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        sandbox.push_execute(Err(SandboxError::from_message("KeyError: 'price'")));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let result = coordinator.execute(&mut handle, &dataset(), "df['price']").await;

        assert_eq!(
            result.outcome,
            ExecutionOutcome::Failure {
                kind: ErrorKind::Other,
                message: "KeyError: 'price'".to_string(),
            }
        );
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_data_access_reuploads_without_reinit() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        sandbox
            .push_execute(Err(SandboxError::from_message(
                "FileNotFoundError: No such file or directory: 'data.csv'",
            )))
            .push_execute(Ok(ExecutionOutput::from_stdout("loaded")));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let result = coordinator.execute(&mut handle, &dataset(), "pd.read_csv('data.csv')").await;

        assert!(result.outcome.is_success());
        assert_eq!(result.attempts, 2);
        assert_eq!(result.recoveries[0].kind, RecoveryKind::Reuploaded);
        assert_eq!(sandbox.count("create"), 1);
        assert_eq!(sandbox.count("upload"), 2);
        assert_eq!(handle.generation(), 0);
    }

    #[tokio::test]
    async fn test_failed_reupload_escalates_to_reinit() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        sandbox
            .push_execute(Err(SandboxError::DataAccess("No such file".into())))
            .push_upload(Err(SandboxError::NotFound("sandbox not found".into())))
            .push_execute(Ok(ExecutionOutput::from_stdout("loaded")));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let result = coordinator.execute(&mut handle, &dataset(), "pd.read_csv('data.csv')").await;

        assert!(result.outcome.is_success());
        assert_eq!(result.attempts, 2);
        assert_eq!(result.recoveries.len(), 1);
        assert_eq!(result.recoveries[0].kind, RecoveryKind::Reinitialized);
        assert_eq!(handle.generation(), 1);
    }

    #[tokio::test]
    async fn test_second_failure_is_recorded_as_is() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        sandbox
            .push_execute(Err(SandboxError::Timeout("execution timeout".into())))
            .push_execute(Err(SandboxError::Timeout("execution timeout again".into())));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let result = coordinator.execute(&mut handle, &dataset(), "train()").await;

        assert_eq!(
            result.outcome,
            ExecutionOutcome::Failure {
                kind: ErrorKind::Timeout,
                message: "execution timeout again".to_string(),
            }
        );
        assert_eq!(result.attempts, 2);
        assert_eq!(sandbox.count("execute"), 2);
        assert!(result.fatal.is_none());
    }

    #[tokio::test]
    async fn test_failed_reinitialization_is_fatal() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        sandbox
            .push_execute(Err(SandboxError::NotFound("sandbox was not found".into())))
            .push_create(Err(SandboxError::Other("capacity".into())))
            .push_create(Err(SandboxError::Other("capacity".into())));

        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());
        let result = coordinator.execute(&mut handle, &dataset(), "df.head()").await;

        let fatal = result.fatal.expect("fatal error");
        assert_eq!(fatal.attempts, 2);
        assert_eq!(result.outcome.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(handle.lifecycle(), Lifecycle::Failed);
        assert_eq!(sandbox.count("execute"), 1);
    }

    #[tokio::test]
    async fn test_recover_is_repeatable() {
        let sandbox = ScriptedSandbox::new();
        let mut handle = provisioned(&sandbox).await;
        let coordinator = RecoveryCoordinator::new(&sandbox, RecoveryConfig::default());

        let first = coordinator
            .recover(&mut handle, &dataset(), ErrorKind::Timeout)
            .await
            .unwrap();
        let second = coordinator
            .recover(&mut handle, &dataset(), ErrorKind::NotFound)
            .await
            .unwrap();

        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert_eq!(handle.lifecycle(), Lifecycle::Active);
    }
}
