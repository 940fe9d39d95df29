//! Task queue for slow cloud calls.
//!
//! Each job captures its inputs by value, runs on tokio's blocking pool
//! and, on success, posts exactly one [`CloudEvent`]. A failed job is
//! logged and posts nothing; its typed error is still available from the
//! returned [`JoinHandle`]. Jobs cannot be cancelled once queued.

use std::fmt;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use crate::bootstrap::{ServerInfo, StartServerJob, start_server};
use crate::error::{CloudError, Result};
use crate::provider::{CloudProvider, Instance, KeyPair};
use crate::shell::RemoteShell;

/// Completion of a successful cloud job.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudEvent {
    /// Instances in the selected region.
    InstancesListed(Vec<Instance>),
    /// A new instance and the key pair to reach it.
    InstanceCreated {
        /// The new instance.
        instance: Instance,
        /// Key to log in with.
        key_pair: KeyPair,
    },
    /// The instance is gone.
    InstanceDeleted(Instance),
    /// The server is running on `instance_id`.
    ServerStarted {
        /// Instance hosting the server.
        instance_id: String,
        /// How to reach it.
        info: ServerInfo,
    },
}

/// Resolves with the job's error, if any, once it has run.
pub type TaskHandle = JoinHandle<Result<()>>;

/// Queue running blocking cloud jobs on a bounded worker pool.
#[derive(Clone)]
pub struct CloudTasks {
    provider: Arc<dyn CloudProvider>,
    shell: Arc<dyn RemoteShell>,
    permits: Arc<Semaphore>,
    events: mpsc::UnboundedSender<CloudEvent>,
}

impl fmt::Debug for CloudTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudTasks")
            .field("shell", &self.shell)
            .field("available_workers", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl CloudTasks {
    /// Create the queue and the receiving end of its event channel.
    /// At most `workers` jobs run at once (minimum one).
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        shell: Arc<dyn RemoteShell>,
        workers: usize,
    ) -> (Self, mpsc::UnboundedReceiver<CloudEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let tasks = Self {
            provider,
            shell,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            events,
        };
        (tasks, rx)
    }

    /// List instances.
    pub fn list_instances(&self) -> TaskHandle {
        let provider = Arc::clone(&self.provider);
        self.spawn_job("list_instances", move || {
            let instances = provider.list_instances()?;
            info!("[CloudTasks] Instance list:");
            for instance in &instances {
                info!("[CloudTasks]   {}, {}", instance.name, instance.state);
            }
            Ok(CloudEvent::InstancesListed(instances))
        })
    }

    /// Create a key pair named after the instance, then the instance.
    pub fn create_instance(
        &self,
        name: impl Into<String>,
        flavor_id: impl Into<String>,
        image_id: impl Into<String>,
    ) -> TaskHandle {
        let provider = Arc::clone(&self.provider);
        let (name, flavor_id, image_id) =
            (name.into(), flavor_id.into(), image_id.into());
        self.spawn_job("create_instance", move || {
            let key_pair = provider.create_key_pair(&name)?;
            let instance = provider.create_instance(
                &name, &flavor_id, &image_id, &key_pair,
            )?;
            info!(
                "[CloudTasks] Created instance {} ({})",
                instance.name, instance.id
            );
            Ok(CloudEvent::InstanceCreated { instance, key_pair })
        })
    }

    /// Delete `instance`; a refusal is an error.
    pub fn delete_instance(&self, instance: Instance) -> TaskHandle {
        let provider = Arc::clone(&self.provider);
        self.spawn_job("delete_instance", move || {
            if provider.delete_instance(&instance)? {
                Ok(CloudEvent::InstanceDeleted(instance))
            } else {
                Err(CloudError::Provider(format!(
                    "provider refused to delete instance {}",
                    instance.id
                )))
            }
        })
    }

    /// Start the server described by `job`.
    pub fn start_server(&self, job: StartServerJob) -> TaskHandle {
        let shell = Arc::clone(&self.shell);
        self.spawn_job("start_server", move || {
            let info = start_server(shell.as_ref(), &job)?;
            Ok(CloudEvent::ServerStarted {
                instance_id: job.request.instance_id.clone(),
                info,
            })
        })
    }

    fn spawn_job<F>(&self, name: &'static str, job: F) -> TaskHandle
    where
        F: FnOnce() -> Result<CloudEvent> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let events = self.events.clone();
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| CloudError::Worker(e.to_string()))?;
            let outcome = tokio::task::spawn_blocking(job)
                .await
                .map_err(|e| CloudError::Worker(e.to_string()))
                .and_then(|result| result);

            match outcome {
                Ok(event) => {
                    if events.send(event).is_err() {
                        log::debug!(
                            "[CloudTasks] {} finished but nobody is listening",
                            name
                        );
                    }
                    Ok(())
                }
                Err(err) => {
                    error!("[CloudTasks] {} error: {}", name, err);
                    Err(err)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapRequest;
    use crate::provider::MockCloudProvider;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use topolink_core::CloudSettings;
    use zeroize::Zeroizing;

    #[derive(Debug, Default)]
    struct ScriptedShell {
        stdout: String,
        commands: Mutex<Vec<(String, String)>>,
    }

    impl RemoteShell for ScriptedShell {
        fn exec(
            &self,
            host: &str,
            _private_key: &str,
            command: &str,
        ) -> Result<String> {
            self.commands
                .lock()
                .unwrap()
                .push((host.to_string(), command.to_string()));
            Ok(self.stdout.clone())
        }
    }

    fn instance(id: &str) -> Instance {
        Instance {
            id: id.into(),
            name: format!("lab-{id}"),
            state: "ACTIVE".into(),
            host: Some("203.0.113.5".into()),
        }
    }

    fn queue(
        provider: MockCloudProvider,
        shell: Arc<dyn RemoteShell>,
    ) -> (CloudTasks, mpsc::UnboundedReceiver<CloudEvent>) {
        CloudTasks::new(Arc::new(provider), shell, 2)
    }

    #[tokio::test]
    async fn listing_posts_one_event() {
        let mut provider = MockCloudProvider::new();
        provider
            .expect_list_instances()
            .times(1)
            .returning(|| Ok(vec![instance("1"), instance("2")]));
        let (tasks, mut events) =
            queue(provider, Arc::new(ScriptedShell::default()));

        tasks.list_instances().await.unwrap().unwrap();
        assert_eq!(
            events.recv().await,
            Some(CloudEvent::InstancesListed(vec![instance("1"), instance("2")]))
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn create_makes_key_pair_first() {
        let mut provider = MockCloudProvider::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_create_key_pair()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(KeyPair::new(name, "PRIVATE")));
        provider
            .expect_create_instance()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name, flavor, image, key| {
                assert_eq!((flavor, image), ("2", "ubuntu"));
                assert_eq!(key.name, name);
                Ok(instance("9"))
            });
        let (tasks, mut events) =
            queue(provider, Arc::new(ScriptedShell::default()));

        tasks.create_instance("lab", "2", "ubuntu").await.unwrap().unwrap();
        match events.recv().await {
            Some(CloudEvent::InstanceCreated { instance: i, key_pair }) => {
                assert_eq!(i.id, "9");
                assert_eq!(key_pair.name, "lab");
                assert_eq!(key_pair.private_key.as_str(), "PRIVATE");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failures_are_returned_but_not_posted() {
        let mut provider = MockCloudProvider::new();
        provider
            .expect_list_instances()
            .returning(|| Err(CloudError::Provider("503 from API".into())));
        provider.expect_delete_instance().returning(|_| Ok(false));
        let (tasks, mut events) =
            queue(provider, Arc::new(ScriptedShell::default()));

        let err = tasks.list_instances().await.unwrap().unwrap_err();
        assert_eq!(err, CloudError::Provider("503 from API".into()));
        let err = tasks.delete_instance(instance("3")).await.unwrap().unwrap_err();
        assert!(matches!(err, CloudError::Provider(_)));

        drop(tasks);
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn delete_posts_deleted_instance() {
        let mut provider = MockCloudProvider::new();
        provider.expect_delete_instance().returning(|_| Ok(true));
        let (tasks, mut events) =
            queue(provider, Arc::new(ScriptedShell::default()));

        tasks.delete_instance(instance("4")).await.unwrap().unwrap();
        assert_eq!(
            events.recv().await,
            Some(CloudEvent::InstanceDeleted(instance("4")))
        );
    }

    #[tokio::test]
    async fn start_server_runs_bootstrap_over_shell() {
        let shell = Arc::new(ScriptedShell {
            stdout: "{\"status\": \"ok\"}\n".into(),
            ..ScriptedShell::default()
        });
        let (tasks, mut events) = queue(MockCloudProvider::new(), shell.clone());
        let settings = CloudSettings {
            cloud_user_name: "lab".into(),
            cloud_api_key: "secret".into(),
            ..CloudSettings::default()
        };
        let job = StartServerJob {
            host: "203.0.113.5".into(),
            private_key: Zeroizing::new("PRIVATE".into()),
            request: BootstrapRequest::new("i-7", &settings, "dfw"),
        };

        tasks.start_server(job).await.unwrap().unwrap();
        match events.recv().await {
            Some(CloudEvent::ServerStarted { instance_id, info }) => {
                assert_eq!(instance_id, "i-7");
                assert_eq!(info.host, "203.0.113.5");
                assert_eq!(info.port, 8000);
                assert_eq!(info.details["status"], "ok");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let commands = shell.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "203.0.113.5");
        assert!(commands[0].1.contains(r#""instance_id":"i-7""#));
    }

    #[derive(Debug, Default)]
    struct CountingShell {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl RemoteShell for CountingShell {
        fn exec(&self, _: &str, _: &str, _: &str) -> Result<String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok("{}".into())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn worker_limit_bounds_concurrency() {
        let shell = Arc::new(CountingShell::default());
        let (tasks, _events) = CloudTasks::new(
            Arc::new(MockCloudProvider::new()),
            shell.clone(),
            2,
        );
        let settings = CloudSettings::default();
        let handles: Vec<_> = (0..6)
            .map(|i| {
                tasks.start_server(StartServerJob {
                    host: format!("h{i}"),
                    private_key: Zeroizing::new(String::new()),
                    request: BootstrapRequest::new(
                        format!("i-{i}"),
                        &settings,
                        "dfw",
                    ),
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(shell.peak.load(Ordering::SeqCst) <= 2);
    }
}
