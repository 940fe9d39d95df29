use std::sync::{Arc, Mutex};

use topolink_cloud::{
    BootstrapRequest, CloudError, CloudEvent, CloudProvider, CloudTasks,
    Instance, KeyPair, RemoteShell, Region, StartServerJob, start_server,
};
use topolink_core::CloudSettings;
use zeroize::Zeroizing;

/// Provider with a fixed inventory, for flows that go end to end.
#[derive(Debug, Default)]
struct InventoryProvider {
    instances: Mutex<Vec<Instance>>,
}

impl CloudProvider for InventoryProvider {
    fn authenticate(&self) -> topolink_cloud::Result<bool> {
        Ok(true)
    }

    fn list_regions(&self) -> topolink_cloud::Result<Vec<Region>> {
        Ok(vec![Region {
            id: "iad".into(),
            name: "Virginia".into(),
        }])
    }

    fn set_region(&self, _region: &str) -> topolink_cloud::Result<bool> {
        Ok(true)
    }

    fn list_instances(&self) -> topolink_cloud::Result<Vec<Instance>> {
        Ok(self.instances.lock().unwrap().clone())
    }

    fn create_key_pair(&self, name: &str) -> topolink_cloud::Result<KeyPair> {
        Ok(KeyPair::new(name, format!("KEY-{name}")))
    }

    fn create_instance(
        &self,
        name: &str,
        _flavor_id: &str,
        _image_id: &str,
        _key_pair: &KeyPair,
    ) -> topolink_cloud::Result<Instance> {
        let instance = Instance {
            id: format!("id-{name}"),
            name: name.to_string(),
            state: "BUILD".into(),
            host: Some("192.0.2.10".into()),
        };
        self.instances.lock().unwrap().push(instance.clone());
        Ok(instance)
    }

    fn delete_instance(
        &self,
        instance: &Instance,
    ) -> topolink_cloud::Result<bool> {
        let mut instances = self.instances.lock().unwrap();
        let before = instances.len();
        instances.retain(|i| i.id != instance.id);
        Ok(instances.len() != before)
    }
}

#[derive(Debug)]
struct EchoScriptShell {
    reply: String,
    seen_keys: Mutex<Vec<String>>,
}

impl RemoteShell for EchoScriptShell {
    fn exec(
        &self,
        host: &str,
        private_key: &str,
        command: &str,
    ) -> topolink_cloud::Result<String> {
        if host.is_empty() {
            return Err(CloudError::Shell {
                host: host.into(),
                message: "no host".into(),
            });
        }
        assert!(command.contains("--data='"));
        self.seen_keys.lock().unwrap().push(private_key.to_string());
        Ok(self.reply.clone())
    }
}

fn settings() -> CloudSettings {
    CloudSettings {
        cloud_user_name: "lab".into(),
        cloud_api_key: "secret".into(),
        ias_url: "https://ias.example.org".into(),
        ..CloudSettings::default()
    }
}

#[tokio::test]
async fn create_then_start_then_delete() {
    let provider = Arc::new(
        topolink_cloud::connect_provider(&settings(), |_| {
            InventoryProvider::default()
        })
        .unwrap(),
    );
    let shell = Arc::new(EchoScriptShell {
        reply: "{\"status\": \"running\"}".into(),
        seen_keys: Mutex::new(Vec::new()),
    });
    let (tasks, mut events) =
        CloudTasks::new(provider.clone(), shell.clone(), 2);

    tasks.create_instance("edge", "4", "img").await.unwrap().unwrap();
    let Some(CloudEvent::InstanceCreated { instance, key_pair }) =
        events.recv().await
    else {
        panic!("expected InstanceCreated");
    };

    let job = StartServerJob {
        host: instance.host.clone().unwrap(),
        private_key: key_pair.private_key.clone(),
        request: BootstrapRequest::new(&instance.id, &settings(), "iad"),
    };
    tasks.start_server(job).await.unwrap().unwrap();
    let Some(CloudEvent::ServerStarted { instance_id, info }) =
        events.recv().await
    else {
        panic!("expected ServerStarted");
    };
    assert_eq!(instance_id, "id-edge");
    assert_eq!(info.base_url(), "http://192.0.2.10:8000");
    assert_eq!(shell.seen_keys.lock().unwrap().as_slice(), ["KEY-edge"]);

    tasks.list_instances().await.unwrap().unwrap();
    assert!(matches!(
        events.recv().await,
        Some(CloudEvent::InstancesListed(list)) if list.len() == 1
    ));

    tasks.delete_instance(instance.clone()).await.unwrap().unwrap();
    assert_eq!(
        events.recv().await,
        Some(CloudEvent::InstanceDeleted(instance.clone()))
    );

    // Deleting again is refused and produces no event.
    assert!(tasks.delete_instance(instance).await.unwrap().is_err());
    assert!(events.try_recv().is_err());
}

#[test]
fn start_server_rejects_non_json_reply() {
    let shell = EchoScriptShell {
        reply: "Traceback (most recent call last):".into(),
        seen_keys: Mutex::new(Vec::new()),
    };
    let job = StartServerJob {
        host: "192.0.2.10".into(),
        private_key: Zeroizing::new("KEY".into()),
        request: BootstrapRequest::new("id-1", &settings(), "iad"),
    };
    let err = start_server(&shell, &job).unwrap_err();
    assert!(matches!(err, CloudError::Bootstrap(_)));
}
