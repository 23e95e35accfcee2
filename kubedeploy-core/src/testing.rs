//! Test doubles for external tools and the object store

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;

use crate::domain::AppDescriptor;
use crate::process::{BackgroundProcess, CommandRunner, ExternalCommand, ProcessError};
use crate::store::{ObjectStoreClient, StoreConnector, StoreEndpoint, StoreError};

/// Returns a port nothing is listening on right now
pub fn free_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

/// Writes an `app.yaml` into `dir` and returns the loaded descriptor
pub fn descriptor_in(dir: &Path, name: &str, version: &str, namespace: &str) -> AppDescriptor {
    let path = dir.join("app.yaml");
    fs::write(
        &path,
        format!(
            "name: {}\nversion: {}\nnamespace: {}\nsource: ./src\nrequirements:\n  - name: redis\n    version: 10.5.7\n",
            name, version, namespace
        ),
    )
    .unwrap();
    AppDescriptor::load(&path).unwrap()
}

/// Command runner that records invocations and imitates helm, tar and kubectl
///
/// - `tar -czf <file> ...` writes `<file>`
/// - `helm pull ... -d <dir>` creates one chart directory per template dir
/// - `helm package -d <out> --version <v> <chart>` writes `<out>/<chart name>-<v>.tgz`
pub struct FakeRunner {
    calls: Mutex<Vec<ExternalCommand>>,
    spawned: Mutex<Vec<ExternalCommand>>,
    failures: Vec<(String, String)>,
    template_dirs: Vec<String>,
    write_package: bool,
    fail_termination: bool,
    exited_forward: Option<String>,
    terminations: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            failures: Vec::new(),
            template_dirs: vec!["app".to_string()],
            write_package: true,
            fail_termination: false,
            exited_forward: None,
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails commands whose program and first argument match
    pub fn failing_on(mut self, program: &str, first_arg: &str) -> Self {
        self.failures
            .push((program.to_string(), first_arg.to_string()));
        self
    }

    /// Top-level directories `helm pull` produces
    pub fn with_template_dirs(mut self, dirs: &[&str]) -> Self {
        self.template_dirs = dirs.iter().map(|d| d.to_string()).collect();
        self
    }

    /// `helm package` succeeds without writing its archive
    pub fn without_package_output(mut self) -> Self {
        self.write_package = false;
        self
    }

    /// Background processes report an error when terminated
    pub fn failing_termination(mut self) -> Self {
        self.fail_termination = true;
        self
    }

    /// Background processes report they already exited with `status`
    pub fn with_exited_forward(mut self, status: &str) -> Self {
        self.exited_forward = Some(status.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ExternalCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> Vec<ExternalCommand> {
        self.spawned.lock().unwrap().clone()
    }

    /// Recorded `run` calls of `program` whose first argument is `first_arg`
    pub fn calls_to(&self, program: &str, first_arg: &str) -> Vec<ExternalCommand> {
        self.calls()
            .into_iter()
            .filter(|c| c.program() == program && c.args().first().is_some_and(|a| a == first_arg))
            .collect()
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    fn check_failure(&self, command: &ExternalCommand) -> Result<(), ProcessError> {
        let first = command.args().first().map(|a| a.to_string()).unwrap_or_default();
        if self
            .failures
            .iter()
            .any(|(program, arg)| program == command.program() && *arg == first)
        {
            return Err(ProcessError::Failed {
                command: command.to_string(),
                code: Some(1),
            });
        }
        Ok(())
    }

    fn simulate(&self, command: &ExternalCommand) {
        let args = command.args();
        match (command.program(), args.first().map(|a| &**a)) {
            ("tar", _) => {
                if let Some(archive) = command.flag_value("-czf") {
                    fs::write(archive, b"source archive").unwrap();
                }
            }
            ("helm", Some("pull")) => {
                let dest = PathBuf::from(command.flag_value("-d").unwrap());
                fs::create_dir_all(&dest).unwrap();
                for dir in &self.template_dirs {
                    let chart = dest.join(dir);
                    fs::create_dir_all(chart.join("templates")).unwrap();
                    fs::write(
                        chart.join("Chart.yaml"),
                        format!(
                            "apiVersion: v1\nname: {}\nversion: 0.1.0\ndescription: base application chart\n",
                            dir
                        ),
                    )
                    .unwrap();
                    fs::write(chart.join("requirements.yaml"), "dependencies: []\n").unwrap();
                }
            }
            ("helm", Some("package")) if self.write_package => {
                let out = PathBuf::from(command.flag_value("-d").unwrap());
                let version = command.flag_value("--version").unwrap();
                let chart_dir = PathBuf::from(args.last().unwrap().to_string());
                let manifest: serde_yaml::Mapping =
                    serde_yaml::from_str(&fs::read_to_string(chart_dir.join("Chart.yaml")).unwrap())
                        .unwrap();
                let name = manifest
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap()
                    .to_string();
                fs::write(
                    out.join(format!("{}-{}.tgz", name, version.to_string_lossy())),
                    b"chart",
                )
                .unwrap();
            }
            _ => {}
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &ExternalCommand) -> Result<(), ProcessError> {
        self.calls.lock().unwrap().push(command.clone());
        self.check_failure(command)?;
        self.simulate(command);
        Ok(())
    }

    fn spawn(&self, command: &ExternalCommand) -> Result<Box<dyn BackgroundProcess>, ProcessError> {
        self.check_failure(command)?;
        self.spawned.lock().unwrap().push(command.clone());
        Ok(Box::new(FakeProcess {
            terminations: self.terminations.clone(),
            fail: self.fail_termination,
            exited: self.exited_forward.clone(),
        }))
    }
}

struct FakeProcess {
    terminations: Arc<AtomicUsize>,
    fail: bool,
    exited: Option<String>,
}

impl BackgroundProcess for FakeProcess {
    fn exit_status(&mut self) -> Option<String> {
        self.exited.clone()
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(std::io::Error::other("process already gone"));
        }
        Ok(())
    }
}

/// Object stored by [`FakeStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct FakeStoreState {
    endpoints: Vec<String>,
    bucket_calls: usize,
    buckets: Vec<String>,
    objects: HashMap<(String, String), StoredObject>,
    puts: usize,
    unreachable_remaining: usize,
    bucket_error: Option<String>,
    upload_error: Option<String>,
}

/// In-memory object store
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<FakeStoreState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `attempts` bucket calls fail as if the tunnel were not up yet
    pub fn unreachable_for(self, attempts: usize) -> Self {
        self.state.lock().unwrap().unreachable_remaining = attempts;
        self
    }

    pub fn rejecting_buckets(self, message: &str) -> Self {
        self.state.lock().unwrap().bucket_error = Some(message.to_string());
        self
    }

    pub fn rejecting_uploads(self, message: &str) -> Self {
        self.state.lock().unwrap().upload_error = Some(message.to_string());
        self
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.state.lock().unwrap().endpoints.clone()
    }

    pub fn bucket_calls(&self) -> usize {
        self.state.lock().unwrap().bucket_calls
    }

    pub fn buckets(&self) -> Vec<String> {
        self.state.lock().unwrap().buckets.clone()
    }

    pub fn puts(&self) -> usize {
        self.state.lock().unwrap().puts
    }

    pub fn object_keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.state.lock().unwrap().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl StoreConnector for FakeStore {
    async fn connect(
        &self,
        endpoint: StoreEndpoint,
    ) -> Result<Box<dyn ObjectStoreClient>, StoreError> {
        self.state.lock().unwrap().endpoints.push(endpoint.url.clone());
        Ok(Box::new(FakeStoreClient {
            endpoint: endpoint.url,
            state: self.state.clone(),
        }))
    }
}

struct FakeStoreClient {
    endpoint: String,
    state: Arc<Mutex<FakeStoreState>>,
}

#[async_trait]
impl ObjectStoreClient for FakeStoreClient {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.bucket_calls += 1;

        if state.unreachable_remaining > 0 {
            state.unreachable_remaining -= 1;
            return Err(StoreError::Unreachable {
                endpoint: self.endpoint.clone(),
                message: "connection refused".to_string(),
            });
        }
        if let Some(message) = &state.bucket_error {
            return Err(StoreError::Bucket {
                bucket: bucket.to_string(),
                message: message.clone(),
            });
        }
        if !state.buckets.iter().any(|b| b == bucket) {
            state.buckets.push(bucket.to_string());
        }
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: tokio::fs::File,
        content_type: &str,
    ) -> Result<u64, StoreError> {
        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .await
            .map_err(|e| StoreError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.upload_error {
            return Err(StoreError::Upload {
                key: key.to_string(),
                message: message.clone(),
            });
        }
        if !state.buckets.iter().any(|b| b == bucket) {
            return Err(StoreError::Upload {
                key: key.to_string(),
                message: format!("bucket '{}' does not exist", bucket),
            });
        }

        state.puts += 1;
        let size = data.len() as u64;
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                content_type: content_type.to_string(),
                body: data,
            },
        );
        Ok(size)
    }
}
