//! Spark standalone service

use crate::download::fetch_and_unpack;
use crate::error::{Result, ServiceError};
use crate::manifest::ServiceManifest;
use crate::params::ClusterParams;
use crate::service::{HealthStatus, Service};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use flintrock_cloud::{Node, NodeRole, PortRange};
use flintrock_ssh::{check_run, shell_quote, RemoteSession};
use std::time::Duration;

/// Spark master web UI port.
pub const SPARK_WEB_UI_PORT: u16 = 8080;

/// Spark master RPC port workers connect to.
pub const SPARK_MASTER_PORT: u16 = 7077;

/// Default release download source; `{v}` is replaced with the version.
pub const DEFAULT_DOWNLOAD_SOURCE: &str =
    "https://archive.apache.org/dist/spark/spark-{v}/spark-{v}-bin-hadoop3.tgz";

/// Seconds the master start script waits for the web UI to answer.
const MASTER_START_WAIT_SECONDS: u32 = 90;

/// Attempts to bring the master up before giving up.
const MASTER_START_ATTEMPTS: u32 = 3;

const SPARK_ENV_TEMPLATE: &str = include_str!("../templates/spark/spark-env.sh");
const SLAVES_TEMPLATE: &str = include_str!("../templates/spark/slaves");
const SPARK_DEFAULTS_TEMPLATE: &str = include_str!("../templates/spark/spark-defaults.conf");

/// Where a Spark installation comes from.
#[derive(Debug, Clone)]
pub enum SparkInstallSource {
    /// A release tarball; `url_template` may contain `{v}`.
    Release {
        version: String,
        url_template: String,
    },
    /// A git build: clone `repository`, reset to `commit`, run the
    /// distribution build on the master, rsync the artifact to slaves.
    Git { repository: String, commit: String },
}

impl SparkInstallSource {
    /// Release source with the default Apache mirror unless a URL is given.
    pub fn release(version: String, url_template: Option<String>) -> Self {
        SparkInstallSource::Release {
            version,
            url_template: url_template.unwrap_or_else(|| DEFAULT_DOWNLOAD_SOURCE.to_string()),
        }
    }
}

/// The Spark service plugin.
pub struct SparkService {
    source: SparkInstallSource,
    executor_instances: Option<u32>,
    version_label: String,
}

impl SparkService {
    pub fn new(source: SparkInstallSource, executor_instances: Option<u32>) -> Self {
        let version_label = match &source {
            SparkInstallSource::Release { version, .. } => version.clone(),
            SparkInstallSource::Git { commit, .. } => commit.clone(),
        };
        Self {
            source,
            executor_instances,
            version_label,
        }
    }

    /// Resolve the literal commit `latest` to the default branch's HEAD via
    /// the GitHub API. An unreachable API is an error; the commit is never
    /// silently substituted.
    pub async fn resolve_latest_commit(repository: &str) -> Result<String> {
        let repo_path = repository
            .trim_end_matches(".git")
            .trim_end_matches('/')
            .rsplit('/')
            .take(2)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("/");

        let url = format!("https://api.github.com/repos/{}/commits/HEAD", repo_path);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("flintrock")
            .build()?;
        let response = client.get(&url).send().await.map_err(|e| {
            ServiceError::GitResolveFailed(format!("GitHub API unreachable: {e}"))
        })?;
        if !response.status().is_success() {
            return Err(ServiceError::GitResolveFailed(format!(
                "GitHub API returned {} for {}",
                response.status(),
                url
            )));
        }
        let body: serde_json::Value = response.json().await?;
        body.get("sha")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::GitResolveFailed("GitHub API response had no sha".to_string())
            })
    }

    /// Render the three config files for one node.
    fn rendered_config_files(
        &self,
        params: &ClusterParams,
        worker_cores: u32,
        public_dns: Option<&str>,
    ) -> Result<Vec<(&'static str, String)>> {
        let mut engine = TemplateEngine::new();
        engine
            .insert("master_private", &params.master_private)
            .insert("slave_privates", &params.slave_privates)
            .insert("spark_local_dirs", &params.service_dirs("spark").join(","))
            .insert("spark_worker_cores", &worker_cores)
            .insert("public_dns", &public_dns);

        if let Some(instances) = self.executor_instances {
            let executor_cores = (worker_cores / instances.max(1)).max(1);
            engine
                .insert("spark_executor_instances", &instances)
                .insert("spark_executor_cores", &executor_cores);
        } else {
            engine.insert("spark_executor_instances", &Option::<u32>::None);
        }

        Ok(vec![
            ("spark-env.sh", engine.render(SPARK_ENV_TEMPLATE)?),
            ("slaves", engine.render(SLAVES_TEMPLATE)?),
            ("spark-defaults.conf", engine.render(SPARK_DEFAULTS_TEMPLATE)?),
        ])
    }
}

#[async_trait]
impl Service for SparkService {
    fn name(&self) -> &'static str {
        "spark"
    }

    fn version(&self) -> &str {
        &self.version_label
    }

    fn required_ports(&self) -> Vec<PortRange> {
        vec![
            (SPARK_WEB_UI_PORT, SPARK_WEB_UI_PORT + 1),
            (SPARK_MASTER_PORT, SPARK_MASTER_PORT),
            // Spark REST server
            (6066, 6066),
            // Application UIs
            (4040, 4050),
        ]
    }

    fn manifest(&self) -> ServiceManifest {
        let (download_source, git_repository, git_commit) = match &self.source {
            SparkInstallSource::Release { url_template, .. } => {
                (Some(url_template.clone()), None, None)
            }
            SparkInstallSource::Git { repository, commit } => {
                (None, Some(repository.clone()), Some(commit.clone()))
            }
        };
        ServiceManifest {
            name: "spark".to_string(),
            version: self.version_label.clone(),
            download_source,
            git_repository,
            git_commit,
            executor_instances: self.executor_instances,
        }
    }

    fn install_master_first(&self) -> bool {
        matches!(self.source, SparkInstallSource::Git { .. })
    }

    async fn install(
        &self,
        node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> Result<()> {
        tracing::info!(host = session.host(), "installing Spark");

        match &self.source {
            SparkInstallSource::Release {
                version,
                url_template,
            } => {
                let url = url_template.replace("{v}", version);
                fetch_and_unpack(session, &url, "spark").await?;
            }
            SparkInstallSource::Git { repository, commit } => {
                if node.role == NodeRole::Master {
                    check_run(session, "sudo yum install -y -q git rsync").await?;
                    check_run(
                        session,
                        &format!(
                            "set -e\n\
                             rm -rf spark\n\
                             git clone {repo} spark\n\
                             cd spark\n\
                             git reset --hard {commit}\n\
                             if [ -e dev/make-distribution.sh ]; then\n\
                                 ./dev/make-distribution.sh\n\
                             else\n\
                                 ./make-distribution.sh\n\
                             fi",
                            repo = shell_quote(repository),
                            commit = shell_quote(commit),
                        ),
                    )
                    .await?;
                } else {
                    // The master has already built the distribution; pull it
                    // over the intra-cluster key pair.
                    check_run(session, "sudo yum install -y -q rsync").await?;
                    check_run(
                        session,
                        &format!(
                            "rsync -az -e 'ssh -o StrictHostKeyChecking=no' \
                             {user}@{master}:spark/ spark/",
                            user = shell_quote(&params.user),
                            master = params.master_private,
                        ),
                    )
                    .await?;
                }
            }
        }

        check_run(
            session,
            "set -e\n\
             for f in $(find spark/bin -type f -executable -not -name '*.cmd'); do\n\
                 sudo ln -sf \"$(pwd)/$f\" \"/usr/local/bin/$(basename $f)\"\n\
             done\n\
             grep -q SPARK_HOME .bashrc || echo \"export SPARK_HOME=\\\"$HOME/spark\\\"\" >> .bashrc\n\
             grep -q PYSPARK_PYTHON .bashrc || echo 'export PYSPARK_PYTHON=python3' >> .bashrc",
        )
        .await?;

        Ok(())
    }

    async fn configure(
        &self,
        _node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> Result<()> {
        let worker_cores = detect_cores(session).await?;
        let public_dns = resolve_public_dns(session).await?;

        check_run(session, "mkdir -p spark/conf").await?;
        for (file_name, contents) in
            self.rendered_config_files(params, worker_cores, public_dns.as_deref())?
        {
            session
                .upload(
                    contents.as_bytes(),
                    &format!("spark/conf/{}", file_name),
                    0o644,
                )
                .await?;
        }
        Ok(())
    }

    async fn start_master(
        &self,
        _node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> Result<()> {
        tracing::info!(host = session.host(), "starting Spark master");

        // Start, then poll the web UI until it answers. The whole script is
        // retried a few times; a master that dies right after starting shows
        // up as a connect failure here.
        let script = format!(
            "spark/sbin/start-master.sh\n\
             for i in $(seq 1 {wait}); do\n\
                 code=$(curl --head --silent --output /dev/null --write-out '%{{http_code}}' \
                 {master}:{port})\n\
                 if [ \"$code\" -eq 200 ]; then exit 0; fi\n\
                 sleep 1\n\
             done\n\
             exit 1",
            wait = MASTER_START_WAIT_SECONDS,
            master = params.master_private,
            port = SPARK_WEB_UI_PORT,
        );

        for attempt in 1..=MASTER_START_ATTEMPTS {
            let output = session.run(&script).await?;
            if output.success() {
                return Ok(());
            }
            tracing::warn!(
                host = session.host(),
                attempt,
                "Spark master did not come up, retrying"
            );
        }
        Err(ServiceError::HealthCheckFailed {
            service: "spark".to_string(),
            reason: format!(
                "master web UI did not answer within {}s x {} attempts",
                MASTER_START_WAIT_SECONDS, MASTER_START_ATTEMPTS
            ),
        })
    }

    async fn start_slave(
        &self,
        _node: &Node,
        session: &dyn RemoteSession,
        params: &ClusterParams,
    ) -> Result<()> {
        check_run(
            session,
            &format!(
                "spark/sbin/start-slave.sh spark://{}:{}",
                params.master_private, SPARK_MASTER_PORT
            ),
        )
        .await?;
        Ok(())
    }

    async fn stop(&self, _node: &Node, session: &dyn RemoteSession) -> Result<()> {
        // Role-agnostic; the scripts are no-ops where the role never ran.
        session
            .run(
                "spark/sbin/stop-slave.sh 2>/dev/null || true\n\
                 spark/sbin/stop-master.sh 2>/dev/null || true",
            )
            .await?;
        Ok(())
    }

    async fn health_check(&self, params: &ClusterParams) -> Result<HealthStatus> {
        let url = format!(
            "http://{}:{}/json/",
            params.master_probe_address(),
            SPARK_WEB_UI_PORT
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()?;

        let response = match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(_) | Err(_) => return Ok(HealthStatus::NotReady),
        };
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(_) => return Ok(HealthStatus::NotReady),
        };

        let alive = body
            .get("aliveworkers")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if alive >= params.num_slaves() as u64 {
            Ok(HealthStatus::Ok)
        } else {
            tracing::debug!(alive, expected = params.num_slaves(), "Spark workers still registering");
            Ok(HealthStatus::NotReady)
        }
    }
}

/// Remote CPU count, used to derive worker and executor core settings.
async fn detect_cores(session: &dyn RemoteSession) -> Result<u32> {
    let out = check_run(session, "nproc").await?;
    Ok(out.trim().parse().unwrap_or(1))
}

/// Resolve the node's public DNS name from instance metadata: IMDSv1 first,
/// then the IMDSv2 token flow. Returns `None` when neither endpoint yields a
/// plausible hostname, so the variable is left unset rather than polluted
/// with an error body.
async fn resolve_public_dns(session: &dyn RemoteSession) -> Result<Option<String>> {
    let v1 = session
        .run("curl --silent --max-time 2 http://169.254.169.254/latest/meta-data/public-hostname")
        .await?;
    if v1.success() {
        if let Some(host) = plausible_hostname(&v1.stdout) {
            return Ok(Some(host));
        }
    }

    let v2 = session
        .run(
            "TOKEN=$(curl --silent --max-time 2 -X PUT \
             http://169.254.169.254/latest/api/token \
             -H 'X-aws-ec2-metadata-token-ttl-seconds: 60') && \
             curl --silent --max-time 2 \
             -H \"X-aws-ec2-metadata-token: $TOKEN\" \
             http://169.254.169.254/latest/meta-data/public-hostname",
        )
        .await?;
    if v2.success() {
        if let Some(host) = plausible_hostname(&v2.stdout) {
            return Ok(Some(host));
        }
    }

    Ok(None)
}

fn plausible_hostname(raw: &str) -> Option<String> {
    let candidate = raw.trim();
    if candidate.is_empty() || candidate.contains('<') || candidate.contains(char::is_whitespace) {
        None
    } else {
        Some(candidate.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams {
            cluster_name: "demo".to_string(),
            user: "ec2-user".to_string(),
            master_private: "10.0.0.1".to_string(),
            master_public: Some("54.1.2.3".to_string()),
            slave_privates: vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()],
            ephemeral_dirs: vec!["/media/ephemeral0".to_string()],
        }
    }

    fn release_service() -> SparkService {
        SparkService::new(
            SparkInstallSource::release("3.2.1".to_string(), None),
            Some(2),
        )
    }

    #[test]
    fn test_spark_env_renders_master_and_local_dirs() {
        let files = release_service()
            .rendered_config_files(&params(), 4, Some("ec2-54.compute.amazonaws.com"))
            .unwrap();
        let spark_env = &files.iter().find(|(n, _)| *n == "spark-env.sh").unwrap().1;

        assert!(spark_env.contains("export SPARK_MASTER_HOST=\"10.0.0.1\""));
        assert!(spark_env.contains("export SPARK_LOCAL_DIRS=\"/media/ephemeral0/spark\""));
        assert!(spark_env.contains("export SPARK_WORKER_CORES=4"));
        assert!(spark_env.contains("export SPARK_EXECUTOR_INSTANCES=2"));
        assert!(spark_env.contains("export SPARK_EXECUTOR_CORES=2"));
        assert!(spark_env.contains("export SPARK_PUBLIC_DNS=\"ec2-54.compute.amazonaws.com\""));
        assert!(spark_env.contains("export PYSPARK_PYTHON=python3"));
    }

    #[test]
    fn test_spark_env_omits_public_dns_when_unresolved() {
        let files = release_service()
            .rendered_config_files(&params(), 4, None)
            .unwrap();
        let spark_env = &files.iter().find(|(n, _)| *n == "spark-env.sh").unwrap().1;
        assert!(!spark_env.contains("SPARK_PUBLIC_DNS"));
    }

    #[test]
    fn test_slaves_file_lists_private_addresses_in_order() {
        let files = release_service()
            .rendered_config_files(&params(), 4, None)
            .unwrap();
        let slaves = &files.iter().find(|(n, _)| *n == "slaves").unwrap().1;
        assert_eq!(slaves, "10.0.0.2\n10.0.0.3\n");
    }

    #[test]
    fn test_default_download_url_substitutes_version() {
        let SparkInstallSource::Release { url_template, .. } =
            SparkInstallSource::release("3.2.1".to_string(), None)
        else {
            panic!("expected release source");
        };
        assert_eq!(
            url_template.replace("{v}", "3.2.1"),
            "https://archive.apache.org/dist/spark/spark-3.2.1/spark-3.2.1-bin-hadoop3.tgz"
        );
    }

    #[test]
    fn test_git_source_version_is_commit_and_installs_master_first() {
        let service = SparkService::new(
            SparkInstallSource::Git {
                repository: "https://github.com/apache/spark".to_string(),
                commit: "abc123".to_string(),
            },
            None,
        );
        assert_eq!(service.version(), "abc123");
        assert!(service.install_master_first());
        assert!(!release_service().install_master_first());
    }

    #[test]
    fn test_plausible_hostname_rejects_error_bodies() {
        assert_eq!(
            plausible_hostname("ec2-1-2-3-4.compute.amazonaws.com\n"),
            Some("ec2-1-2-3-4.compute.amazonaws.com".to_string())
        );
        assert_eq!(plausible_hostname(""), None);
        assert_eq!(plausible_hostname("<html><body>404</body></html>"), None);
        assert_eq!(plausible_hostname("not a hostname"), None);
    }

    #[test]
    fn test_required_ports_include_web_ui_and_master() {
        let ports = release_service().required_ports();
        assert!(ports.contains(&(8080, 8081)));
        assert!(ports.contains(&(7077, 7077)));
    }
}
