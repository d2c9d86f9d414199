//! HDFS service

use crate::download::fetch_and_unpack;
use crate::error::Result;
use crate::manifest::ServiceManifest;
use crate::params::ClusterParams;
use crate::service::{HealthStatus, Service};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use flintrock_cloud::{Node, PortRange};
use flintrock_ssh::{check_run, RemoteSession};
use std::time::Duration;

/// Namenode RPC port written into `fs.defaultFS`.
pub const NAMENODE_PORT: u16 = 9000;

/// Namenode web UI port.
pub const NAMENODE_UI_PORT: u16 = 50070;

/// Default release download source; `{v}` is replaced with the version.
pub const DEFAULT_DOWNLOAD_SOURCE: &str =
    "https://archive.apache.org/dist/hadoop/common/hadoop-{v}/hadoop-{v}.tar.gz";

/// Replication factor ceiling; clusters smaller than this replicate to every
/// slave.
const MAX_REPLICATION: usize = 3;

const CORE_SITE_TEMPLATE: &str = include_str!("../templates/hdfs/core-site.xml");
const HDFS_SITE_TEMPLATE: &str = include_str!("../templates/hdfs/hdfs-site.xml");
const MASTERS_TEMPLATE: &str = include_str!("../templates/hdfs/masters");
const WORKERS_TEMPLATE: &str = include_str!("../templates/hdfs/workers");
const HADOOP_ENV_TEMPLATE: &str = include_str!("../templates/hdfs/hadoop-env.sh");

/// The HDFS service plugin.
pub struct HdfsService {
    version: String,
    url_template: String,
}

impl HdfsService {
    pub fn new(version: String, download_source: Option<String>) -> Self {
        Self {
            version,
            url_template: download_source.unwrap_or_else(|| DEFAULT_DOWNLOAD_SOURCE.to_string()),
        }
    }

    fn replication(num_slaves: usize) -> usize {
        MAX_REPLICATION.min(num_slaves).max(1)
    }

    fn name_dirs(params: &ClusterParams) -> Vec<String> {
        params
            .service_dirs("hdfs")
            .iter()
            .map(|d| format!("{}/name", d))
            .collect()
    }

    fn data_dirs(params: &ClusterParams) -> Vec<String> {
        params
            .service_dirs("hdfs")
            .iter()
            .map(|d| format!("{}/data", d))
            .collect()
    }

    fn rendered_config_files(
        &self,
        params: &ClusterParams,
    ) -> Result<Vec<(&'static str, String)>> {
        let mut engine = TemplateEngine::new();
        engine
            .insert("master_private", &params.master_private)
            .insert("slave_privates", &params.slave_privates)
            .insert("namenode_port", &NAMENODE_PORT)
            .insert("namenode_ui_port", &NAMENODE_UI_PORT)
            .insert("replication", &Self::replication(params.num_slaves()))
            .insert("name_dirs", &Self::name_dirs(params).join(","))
            .insert("data_dirs", &Self::data_dirs(params).join(","))
            .insert("java_home", &Option::<String>::None);

        Ok(vec![
            ("core-site.xml", engine.render(CORE_SITE_TEMPLATE)?),
            ("hdfs-site.xml", engine.render(HDFS_SITE_TEMPLATE)?),
            ("masters", engine.render(MASTERS_TEMPLATE)?),
            ("workers", engine.render(WORKERS_TEMPLATE)?),
            ("hadoop-env.sh", engine.render(HADOOP_ENV_TEMPLATE)?),
        ])
    }
}

#[async_trait]
impl Service for HdfsService {
    fn name(&self) -> &'static str {
        "hdfs"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn required_ports(&self) -> Vec<PortRange> {
        vec![
            (NAMENODE_UI_PORT, NAMENODE_UI_PORT),
            (NAMENODE_PORT, NAMENODE_PORT),
        ]
    }

    fn manifest(&self) -> ServiceManifest {
        ServiceManifest {
            name: "hdfs".to_string(),
            version: self.version.clone(),
            download_source: Some(self.url_template.clone()),
            git_repository: None,
            git_commit: None,
            executor_instances: None,
        }
    }

    async fn install(
        &self,
        _node: &Node,
        session: &dyn RemoteSession,
        _params: &ClusterParams,
    ) -> Result<()> {
        tracing::info!(host = session.host(), "installing HDFS");

        let url = self.url_template.replace("{v}", &self.version);
        fetch_and_unpack(session, &url, "hadoop").await?;

        check_run(
            session,
            "set -e\n\
             mkdir -p hadoop/conf\n\
             for f in $(find hadoop/bin -type f -executable -not -name '*.cmd'); do\n\
                 sudo ln -sf \"$(pwd)/$f\" \"/usr/local/bin/$(basename $f)\"\n\
             done\n\
             grep -q HADOOP_LIBEXEC_DIR .bashrc || \
             echo \"export HADOOP_LIBEXEC_DIR=\\\"$HOME/hadoop/libexec\\\"\" >> .bashrc",
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
        check_run(session, "mkdir -p hadoop/conf").await?;
        for (file_name, contents) in self.rendered_config_files(params)? {
            session
                .upload(
                    contents.as_bytes(),
                    &format!("hadoop/conf/{}", file_name),
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
        tracing::info!(host = session.host(), "starting HDFS namenode");

        let first_name_dir = Self::name_dirs(params)
            .into_iter()
            .next()
            .expect("storage dirs are never empty");

        // Format once; a formatted name directory carries a VERSION file and
        // reformatting it would wipe the filesystem on restart.
        check_run(
            session,
            &format!(
                "set -e\n\
                 if [ ! -e {dir}/current/VERSION ]; then\n\
                     hadoop/bin/hdfs --config hadoop/conf namenode -format -nonInteractive\n\
                 fi\n\
                 hadoop/bin/hdfs --config hadoop/conf --daemon start namenode",
                dir = first_name_dir,
            ),
        )
        .await?;
        Ok(())
    }

    async fn start_slave(
        &self,
        _node: &Node,
        session: &dyn RemoteSession,
        _params: &ClusterParams,
    ) -> Result<()> {
        check_run(
            session,
            "hadoop/bin/hdfs --config hadoop/conf --daemon start datanode",
        )
        .await?;
        Ok(())
    }

    async fn stop(&self, _node: &Node, session: &dyn RemoteSession) -> Result<()> {
        session
            .run(
                "hadoop/bin/hdfs --config hadoop/conf --daemon stop datanode 2>/dev/null || true\n\
                 hadoop/bin/hdfs --config hadoop/conf --daemon stop namenode 2>/dev/null || true",
            )
            .await?;
        Ok(())
    }

    async fn health_check(&self, params: &ClusterParams) -> Result<HealthStatus> {
        let url = format!(
            "http://{}:{}/jmx?qry=Hadoop:service=NameNode,name=FSNamesystemState",
            params.master_probe_address(),
            NAMENODE_UI_PORT
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

        let live = body
            .get("beans")
            .and_then(|b| b.get(0))
            .and_then(|b| b.get("NumLiveDataNodes"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if live >= params.num_slaves() as u64 {
            Ok(HealthStatus::Ok)
        } else {
            tracing::debug!(live, expected = params.num_slaves(), "datanodes still registering");
            Ok(HealthStatus::NotReady)
        }
    }
}
