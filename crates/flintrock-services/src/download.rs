//! Remote tarball download and extraction

use crate::error::{Result, ServiceError};
use flintrock_ssh::{check_run, shell_quote, RemoteSession};
use std::time::Duration;

/// Attempts before a download is reported failed.
const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Delay between download attempts.
const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Download `url` on the remote host and unpack it into `dest_dir`
/// (top-level archive directory stripped). Network failures are retried;
/// an archive that fails the gzip self-test is fatal immediately.
pub async fn fetch_and_unpack(
    session: &dyn RemoteSession,
    url: &str,
    dest_dir: &str,
) -> Result<()> {
    let tarball = format!("/tmp/{}.tgz", dest_dir.replace('/', "-"));
    let quoted_url = shell_quote(url);
    let quoted_tarball = shell_quote(&tarball);

    let mut fetched = false;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        let fetch = session
            .run(&format!(
                "curl --fail --silent --show-error --location -o {} {}",
                quoted_tarball, quoted_url
            ))
            .await?;
        if fetch.success() {
            fetched = true;
            break;
        }
        tracing::debug!(host = session.host(), url, attempt, "download failed");
        if attempt < DOWNLOAD_ATTEMPTS {
            tokio::time::sleep(DOWNLOAD_RETRY_DELAY).await;
        }
    }
    if !fetched {
        return Err(ServiceError::DownloadFailed {
            url: url.to_string(),
            attempts: DOWNLOAD_ATTEMPTS,
        });
    }

    let integrity = session
        .run(&format!("gzip --test {}", quoted_tarball))
        .await?;
    if !integrity.success() {
        return Err(ServiceError::CorruptArchive {
            url: url.to_string(),
        });
    }

    check_run(
        session,
        &format!(
            "set -e\n\
             rm -rf {dir}\n\
             mkdir -p {dir}\n\
             tar xzf {tarball} -C {dir} --strip-components=1\n\
             rm -f {tarball}",
            dir = shell_quote(dest_dir),
            tarball = quoted_tarball,
        ),
    )
    .await?;

    Ok(())
}
