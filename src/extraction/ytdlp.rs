//! yt-dlp run as a child process

use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::diagnostics::FailureClass;
use super::traits::{BackendError, ExtractionBackend};
use super::types::{FetchRequest, Variant, VariantSet};
use crate::config::{ExtractionConfig, StrategyProfile};

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    format_note: Option<String>,
}

impl From<RawFormat> for Variant {
    fn from(raw: RawFormat) -> Self {
        Variant {
            id: raw.format_id,
            height: raw.height,
            extension: raw.ext.unwrap_or_default(),
            note: raw.format_note,
        }
    }
}

/// Extraction backend driving the `yt-dlp` executable
#[derive(Debug, Clone)]
pub struct YtDlpBackend {
    binary: PathBuf,
    cookies_file: Option<PathBuf>,
    socket_timeout: Duration,
    probe_timeout: Duration,
    fetch_timeout: Duration,
    merge_output_format: String,
    max_filesize: Option<u64>,
}

impl YtDlpBackend {
    /// Cookies are only wired in when the configured file actually exists.
    pub fn from_config(config: &ExtractionConfig, max_filesize: Option<u64>) -> Self {
        let cookies_file = match &config.cookies_file {
            Some(path) if path.is_file() => Some(path.clone()),
            Some(path) => {
                warn!(
                    path = %path.display(),
                    "Cookie file not found, strategies will run without cookies"
                );
                None
            }
            None => None,
        };

        Self {
            binary: config.binary.clone(),
            cookies_file,
            socket_timeout: config.socket_timeout(),
            probe_timeout: config.probe_timeout(),
            fetch_timeout: config.fetch_timeout(),
            merge_output_format: config.merge_output_format.clone(),
            max_filesize,
        }
    }

    /// `yt-dlp --version`, used as a startup preflight
    pub async fn version(&self) -> Result<String, BackendError> {
        let output = self.run(vec!["--version".into()], VERSION_TIMEOUT).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn identity_args(&self, strategy: &StrategyProfile) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        let mut extractor = Vec::new();
        if !strategy.player_clients.is_empty() {
            extractor.push(format!("player_client={}", strategy.player_clients.join(",")));
        }
        if !strategy.player_skip.is_empty() {
            extractor.push(format!("player_skip={}", strategy.player_skip.join(",")));
        }
        if !extractor.is_empty() {
            args.push("--extractor-args".into());
            args.push(format!("youtube:{}", extractor.join(";")).into());
        }

        if strategy.use_cookies {
            if let Some(cookies) = &self.cookies_file {
                args.push("--cookies".into());
                args.push(cookies.clone().into());
            }
        }
        if let Some(user_agent) = &strategy.user_agent {
            args.push("--user-agent".into());
            args.push(user_agent.into());
        }
        if strategy.force_ipv4 {
            args.push("--force-ipv4".into());
        }
        if let Some(address) = &strategy.source_address {
            args.push("--source-address".into());
            args.push(address.into());
        }
        if strategy.skip_certificate_check {
            args.push("--no-check-certificates".into());
        }

        args
    }

    fn common_args(&self) -> Vec<OsString> {
        vec![
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--socket-timeout".into(),
            self.socket_timeout.as_secs().to_string().into(),
        ]
    }

    fn probe_args(&self, url: &str, strategy: &StrategyProfile) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--dump-single-json".into(), "--skip-download".into()];
        args.extend(self.common_args());
        args.extend(self.identity_args(strategy));
        args.push("--".into());
        args.push(url.into());
        args
    }

    fn fetch_args(&self, request: &FetchRequest, strategy: &StrategyProfile) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            request.format_selector.as_str().into(),
            "-o".into(),
            request.destination.clone().into(),
            "--merge-output-format".into(),
            self.merge_output_format.as_str().into(),
        ];
        if let Some(limit) = self.max_filesize {
            args.push("--max-filesize".into());
            args.push(limit.to_string().into());
        }
        args.extend(self.common_args());
        args.extend(self.identity_args(strategy));
        args.push("--".into());
        args.push(request.url.as_str().into());
        args
    }

    /// Run the binary with a hard timeout; the child is killed when dropped.
    async fn run(&self, args: Vec<OsString>, timeout: Duration) -> Result<Output, BackendError> {
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => BackendError::new(
                    FailureClass::BackendMissing,
                    format!("{} is not installed", self.binary.display()),
                ),
                _ => BackendError::new(FailureClass::Transient, e.to_string()),
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BackendError::new(
                    FailureClass::Transient,
                    format!("timed out after {}s", timeout.as_secs()),
                )
            })?
            .map_err(|e| BackendError::new(FailureClass::Transient, e.to_string()))?;

        if !output.status.success() {
            return Err(BackendError::from_output(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl ExtractionBackend for YtDlpBackend {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn probe(
        &self,
        url: &str,
        strategy: &StrategyProfile,
    ) -> Result<VariantSet, BackendError> {
        debug!(url, strategy = %strategy.name, "Running yt-dlp probe");
        let output = self
            .run(self.probe_args(url, strategy), self.probe_timeout)
            .await?;

        parse_probe(url, &output.stdout)
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        strategy: &StrategyProfile,
    ) -> Result<(), BackendError> {
        debug!(
            url = %request.url,
            selector = %request.format_selector,
            strategy = %strategy.name,
            "Running yt-dlp fetch"
        );
        self.run(self.fetch_args(request, strategy), self.fetch_timeout)
            .await?;

        // yt-dlp exits cleanly when --max-filesize aborts the transfer
        match tokio::fs::metadata(&request.destination).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(BackendError::new(
                FailureClass::Degenerate,
                "backend finished without producing a file (size limit?)",
            )),
        }
    }
}

fn parse_probe(url: &str, stdout: &[u8]) -> Result<VariantSet, BackendError> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout).map_err(|e| {
        BackendError::new(
            FailureClass::Degenerate,
            format!("unparseable probe output: {e}"),
        )
    })?;

    Ok(VariantSet {
        url: parsed.webpage_url.unwrap_or_else(|| url.to_string()),
        title: parsed.title.unwrap_or_default(),
        variants: parsed
            .formats
            .unwrap_or_default()
            .into_iter()
            .map(Variant::from)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> YtDlpBackend {
        YtDlpBackend::from_config(&ExtractionConfig::default(), Some(1024))
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "title": "Clip",
            "webpage_url": "https://video.example/watch?v=1",
            "formats": [
                {"format_id": "140", "ext": "m4a", "height": null, "format_note": "medium"},
                {"format_id": "137", "ext": "mp4", "height": 1080},
                {"format_id": "sb0", "ext": "mhtml"}
            ]
        }"#;

        let set = parse_probe("https://short.example/1", json).unwrap();

        assert_eq!(set.title, "Clip");
        assert_eq!(set.url, "https://video.example/watch?v=1");
        assert_eq!(set.variants.len(), 3);
        assert_eq!(set.variants[0].note.as_deref(), Some("medium"));
        assert_eq!(set.variants[1], Variant::new("137", Some(1080), "mp4"));
        assert_eq!(set.variants[2].height, None);
    }

    #[test]
    fn test_parse_probe_without_formats() {
        let set = parse_probe("https://a.example/x", br#"{"title": null}"#).unwrap();

        assert!(set.variants.is_empty());
        assert_eq!(set.title, "");
        assert_eq!(set.url, "https://a.example/x");
    }

    #[test]
    fn test_parse_garbage_is_degenerate() {
        let err = parse_probe("https://a.example/x", b"<html>").unwrap_err();
        assert_eq!(err.class, FailureClass::Degenerate);
    }

    #[test]
    fn test_identity_args() {
        let strategy = StrategyProfile {
            player_clients: vec!["web".to_string(), "tv".to_string()],
            player_skip: vec!["configs".to_string()],
            use_cookies: true,
            user_agent: Some("UA".to_string()),
            force_ipv4: true,
            source_address: Some("0.0.0.0".to_string()),
            skip_certificate_check: true,
            ..StrategyProfile::named("web")
        };

        let args = strings(backend().identity_args(&strategy));

        assert_eq!(
            args,
            [
                "--extractor-args",
                "youtube:player_client=web,tv;player_skip=configs",
                "--user-agent",
                "UA",
                "--force-ipv4",
                "--source-address",
                "0.0.0.0",
                "--no-check-certificates",
            ]
        );
    }

    #[test]
    fn test_missing_cookie_file_is_ignored() {
        let config = ExtractionConfig {
            cookies_file: Some(PathBuf::from("/nonexistent/cookies.txt")),
            ..ExtractionConfig::default()
        };
        let backend = YtDlpBackend::from_config(&config, None);
        let mut strategy = StrategyProfile::named("c");
        strategy.use_cookies = true;

        assert!(backend.identity_args(&strategy).is_empty());
    }

    #[test]
    fn test_fetch_args() {
        let request = FetchRequest {
            url: "https://video.example/watch?v=1".to_string(),
            format_selector: "137+bestaudio/best".to_string(),
            destination: PathBuf::from("/tmp/out.mp4"),
        };

        let args = strings(backend().fetch_args(&request, &StrategyProfile::named("default")));

        assert_eq!(&args[..6], ["-f", "137+bestaudio/best", "-o", "/tmp/out.mp4", "--merge-output-format", "mp4"]);
        assert!(args.windows(2).any(|w| w == ["--max-filesize", "1024"]));
        assert_eq!(args.last().map(String::as_str), Some("https://video.example/watch?v=1"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_backend_missing() {
        let config = ExtractionConfig {
            binary: PathBuf::from("/nonexistent/bin/yt-dlp"),
            ..ExtractionConfig::default()
        };
        let backend = YtDlpBackend::from_config(&config, None);

        let err = backend
            .probe("https://video.example/1", &StrategyProfile::named("default"))
            .await
            .unwrap_err();

        assert_eq!(err.class, FailureClass::BackendMissing);
    }
}
