//! Stage configuration variants.
//!
//! Each stage resolves itself from a [`ConfigStore`] through
//! [`StageConfig::validate`], stopping at the first missing or malformed key.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::PathBuf;

use lineflow_types::ConfigError;

use super::keys::{self, Section};
use super::store::ConfigStore;

const POSITIVE_INTEGER: &str = "a positive integer";

/// Shared capability of every stage configuration.
pub trait StageConfig: Sized {
    /// Section of the key registry this stage reads from.
    const SECTION: Section;

    /// Resolve and validate the stage from the store.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    fn validate(store: &ConfigStore) -> Result<Self, ConfigError>;

    /// One-line human-readable description, logged at assembly.
    fn describe(&self) -> String;

    /// Usage lines for the keys this stage reads.
    #[must_use]
    fn usage() -> String {
        keys::section_usage(Self::SECTION)
    }
}

/// Read a strictly positive integer.
fn positive(store: &ConfigStore, key: &str) -> Result<Option<u32>, ConfigError> {
    match store.parse::<u32>(key, POSITIVE_INTEGER)? {
        Some(0) => Err(ConfigError::invalid(key, "0", POSITIVE_INTEGER)),
        other => Ok(other),
    }
}

fn required(store: &ConfigStore, key: &str, what: &str) -> Result<String, ConfigError> {
    store
        .get(key)
        .map(|v| v.trim().to_string())
        .ok_or_else(|| ConfigError::missing(key, what))
}

fn hosts(store: &ConfigStore, key: &str) -> Vec<String> {
    store
        .get_or(key, keys::DEFAULT_HOSTS)
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Where a log source starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    Earliest,
    Latest,
    Explicit(u64),
}

impl StartOffset {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().parse::<i64>().ok()? {
            -2 => Some(Self::Earliest),
            -1 => Some(Self::Latest),
            n => u64::try_from(n).ok().map(Self::Explicit),
        }
    }
}

impl fmt::Display for StartOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => f.write_str("earliest"),
            Self::Latest => f.write_str("latest"),
            Self::Explicit(n) => write!(f, "{n}"),
        }
    }
}

/// Where a blob source starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobStart {
    Earliest,
    Latest,
    Explicit(String),
    Resume,
}

impl fmt::Display for BlobStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => f.write_str("EARLIEST"),
            Self::Latest => f.write_str("LATEST"),
            Self::Explicit(marker) => write!(f, "EXPLICIT from '{marker}'"),
            Self::Resume => f.write_str("RESUME"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSourceConfig {
    pub topic: String,
    /// `None` resumes from the stored cursor, else starts at the end.
    pub offset: Option<StartOffset>,
    pub partitions: u32,
    pub fetch_bytes: usize,
    pub hosts: Vec<String>,
    pub parallelism: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSourceConfig {
    pub path: PathBuf,
    pub start: BlobStart,
    pub parallelism: u32,
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3SourceConfig {
    pub bucket: String,
    pub prefix: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub start: BlobStart,
    pub parallelism: u32,
}

impl fmt::Debug for S3SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3SourceConfig")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("start", &self.start)
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

/// The configured input. Exactly one variant per pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Log(LogSourceConfig),
    FileBlob(BlobSourceConfig),
    RemoteObjectStore(S3SourceConfig),
}

impl SourceConfig {
    #[must_use]
    pub fn parallelism(&self) -> u32 {
        match self {
            Self::Log(c) => c.parallelism,
            Self::FileBlob(c) => c.parallelism,
            Self::RemoteObjectStore(c) => c.parallelism,
        }
    }

    /// Whether records carry blob origin metadata.
    #[must_use]
    pub fn is_blob(&self) -> bool {
        !matches!(self, Self::Log(_))
    }
}

fn validate_log_source(store: &ConfigStore) -> Result<LogSourceConfig, ConfigError> {
    let topic = required(store, keys::INPUT_LOG_TOPIC, "an input topic")?;
    let offset = match store.get(keys::INPUT_LOG_OFFSET) {
        None => None,
        Some(raw) => Some(StartOffset::parse(raw).ok_or_else(|| {
            ConfigError::invalid(
                keys::INPUT_LOG_OFFSET,
                raw,
                "-1 (latest), -2 (earliest) or a non-negative offset",
            )
        })?),
    };
    let partitions =
        positive(store, keys::INPUT_LOG_PARTITIONS)?.unwrap_or(keys::DEFAULT_LOG_PARTITIONS);
    let fetch_bytes = match store.parse::<usize>(keys::INPUT_LOG_BATCH, POSITIVE_INTEGER)? {
        Some(0) => return Err(ConfigError::invalid(keys::INPUT_LOG_BATCH, "0", POSITIVE_INTEGER)),
        Some(n) => n,
        None => keys::DEFAULT_LOG_BATCH_BYTES,
    };
    let parallelism = positive(store, keys::INPUT_PARALLELISM)?.unwrap_or(1);
    Ok(LogSourceConfig {
        topic,
        offset,
        partitions,
        fetch_bytes,
        hosts: hosts(store, keys::LOG_HOSTS),
        parallelism,
    })
}

fn blob_start(store: &ConfigStore) -> Result<BlobStart, ConfigError> {
    let raw = store.get_or(keys::INPUT_BLOB_START, "RESUME").trim();
    let start = match raw.to_ascii_uppercase().as_str() {
        "EARLIEST" => BlobStart::Earliest,
        "LATEST" => BlobStart::Latest,
        "RESUME" => BlobStart::Resume,
        "EXPLICIT" => BlobStart::Explicit(required(
            store,
            keys::INPUT_BLOB_MARKER,
            "a marker when the start policy is EXPLICIT",
        )?),
        _ => {
            tracing::warn!(
                key = keys::INPUT_BLOB_START,
                value = raw,
                "Unknown blob start policy, using RESUME"
            );
            BlobStart::Resume
        }
    };
    Ok(start)
}

fn validate_blob_source(store: &ConfigStore) -> Result<SourceConfig, ConfigError> {
    let path = required(store, keys::INPUT_BLOB_PATH, "an input path")?;
    let is_s3 = store
        .get(keys::INPUT_BLOB_TYPE)
        .is_some_and(|t| t.trim().eq_ignore_ascii_case("s3"));

    if is_s3 {
        let bucket = required(store, keys::INPUT_BLOB_S3_BUCKET, "an S3 bucket")?;
        let access_key = required(store, keys::INPUT_BLOB_AWS_KEY, "an AWS access key")?;
        let secret_key = required(store, keys::INPUT_BLOB_AWS_SECRET, "an AWS secret key")?;
        let start = blob_start(store)?;
        let parallelism = positive(store, keys::INPUT_PARALLELISM)?.unwrap_or(1);
        return Ok(SourceConfig::RemoteObjectStore(S3SourceConfig {
            bucket,
            prefix: path,
            endpoint: store
                .get_or(keys::INPUT_BLOB_S3_ENDPOINT, keys::DEFAULT_S3_ENDPOINT)
                .trim()
                .to_string(),
            access_key,
            secret_key,
            start,
            parallelism,
        }));
    }

    let start = blob_start(store)?;
    let parallelism = positive(store, keys::INPUT_PARALLELISM)?.unwrap_or(1);
    Ok(SourceConfig::FileBlob(BlobSourceConfig {
        path: PathBuf::from(path),
        start,
        parallelism,
    }))
}

impl StageConfig for SourceConfig {
    const SECTION: Section = Section::Source;

    fn validate(store: &ConfigStore) -> Result<Self, ConfigError> {
        let is_blob = store
            .get(keys::INPUT_TYPE)
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("blob"));
        if is_blob {
            validate_blob_source(store)
        } else {
            validate_log_source(store).map(Self::Log)
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Log(c) => format!(
                "log source: topic '{}' ({} partitions, offset {}, fetch {} bytes) from {}, parallelism {}",
                c.topic,
                c.partitions,
                c.offset
                    .map_or_else(|| "resume".to_string(), |o| o.to_string()),
                c.fetch_bytes,
                c.hosts.join(","),
                c.parallelism,
            ),
            Self::FileBlob(c) => format!(
                "file blob source: {} (start {}), parallelism {}",
                c.path.display(),
                c.start,
                c.parallelism,
            ),
            Self::RemoteObjectStore(c) => format!(
                "s3 blob source: s3://{}/{} via {} (start {}), parallelism {}",
                c.bucket, c.prefix, c.endpoint, c.start, c.parallelism,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    /// Program and arguments, see [`split_command`].
    pub argv: Vec<String>,
    /// Working directory; `None` inherits the launcher's.
    pub directory: Option<PathBuf>,
    /// Variables added to the inherited environment.
    pub env: BTreeMap<String, String>,
    /// `None` follows the source parallelism.
    pub parallelism: Option<u32>,
}

impl TransformConfig {
    #[must_use]
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Split a command line into arguments.
///
/// Whitespace separates arguments. Single quotes keep their content
/// literally; inside double quotes and unquoted text a backslash escapes the
/// next character. Returns `None` on an unterminated quote or a trailing
/// backslash.
#[must_use]
pub fn split_command(line: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            '\'' => {
                in_arg = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        c => current.push(c),
                    }
                }
            }
            '"' => {
                in_arg = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => current.push(chars.next()?),
                        c => current.push(c),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                current.push(chars.next()?);
            }
            c => {
                in_arg = true;
                current.push(c);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    Some(args)
}

impl StageConfig for TransformConfig {
    const SECTION: Section = Section::Transform;

    fn validate(store: &ConfigStore) -> Result<Self, ConfigError> {
        let command = required(store, keys::TRANSFORM_COMMAND, "a transform command")?;
        let argv = split_command(&command).ok_or_else(|| {
            ConfigError::invalid(
                keys::TRANSFORM_COMMAND,
                &command,
                "a command line with balanced quotes",
            )
        })?;
        let parallelism = positive(store, keys::TRANSFORM_PARALLELISM)?;
        Ok(Self {
            argv,
            directory: store
                .get(keys::TRANSFORM_DIRECTORY)
                .map(|d| PathBuf::from(d.trim())),
            env: store.with_prefix(keys::TRANSFORM_ENV_PREFIX),
            parallelism,
        })
    }

    fn describe(&self) -> String {
        let mut out = format!("transform: `{}`", self.command_line());
        if let Some(dir) = &self.directory {
            let _ = write!(out, " in {}", dir.display());
        }
        if !self.env.is_empty() {
            let names: Vec<&str> = self.env.keys().map(String::as_str).collect();
            let _ = write!(out, " with env {}", names.join(","));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub topic: String,
    /// JSON field whose string value overrides `topic` per record.
    pub topic_field: Option<String>,
    pub hosts: Vec<String>,
}

impl StageConfig for SinkConfig {
    const SECTION: Section = Section::Sink;

    fn validate(store: &ConfigStore) -> Result<Self, ConfigError> {
        let topic = required(store, keys::OUTPUT_LOG_TOPIC, "an output topic")?;
        Ok(Self {
            topic,
            topic_field: store
                .get(keys::OUTPUT_LOG_TOPIC_FIELD)
                .map(|f| f.trim().to_string()),
            hosts: hosts(store, keys::LOG_HOSTS),
        })
    }

    fn describe(&self) -> String {
        match &self.topic_field {
            Some(field) => format!(
                "log sink: topic '{}' (overridden by field '{field}') on {}",
                self.topic,
                self.hosts.join(",")
            ),
            None => format!("log sink: topic '{}' on {}", self.topic, self.hosts.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn store(pairs: &[(&str, &str)]) -> ConfigStore {
        ConfigStore::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn log_source_defaults() {
        let source = SourceConfig::validate(&store(&[(keys::INPUT_LOG_TOPIC, "clicks")])).unwrap();
        let SourceConfig::Log(log) = source else {
            panic!("expected log source");
        };
        assert_eq!(log.topic, "clicks");
        assert_eq!(log.offset, None);
        assert_eq!(log.partitions, 1);
        assert_eq!(log.fetch_bytes, 1_048_576);
        assert_eq!(log.hosts, vec!["localhost".to_string()]);
        assert_eq!(log.parallelism, 1);
    }

    #[rstest]
    #[case("-2", StartOffset::Earliest)]
    #[case("-1", StartOffset::Latest)]
    #[case("0", StartOffset::Explicit(0))]
    #[case("150", StartOffset::Explicit(150))]
    fn log_offsets(#[case] raw: &str, #[case] expected: StartOffset) {
        let source = SourceConfig::validate(&store(&[
            (keys::INPUT_LOG_TOPIC, "t"),
            (keys::INPUT_LOG_OFFSET, raw),
        ]))
        .unwrap();
        let SourceConfig::Log(log) = source else {
            panic!("expected log source");
        };
        assert_eq!(log.offset, Some(expected));
    }

    #[rstest]
    #[case(keys::INPUT_LOG_OFFSET, "-3")]
    #[case(keys::INPUT_LOG_OFFSET, "soon")]
    #[case(keys::INPUT_LOG_PARTITIONS, "0")]
    #[case(keys::INPUT_LOG_BATCH, "big")]
    #[case(keys::INPUT_PARALLELISM, "0")]
    #[case(keys::INPUT_PARALLELISM, "two")]
    fn malformed_log_values(#[case] key: &str, #[case] value: &str) {
        let err = SourceConfig::validate(&store(&[(keys::INPUT_LOG_TOPIC, "t"), (key, value)]))
            .unwrap_err();
        assert_eq!(err.key, key);
    }

    #[test]
    fn unknown_input_type_is_log() {
        let err = SourceConfig::validate(&store(&[(keys::INPUT_TYPE, "kafka")])).unwrap_err();
        assert_eq!(err.key, keys::INPUT_LOG_TOPIC);
    }

    #[test]
    fn blob_source_requires_path() {
        let err = SourceConfig::validate(&store(&[(keys::INPUT_TYPE, "blob")])).unwrap_err();
        assert_eq!(err.key, keys::INPUT_BLOB_PATH);
    }

    #[rstest]
    #[case("EARLIEST", BlobStart::Earliest)]
    #[case("latest", BlobStart::Latest)]
    #[case("RESUME", BlobStart::Resume)]
    #[case("SOMETIMES", BlobStart::Resume)]
    fn blob_start_policies(#[case] raw: &str, #[case] expected: BlobStart) {
        let source = SourceConfig::validate(&store(&[
            (keys::INPUT_TYPE, "blob"),
            (keys::INPUT_BLOB_PATH, "/in"),
            (keys::INPUT_BLOB_START, raw),
        ]))
        .unwrap();
        let SourceConfig::FileBlob(blob) = source else {
            panic!("expected file blob source");
        };
        assert_eq!(blob.start, expected);
    }

    #[test]
    fn explicit_start_requires_marker() {
        let base = [
            (keys::INPUT_TYPE, "blob"),
            (keys::INPUT_BLOB_PATH, "/in"),
            (keys::INPUT_BLOB_START, "EXPLICIT"),
        ];
        let err = SourceConfig::validate(&store(&base)).unwrap_err();
        assert_eq!(err.key, keys::INPUT_BLOB_MARKER);

        let mut with_marker = base.to_vec();
        with_marker.push((keys::INPUT_BLOB_MARKER, "b.log"));
        let SourceConfig::FileBlob(blob) = SourceConfig::validate(&store(&with_marker)).unwrap()
        else {
            panic!("expected file blob source");
        };
        assert_eq!(blob.start, BlobStart::Explicit("b.log".into()));
    }

    #[rstest]
    #[case(&[], keys::INPUT_BLOB_S3_BUCKET)]
    #[case(&[(keys::INPUT_BLOB_S3_BUCKET, "b")], keys::INPUT_BLOB_AWS_KEY)]
    #[case(
        &[(keys::INPUT_BLOB_S3_BUCKET, "b"), (keys::INPUT_BLOB_AWS_KEY, "k")],
        keys::INPUT_BLOB_AWS_SECRET
    )]
    fn s3_required_in_order(#[case] extra: &[(&str, &str)], #[case] missing: &str) {
        let mut pairs = vec![
            (keys::INPUT_TYPE, "blob"),
            (keys::INPUT_BLOB_TYPE, "s3"),
            (keys::INPUT_BLOB_PATH, "logs/"),
        ];
        pairs.extend_from_slice(extra);
        let err = SourceConfig::validate(&store(&pairs)).unwrap_err();
        assert_eq!(err.key, missing);
    }

    #[test]
    fn s3_source_resolves_and_redacts_secret() {
        let source = SourceConfig::validate(&store(&[
            (keys::INPUT_TYPE, "blob"),
            (keys::INPUT_BLOB_TYPE, "s3"),
            (keys::INPUT_BLOB_PATH, "logs/"),
            (keys::INPUT_BLOB_S3_BUCKET, "bucket"),
            (keys::INPUT_BLOB_AWS_KEY, "AKIA"),
            (keys::INPUT_BLOB_AWS_SECRET, "hunter2"),
        ]))
        .unwrap();
        assert!(source.is_blob());
        let SourceConfig::RemoteObjectStore(s3) = &source else {
            panic!("expected s3 source");
        };
        assert_eq!(s3.endpoint, "s3.amazonaws.com");
        assert_eq!(s3.start, BlobStart::Resume);
        assert!(!format!("{s3:?}").contains("hunter2"));
        assert!(!source.describe().contains("hunter2"));
    }

    #[test]
    fn transform_splits_command_and_collects_env() {
        let transform = TransformConfig::validate(&store(&[
            (keys::TRANSFORM_COMMAND, "  ruby  bin/filter.rb --fast "),
            (keys::TRANSFORM_DIRECTORY, "/opt/app"),
            ("lineflow.transform.env.MODE", "prod"),
            (keys::TRANSFORM_PARALLELISM, "4"),
        ]))
        .unwrap();
        assert_eq!(transform.argv, vec!["ruby", "bin/filter.rb", "--fast"]);
        assert_eq!(transform.directory, Some(PathBuf::from("/opt/app")));
        assert_eq!(transform.env.get("MODE").map(String::as_str), Some("prod"));
        assert_eq!(transform.parallelism, Some(4));
        assert!(transform.describe().contains("ruby bin/filter.rb --fast"));
    }

    #[rstest]
    #[case("cat", &["cat"])]
    #[case("sh -c 'echo \"$l\"; echo ---'", &["sh", "-c", "echo \"$l\"; echo ---"])]
    #[case("python3 \"/opt/my scripts/t.py\" --tag=a\\ b", &["python3", "/opt/my scripts/t.py", "--tag=a b"])]
    #[case("run '' x", &["run", "", "x"])]
    #[case("a\"b c\"d", &["ab cd"])]
    fn command_line_honours_quotes(#[case] line: &str, #[case] expected: &[&str]) {
        assert_eq!(split_command(line).unwrap(), expected);
    }

    #[test]
    fn quoted_command_reaches_argv() {
        let transform = TransformConfig::validate(&store(&[(
            keys::TRANSFORM_COMMAND,
            "sh '/tmp/with space/t.sh'",
        )]))
        .unwrap();
        assert_eq!(transform.argv, vec!["sh", "/tmp/with space/t.sh"]);
    }

    #[rstest]
    #[case("sh -c 'echo")]
    #[case("python3 \"unterminated")]
    #[case("trailing\\")]
    fn unbalanced_command_is_invalid(#[case] line: &str) {
        assert!(split_command(line).is_none());
        let err = TransformConfig::validate(&store(&[(keys::TRANSFORM_COMMAND, line)])).unwrap_err();
        assert_eq!(err.key, keys::TRANSFORM_COMMAND);
        assert!(err.message.contains("balanced quotes"));
    }

    #[test]
    fn blank_transform_command_is_missing() {
        let err = TransformConfig::validate(&store(&[(keys::TRANSFORM_COMMAND, "   ")])).unwrap_err();
        assert_eq!(err.key, keys::TRANSFORM_COMMAND);
    }

    #[test]
    fn sink_reads_topic_field_and_hosts() {
        let sink = SinkConfig::validate(&store(&[
            (keys::OUTPUT_LOG_TOPIC, "out"),
            (keys::OUTPUT_LOG_TOPIC_FIELD, "kind"),
            (keys::LOG_HOSTS, "a:9092, b:9092,"),
        ]))
        .unwrap();
        assert_eq!(sink.topic_field.as_deref(), Some("kind"));
        assert_eq!(sink.hosts, vec!["a:9092", "b:9092"]);
        assert!(sink.describe().contains("field 'kind'"));
    }

    #[test]
    fn stage_usage_lists_own_keys() {
        let text = SinkConfig::usage();
        assert!(text.contains(keys::OUTPUT_LOG_TOPIC));
        assert!(!text.contains(keys::TRANSFORM_COMMAND));
    }
}
