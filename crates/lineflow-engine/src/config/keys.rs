//! Every configuration key lineflow understands, and the usage text built from them.

use std::fmt::Write as _;

pub const PIPELINE: &str = "lineflow.pipeline";
pub const LOG_HOSTS: &str = "lineflow.log.hosts";
pub const COORDINATOR_HOSTS: &str = "lineflow.coordinator.hosts";

pub const INPUT_TYPE: &str = "lineflow.input.type";
pub const INPUT_PARALLELISM: &str = "lineflow.input.parallelism";
pub const INPUT_LOG_TOPIC: &str = "lineflow.input.log.topic";
pub const INPUT_LOG_OFFSET: &str = "lineflow.input.log.offset";
pub const INPUT_LOG_PARTITIONS: &str = "lineflow.input.log.partitions";
pub const INPUT_LOG_BATCH: &str = "lineflow.input.log.batch";
pub const INPUT_BLOB_TYPE: &str = "lineflow.input.blob.type";
pub const INPUT_BLOB_PATH: &str = "lineflow.input.blob.path";
pub const INPUT_BLOB_START: &str = "lineflow.input.blob.start";
pub const INPUT_BLOB_MARKER: &str = "lineflow.input.blob.marker";
pub const INPUT_BLOB_S3_BUCKET: &str = "lineflow.input.blob.s3_bucket";
pub const INPUT_BLOB_S3_ENDPOINT: &str = "lineflow.input.blob.s3_endpoint";
pub const INPUT_BLOB_AWS_KEY: &str = "lineflow.input.blob.aws_key";
pub const INPUT_BLOB_AWS_SECRET: &str = "lineflow.input.blob.aws_secret";

pub const TRANSFORM_COMMAND: &str = "lineflow.transform.command";
pub const TRANSFORM_DIRECTORY: &str = "lineflow.transform.directory";
pub const TRANSFORM_ENV_PREFIX: &str = "lineflow.transform.env.";
pub const TRANSFORM_PARALLELISM: &str = "lineflow.transform.parallelism";

pub const OUTPUT_LOG_TOPIC: &str = "lineflow.output.log.topic";
pub const OUTPUT_LOG_TOPIC_FIELD: &str = "lineflow.output.log.topic_field";

pub const RUNTIME_DEBUG: &str = "lineflow.runtime.debug";
pub const RUNTIME_MAX_PENDING: &str = "lineflow.runtime.max_pending";

pub const LOCAL_DIR: &str = "lineflow.local.dir";

pub const DEFAULT_HOSTS: &str = "localhost";
pub const DEFAULT_LOG_PARTITIONS: u32 = 1;
pub const DEFAULT_LOG_BATCH_BYTES: usize = 1_048_576;
pub const DEFAULT_S3_ENDPOINT: &str = "s3.amazonaws.com";
pub const DEFAULT_MAX_PENDING: usize = 1;
pub const DEFAULT_LOCAL_DIR: &str = "lineflow-data";

/// Key group used to lay out the usage text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    General,
    Source,
    Transform,
    Sink,
    Runtime,
}

impl Section {
    const ALL: [Section; 5] = [
        Section::General,
        Section::Source,
        Section::Transform,
        Section::Sink,
        Section::Runtime,
    ];

    fn title(self) -> &'static str {
        match self {
            Self::General => "General options",
            Self::Source => "Source options",
            Self::Transform => "Transform options",
            Self::Sink => "Sink options",
            Self::Runtime => "Runtime options",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDefault {
    Required,
    Value(&'static str),
    /// Default depends on other keys; the text explains it.
    Derived(&'static str),
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    pub key: &'static str,
    pub section: Section,
    pub description: &'static str,
    pub default: KeyDefault,
}

const fn spec(
    key: &'static str,
    section: Section,
    description: &'static str,
    default: KeyDefault,
) -> KeySpec {
    KeySpec {
        key,
        section,
        description,
        default,
    }
}

/// The key registry, in display order.
pub const REGISTRY: &[KeySpec] = &[
    spec(PIPELINE, Section::General, "Name of the pipeline", KeyDefault::Required),
    spec(
        LOG_HOSTS,
        Section::General,
        "Comma-separated partitioned-log broker hosts",
        KeyDefault::Value(DEFAULT_HOSTS),
    ),
    spec(
        COORDINATOR_HOSTS,
        Section::General,
        "Comma-separated coordination service hosts",
        KeyDefault::Value(DEFAULT_HOSTS),
    ),
    spec(
        INPUT_TYPE,
        Section::Source,
        "Input kind: log or blob",
        KeyDefault::Value("log"),
    ),
    spec(
        INPUT_PARALLELISM,
        Section::Source,
        "Number of source instances",
        KeyDefault::Value("1"),
    ),
    spec(INPUT_LOG_TOPIC, Section::Source, "Input topic", KeyDefault::Required),
    spec(
        INPUT_LOG_OFFSET,
        Section::Source,
        "Start offset: -1 latest, -2 earliest, n explicit",
        KeyDefault::Derived("stored cursor, else -1"),
    ),
    spec(
        INPUT_LOG_PARTITIONS,
        Section::Source,
        "Number of input partitions",
        KeyDefault::Value("1"),
    ),
    spec(
        INPUT_LOG_BATCH,
        Section::Source,
        "Fetch size in bytes",
        KeyDefault::Value("1048576"),
    ),
    spec(
        INPUT_BLOB_TYPE,
        Section::Source,
        "Blob store kind: file or s3",
        KeyDefault::Value("file"),
    ),
    spec(
        INPUT_BLOB_PATH,
        Section::Source,
        "Directory or key prefix to read",
        KeyDefault::Required,
    ),
    spec(
        INPUT_BLOB_START,
        Section::Source,
        "Start policy: EARLIEST, LATEST, EXPLICIT or RESUME",
        KeyDefault::Value("RESUME"),
    ),
    spec(
        INPUT_BLOB_MARKER,
        Section::Source,
        "Marker to start from when the start policy is EXPLICIT",
        KeyDefault::None,
    ),
    spec(
        INPUT_BLOB_S3_BUCKET,
        Section::Source,
        "S3 bucket",
        KeyDefault::Required,
    ),
    spec(
        INPUT_BLOB_S3_ENDPOINT,
        Section::Source,
        "S3 endpoint",
        KeyDefault::Value(DEFAULT_S3_ENDPOINT),
    ),
    spec(
        INPUT_BLOB_AWS_KEY,
        Section::Source,
        "AWS access key",
        KeyDefault::Required,
    ),
    spec(
        INPUT_BLOB_AWS_SECRET,
        Section::Source,
        "AWS secret key",
        KeyDefault::Required,
    ),
    spec(
        TRANSFORM_COMMAND,
        Section::Transform,
        "Command line of the transform program; quote arguments containing spaces",
        KeyDefault::Required,
    ),
    spec(
        TRANSFORM_DIRECTORY,
        Section::Transform,
        "Working directory of the transform program",
        KeyDefault::Derived("current directory"),
    ),
    spec(
        "lineflow.transform.env.<NAME>",
        Section::Transform,
        "Environment variable NAME passed to the transform program",
        KeyDefault::None,
    ),
    spec(
        TRANSFORM_PARALLELISM,
        Section::Transform,
        "Number of transform instances",
        KeyDefault::Derived("source parallelism"),
    ),
    spec(OUTPUT_LOG_TOPIC, Section::Sink, "Output topic", KeyDefault::Required),
    spec(
        OUTPUT_LOG_TOPIC_FIELD,
        Section::Sink,
        "JSON field whose string value overrides the output topic per record",
        KeyDefault::None,
    ),
    spec(
        RUNTIME_DEBUG,
        Section::Runtime,
        "Log at debug level",
        KeyDefault::Value("false"),
    ),
    spec(
        RUNTIME_MAX_PENDING,
        Section::Runtime,
        "Records in flight per pipeline edge",
        KeyDefault::Value("1"),
    ),
    spec(
        LOCAL_DIR,
        Section::Runtime,
        "Data directory of the local runtime",
        KeyDefault::Value(DEFAULT_LOCAL_DIR),
    ),
];

/// Look up a key in the registry.
#[must_use]
pub fn lookup(key: &str) -> Option<&'static KeySpec> {
    REGISTRY.iter().find(|s| s.key == key)
}

/// Usage lines for the keys of one section.
#[must_use]
pub fn section_usage(section: Section) -> String {
    let width = REGISTRY.iter().map(|s| s.key.len()).max().unwrap_or(0);
    let mut out = format!("{}:\n", section.title());
    for s in REGISTRY.iter().filter(|s| s.section == section) {
        let default = match s.default {
            KeyDefault::Required => " [required]".to_string(),
            KeyDefault::Value(v) | KeyDefault::Derived(v) => format!(" (default: {v})"),
            KeyDefault::None => String::new(),
        };
        let _ = writeln!(out, "  {:<width$}  {}{default}", s.key, s.description);
    }
    out
}

/// Usage text listing every key grouped by section.
#[must_use]
pub fn usage() -> String {
    let mut out = String::from("Usage: lineflow [--log-level LEVEL] [--describe] -D key=value ...\n");
    for section in Section::ALL {
        out.push('\n');
        out.push_str(&section_usage(section));
    }
    out
}
