//! Names and defaults shared across the crate.

/// Application name, used for state directories and image tags.
pub const APP_NAME: &str = "possum";

/// Descriptor resource type for packageable functions.
pub const FUNCTION_TYPE: &str = "AWS::Serverless::Function";

/// Descriptor resource type for API definitions.
pub const API_TYPE: &str = "AWS::Serverless::Api";

/// Key of the `Globals` section entry holding function defaults.
pub const GLOBAL_FUNCTION_KEY: &str = "Function";

/// Runtime prefix of the managed language this tool packages.
pub const TARGET_RUNTIME_PREFIX: &str = "python";

/// Source file extension appended to a handler's module name.
pub const HANDLER_FILE_EXTENSION: &str = "py";

/// Files whose presence in a unit's source marks a dependency manifest.
pub const MANIFEST_FILES: &[&str] = &["Pipfile", "Pipfile.lock", "requirements.txt"];

/// Stem of the default run prefix (`possum-<unix seconds>`).
pub const RUN_PREFIX_STEM: &str = "possum";

/// Directory inside the build root where artifacts are staged for upload.
pub const STAGING_DIR: &str = "s3_artifacts";

/// Subdirectory of the state directory holding fingerprint cache files.
pub const CACHE_DIR: &str = "cache";

/// Suffix given to inline API definitions copied into the staging area.
pub const API_DEFINITION_SUFFIX: &str = "swagger";

/// Default container image used for isolated runs.
pub const DEFAULT_IMAGE: &str = "possum:latest";

/// Working directory of the project inside the container.
pub const CONTAINER_WORKDIR: &str = "/var/task";

/// Default timeout for a single external process call, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15 * 60;
