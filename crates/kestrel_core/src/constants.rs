/// Instance tag keys read through the [`MetadataSource`](crate::traits::MetadataSource).
pub mod tags {
    pub const NAME: &str = "Name";
    pub const INSTANCE_NAME: &str = "INSTANCE_NAME";
    pub const IMAGE_TAG: &str = "IMAGE_TAG";

    pub const TASK_PROMPT: &str = "TASK_PROMPT";
    pub const TASK_KEY: &str = "TASK_KEY";
    pub const SCRIPT_KEY: &str = "SCRIPT_KEY";
    pub const SCRAPERS_KEY: &str = "SCRAPERS_KEY";
    pub const TASK_ID: &str = "TASK_ID";
    pub const SCRAPER: &str = "SCRAPER";

    pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
}

/// Paths as seen from inside the task container.
pub mod container {
    pub const WORKSPACE: &str = "/workspace";
    pub const RESULT_PATH: &str = "/workspace/result.json";
    pub const RESULT_PATH_ENV: &str = "KESTREL_RESULT_PATH";
}

/// Object key suffixes and file names.
pub mod keys {
    pub const LOG_SUFFIX: &str = ".log";
    pub const RESULT_SUFFIX: &str = "-result.json";
    pub const RESULT_FILE: &str = "result.json";
}

pub mod defaults {
    pub const LOGS_CONTAINER: &str = "ai-executor-logs-{account_id}";
    pub const JOBS_CONTAINER: &str = "ai-executor-results-{account_id}";
    pub const REPOSITORY: &str = "ai-executor-ec2";
    pub const IMAGE_TAG: &str = "latest";
    pub const PAYLOAD_FILE: &str = "automation_task.py";
}
