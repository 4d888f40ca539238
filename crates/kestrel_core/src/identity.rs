use serde::{Deserialize, Serialize};

/// Who this executor is. Resolved once at boot and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorIdentity {
    pub instance_id: String,
    pub region: String,
    pub account_id: String,
    /// Human-readable name; keys the log and result objects.
    pub name: String,
    /// Tag of the task image to run.
    pub image_tag: String,
}

impl ExecutorIdentity {
    pub fn log_key(&self) -> String {
        format!("{}{}", self.name, crate::constants::keys::LOG_SUFFIX)
    }

    pub fn result_key(&self) -> String {
        format!("{}{}", self.name, crate::constants::keys::RESULT_SUFFIX)
    }

    /// Expands `{account_id}`, `{region}` and `{name}` in a container name template.
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{account_id}", &self.account_id)
            .replace("{region}", &self.region)
            .replace("{name}", &self.name)
    }
}

/// The subset of the instance identity document we care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDocument {
    pub instance_id: String,
    pub region: String,
    pub account_id: String,
}
