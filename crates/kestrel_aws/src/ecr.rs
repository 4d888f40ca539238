use aws_sdk_ecr::Client as EcrClient;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use kestrel_core::prelude::*;
use tracing::debug;

/// [`RegistryAuth`] that logs in to ECR registries with the instance role.
/// Other registries are pulled anonymously.
#[derive(Clone, Debug)]
pub struct EcrRegistryAuth {
    ecr: EcrClient,
}

impl EcrRegistryAuth {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            ecr: EcrClient::new(config),
        }
    }
}

/// `<account>.dkr.ecr.<region>.amazonaws.com`
pub fn is_ecr_registry(registry: &str) -> bool {
    let host = registry
        .trim_start_matches("https://")
        .split('/')
        .next()
        .unwrap_or_default();
    host.contains(".dkr.ecr.") && host.ends_with(".amazonaws.com")
}

/// Decodes an ECR authorization token (`base64("AWS:<password>")`).
pub fn decode_token(token: &str) -> Result<(String, String), RuntimeError> {
    let raw = STANDARD
        .decode(token)
        .map_err(|e| RuntimeError::Pull(format!("Invalid ECR token encoding: {e}")))?;
    let raw = String::from_utf8(raw)
        .map_err(|e| RuntimeError::Pull(format!("Invalid ECR token text: {e}")))?;

    raw.split_once(':')
        .map(|(user, pass)| (user.to_string(), pass.to_string()))
        .ok_or_else(|| RuntimeError::Pull("ECR token is missing a ':' separator".into()))
}

impl RegistryAuth for EcrRegistryAuth {
    async fn credentials(
        &self,
        registry: &str,
    ) -> Result<Option<RegistryCredentials>, RuntimeError> {
        if !is_ecr_registry(registry) {
            debug!(registry, "Not an ECR registry, pulling anonymously");
            return Ok(None);
        }

        let output = self
            .ecr
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| RuntimeError::Pull(format!("ECR GetAuthorizationToken failed: {e}")))?;

        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| RuntimeError::Pull("ECR returned no authorization data".into()))?;

        let token = data
            .authorization_token()
            .ok_or_else(|| RuntimeError::Pull("ECR authorization token missing".into()))?;

        let (username, password) = decode_token(token)?;
        let server = data
            .proxy_endpoint()
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://{registry}"));

        Ok(Some(RegistryCredentials {
            username,
            password: SecretString::new(password),
            server,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_ecr_hosts() {
        assert!(is_ecr_registry("123456789012.dkr.ecr.us-east-1.amazonaws.com"));
        assert!(is_ecr_registry(
            "https://123456789012.dkr.ecr.eu-west-1.amazonaws.com"
        ));
        assert!(!is_ecr_registry("ghcr.io"));
        assert!(!is_ecr_registry("docker.io/library"));
    }

    #[test]
    fn decodes_authorization_token() {
        let token = STANDARD.encode("AWS:eyJwYXlsb2FkIjoi");
        let (user, pass) = decode_token(&token).unwrap();
        assert_eq!(user, "AWS");
        assert_eq!(pass, "eyJwYXlsb2FkIjoi");
    }

    #[test]
    fn rejects_token_without_separator() {
        let token = STANDARD.encode("nocolon");
        assert!(decode_token(&token).is_err());
    }
}
