// token.rs — Token providers for the CLI.
//
// Neither provider caches: the command runs (or the variable is read) for
// every privileged call.

use async_trait::async_trait;
use rulesync_workflow::{AuthToken, ClientError, TokenProvider};

/// Runs a shell command and uses its trimmed stdout as the token.
pub struct CommandTokenProvider {
    command: String,
}

impl CommandTokenProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for CommandTokenProvider {
    async fn auth_token(&self, _force_refresh: bool) -> Result<AuthToken, ClientError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await
            .map_err(|e| ClientError::auth(format!("cannot run token command: {e}")))?;
        if !output.status.success() {
            tracing::error!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "token command failed"
            );
            return Err(ClientError::auth(format!(
                "token command exited with {}",
                output.status
            )));
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(ClientError::auth("token command printed nothing"));
        }
        Ok(AuthToken::new(token))
    }
}

/// Reads the token from an environment variable.
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn auth_token(&self, _force_refresh: bool) -> Result<AuthToken, ClientError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(AuthToken::new(token.trim())),
            _ => Err(ClientError::auth(format!("{} is not set", self.var))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn command_output_is_trimmed() {
        let provider = CommandTokenProvider::new("echo '  abc123  '");
        assert_eq!(provider.auth_token(true).await.unwrap().secret(), "abc123");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_auth_error() {
        let provider = CommandTokenProvider::new("exit 3");
        assert!(matches!(
            provider.auth_token(true).await,
            Err(ClientError::Auth { .. })
        ));
    }

    #[tokio::test]
    async fn missing_env_var_is_auth_error() {
        let provider = EnvTokenProvider::new("RULESYNC_TEST_TOKEN_THAT_IS_NEVER_SET");
        let err = provider.auth_token(true).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::auth("RULESYNC_TEST_TOKEN_THAT_IS_NEVER_SET is not set")
        );
    }
}
