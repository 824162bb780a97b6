use super::{DEFAULT_CLI_USER, init_common_components};

#[derive(Debug, Clone)]
pub struct ResetInput {
    pub user: Option<String>,
}

/// Forgets the stored conversation of one user.
#[derive(Debug, Clone, Copy)]
pub struct ResetStrategy;

impl super::CommandStrategy for ResetStrategy {
    type Input = ResetInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let common = init_common_components().await?;
        let user = input.user.as_deref().unwrap_or(DEFAULT_CLI_USER);

        common.service.reset(user).await?;
        println!("Conversation history for {user} cleared");
        Ok(())
    }
}
