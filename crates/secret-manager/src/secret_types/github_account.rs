//! GitHub bot accounts: password, two-factor secret and recovery codes.
//!
//! Rotation is operator-driven. A new password is generated and shown; the
//! operator changes it on GitHub and confirms. The two-factor secret and
//! recovery codes are carried over from the stored parts when present and
//! asked for otherwise.

use futures::future::BoxFuture;
use serde::Deserialize;

use super::{SecretType, generate_password, months_from};
use crate::context::RotationContext;
use crate::error::{Error, Result};
use crate::types::{SecretData, SecretReference};

const PASSWORD_LENGTH: usize = 40;

/// Parameters for [`GitHubAccount`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GitHubAccountParameters {
    /// GitHub login of the account.
    pub name: String,
}

/// A GitHub account stored as three parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubAccount;

impl GitHubAccount {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "github-account";

    /// Suffixes of the stored parts, in the order values are returned.
    pub const SUFFIXES: &'static [&'static str] = &["-password", "-secret", "-recovery-codes"];
}

async fn existing_or_prompt(
    context: &RotationContext,
    suffix: &str,
    question: &str,
) -> Result<String> {
    let part = SecretReference::local(format!("{}{suffix}", context.name()));
    if let Some(existing) = context.get_secret_value(&part).await? {
        if !existing.value().is_empty() {
            return Ok(existing.value().to_string());
        }
    }
    let answer = context.console().prompt(question).await?;
    if answer.trim().is_empty() {
        return Err(Error::human_intervention(
            context.name(),
            format!("no value entered for '{}'", part.name),
        ));
    }
    Ok(answer.trim().to_string())
}

impl SecretType for GitHubAccount {
    type Parameters = GitHubAccountParameters;

    fn composite_suffixes(&self) -> &'static [&'static str] {
        Self::SUFFIXES
    }

    fn rotate_values<'a>(
        &'a self,
        parameters: &'a Self::Parameters,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>> {
        Box::pin(async move {
            let name = context.name().to_string();
            if !context.console().is_interactive() {
                return Err(Error::human_intervention(
                    &name,
                    format!(
                        "GitHub account '{}' must be rotated by an operator; rerun interactively",
                        parameters.name
                    ),
                ));
            }

            let secret = existing_or_prompt(
                context,
                "-secret",
                &format!("Two-factor secret for GitHub account '{}'", parameters.name),
            )
            .await?;
            let recovery_codes = existing_or_prompt(
                context,
                "-recovery-codes",
                &format!("Recovery codes for GitHub account '{}'", parameters.name),
            )
            .await?;

            let password = generate_password(PASSWORD_LENGTH);
            let console = context.console();
            console
                .write_line(&format!(
                    "Sign in to https://github.com as '{}' and change the password to:",
                    parameters.name
                ))
                .await?;
            console.write_line(&password).await?;
            if !console.confirm("Has the password been changed?").await? {
                return Err(Error::human_intervention(
                    &name,
                    "operator did not confirm the password change",
                ));
            }

            let now = context.now();
            let next_rotation_on = months_from(now, 6);
            Ok(vec![
                SecretData::new(password, None, next_rotation_on),
                SecretData::new(secret, None, next_rotation_on),
                SecretData::new(recovery_codes, None, next_rotation_on),
            ])
        })
    }
}
