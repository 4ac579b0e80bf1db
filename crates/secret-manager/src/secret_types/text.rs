//! Values typed in by an operator.

use chrono::{Duration, NaiveDate};
use futures::future::BoxFuture;
use serde::Deserialize;

use super::{SecretType, months_from};
use crate::context::RotationContext;
use crate::error::{Error, Result};
use crate::types::SecretData;

/// Parameters for [`Text`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TextParameters {
    /// Instructions shown to the operator.
    #[serde(default)]
    pub description: Option<String>,
}

/// Asks the operator for the value and its expiry.
///
/// Without an interactive console the rotation needs human intervention.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl Text {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "text";
}

impl SecretType for Text {
    type Parameters = TextParameters;

    fn rotate_values<'a>(
        &'a self,
        parameters: &'a Self::Parameters,
        context: &'a mut RotationContext,
    ) -> BoxFuture<'a, Result<Vec<SecretData>>> {
        Box::pin(async move {
            let name = context.name().to_string();
            let console = context.console();
            if !console.is_interactive() {
                return Err(Error::human_intervention(
                    &name,
                    "value must be entered by an operator; rerun interactively",
                ));
            }
            if let Some(description) = &parameters.description {
                console.write_line(description).await?;
            }

            let value = console.prompt(&format!("Value for '{name}'")).await?;
            if value.is_empty() {
                return Err(Error::human_intervention(&name, "no value was entered"));
            }

            let now = context.now();
            let raw_expiry = console
                .prompt(&format!("Expiry date for '{name}' (YYYY-MM-DD, empty for none)"))
                .await?;
            let expires_on = if raw_expiry.trim().is_empty() {
                None
            } else {
                let date = NaiveDate::parse_from_str(raw_expiry.trim(), "%Y-%m-%d").map_err(|e| {
                    Error::human_intervention(&name, format!("invalid expiry date '{raw_expiry}': {e}"))
                })?;
                date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
            };

            let next_rotation_on = match expires_on {
                Some(expires) => (expires - Duration::days(15)).max(now),
                None => months_from(now, 12),
            };
            Ok(vec![SecretData::new(value, expires_on, next_rotation_on)])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedConsole;
    use crate::error::ErrorKind;
    use crate::secret_types::test_support::{context_at, context_with};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().expect("valid time")
    }

    #[tokio::test]
    async fn non_interactive_needs_an_operator() {
        let (mut ctx, _) = context_at("api-token", now());
        let err = Text
            .rotate_values(&TextParameters::default(), &mut ctx)
            .await
            .expect_err("needs operator");
        assert_eq!(err.kind(), ErrorKind::HumanIntervention);
    }

    #[tokio::test]
    async fn reads_value_and_expiry() {
        let console = Arc::new(ScriptedConsole::new(["typed-value", "2026-12-31"]));
        let (mut ctx, _) = context_with("api-token", now(), BTreeMap::new(), console.clone());
        let params = TextParameters {
            description: Some("Create a token at https://example.test".into()),
        };

        let values = Text.rotate_values(&params, &mut ctx).await.expect("rotate");
        assert_eq!(values[0].value(), "typed-value");
        assert_eq!(
            values[0].expires_on,
            Utc.with_ymd_and_hms(2026, 12, 31, 0, 0, 0).single()
        );
        assert_eq!(
            values[0].next_rotation_on,
            Utc.with_ymd_and_hms(2026, 12, 16, 0, 0, 0).single().expect("valid time")
        );
        assert!(console.transcript()[0].contains("example.test"));
    }

    #[tokio::test]
    async fn no_expiry_rotates_yearly() {
        let console = Arc::new(ScriptedConsole::new(["v", ""]));
        let (mut ctx, _) = context_with("api-token", now(), BTreeMap::new(), console);
        let values = Text
            .rotate_values(&TextParameters::default(), &mut ctx)
            .await
            .expect("rotate");
        assert_eq!(values[0].expires_on, None);
        assert_eq!(
            values[0].next_rotation_on,
            Utc.with_ymd_and_hms(2027, 6, 1, 0, 0, 0).single().expect("valid time")
        );
    }

    #[tokio::test]
    async fn empty_value_is_refused() {
        let console = Arc::new(ScriptedConsole::new([""]));
        let (mut ctx, _) = context_with("api-token", now(), BTreeMap::new(), console);
        assert!(Text.rotate_values(&TextParameters::default(), &mut ctx).await.is_err());
    }
}
