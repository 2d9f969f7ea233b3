//! Page extraction: drive a session through a strategy's navigation flow,
//! snapshot the result page, and apply its parse rules.

pub mod norm;
pub mod rules;

use thiserror::Error;
use tracing::debug;

use crate::driver::{ClickTarget, DriverError, PageSession};
use crate::model::{PropertyRecord, RawFields};
use crate::strategy::{JurisdictionStrategy, Navigation, Submit, TemplateMismatch};
use rules::PageSnapshot;

/// Failure modes of one extraction attempt, before status classification.
#[derive(Debug, Error)]
pub enum ExtractFailure {
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page structure mismatch: {0}")]
    StructureMismatch(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl From<DriverError> for ExtractFailure {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Timeout(ms) => ExtractFailure::Timeout { ms },
            DriverError::Navigation(msg) => ExtractFailure::Navigation(msg),
            DriverError::MissingElement(what) => {
                ExtractFailure::StructureMismatch(format!("element not found: {what}"))
            }
            DriverError::Unsupported(what) => ExtractFailure::Unsupported(what.to_string()),
            DriverError::Browser(msg) => ExtractFailure::Navigation(msg),
        }
    }
}

impl From<TemplateMismatch> for ExtractFailure {
    fn from(err: TemplateMismatch) -> Self {
        ExtractFailure::StructureMismatch(err.to_string())
    }
}

/// Run one extraction attempt on a fresh session: navigate per the strategy,
/// wait for the page to settle, snapshot it, and apply each field's rules.
///
/// Rule application is per-field independent; a field with no matching rule
/// stays `None` in the returned [`RawFields`].
pub async fn extract(
    session: &mut dyn PageSession,
    strategy: &JurisdictionStrategy,
    record: &PropertyRecord,
) -> Result<RawFields, ExtractFailure> {
    navigate(session, strategy, record).await?;

    let text = session.body_text().await?;
    let html = session.html().await?;
    let snapshot = PageSnapshot::new(text, html);

    let mut raw = RawFields::default();
    for field_rules in &strategy.rules {
        if let Some(value) = rules::apply_rules(&snapshot, &field_rules.rules) {
            debug!(
                field = field_rules.field.name(),
                value = %value,
                "rule matched"
            );
            raw.set(field_rules.field, value);
        }
    }
    Ok(raw)
}

async fn navigate(
    session: &mut dyn PageSession,
    strategy: &JurisdictionStrategy,
    record: &PropertyRecord,
) -> Result<(), ExtractFailure> {
    let timeout = strategy.timeout_ms;
    match &strategy.navigation {
        Navigation::DirectUrl { url_template } => {
            let url = match url_template {
                Some(template) => template.replace("{account}", &record.parcel_number),
                None => record.lookup_url.clone(),
            };
            debug!(url = %url, "opening bill page");
            session.open(&url, timeout).await?;
            session.wait_settled(strategy.settle_ms, timeout).await?;
        }
        Navigation::FormSearch {
            template,
            input_selectors,
            submit,
            result_link,
        } => {
            debug!(url = %record.lookup_url, "opening search form");
            session.open(&record.lookup_url, timeout).await?;
            session.wait_settled(strategy.settle_ms, timeout).await?;

            let values = template.split(&record.parcel_number)?;
            if values.len() != input_selectors.len() {
                return Err(ExtractFailure::StructureMismatch(format!(
                    "descriptor has {} input selectors for a {}-field template",
                    input_selectors.len(),
                    values.len()
                )));
            }
            for (selector, value) in input_selectors.iter().zip(&values) {
                if !value.is_empty() {
                    session.fill(selector, value, timeout).await?;
                }
            }

            match submit {
                Submit::Click { selector } => {
                    session
                        .click(&ClickTarget::Selector(selector.clone()), timeout)
                        .await?
                }
                Submit::ClickText { text } => {
                    session
                        .click(&ClickTarget::Text(text.clone()), timeout)
                        .await?
                }
                Submit::Enter { selector } => session.press_enter(selector, timeout).await?,
            }
            session.wait_settled(strategy.settle_ms, timeout).await?;

            // Some sites land on a result list rather than the bill itself.
            if let Some(link) = result_link {
                let selector = link.replace("{account}", &record.parcel_number);
                session
                    .click(&ClickTarget::Selector(selector), timeout)
                    .await?;
                session.wait_settled(strategy.settle_ms, timeout).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_map_to_failures() {
        assert!(matches!(
            ExtractFailure::from(DriverError::Timeout(30_000)),
            ExtractFailure::Timeout { ms: 30_000 }
        ));
        assert!(matches!(
            ExtractFailure::from(DriverError::MissingElement("#txtParcelNumBook".into())),
            ExtractFailure::StructureMismatch(_)
        ));
        assert!(matches!(
            ExtractFailure::from(DriverError::Unsupported("fill over HTTP transport")),
            ExtractFailure::Unsupported(_)
        ));
        assert!(matches!(
            ExtractFailure::from(DriverError::Browser("tab crashed".into())),
            ExtractFailure::Navigation(_)
        ));
    }

    #[test]
    fn template_mismatch_maps_to_structure_mismatch() {
        let err = TemplateMismatch {
            parcel: "214-05".into(),
            expected: 4,
            got: 2,
        };
        assert!(matches!(
            ExtractFailure::from(err),
            ExtractFailure::StructureMismatch(_)
        ));
    }
}
