use anyhow::{Context, Result};
use bpaf::Bpaf;
use hub_catalog::types::HealthStatus;
use hub_catalog::{ClientTrait, HubQueries};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Health,
    Readiness,
}

impl ProbeKind {
    fn endpoint(self) -> &'static str {
        match self {
            ProbeKind::Health => "/healthz",
            ProbeKind::Readiness => "/readyz",
        }
    }
}

/// Query a probe endpoint of the hub API
#[derive(Debug, Clone, Bpaf)]
pub struct Probe {
    /// Print the probe response as JSON
    #[bpaf(long)]
    pub json: bool,
}

impl Probe {
    #[instrument(name = "probe", skip_all, fields(kind = ?kind, json = self.json))]
    pub async fn handle<C: ClientTrait + 'static>(
        self,
        queries: &HubQueries<C>,
        kind: ProbeKind,
    ) -> Result<()> {
        let client = queries.client();
        let status = match kind {
            ProbeKind::Health => client.health().await,
            ProbeKind::Readiness => client.readiness().await,
        }
        .with_context(|| format!("probe '{}' failed", kind.endpoint()))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        println!("{}", render_status(kind, status.as_ref()));
        Ok(())
    }
}

fn render_status(kind: ProbeKind, status: Option<&HealthStatus>) -> String {
    match status {
        Some(HealthStatus { status, timestamp }) => {
            format!("{}: {status} (at {timestamp})", kind.endpoint())
        },
        None => format!("{}: responded without a status", kind.endpoint()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn status_names_its_endpoint() {
        let status = HealthStatus {
            status: "ok".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(
            render_status(ProbeKind::Readiness, Some(&status)),
            "/readyz: ok (at 2026-01-01T00:00:00Z)"
        );
        assert_eq!(
            render_status(ProbeKind::Health, None),
            "/healthz: responded without a status"
        );
    }
}
